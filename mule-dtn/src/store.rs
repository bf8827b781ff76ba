//! Durable bundle store: one file per bundle under the storage directory,
//! filename = bundle id, contents = the canonical serialized image.
//!
//! An in-memory index fronts the directory so lookups and duplicate
//! checks never touch the disk. Writes go through the usual
//! write-temp / fsync / rename sequence so a crash leaves either the old
//! image or the new one, never a torn file.

use super::*;
use crate::bundle::{Bundle, BundleId};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TMP_EXTENSION: &str = "tmp";

/// Outcome of an idempotent [`Store::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    AlreadyPresent,
}

pub struct Store {
    root: PathBuf,
    index: Mutex<BTreeMap<BundleId, Bundle>>,
}

impl Store {
    /// Open the store rooted at `root`, creating the directory if needed
    /// and rehydrating the index from any bundles a previous process left
    /// behind. Fatal errors here mean the node cannot run.
    pub async fn open(root: &Path) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(root).await?;
        info!("Using bundle store directory: {}", root.display());

        let root = root.to_path_buf();
        let scan_root = root.clone();
        let index = tokio::task::spawn_blocking(move || rehydrate(&scan_root))
            .await
            .expect("store rehydration task panicked")?;

        if !index.is_empty() {
            info!("Recovered {} stored bundle(s)", index.len());
        }

        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    fn bundle_path(&self, id: &BundleId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Idempotent insert. The linearization point is the index insert: of
    /// two concurrent puts with the same id exactly one returns `Stored`.
    pub async fn put(&self, bundle: &Bundle) -> std::io::Result<PutOutcome> {
        {
            let mut index = self.index.lock().expect("store index poisoned");
            if index.contains_key(&bundle.id) {
                return Ok(PutOutcome::AlreadyPresent);
            }
            index.insert(bundle.id.clone(), bundle.clone());
        }

        if let Err(e) = self.write_image(bundle).await {
            // Roll the reservation back so a later retry can re-insert
            self.index
                .lock()
                .expect("store index poisoned")
                .remove(&bundle.id);
            return Err(e);
        }
        Ok(PutOutcome::Stored)
    }

    /// Replace the stored image of an already-known bundle (the forward
    /// image produced by the dispatcher).
    pub async fn update(&self, bundle: &Bundle) -> std::io::Result<()> {
        self.index
            .lock()
            .expect("store index poisoned")
            .insert(bundle.id.clone(), bundle.clone());
        self.write_image(bundle).await
    }

    async fn write_image(&self, bundle: &Bundle) -> std::io::Result<()> {
        let path = self.bundle_path(&bundle.id);
        let data = codec::encode(bundle);

        // Sync I/O on a blocking thread, as a unit, to keep the
        // write/fsync/rename sequence linear
        tokio::task::spawn_blocking(move || {
            let mut tmp = path.clone();
            tmp.set_extension(TMP_EXTENSION);

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            if let Err(e) = file.write_all(&data).and_then(|_| file.sync_all()) {
                _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
            drop(file);

            if let Err(e) = std::fs::rename(&tmp, &path) {
                _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
            Ok(())
        })
        .await
        .expect("store write task panicked")
    }

    pub fn get(&self, id: &BundleId) -> Option<Bundle> {
        self.index
            .lock()
            .expect("store index poisoned")
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &BundleId) -> bool {
        self.index
            .lock()
            .expect("store index poisoned")
            .contains_key(id)
    }

    /// Best-effort delete; a missing bundle is not an error. Returns
    /// whether the bundle was still known, so racing deleters can tell
    /// which one of them actually removed it.
    pub async fn delete(&self, id: &BundleId) -> std::io::Result<bool> {
        let was_known = self
            .index
            .lock()
            .expect("store index poisoned")
            .remove(id)
            .is_some();
        match tokio::fs::remove_file(self.bundle_path(id)).await {
            Ok(()) => Ok(was_known),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(was_known),
            Err(e) => Err(e),
        }
    }

    /// A stable snapshot of the stored bundles at the time of the call.
    /// Inserts and deletes that race the snapshot may or may not appear.
    pub fn snapshot(&self) -> Vec<Bundle> {
        self.index
            .lock()
            .expect("store index poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.index.lock().expect("store index poisoned").len()
    }
}

/// Scan the storage directory: drop temp-file litter, decode everything
/// else, and remove files that no longer parse.
fn rehydrate(root: &Path) -> std::io::Result<BTreeMap<BundleId, Bundle>> {
    let mut index = BTreeMap::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();

        // Interrupted writes from a previous run
        if path.extension().is_some_and(|ext| ext == TMP_EXTENSION) {
            warn!("Removing stale temp file {}", path.display());
            _ = std::fs::remove_file(&path);
            continue;
        }

        let data = std::fs::read(&path)?;
        match codec::decode(&data) {
            Ok(bundle) => {
                index.insert(bundle.id.clone(), bundle);
            }
            Err(e) => {
                warn!("Discarding undecodable bundle file {}: {e}", path.display());
                _ = std::fs::remove_file(&path);
            }
        }
    }
    Ok(index)
}
