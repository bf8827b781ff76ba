//! The delivery log: one line-delimited JSON record per locally
//! delivered bundle, append-only, suitable for end-to-end latency
//! analysis after a run.

use super::*;
use crate::bundle::{BundleId, Eid};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The end-to-end observation emitted when a bundle reaches its
/// destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub bundle_id: BundleId,
    pub source: Eid,
    /// Seconds between origin `created_at` and local delivery.
    pub e2e_delay: f64,
    pub hop_count: u32,
    pub path: Vec<Eid>,
    /// Seconds since the epoch at delivery.
    pub delivered_at: f64,
}

pub(crate) struct DeliveryLog {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl DeliveryLog {
    /// The log file is created lazily, on the first delivery, so relay
    /// nodes never leave an empty log behind.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    pub async fn append(&self, record: &DeliveryRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).expect("delivery record serialization failed");
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            info!("Writing delivery records to {}", self.path.display());
            *guard = Some(file);
        }
        let file = guard.as_mut().expect("delivery log just opened");
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deliveries.json");
        let log = DeliveryLog::new(path.clone());

        let record = DeliveryRecord {
            bundle_id: "00112233445566778899aabbccddeeff".parse().unwrap(),
            source: "probe".parse().unwrap(),
            e2e_delay: 2.25,
            hop_count: 2,
            path: vec!["probe".parse().unwrap(), "relay".parse().unwrap()],
            delivered_at: 1_700_000_002.25,
        };
        log.append(&record).await.unwrap();
        log.append(&record).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DeliveryRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, record);
    }
}
