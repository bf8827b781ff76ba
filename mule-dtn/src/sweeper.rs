//! The expiration sweeper: a periodic pass over the store deleting every
//! bundle whose lifetime has lapsed.

use super::*;
use crate::metrics::Metrics;
use crate::store::Store;
use std::time::Duration;

pub(crate) async fn run(
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    cancel_token: tokio_util::sync::CancellationToken,
    period: Duration,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = cancel_token.cancelled() => break,
        }
        sweep_once(&store, &metrics).await;
    }
    trace!("Sweeper stopped");
}

async fn sweep_once(store: &Store, metrics: &Metrics) {
    let now = now_secs();
    for bundle in store.snapshot() {
        if !bundle.has_expired(now) {
            continue;
        }
        debug!("Removing expired bundle {}", bundle.id);
        match store.delete(&bundle.id).await {
            Ok(true) => metrics.bundles_expired(),
            // A racing deleter got there first; it did the counting
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to delete expired bundle {}: {e}", bundle.id);
                metrics.store_errors();
            }
        }
    }
}
