use super::*;
use crate::delivery::DeliveryRecord;

impl Dispatcher {
    /// Receive-side entrypoint, called by the listener for every decoded
    /// inbound bundle. Returns promptly: the store write happens inline,
    /// transmission is queued.
    pub async fn on_received(self: &Arc<Self>, bundle: Bundle) {
        if bundle.has_expired(now_secs()) {
            debug!("Bundle {} expired in flight, dropping", bundle.id);
            self.metrics.bundles_expired();
            return;
        }

        // The put doubles as the duplicate check: of two concurrent
        // receives of the same id exactly one sees Stored
        match self.store.put(&bundle).await {
            Ok(PutOutcome::AlreadyPresent) => {
                trace!("Duplicate bundle {}, dropping", bundle.id);
                self.metrics.bundles_duplicate();
                return;
            }
            Ok(PutOutcome::Stored) => {}
            Err(e) => {
                // Without a stored image we can neither dedup nor survive
                // a crash; drop and let the upstream hop retry
                error!("Failed to store received bundle {}: {e}", bundle.id);
                self.metrics.store_errors();
                return;
            }
        }
        self.metrics.bundles_received();

        if bundle.destination == self.node_id {
            self.deliver_local(&bundle).await;
        } else {
            self.enqueue_forward(&bundle.id);
        }
    }

    /// Local delivery: write the end-to-end record, notify the
    /// application hook. The stored bundle is retained until its lifetime
    /// lapses so retransmissions keep deduplicating against it.
    pub(super) async fn deliver_local(&self, bundle: &Bundle) {
        let now = now_secs();
        let record = DeliveryRecord {
            bundle_id: bundle.id.clone(),
            source: bundle.source.clone(),
            e2e_delay: (now - bundle.created_at).max(0.0),
            hop_count: bundle.hop_count,
            path: bundle.path.clone(),
            delivered_at: now,
        };

        info!(
            "Delivered bundle {} from {} after {:.2}s over {} hop(s)",
            record.bundle_id, record.source, record.e2e_delay, record.hop_count
        );

        if let Err(e) = self.delivery_log.append(&record).await {
            error!("Failed to log delivery of {}: {e}", record.bundle_id);
            self.metrics.store_errors();
        }

        if let Some(application) = &self.application {
            application.on_delivery(bundle, &record).await;
        }
        self.metrics.bundles_delivered();
    }
}
