use super::*;

impl Dispatcher {
    /// Periodic store re-sweep: re-queue every stored, unexpired,
    /// non-local bundle that is not already in flight. This is how the
    /// node recovers after a restart and how it rides out long neighbor
    /// outages. The first pass runs immediately.
    pub(crate) async fn run_resweep(self: Arc<Self>, period: std::time::Duration) {
        loop {
            self.resweep_once();
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = self.cancel_token.cancelled() => break,
            }
        }
        trace!("Re-sweep stopped");
    }

    fn resweep_once(&self) {
        let now = now_secs();
        let snapshot = self.store.snapshot();

        // Drop forwarded-marks for bundles the sweeper has collected
        {
            let current: std::collections::HashSet<_> =
                snapshot.iter().map(|b| b.id.clone()).collect();
            self.forwarded
                .lock()
                .expect("forwarded set poisoned")
                .retain(|id| current.contains(id));
        }

        let mut requeued = 0usize;
        for bundle in snapshot {
            // Delivered bundles are retained purely for deduplication
            if bundle.destination == self.node_id {
                continue;
            }
            // Expired bundles are the sweeper's to collect
            if bundle.has_expired(now) {
                continue;
            }
            // Already-forwarded bundles are retained dedup shields
            if self
                .forwarded
                .lock()
                .expect("forwarded set poisoned")
                .contains(&bundle.id)
            {
                continue;
            }
            if self.enqueue_forward(&bundle.id) {
                requeued += 1;
            }
        }
        if requeued > 0 {
            debug!("Re-queued {requeued} stored bundle(s) for transmission");
        }
    }
}
