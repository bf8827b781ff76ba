//! The forwarding engine: accepts locally submitted and received
//! bundles, decides local delivery versus forwarding, and drives
//! transmission to the next hop with bounded workers and retry.

use super::*;
use crate::bundle::{Bundle, BundleId, Eid};
use crate::config::Config;
use crate::delivery::DeliveryLog;
use crate::metrics::Metrics;
use crate::neighbors::NeighborTable;
use crate::service::Application;
use crate::store::{PutOutcome, Store};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

mod forward;
mod ingress;
mod resweep;

/// A queued transmission: the bundle is looked up fresh from the store at
/// send time, so the queue never carries stale images.
pub(crate) struct ForwardEntry {
    id: BundleId,
    /// Failed attempts so far; drives the backoff schedule.
    attempt: u32,
}

pub(crate) struct Dispatcher {
    node_id: Eid,
    store: Arc<Store>,
    neighbors: Arc<NeighborTable>,
    metrics: Arc<Metrics>,
    delivery_log: DeliveryLog,
    application: Option<Arc<dyn Application>>,

    cancel_token: tokio_util::sync::CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,

    forward_tx: flume::Sender<ForwardEntry>,
    /// Bundles queued, transmitting, or sleeping between retries. Guards
    /// against the re-sweep enqueuing a bundle twice.
    in_flight: Mutex<HashSet<BundleId>>,
    /// Bundles already transmitted successfully. Their stored images stay
    /// behind as dedup shields and must not be re-queued by the re-sweep.
    forwarded: Mutex<HashSet<BundleId>>,

    default_lifetime: Duration,
    max_frame: usize,
    connect_timeout: Duration,
    retry_initial: Duration,
    retry_cap: Duration,
}

impl Dispatcher {
    /// Build the dispatcher and start its worker pool.
    pub fn new(
        config: &Config,
        store: Arc<Store>,
        neighbors: Arc<NeighborTable>,
        metrics: Arc<Metrics>,
        application: Option<Arc<dyn Application>>,
        cancel_token: tokio_util::sync::CancellationToken,
        task_tracker: tokio_util::task::TaskTracker,
    ) -> Arc<Self> {
        let (forward_tx, forward_rx) = flume::unbounded();

        let dispatcher = Arc::new(Self {
            node_id: config.node_id.clone(),
            store,
            neighbors,
            metrics,
            delivery_log: DeliveryLog::new(config.delivery_log_path()),
            application,
            cancel_token,
            task_tracker,
            forward_tx,
            in_flight: Mutex::new(HashSet::new()),
            forwarded: Mutex::new(HashSet::new()),
            default_lifetime: config.default_lifetime,
            max_frame: config.max_frame_bytes.get(),
            connect_timeout: config.connect_timeout,
            retry_initial: config.retry_initial,
            retry_cap: config.retry_cap,
        });

        dispatcher.spawn_workers(forward_rx, config.forward_workers.get());
        dispatcher
    }

    /// Create, persist and queue a new bundle originating here. This is
    /// the application submission entrypoint; it always yields a bundle
    /// id, the delivery attempt itself is best-effort.
    pub async fn submit(
        self: &Arc<Self>,
        destination: Eid,
        payload: Bytes,
        lifetime: Option<Duration>,
    ) -> BundleId {
        let lifetime = lifetime.unwrap_or(self.default_lifetime).as_secs().max(1);
        let bundle = Bundle::new(self.node_id.clone(), destination, payload, lifetime);
        debug!("Submitted bundle {} for {}", bundle.id, bundle.destination);

        match self.store.put(&bundle).await {
            Ok(PutOutcome::Stored | PutOutcome::AlreadyPresent) => {}
            Err(e) => {
                // Per-bundle failure: this bundle is lost, the node keeps
                // serving all others
                error!("Failed to persist submitted bundle {}: {e}", bundle.id);
                self.metrics.store_errors();
                self.metrics.bundles_sent();
                return bundle.id;
            }
        }
        self.metrics.bundles_sent();

        if bundle.destination == self.node_id {
            self.deliver_local(&bundle).await;
        } else {
            self.enqueue_forward(&bundle.id);
        }
        bundle.id
    }

    fn clear_in_flight(&self, id: &BundleId) {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .remove(id);
    }
}
