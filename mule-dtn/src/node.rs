//! The node object: one `Node` is one DTN endpoint. It owns the store,
//! the neighbor table, the metrics, and the background tasks, and is the
//! whole public API of the runtime. Nothing here is process-global, so
//! any number of nodes can coexist in one process.

use super::*;
use crate::bundle::{BundleId, Eid};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::listener::Listener;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::neighbors::NeighborTable;
use crate::service::Application;
use crate::store::Store;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

/// Startup failures. Everything after a successful `start` is recovered
/// locally; these are the only fatal errors the runtime produces.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("A node id is required")]
    MissingNodeId,

    #[error("Failed to open the bundle store: {0}")]
    Store(#[source] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

pub struct Node {
    node_id: Eid,
    listen_addr: SocketAddr,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    dispatcher: Arc<Dispatcher>,
    cancel_token: tokio_util::sync::CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,
}

impl Node {
    /// Bring the node up: open (and rehydrate) the store, bind the
    /// listener, start the forwarding workers, the expiration sweeper and
    /// the store re-sweep. The first re-sweep pass runs immediately, so
    /// bundles recovered from disk re-enter the forwarding queue at once.
    pub async fn start(
        config: Config,
        application: Option<Arc<dyn Application>>,
    ) -> Result<Arc<Self>, StartError> {
        if config.node_id.as_str().is_empty() {
            return Err(StartError::MissingNodeId);
        }

        let store = Arc::new(
            Store::open(&config.storage_dir)
                .await
                .map_err(StartError::Store)?,
        );

        let addr = SocketAddr::new(config.listen_address, config.listen_port);
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| StartError::Bind { addr, source })?;
        let listen_addr = tcp
            .local_addr()
            .map_err(|source| StartError::Bind { addr, source })?;

        let metrics = Arc::new(Metrics::default());
        let neighbors = Arc::new(NeighborTable::new(&config.neighbors));
        if neighbors.is_empty() {
            warn!("No neighbors configured; non-local bundles will only age out");
        }

        let cancel_token = tokio_util::sync::CancellationToken::new();
        let task_tracker = tokio_util::task::TaskTracker::new();

        let dispatcher = Dispatcher::new(
            &config,
            store.clone(),
            neighbors,
            metrics.clone(),
            application,
            cancel_token.clone(),
            task_tracker.clone(),
        );

        let listener = Arc::new(Listener {
            dispatcher: dispatcher.clone(),
            metrics: metrics.clone(),
            cancel_token: cancel_token.clone(),
            task_tracker: task_tracker.clone(),
            max_frame: config.max_frame_bytes.get(),
            read_timeout: config.read_timeout,
        });
        task_tracker.spawn(listener.listen(tcp));

        task_tracker.spawn(sweeper::run(
            store.clone(),
            metrics.clone(),
            cancel_token.clone(),
            config.sweeper_period,
        ));

        task_tracker.spawn(dispatcher.clone().run_resweep(config.resend_period));

        info!("DTN node {} listening on {listen_addr}", config.node_id);

        Ok(Arc::new(Self {
            node_id: config.node_id,
            listen_addr,
            store,
            metrics,
            dispatcher,
            cancel_token,
            task_tracker,
        }))
    }

    pub fn node_id(&self) -> &Eid {
        &self.node_id
    }

    /// The actually bound listen address. Differs from the configured one
    /// when port 0 was requested.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Submit a payload for delivery to `destination`. The bundle is
    /// persisted and queued; delivery is best-effort until the lifetime
    /// (the configured default when `None`) lapses.
    pub async fn submit(
        &self,
        destination: Eid,
        payload: impl Into<Bytes>,
        lifetime: Option<Duration>,
    ) -> BundleId {
        self.dispatcher
            .submit(destination, payload.into(), lifetime)
            .await
    }

    /// A point-in-time view of the node's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.node_id, self.store.count())
    }

    /// Stop accepting connections, let in-flight work drain, and wait for
    /// every background task. Stored bundles stay on disk; a later start
    /// with the same storage directory resumes where this one left off.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        info!("DTN node {} stopped", self.node_id);
    }
}
