/*!
A minimal store-and-forward DTN node.

One [`node::Node`] is one DTN endpoint: it accepts application payloads,
wraps them as [`bundle::Bundle`]s, persists each bundle to disk, forwards
toward the destination via a statically configured next hop, deduplicates
on receive, and records an end-to-end delivery record when a bundle
reaches its destination.
*/

mod delivery;
mod dispatcher;
mod listener;
mod sweeper;

pub mod bundle;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod neighbors;
pub mod node;
pub mod service;
pub mod store;

use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

pub use delivery::DeliveryRecord;

// Re-export for consistency
pub use async_trait::async_trait;
pub use tokio_util::bytes::Bytes;

/// Generic error type used at module seams.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Seconds since the Unix epoch, as the wall clock sees them now.
pub(crate) fn now_secs() -> f64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}
