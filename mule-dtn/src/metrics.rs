//! Node counters. Increments are atomic and mirrored to the `metrics`
//! facade so an embedding process can attach whatever recorder it likes.

use crate::bundle::Eid;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        /// Live counters, shared by every component of one node.
        #[derive(Debug, Default)]
        pub struct Metrics {
            $($name: AtomicU64,)*
        }

        impl Metrics {
            $(
                pub fn $name(&self) {
                    self.$name.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(stringify!($name)).increment(1);
                }
            )*

            /// A point-in-time copy of every counter. `bundles_stored` is
            /// the caller-supplied current store occupancy.
            pub fn snapshot(&self, node_id: &Eid, bundles_stored: usize) -> MetricsSnapshot {
                MetricsSnapshot {
                    node_id: node_id.clone(),
                    bundles_stored: bundles_stored as u64,
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }

        /// The exported metrics view.
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        pub struct MetricsSnapshot {
            pub node_id: Eid,
            pub bundles_stored: u64,
            $(pub $name: u64,)*
        }
    };
}

counters!(
    bundles_sent,
    bundles_received,
    bundles_delivered,
    bundles_forwarded,
    bundles_expired,
    bundles_duplicate,
    malformed_frames,
    transport_errors,
    store_errors,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let m = Metrics::default();
        m.bundles_sent();
        m.bundles_sent();
        m.bundles_expired();

        let node: Eid = "probe".parse().unwrap();
        let snap = m.snapshot(&node, 3);
        assert_eq!(snap.bundles_sent, 2);
        assert_eq!(snap.bundles_expired, 1);
        assert_eq!(snap.bundles_received, 0);
        assert_eq!(snap.bundles_stored, 3);
        assert_eq!(snap.node_id, node);
    }
}
