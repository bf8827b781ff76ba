//! Node configuration. The embedding program (or the daemon's settings
//! loader) fills this in; everything except `node_id` has a usable
//! default.

use crate::bundle::Eid;
use crate::neighbors::Neighbor;
use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LISTEN_PORT: u16 = 4556;
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// This node's endpoint identifier. Required.
    pub node_id: Eid,

    pub listen_address: IpAddr,
    pub listen_port: u16,

    /// Static next-hop neighbors. Only the first is used for forwarding.
    pub neighbors: Vec<Neighbor>,

    /// Root of the per-node bundle store.
    pub storage_dir: PathBuf,

    /// Where delivery records are appended. Defaults to
    /// `dtn_delivery_<node_id>.json` next to `storage_dir`; it must not
    /// live inside the store, which holds only bundle images.
    pub delivery_log: Option<PathBuf>,

    /// Lifetime applied to submitted bundles when the caller gives none.
    pub default_lifetime: Duration,

    /// Expiration sweep interval.
    pub sweeper_period: Duration,

    /// Store re-sweep interval (restart recovery and outage retry).
    pub resend_period: Duration,

    /// Inbound and outbound frame cap, in bytes.
    pub max_frame_bytes: NonZeroUsize,

    /// Bound on concurrent outbound transmissions.
    pub forward_workers: NonZeroUsize,

    /// Outbound connect/write/ack timeout.
    pub connect_timeout: Duration,

    /// Retry backoff: first delay, doubling per attempt up to the cap,
    /// with jitter applied on top.
    pub retry_initial: Duration,
    pub retry_cap: Duration,

    /// Inbound per-read timeout, so a stalled peer cannot pin a handler.
    pub read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: Eid::default(),
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_LISTEN_PORT,
            neighbors: Vec::new(),
            storage_dir: PathBuf::from("dtn_bundles"),
            delivery_log: None,
            default_lifetime: Duration::from_secs(3600),
            sweeper_period: Duration::from_secs(60),
            resend_period: Duration::from_secs(30),
            max_frame_bytes: NonZeroUsize::new(DEFAULT_MAX_FRAME).expect("nonzero"),
            forward_workers: NonZeroUsize::new(4).expect("nonzero"),
            connect_timeout: Duration::from_secs(10),
            retry_initial: Duration::from_secs(1),
            retry_cap: Duration::from_secs(60),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Resolved delivery log path.
    pub fn delivery_log_path(&self) -> PathBuf {
        match &self.delivery_log {
            Some(path) => path.clone(),
            None => {
                let file = format!("dtn_delivery_{}.json", self.node_id);
                if self.storage_dir.file_name().is_some() {
                    self.storage_dir.with_file_name(file)
                } else {
                    self.storage_dir.join(file)
                }
            }
        }
    }
}
