//! The static neighbor table: EID to transport address, fixed for the
//! node's lifetime and safe for concurrent reads.

use super::*;
use crate::bundle::Eid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Neighbor spec '{0}' is not of the form eid:host:port")]
    BadSpec(String),

    #[error("Neighbor spec '{spec}' has an invalid port: {source}")]
    BadPort {
        spec: String,
        source: std::num::ParseIntError,
    },

    #[error(transparent)]
    BadEid(#[from] bundle::Error),
}

/// One `eid:host:port` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub eid: Eid,
    pub host: String,
    pub port: u16,
}

impl Neighbor {
    pub fn address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl std::fmt::Display for Neighbor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.eid, self.host, self.port)
    }
}

impl std::str::FromStr for Neighbor {
    type Err = Error;

    /// Parse `eid:host:port`. The host may itself contain `:` (IPv6), so
    /// split from both ends.
    fn from_str(s: &str) -> Result<Self, Error> {
        let (eid, rest) = s.split_once(':').ok_or_else(|| Error::BadSpec(s.into()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::BadSpec(s.into()))?;
        if host.is_empty() {
            return Err(Error::BadSpec(s.into()));
        }
        Ok(Self {
            eid: eid.parse()?,
            host: host.to_string(),
            port: port.parse().map_err(|source| Error::BadPort {
                spec: s.into(),
                source,
            })?,
        })
    }
}

/// Static next-hop map. Routing is single-next-hop: every non-local
/// bundle goes to the first configured neighbor.
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: BTreeMap<Eid, (String, u16)>,
    first: Option<Eid>,
}

impl NeighborTable {
    pub fn new(neighbors: &[Neighbor]) -> Self {
        let mut table = Self::default();
        for n in neighbors {
            if table.entries.contains_key(&n.eid) {
                warn!("Duplicate neighbor entry for {}, keeping the first", n.eid);
                continue;
            }
            info!("Added neighbor {} at {}:{}", n.eid, n.host, n.port);
            table
                .entries
                .insert(n.eid.clone(), (n.host.clone(), n.port));
            if table.first.is_none() {
                table.first = Some(n.eid.clone());
            }
        }
        if table.entries.len() > 1 {
            info!(
                "{} neighbors configured; only {} is used as next hop",
                table.entries.len(),
                table.first.as_ref().expect("first neighbor set")
            );
        }
        table
    }

    pub fn lookup(&self, eid: &Eid) -> Option<(String, u16)> {
        self.entries.get(eid).cloned()
    }

    /// The single configured next hop, if any.
    pub fn next_hop(&self) -> Option<(Eid, (String, u16))> {
        let eid = self.first.clone()?;
        let addr = self.entries.get(&eid).cloned()?;
        Some((eid, addr))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
