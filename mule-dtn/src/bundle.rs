//! The bundle data model: endpoint identifiers, content-derived bundle
//! identifiers, and the bundle record itself.

use super::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Endpoint id must not be empty")]
    EmptyEid,

    #[error("Endpoint id '{0}' contains reserved characters")]
    BadEid(String),

    #[error("'{0}' is not a bundle id")]
    BadBundleId(String),
}

/// An endpoint identifier: an opaque name for a DTN node.
///
/// The only structural constraints are that it is non-empty and free of
/// the `:` and `,` separators used by the neighbor configuration syntax.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Eid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.is_empty() {
            Err(Error::EmptyEid)
        } else if s.contains([':', ',']) {
            Err(Error::BadEid(s.to_string()))
        } else {
            Ok(Self(s.to_string()))
        }
    }
}

/// A bundle identifier: the first 16 bytes of the SHA-256 digest of the
/// identity fields, rendered as 32 lowercase hex characters.
///
/// Identical `(source, destination, payload, created_at)` tuples derive
/// identical ids, which is exactly what receive-side deduplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleId(String);

impl BundleId {
    pub fn derive(source: &Eid, destination: &Eid, payload: &[u8], created_at: f64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(destination.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(payload);
        hasher.update(b"\0");
        // Rust's shortest round-trip rendering of the f64; deterministic
        // for any given bit pattern
        hasher.update(format!("{created_at}").as_bytes());
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BundleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for BundleId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::BadBundleId(s.to_string()))
        }
    }
}

mod payload_serde {
    use super::Bytes;
    use base64::prelude::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64_STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64_STANDARD
            .decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// A self-contained DTN datagram.
///
/// Stored bundles are never mutated in place; a forward produces a new
/// image via [`Bundle::record_hop`] which replaces the stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub source: Eid,
    pub destination: Eid,
    #[serde(with = "payload_serde")]
    pub payload: Bytes,
    /// Seconds since the Unix epoch, captured at origin.
    pub created_at: f64,
    /// Seconds the bundle may live past `created_at`.
    pub lifetime: u64,
    pub hop_count: u32,
    /// EIDs of the nodes that have forwarded this bundle, in order.
    pub path: Vec<Eid>,
}

impl Bundle {
    /// Create a fresh bundle originating at `source`, stamped now.
    pub fn new(source: Eid, destination: Eid, payload: Bytes, lifetime: u64) -> Self {
        let created_at = now_secs();
        Self {
            id: BundleId::derive(&source, &destination, &payload, created_at),
            source,
            destination,
            payload,
            created_at,
            lifetime,
            hop_count: 0,
            path: Vec::new(),
        }
    }

    /// Seconds since the epoch at which this bundle expires.
    pub fn expiry(&self) -> f64 {
        self.created_at + self.lifetime as f64
    }

    pub fn has_expired(&self, now: f64) -> bool {
        now > self.expiry()
    }

    /// Whether `node` has already stamped itself onto this bundle's path.
    ///
    /// Retransmissions of an already-imaged bundle must not stamp twice;
    /// `hop_count` counts distinct forwarding nodes.
    pub fn hop_recorded(&self, node: &Eid) -> bool {
        self.path.last() == Some(node)
    }

    /// Produce the forward-image: bump the hop count and append `node` to
    /// the traversed path. Both fields move together.
    pub fn record_hop(&mut self, node: &Eid) {
        self.hop_count += 1;
        self.path.push(node.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eid(s: &str) -> Eid {
        s.parse().unwrap()
    }

    #[test]
    fn id_is_deterministic() {
        let a = BundleId::derive(&eid("alpha"), &eid("omega"), b"payload", 1234.5);
        let b = BundleId::derive(&eid("alpha"), &eid("omega"), b"payload", 1234.5);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().parse::<BundleId>().is_ok());
    }

    #[test]
    fn id_covers_every_identity_field() {
        let base = BundleId::derive(&eid("alpha"), &eid("omega"), b"payload", 1234.5);
        assert_ne!(
            base,
            BundleId::derive(&eid("beta"), &eid("omega"), b"payload", 1234.5)
        );
        assert_ne!(
            base,
            BundleId::derive(&eid("alpha"), &eid("sigma"), b"payload", 1234.5)
        );
        assert_ne!(
            base,
            BundleId::derive(&eid("alpha"), &eid("omega"), b"other", 1234.5)
        );
        assert_ne!(
            base,
            BundleId::derive(&eid("alpha"), &eid("omega"), b"payload", 1234.625)
        );
    }

    #[test]
    fn field_separator_is_unambiguous() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = BundleId::derive(&eid("ab"), &eid("c"), b"", 0.0);
        let b = BundleId::derive(&eid("a"), &eid("bc"), b"", 0.0);
        assert_ne!(a, b);
    }

    #[test]
    fn expiry_arithmetic() {
        let mut b = Bundle::new(eid("a"), eid("b"), Bytes::from_static(b"x"), 60);
        b.created_at = 1000.0;
        assert!(!b.has_expired(1000.0));
        assert!(!b.has_expired(1060.0));
        assert!(b.has_expired(1060.5));
    }

    #[test]
    fn hop_recording_keeps_count_and_path_in_step() {
        let mut b = Bundle::new(eid("a"), eid("d"), Bytes::from_static(b"x"), 60);
        assert_eq!(b.hop_count, 0);
        assert!(b.path.is_empty());

        b.record_hop(&eid("a"));
        b.record_hop(&eid("r"));
        assert_eq!(b.hop_count, 2);
        assert_eq!(b.path, vec![eid("a"), eid("r")]);
        assert_eq!(b.hop_count as usize, b.path.len());

        assert!(b.hop_recorded(&eid("r")));
        assert!(!b.hop_recorded(&eid("a")));
    }

    #[test]
    fn eid_parsing_rejects_separators() {
        assert!("".parse::<Eid>().is_err());
        assert!("a:b".parse::<Eid>().is_err());
        assert!("a,b".parse::<Eid>().is_err());
        assert!("ground-station-1".parse::<Eid>().is_ok());
    }
}
