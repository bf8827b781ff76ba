//! Bundle serialization and wire framing.
//!
//! The serialized image is self-describing JSON and is byte-identical on
//! disk and on the wire, so a stored bundle can be streamed straight into
//! a frame and a received frame written straight to the store.
//!
//! Frame layout: a 4-byte big-endian unsigned length followed by exactly
//! that many bytes of serialized bundle. One frame per TCP connection.

use super::*;
use crate::bundle::Bundle;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length prefix size of a wire frame.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed bundle image: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    Oversize { len: usize, max: usize },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Truncated frame")]
    Truncated(#[source] std::io::Error),

    #[error("Bundle lifetime must be positive")]
    ZeroLifetime,

    #[error("Bundle creation timestamp {0} is not a finite time")]
    BadTimestamp(f64),

    #[error("Bundle hop count {hop_count} disagrees with path length {path_len}")]
    HopCountMismatch { hop_count: u32, path_len: usize },

    #[error("Bundle id {0} does not match its identity fields")]
    IdMismatch(String),
}

/// Serialize a bundle to its canonical image.
pub fn encode(bundle: &Bundle) -> Bytes {
    // Serializing a well-formed in-memory bundle cannot fail
    serde_json::to_vec(bundle)
        .expect("bundle serialization failed")
        .into()
}

/// Parse and validate a serialized bundle image.
///
/// All field constraints are enforced here, on ingress; the rest of the
/// node never sees a bundle that violates them.
pub fn decode(data: &[u8]) -> Result<Bundle, Error> {
    let bundle: Bundle = serde_json::from_slice(data)?;
    if bundle.lifetime == 0 {
        return Err(Error::ZeroLifetime);
    }
    if !bundle.created_at.is_finite() || bundle.created_at < 0.0 {
        return Err(Error::BadTimestamp(bundle.created_at));
    }
    if bundle.hop_count as usize != bundle.path.len() {
        return Err(Error::HopCountMismatch {
            hop_count: bundle.hop_count,
            path_len: bundle.path.len(),
        });
    }
    // The id is content-derived; recomputing it catches both corruption
    // and peers that invent their own ids
    let expected = crate::bundle::BundleId::derive(
        &bundle.source,
        &bundle.destination,
        &bundle.payload,
        bundle.created_at,
    );
    if bundle.id != expected {
        return Err(Error::IdMismatch(bundle.id.to_string()));
    }
    Ok(bundle)
}

/// Read one length-prefixed frame, enforcing `max_frame`.
pub(crate) async fn read_frame<R>(stream: &mut R, max_frame: usize) -> Result<Bytes, Error>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(Error::Truncated)?;

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(Error::EmptyFrame);
    }
    if len > max_frame {
        return Err(Error::Oversize {
            len,
            max: max_frame,
        });
    }

    let mut data = vec![0u8; len];
    stream
        .read_exact(&mut data)
        .await
        .map_err(Error::Truncated)?;
    Ok(data.into())
}

/// Write one length-prefixed frame.
pub(crate) async fn write_frame<W>(
    stream: &mut W,
    data: &[u8],
    max_frame: usize,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    if data.len() > max_frame {
        return Err(Error::Oversize {
            len: data.len(),
            max: max_frame,
        });
    }
    stream
        .write_all(&(data.len() as u32).to_be_bytes())
        .await
        .map_err(Error::Truncated)?;
    stream.write_all(data).await.map_err(Error::Truncated)?;
    Ok(())
}
