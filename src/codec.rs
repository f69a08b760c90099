//! Request/response packet codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬───────────────────────────┐
//! │ Length (4B)│ postcard packet body (N B)│
//! │ LE u32     │                           │
//! └────────────┴───────────────────────────┘
//! ```
//!
//! One frame carries exactly one packet.  The body is a postcard-encoded
//! [`RequestPacket`] or [`ResponsePacket`]; the length lets a receiver reject
//! oversized or truncated frames before deserializing anything.

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::fault::FaultInfo;
use crate::service_key::ServiceKey;

/// Frame header size (4-byte little-endian length).
pub const HEADER_SIZE: usize = 4;

/// Overhead allowed on top of the payload limit for packet metadata.
pub const PACKET_OVERHEAD: usize = 64 * 1024;

// ── Packets ──────────────────────────────────────────────────

/// Client to service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPacket {
    /// Per-session sequence number, echoed back for routing checks.
    pub request_id: u32,
    pub client_name: String,
    pub service_key: ServiceKey,
    /// The client discards any reply.
    pub no_wait: bool,
    pub context: RequestContext,
    pub payload: Vec<u8>,
}

/// Outcome carried by a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    Data(Vec<u8>),
    Fault(FaultInfo),
}

/// Service to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePacket {
    pub request_id: u32,
    pub client_name: String,
    /// Name of the service instance that produced the response.
    pub service_name: String,
    pub body: ResponseBody,
}

// ── Errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame (or packet about to be framed) exceeds the limit.
    TooLarge { len: usize, max: usize },
    /// Fewer bytes than the header announces.
    Truncated { expected: usize, got: usize },
    /// Trailing bytes after the announced body.
    TrailingBytes(usize),
    /// The body did not deserialize.
    Malformed(String),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { len, max } => write!(f, "frame of {len} bytes exceeds {max}"),
            Self::Truncated { expected, got } => {
                write!(f, "truncated frame: expected {expected} bytes, got {got}")
            }
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after frame"),
            Self::Malformed(msg) => write!(f, "malformed packet: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

// ── Encode / decode ──────────────────────────────────────────

/// Serialize `packet` into a length-prefixed frame no larger than
/// `max_body` body bytes.
pub fn encode_frame<T: Serialize>(packet: &T, max_body: usize) -> Result<Vec<u8>, CodecError> {
    let body = postcard::to_allocvec(packet).map_err(|e| CodecError::Malformed(e.to_string()))?;
    if body.len() > max_body || u32::try_from(body.len()).is_err() {
        return Err(CodecError::TooLarge {
            len: body.len(),
            max: max_body,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validate the frame header and deserialize its body.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8], max_body: usize) -> Result<T, CodecError> {
    if frame.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            expected: HEADER_SIZE,
            got: frame.len(),
        });
    }
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&frame[..HEADER_SIZE]);
    let expected = u32::from_le_bytes(header) as usize;

    if expected > max_body {
        return Err(CodecError::TooLarge {
            len: expected,
            max: max_body,
        });
    }
    let body = &frame[HEADER_SIZE..];
    if body.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            got: body.len(),
        });
    }
    if body.len() > expected {
        return Err(CodecError::TrailingBytes(body.len() - expected));
    }

    postcard::from_bytes(body).map_err(|e| CodecError::Malformed(e.to_string()))
}
