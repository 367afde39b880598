//! Fixed-size frame header.
//!
//! Every frame, in both directions, starts with a 12-byte preamble:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┐
//! │ magic    │ body_len │ msg_id   │
//! │ u32 BE   │ u32 BE   │ u32 BE   │
//! └──────────┴──────────┴──────────┘
//! ```
//!
//! The body that follows is always exactly `body_len` bytes, so a reader knows
//! how much to pull before attempting to parse it.

use super::error::{MinirpcError, Result};
use super::requests::MsgId;

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Sentinel carried in the first word of every frame.
pub const MAGIC: u32 = 0x1234_5678;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol sentinel, always [`MAGIC`] on a valid frame.
    pub magic: u32,
    /// Length of the body that follows.
    pub body_len: u32,
    /// Caller-assigned identifier of the call this frame belongs to.
    pub msg_id: MsgId,
}

impl Header {
    /// Create a header for a body of `body_len` bytes.
    pub fn new(body_len: u32, msg_id: MsgId) -> Self {
        Self {
            magic: MAGIC,
            body_len,
            msg_id,
        }
    }

    /// Create a header describing `body`.
    ///
    /// Fails if the body does not fit in a `u32` length.
    pub fn for_body(body: &[u8], msg_id: MsgId) -> Result<Self> {
        let body_len = u32::try_from(body.len()).map_err(|_| {
            MinirpcError::Protocol(format!("Body too large: {} bytes", body.len()))
        })?;
        Ok(Self::new(body_len, msg_id))
    }

    /// Encode the header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use minirpc_common::protocol::{Header, HEADER_SIZE};
    ///
    /// let bytes = Header::new(100, 7).encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// assert_eq!(&bytes[..4], &[0x12, 0x34, 0x56, 0x78]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        buf[8..12].copy_from_slice(&self.msg_id.to_be_bytes());
        buf
    }

    /// Decode a header from bytes (Big Endian).
    ///
    /// Fails with [`MinirpcError::Protocol`] if fewer than [`HEADER_SIZE`]
    /// bytes are given or the magic does not match. A bad magic means the
    /// stream is corrupted and cannot be resynchronized.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(MinirpcError::Protocol(format!(
                "Short header: {} bytes (need {})",
                buf.len(),
                HEADER_SIZE
            )));
        }

        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(MinirpcError::Protocol(format!(
                "Invalid magic 0x{:08x} (expected 0x{:08x})",
                magic, MAGIC
            )));
        }

        Ok(Self {
            magic,
            body_len: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            msg_id: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Reject bodies larger than `max_body_len`.
    pub fn validate(&self, max_body_len: usize) -> Result<()> {
        if self.body_len as usize > max_body_len {
            return Err(MinirpcError::Protocol(format!(
                "Body too large: {} bytes (max {} bytes)",
                self.body_len, max_body_len
            )));
        }
        Ok(())
    }
}

/// Encode a complete frame: header immediately followed by `body`.
pub fn encode_frame(msg_id: MsgId, body: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_body(body, msg_id)?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(body);
    Ok(frame)
}
