//! minirpc Transport Layer
//!
//! This module provides the body codec and the TCP frame transport.
//!
//! # Architecture
//!
//! - **Transport**: TCP, one request in flight per connection
//! - **Codec**: JSON serialization of request/response bodies
//! - **Wire Format**: `[12-byte header: magic, body_len, msg_id (u32 BE each)] + [JSON body]`
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode bodies to JSON
//! - **[`TcpTransport`]**: Async connect plus framed read/write helpers
//!
//! # Message Size Limits
//!
//! Readers reject bodies above a configurable limit (16 MiB by default)
//! before allocating the body buffer.

pub mod codec;
pub mod tcp;

pub use codec::JsonCodec;
pub use tcp::{TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_BODY_LEN};
