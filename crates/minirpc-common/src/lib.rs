//! minirpc Common Types and Transport
//!
//! This crate provides the wire protocol definitions and the TCP frame
//! transport shared by the minirpc server and client.
//!
//! # Overview
//!
//! minirpc is a small request/response RPC system. A logical service name is
//! resolved to a concrete `host:port` endpoint through a service registry and a
//! load-balancing policy; the call itself travels as one binary frame in each
//! direction. This crate contains the pieces both sides agree on:
//!
//! - **Protocol Layer**: frame header, request/response bodies, endpoints, errors
//! - **Transport Layer**: JSON body codec and async framed I/O over TCP
//!
//! # Wire Format
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────────────┐
//! │ magic    │ body_len │ msg_id   │ body (JSON, UTF-8)   │
//! │ u32 BE   │ u32 BE   │ u32 BE   │ body_len bytes       │
//! └──────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`protocol`] - Header, Request, Response, Endpoint, MinirpcError
//! - [`transport`] - JSON codec and TCP frame transport
//!
//! # Example
//!
//! ```
//! use minirpc_common::{Request, Response};
//! use minirpc_common::transport::JsonCodec;
//! use serde_json::json;
//!
//! let request = Request::new("CalculatorService", "add", vec![json!(4), json!(5)]);
//! let body = JsonCodec::encode_request(&request).unwrap();
//! assert_eq!(JsonCodec::decode_request(&body).unwrap(), request);
//!
//! let response = Response::success(json!(9));
//! assert!(response.is_success());
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
