//! # minirpc CLI
//!
//! Bootstrap layer for the minirpc framework. The binary owns the tokio
//! runtime and the logging subscriber; this library holds the pieces it wires
//! together so they can be tested without spawning a process:
//!
//! - [`calculator_router`]: the built-in `CalculatorService` (`add`, `sub`)
//! - [`parse_params`]: turns a command-line JSON string into a params array
//! - [`demo`]: several servers, an in-process coordination service and a
//!   [`ServiceProxy`](minirpc_client::ServiceProxy) calling through them

pub mod demo;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use minirpc_common::Params;
use minirpc_server::Router;
use serde_json::Value;

/// Name the built-in calculator is served and registered under
pub const CALCULATOR_SERVICE: &str = "CalculatorService";

/// Router exposing `CalculatorService.add` and `CalculatorService.sub` over
/// two integers.
pub fn calculator_router() -> Router {
    counted_calculator_router(Arc::default())
}

/// [`calculator_router`] that bumps `calls` on every successful invocation.
pub fn counted_calculator_router(calls: Arc<AtomicUsize>) -> Router {
    let add_calls = Arc::clone(&calls);
    let sub_calls = calls;

    let mut router = Router::new();
    router
        .register_typed(CALCULATOR_SERVICE, "add", move |(a, b): (i64, i64)| {
            add_calls.fetch_add(1, Ordering::Relaxed);
            a.checked_add(b).context("integer overflow")
        })
        .register_typed(CALCULATOR_SERVICE, "sub", move |(a, b): (i64, i64)| {
            sub_calls.fetch_add(1, Ordering::Relaxed);
            a.checked_sub(b).context("integer overflow")
        });
    router
}

/// Parse `raw` as a JSON array of call parameters.
pub fn parse_params(raw: &str) -> Result<Params> {
    let value: Value = serde_json::from_str(raw).with_context(|| format!("Invalid JSON in params: {}", raw))?;
    match value {
        Value::Array(params) => Ok(params),
        other => bail!("Params must be a JSON array, got {}", other),
    }
}
