use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

pub type MsgId = u32;
pub type ServiceName = String;
pub type MethodName = String;
pub type Params = Vec<serde_json::Value>;

/// An RPC request body.
///
/// Serialized as `{"service_name": ..., "method_name": ..., "params": [...]}`.
/// All three fields are required; `params` must be a JSON array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub service_name: ServiceName,
    pub method_name: MethodName,
    pub params: Params,
}

impl Request {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        params: Params,
    ) -> Self {
        Request {
            service_name: service_name.into(),
            method_name: method_name.into(),
            params,
        }
    }
}

/// Monotonic source of `msg_id` values for one caller.
///
/// Ids start at 1 and wrap around after `u32::MAX`; 0 is never handed out so
/// it can mark frames that could not be attributed to a request.
#[derive(Debug)]
pub struct MsgIdGenerator {
    next: AtomicU32,
}

impl MsgIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next_id(&self) -> MsgId {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

impl Default for MsgIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
