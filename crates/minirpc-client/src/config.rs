use std::time::Duration;

use minirpc_common::transport::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_BODY_LEN};

/// Default bound on one request/response exchange (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Bound on establishing a TCP connection
    pub connect_timeout: Duration,
    /// Bound on writing a request and reading its response
    pub request_timeout: Duration,
    /// Largest response body accepted
    pub max_body_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_len, DEFAULT_MAX_BODY_LEN);
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_millis(250))
            .with_request_timeout(Duration::from_secs(2))
            .with_max_body_len(4096);

        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.max_body_len, 4096);
    }
}
