use std::time::Duration;

use minirpc_common::transport::DEFAULT_MAX_BODY_LEN;

/// Default number of idle sessions kept for reuse
pub const DEFAULT_SESSION_POOL_CAPACITY: usize = 100;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Largest request body accepted; a larger header closes the connection
    pub max_body_len: usize,
    /// Close a session whose next header does not arrive within this time
    pub idle_timeout: Option<Duration>,
    /// Upper bound on idle sessions held by the session pool
    pub session_pool_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_body_len: DEFAULT_MAX_BODY_LEN,
            idle_timeout: None,
            session_pool_capacity: DEFAULT_SESSION_POOL_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_body_len(mut self, max_body_len: usize) -> Self {
        self.max_body_len = max_body_len;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_session_pool_capacity(mut self, capacity: usize) -> Self {
        self.session_pool_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_body_len, 16 * 1024 * 1024);
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.session_pool_capacity, 100);
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new()
            .with_max_body_len(1024)
            .with_idle_timeout(Duration::from_secs(3))
            .with_session_pool_capacity(4);

        assert_eq!(config.max_body_len, 1024);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.session_pool_capacity, 4);
    }
}
