use std::fmt;
use std::str::FromStr;

use super::error::{MinirpcError, Result};

/// A `host:port` address of a service instance.
///
/// Endpoints travel through the registry and the load balancer as plain
/// `host:port` strings; this type is the parsed form used when connecting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a `host:port` token.
    ///
    /// The split happens at the last `:` so bracketed IPv6 literals such as
    /// `[::1]:8080` keep their inner colons.
    pub fn parse(token: &str) -> Result<Self> {
        let (host, port) = token.rsplit_once(':').ok_or_else(|| {
            MinirpcError::Config(format!("Malformed endpoint '{}': missing port", token))
        })?;

        if host.is_empty() {
            return Err(MinirpcError::Config(format!(
                "Malformed endpoint '{}': missing host",
                token
            )));
        }

        let port = port.parse::<u16>().map_err(|e| {
            MinirpcError::Config(format!("Malformed endpoint '{}': bad port: {}", token, e))
        })?;

        Ok(Self::new(host, port))
    }
}

impl FromStr for Endpoint {
    type Err = MinirpcError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let endpoint = Endpoint::parse("127.0.0.1:12345").unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 12345);
        assert_eq!(endpoint.to_string(), "127.0.0.1:12345");
    }

    #[test]
    fn test_parse_hostname() {
        let endpoint: Endpoint = "calc.internal:9000".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("calc.internal", 9000));
    }

    #[test]
    fn test_parse_ipv6_literal() {
        let endpoint = Endpoint::parse("[::1]:8080").unwrap();
        assert_eq!(endpoint.host, "[::1]");
        assert_eq!(endpoint.port, 8080);
    }

    #[test]
    fn test_missing_port_is_config_error() {
        assert!(matches!(
            Endpoint::parse("localhost"),
            Err(MinirpcError::Config(_))
        ));
    }

    #[test]
    fn test_unparsable_port_is_config_error() {
        assert!(matches!(
            Endpoint::parse("localhost:http"),
            Err(MinirpcError::Config(_))
        ));
        assert!(matches!(
            Endpoint::parse("localhost:70000"),
            Err(MinirpcError::Config(_))
        ));
    }

    #[test]
    fn test_missing_host_is_config_error() {
        assert!(matches!(Endpoint::parse(":80"), Err(MinirpcError::Config(_))));
    }
}
