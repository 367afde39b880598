use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinirpcError {
    /// Frame-level violation (bad magic, oversized body, id mismatch).
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer closed the connection at a frame boundary.
    #[error("Connection closed by peer")]
    PeerClosed,

    /// Body bytes were not well-formed or did not have the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// A well-formed response carried a nonzero code.
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("No available endpoints")]
    NoAvailableEndpoints,

    #[error("No available service instances for '{0}'")]
    NoAvailableServiceInstances(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Coordination session closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl MinirpcError {
    /// Whether the connection that produced this error must be discarded.
    ///
    /// Framing and transport failures leave the byte stream in an unknown
    /// position; everything else is reported on a connection that is still
    /// usable for the next request.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            MinirpcError::Protocol(_)
                | MinirpcError::Transport(_)
                | MinirpcError::PeerClosed
                | MinirpcError::Connection(_)
                | MinirpcError::Io(_)
                | MinirpcError::Timeout(_)
        )
    }
}

impl From<std::net::AddrParseError> for MinirpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        MinirpcError::Config(err.to_string())
    }
}

impl From<std::num::ParseIntError> for MinirpcError {
    fn from(err: std::num::ParseIntError) -> Self {
        MinirpcError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MinirpcError>;
