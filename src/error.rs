//! Error types for carrotcache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving or loading cached values.
///
/// The enum is `Clone` because a single coalesced load hands the same
/// outcome to every caller that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Empty key passed to `Group::get`
    #[error("key is required")]
    EmptyKey,

    /// No group registered under this name
    #[error("no such group: {0}")]
    GroupNotFound(String),

    /// The source of truth has no value for the key
    #[error("{0} not exist")]
    NotFound(String),

    /// The source of truth failed
    #[error("getter failed: {0}")]
    Getter(String),

    /// Remote fetch failed before a response arrived
    #[error("peer {peer} request failed: {reason}")]
    Peer { peer: String, reason: String },

    /// Remote peer answered with a non-success status
    #[error("peer {peer} returned: {status}")]
    PeerStatus { peer: String, status: String },

    /// Payload could not be decoded
    #[error("decoding response body: {0}")]
    Decode(String),

    /// The caller executing a coalesced load went away before finishing
    #[error("load for key {0} was abandoned")]
    LoadAbandoned(String),

    /// A peer picker was already bound to the group
    #[error("peer picker already registered for group {0}")]
    PeersAlreadyRegistered(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures that come from talking to another node.
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::Peer { .. } | Error::PeerStatus { .. } | Error::Decode(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(format!("I/O error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(Error::EmptyKey.to_string(), "key is required");
        assert_eq!(Error::NotFound("kkk".into()).to_string(), "kkk not exist");
        assert_eq!(
            Error::GroupNotFound("scores".into()).to_string(),
            "no such group: scores"
        );
    }

    #[test]
    fn test_peer_error_classification() {
        let err = Error::Peer {
            peer: "http://localhost:8001".into(),
            reason: "connection refused".into(),
        };
        assert!(err.is_peer_error());
        assert!(Error::Decode("truncated".into()).is_peer_error());
        assert!(!Error::EmptyKey.is_peer_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy");
        let err: Error = io.into();
        assert!(matches!(err, Error::Internal(msg) if msg.contains("busy")));
    }
}
