//! Error types for the Flotilla cluster membership subsystem
//!
//! This module defines the error code taxonomy used on the wire and by the
//! replicated command apply path, plus the richer crate-level error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for cluster membership operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Outcome codes for membership operations.
///
/// These codes travel in RPC replies and are the values compared across
/// shards after a replicated command is applied, so the type is plain data:
/// `Copy`, `Eq` and serde-serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Operation completed
    Success,

    /// No controller leader is known at the moment of dispatch; retryable
    NoLeaderController,

    /// Malformed join payload; terminal for the request
    InvalidRequest,

    /// Semantically disallowed operation (recommissioning a demoted voter,
    /// node id space exhausted, unknown node)
    InvalidNodeOperation,

    /// Configuration update rejected by the cross-node validator
    InvalidConfigurationUpdate,

    /// RPC transport failure while forwarding a join request; retryable
    JoinRequestDispatchError,

    /// Internal signal from the seed iterator; triggers the outer retry loop
    SeedServersExhausted,
}

impl ErrorCode {
    /// Whether this code represents success
    pub fn is_success(self) -> bool {
        matches!(self, ErrorCode::Success)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Success => write!(f, "success"),
            ErrorCode::NoLeaderController => write!(f, "no leader controller"),
            ErrorCode::InvalidRequest => write!(f, "invalid request"),
            ErrorCode::InvalidNodeOperation => write!(f, "invalid node operation"),
            ErrorCode::InvalidConfigurationUpdate => {
                write!(f, "invalid configuration update")
            }
            ErrorCode::JoinRequestDispatchError => {
                write!(f, "join request dispatch error")
            }
            ErrorCode::SeedServersExhausted => write!(f, "seed servers exhausted"),
        }
    }
}

/// Main error type for the cluster membership subsystem
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A membership operation failed with a taxonomy code
    #[error("membership operation failed: {0}")]
    Code(ErrorCode),

    /// RPC transport failure (connect, send, or receive)
    #[error("rpc transport error: {0}")]
    Rpc(String),

    /// Peer replied with a frame of an unexpected type
    #[error("unexpected rpc frame: {0}")]
    Protocol(String),

    /// Operation aborted by the process-wide abort source
    #[error("operation aborted")]
    Aborted,

    /// Invalid node-local configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encode/decode failure
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<ErrorCode> for ClusterError {
    fn from(code: ErrorCode) -> Self {
        ClusterError::Code(code)
    }
}

impl ClusterError {
    /// Map this error to the wire-level code used in RPC replies
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ClusterError::Code(code) => *code,
            ClusterError::Rpc(_) | ClusterError::Io(_) | ClusterError::Codec(_) => {
                ErrorCode::JoinRequestDispatchError
            }
            ClusterError::Protocol(_) | ClusterError::Config(_) => ErrorCode::InvalidRequest,
            ClusterError::Aborted => ErrorCode::InvalidNodeOperation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::Success.to_string(), "success");
        assert_eq!(
            ErrorCode::InvalidConfigurationUpdate.to_string(),
            "invalid configuration update"
        );
        assert_eq!(
            ErrorCode::SeedServersExhausted.to_string(),
            "seed servers exhausted"
        );
    }

    #[test]
    fn test_error_code_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::NoLeaderController.is_success());
    }

    #[test]
    fn test_cluster_error_code_mapping() {
        let err = ClusterError::from(ErrorCode::InvalidRequest);
        assert_eq!(err.error_code(), ErrorCode::InvalidRequest);

        let err = ClusterError::Rpc("connection refused".into());
        assert_eq!(err.error_code(), ErrorCode::JoinRequestDispatchError);
    }

    #[test]
    fn test_error_code_serde_roundtrip() {
        let code = ErrorCode::InvalidNodeOperation;
        let encoded = serde_json::to_string(&code).unwrap();
        let decoded: ErrorCode = serde_json::from_str(&encoded).unwrap();
        assert_eq!(code, decoded);
    }
}
