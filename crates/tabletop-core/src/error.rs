//! Error types for Tabletop Sync
//!
//! Core board operations are total: permission denials and unknown sessions
//! are reported through return values and the audit log. `TabletopError`
//! covers the places that do fail hard (wire decoding, join tokens, document
//! load/merge, key storage).

use thiserror::Error;

/// Main error type for Tabletop Sync operations
#[derive(Error, Debug)]
pub enum TabletopError {
    /// An actor tried something the permission rules forbid
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed intent, overlay or board data
    #[error("Validation failure: {0}")]
    Validation(String),

    /// A private overlay diff was built against a version we never applied
    #[error("Stale overlay version: expected base {expected:?}, got {received}")]
    StaleOverlayVersion {
        /// Overlay version last applied locally (None before the first full payload)
        expected: Option<u64>,
        /// Base version the diff was computed against
        received: u64,
    },

    /// Join token was rejected
    #[error("Join token rejected: {0}")]
    Token(#[from] TokenError),

    /// Mutation targeted a session that is not open
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Automerge document error
    #[error("Automerge error: {0}")]
    Automerge(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Invalid role link or fragment
    #[error("Invalid link: {0}")]
    InvalidLink(String),

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TabletopError {
    fn from(err: serde_json::Error) -> Self {
        TabletopError::Serialization(err.to_string())
    }
}

impl From<automerge::AutomergeError> for TabletopError {
    fn from(err: automerge::AutomergeError) -> Self {
        TabletopError::Automerge(err.to_string())
    }
}

/// Result type alias using TabletopError
pub type TabletopResult<T> = Result<T, TabletopError>;

/// Reasons a join token can be refused.
///
/// The `Display` strings are part of the wire contract: servers echo them back
/// to clients verbatim.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("missing token")]
    Missing,
    #[error("invalid token format")]
    InvalidFormat,
    #[error("invalid token encoding")]
    InvalidEncoding,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("invalid token payload")]
    InvalidPayload,
    #[error("token expired")]
    Expired,
}
