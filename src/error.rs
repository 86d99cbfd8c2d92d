//! Error handling for the mining session coordinator
//!
//! Every failure surfaced by a coordinator operation falls into one of four
//! kinds (see [`ErrorKind`]). Transport and I/O errors from the ambient stack
//! convert into [`Error`] through `#[from]` and are classified as internal.

use std::fmt;
use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification used by the RPC boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input; nothing was mutated
    InvalidArgument,
    /// Unknown or evicted session id; nothing was mutated
    NotFound,
    /// Operation not valid for the session's current state; nothing was mutated
    PreconditionFailed,
    /// Persistence or infrastructure failure; state may have been mutated
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name used in logs and response bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum Error {
    /// Request validation errors
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Unknown session
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    /// Operation rejected by the session state machine
    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    /// The session was paused but its state could not be written.
    /// The registry entry is already Idle, so the caller has to recover.
    #[error("Session {session_id} was paused but its state was not persisted: {message}")]
    StateNotPersisted { session_id: String, message: String },

    /// Persisted state could not be read back
    #[error("Corrupt state file: {message}")]
    CorruptState { message: String },

    /// Invalid target encodings
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Search engine failures
    #[error("Search engine error: {engine}: {message}")]
    Engine { engine: String, message: String },

    /// Ledger node communication errors
    #[error("Ledger node error: {message}")]
    Ledger { message: String },

    /// Generic internal errors with context
    #[error("Error in {context}: {message}")]
    Internal { context: String, message: String },

    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a not-found error for a session id
    pub fn not_found(session_id: impl fmt::Display) -> Self {
        Self::NotFound {
            session_id: session_id.to_string(),
        }
    }

    /// Create a precondition-failed error
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Create a state-not-persisted error
    pub fn state_not_persisted(session_id: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::StateNotPersisted {
            session_id: session_id.to_string(),
            message: message.into(),
        }
    }

    /// Create a corrupt state error
    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a search engine error
    pub fn engine(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a ledger node error
    pub fn ledger(message: impl Into<String>) -> Self {
        Self::Ledger {
            message: message.into(),
        }
    }

    /// Create a generic internal error with context
    pub fn internal(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Classify the error for the RPC boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } | Error::Target { .. } => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            _ => ErrorKind::Internal,
        }
    }

    /// True when the failure left a session in a state the caller must repair
    pub fn requires_recovery(&self) -> bool {
        matches!(self, Error::StateNotPersisted { .. })
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidArgument { .. } => "invalid_argument",
            Error::NotFound { .. } => "not_found",
            Error::PreconditionFailed { .. } => "precondition_failed",
            Error::StateNotPersisted { .. } => "state_not_persisted",
            Error::CorruptState { .. } => "corrupt_state",
            Error::Target { .. } => "target",
            Error::Config { .. } => "config",
            Error::Engine { .. } => "engine",
            Error::Ledger { .. } => "ledger",
            Error::Internal { .. } => "internal",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("abc");
        assert_eq!(err.to_string(), "Session not found: abc");

        let err = Error::precondition_failed("Session is not mining");
        assert_eq!(err.to_string(), "Precondition failed: Session is not mining");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::invalid_argument("bad hex").kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::target("short").kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::precondition_failed("x").kind(), ErrorKind::PreconditionFailed);
        assert_eq!(Error::corrupt_state("x").kind(), ErrorKind::Internal);
        assert_eq!(Error::state_not_persisted("x", "disk full").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_recovery_flag_only_for_unpersisted_pause() {
        assert!(Error::state_not_persisted("s1", "disk full").requires_recovery());
        assert!(!Error::corrupt_state("truncated").requires_recovery());
        assert!(!Error::internal("persistence", "boom").requires_recovery());
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.category(), "io");
        assert!(err.is_retryable());

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
