//! Error types for the rotation engine
//!
//! Every failure the engine can observe is classified into one of five
//! fault kinds. The kind, not the concrete variant, drives the engine's
//! dispatch: transient faults are retried on the next tick, auth and
//! record-scope faults quarantine the affected job, config and state
//! faults are surfaced to the caller.

use thiserror::Error;

/// Result type alias for rotation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the rotation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (malformed document, failed validation)
    #[error("configuration error: {0}")]
    Config(String),

    /// State store errors (unreadable or corrupt state file)
    #[error("state store error: {0}")]
    State(String),

    /// Authentication errors (invalid token, missing permission)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A referenced zone or record does not exist at the provider
    #[error("not found: {0}")]
    NotFound(String),

    /// The provider rejected the request payload
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Transient provider errors (5xx, timeout, connection reset)
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Traffic-agent errors (endpoint unreachable, bad response)
    #[error("usage agent error: {0}")]
    Agent(String),

    /// Uncategorized I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure classification used by the engine's retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Fatal at load; the engine refuses to start until corrected
    Config,
    /// Fatal unless the state file is simply absent
    State,
    /// Fatal for every job that needs the missing credential
    Auth,
    /// The job is quarantined for the current tick and retried next tick
    RecordScope,
    /// State untouched beyond the failure counter; retried next tick
    Transient,
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a state store error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a rejected-payload error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create a transient provider error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a usage-agent error
    pub fn agent(msg: impl Into<String>) -> Self {
        Self::Agent(msg.into())
    }

    /// Classify this error for the engine's dispatch
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::Config(_) => FaultKind::Config,
            Error::State(_) => FaultKind::State,
            Error::Auth(_) => FaultKind::Auth,
            Error::NotFound(_) | Error::Rejected(_) => FaultKind::RecordScope,
            Error::Transient(_) | Error::Agent(_) | Error::Io(_) => FaultKind::Transient,
        }
    }

    /// Whether the next tick may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), FaultKind::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_taxonomy() {
        assert_eq!(Error::config("x").kind(), FaultKind::Config);
        assert_eq!(Error::state("x").kind(), FaultKind::State);
        assert_eq!(Error::auth("x").kind(), FaultKind::Auth);
        assert_eq!(Error::not_found("x").kind(), FaultKind::RecordScope);
        assert_eq!(Error::rejected("x").kind(), FaultKind::RecordScope);
        assert_eq!(Error::transient("x").kind(), FaultKind::Transient);
        assert_eq!(Error::agent("x").kind(), FaultKind::Transient);
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::transient("x").is_retryable());
        assert!(Error::agent("x").is_retryable());
        assert!(!Error::not_found("x").is_retryable());
        assert!(!Error::auth("x").is_retryable());
        assert!(!Error::config("x").is_retryable());
    }
}
