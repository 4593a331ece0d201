//! Common error types for StemScope

use thiserror::Error;

/// Common result type for StemScope operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across StemScope crates
///
/// Maps the client error taxonomy onto one shared enum:
/// transport failures are retryable, auth failures are fatal after one
/// refresh attempt, shape failures are recovered locally by the transform
/// layer and never reach callers as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure (connect, send, receive)
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP request completed with a non-success status
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    /// Authentication failed and the single token refresh did not recover it
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limited and retries exhausted
    #[error("Rate limited: retried {attempts} times")]
    RateLimited { attempts: u32 },

    /// Parallel array lengths disagree (caller contract violation)
    #[error("Shape mismatch: {context} ({left} vs {right})")]
    ShapeMismatch {
        context: &'static str,
        left: usize,
        right: usize,
    },

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a request that failed with this error is worth retrying
    /// (network failures, server errors, timeouts).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Http { status, .. } => (500..600).contains(status) || *status == 408,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        assert!(Error::Transport("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_server_errors_are_retryable() {
        assert!(Error::Http { status: 500, message: "oops".into() }.is_retryable());
        assert!(Error::Http { status: 503, message: "busy".into() }.is_retryable());
        assert!(Error::Http { status: 408, message: "timeout".into() }.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!Error::Http { status: 400, message: "bad".into() }.is_retryable());
        assert!(!Error::Http { status: 404, message: "gone".into() }.is_retryable());
        assert!(!Error::Auth("expired".into()).is_retryable());
        assert!(!Error::InvalidInput("bad file".into()).is_retryable());
    }
}
