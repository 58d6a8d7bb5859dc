//! Error types
//!
//! One taxonomy for the repository, renderer, and session layers. The
//! workspace is the only place that turns these into user-facing notices.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or rejected bearer credential
    #[error("Not authenticated: {0}")]
    Auth(String),

    /// Transient transport failure (connect, timeout, 5xx)
    #[error("Network error: {0}")]
    Network(String),

    /// The referenced document or session no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// Corrupt or unsupported document bytes
    #[error("Failed to decode document: {0}")]
    Decode(String),

    /// Failure after a reply stream started delivering
    #[error("Reply stream failed: {0}")]
    Stream(String),

    /// Any other non-success status from the backend
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a non-success HTTP status (and its body text) onto the taxonomy.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("no details").to_string()
        } else {
            body
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
            StatusCode::NOT_FOUND => Error::NotFound(message),
            s if s.is_server_error() => Error::Network(format!("server error ({}): {}", s, message)),
            s => Error::Rejected {
                status: s.as_u16(),
                message,
            },
        }
    }

    /// Whether the UI should offer a retry affordance. Nothing is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Stream(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Error::from_status(status, err.to_string());
        }
        if err.is_decode() {
            Error::Protocol(err.to_string())
        } else if err.is_builder() {
            Error::Config(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}
