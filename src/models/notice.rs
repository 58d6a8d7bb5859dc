use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    SignInRequired,
    Connectivity,
    Stale,
    Document,
    Interrupted,
    Invalid,
    Failed,
}

/// User-visible message produced by the workspace from an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub retryable: bool,
}

impl Notice {
    pub fn from_error(err: &Error) -> Self {
        let (kind, message) = match err {
            Error::Auth(_) => (
                NoticeKind::SignInRequired,
                "Your session has expired, please sign in again.".to_string(),
            ),
            Error::Network(detail) => (
                NoticeKind::Connectivity,
                format!("Could not reach the server ({}). Please try again.", detail),
            ),
            Error::NotFound(_) => (
                NoticeKind::Stale,
                "This document is no longer available.".to_string(),
            ),
            Error::Decode(_) => (
                NoticeKind::Document,
                "Failed to load PDF. Please try again.".to_string(),
            ),
            Error::Stream(_) => (
                NoticeKind::Interrupted,
                "The reply was interrupted. You can ask again.".to_string(),
            ),
            Error::Validation(detail) => (NoticeKind::Invalid, detail.clone()),
            other => (NoticeKind::Failed, other.to_string()),
        };

        Self {
            kind,
            message,
            retryable: err.is_retryable(),
        }
    }
}
