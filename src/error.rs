use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failure reported by the remote data service. `message` is meant to be
/// shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub status: Option<u16>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Everything a form submission can end in, other than success.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormError {
    /// Caught locally, nothing was sent.
    #[error("{0}")]
    Validation(String),

    /// Returned by the backend, already prefixed with what failed.
    #[error("{0}")]
    Remote(String),

    #[error("This email address is already registered but not confirmed. Please check your email to confirm or try logging in.")]
    AlreadyRegistered,

    /// The response did not match any expected shape.
    #[error("{0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Not found")]
    NotFound,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Template(_) | AppError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
