//! Shared error taxonomy for the sync engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error kinds carried through every layer of the engine.
///
/// These are kinds, not exhaustive leaf types: a `CoreError::Http` covers
/// every non-2xx response regardless of which caller raised it.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsafe path: {0}")]
    Unsafe(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("local i/o error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("external tool failed: {0}")]
    External(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// HTTP status codes other than 429 are non-retryable; 429 is retryable like a network error.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Http { status, .. } => *status == 429 || !(400..500).contains(status),
            CoreError::Network(_) => true,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Other(anyhow::Error::from(e))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Invalid(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            CoreError::Network(e.to_string())
        } else if let Some(status) = e.status() {
            CoreError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            CoreError::Network(e.to_string())
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            CoreError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            CoreError::Unsafe(m) => (StatusCode::BAD_REQUEST, m.clone()),
            CoreError::Invalid(m) => (StatusCode::BAD_REQUEST, m.clone()),
            CoreError::Http { status, message } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                message.clone(),
            ),
            CoreError::Network(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CoreError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled".to_string()),
            CoreError::Integrity(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            CoreError::LocalIo(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            CoreError::External(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            CoreError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            CoreError::Other(e) => {
                tracing::error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
