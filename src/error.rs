/// Unified error types for the bingo lookup service
use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum BingoError {
    /// Durable store (Postgres) errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cache tier (Redis) errors
    #[error("cache error: {0}")]
    Cache(String),

    /// HTTP client errors talking to the directory or a handle's well-known endpoint
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// DNS resolution errors
    #[error("dns error: {0}")]
    Dns(String),

    /// Empty or otherwise malformed RPC input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Entry missing from the cache
    #[error("not found: {0}")]
    NotFound(String),

    /// Configuration or startup errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl BingoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BingoError::NotFound(_))
    }
}

/// Error response body mirroring the RPC error taxonomy of spec.md §7
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for BingoError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            BingoError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "InvalidArgument"),
            BingoError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            BingoError::Database(_)
            | BingoError::Cache(_)
            | BingoError::Http(_)
            | BingoError::Dns(_)
            | BingoError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

pub type BingoResult<T> = Result<T, BingoError>;
