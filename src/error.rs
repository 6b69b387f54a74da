use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Failure of a single source. Never escapes the fetch boundary: the source
/// is logged and contributes an empty batch.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(String),
    #[error("upstream returned {0}")]
    Status(reqwest::StatusCode),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Per-item normalization failure; the item is skipped.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("unparsable date: {0}")]
    Date(String),
    #[error("malformed field {field}: {reason}")]
    Field { field: &'static str, reason: String },
    #[error("item is not an object")]
    NotAnObject,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unknown route: {0}")]
    UnknownRoute(String),
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("http client error: {0}")]
    Client(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::UnknownRoute(_) | AppError::UnknownSource(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::Client(_) | AppError::Internal(_) => {
                error!("request failed: {self}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Erreur lors de la récupération des événements".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
