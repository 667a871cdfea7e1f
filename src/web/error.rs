use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::engine::EngineError;

use super::views;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Page not found")]
    NotFound,

    #[error("Access denied. Admin privileges required.")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("export error: {0}")]
    Export(#[from] csv::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::NotOwner(_) => StatusCode::FORBIDDEN,
                EngineError::Conflict(_) | EngineError::EmailTaken(_) => StatusCode::CONFLICT,
                EngineError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                EngineError::WalError(_) => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            AppError::Template(_) | AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to show the user. Server-side failures stay generic.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Engine(e) => e.user_message(),
            AppError::Template(_) | AppError::Export(_) => {
                "Something went wrong, please try again".into()
            }
            other => other.to_string(),
        }
    }

    fn log(&self) {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "request failed");
        } else {
            warn!(error = %self, %status, "request rejected");
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status();
        if status == StatusCode::NOT_FOUND {
            return views::not_found();
        }
        views::error_page(status, &self.user_message())
    }
}

/// The same errors, answered as `{"error": ...}` for the JSON endpoints.
#[derive(Debug)]
pub struct JsonError(pub AppError);

impl<E: Into<AppError>> From<E> for JsonError {
    fn from(e: E) -> Self {
        JsonError(e.into())
    }
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        self.0.log();
        (self.0.status(), Json(json!({ "error": self.0.user_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::NotFound(Ulid::new()), StatusCode::NOT_FOUND),
            (EngineError::Conflict(Ulid::new()), StatusCode::CONFLICT),
            (EngineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (EngineError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (EngineError::WalError("disk".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn storage_details_stay_private() {
        let err = AppError::from(EngineError::WalError("/data/campusbook.wal: EIO".into()));
        assert!(!err.user_message().contains("EIO"));
    }
}
