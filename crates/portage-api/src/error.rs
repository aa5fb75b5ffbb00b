use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use portage_clone::CloneError;
use portage_engine::EngineError;

/// Unified API error type for all route handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::PlanNotFound { .. } | EngineError::ResourceNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            EngineError::PlanTypeNotSupported { .. }
            | EngineError::PlanUpdateError(_)
            | EngineError::PlanResourcesUpdateError(_)
            | EngineError::Core(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CloneError> for ApiError {
    fn from(e: CloneError) -> Self {
        match e {
            CloneError::PlanNotFound { .. } | CloneError::DownloadTemplateFailed { .. } => {
                ApiError::NotFound(e.to_string())
            }
            CloneError::Engine(engine) => engine.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<portage_store::StoreError> for ApiError {
    fn from(e: portage_store::StoreError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}
