use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use easel_core::{EngineError, FailureCategory};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("No image has been generated yet")]
    NoImage,

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Generation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, category) = match &self {
            ApiError::Engine(error) => {
                let status = match error.category() {
                    FailureCategory::ValidationError | FailureCategory::UnknownModelError => {
                        StatusCode::BAD_REQUEST
                    }
                    FailureCategory::LoadError | FailureCategory::GenerationError => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, Some(error.category()))
            }
            ApiError::NoImage => (StatusCode::NOT_FOUND, None),
            ApiError::Encode(_) | ApiError::Task(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        if status.is_server_error() {
            tracing::error!("Error generating image: {self}");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "category": category,
        }));

        (status, body).into_response()
    }
}
