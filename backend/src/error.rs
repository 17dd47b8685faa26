use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;
use std::path::PathBuf;
use tch::TchError;

use crate::config::ConfigError;
use crate::inference::model::ModelError;
use crate::inference::preprocess::ProcessingError;
use crate::inference::validate::ValidationError;

/// Conditions that keep the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(
        "Model file not found in {dir} (tried {candidates:?}). Please ensure your trained model is saved in the models directory."
    )]
    CheckpointNotFound {
        dir: PathBuf,
        candidates: Vec<String>,
    },
    #[error("unsupported checkpoint type {path}: expected .pt, .pth, .jit, .safetensors or .ot")]
    UnsupportedCheckpoint { path: PathBuf },
    #[error("failed to load checkpoint {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: TchError,
    },
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Model not loaded")]
    ModelUnavailable,
    /// Detail is logged, never sent to the caller.
    #[error("Internal server error while processing the image")]
    Internal(String),
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotLoaded => ApiError::ModelUnavailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
