use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tagstream::TagStreamError;

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Failure carried to the HTTP boundary
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] TagStreamError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        let ApiError::Engine(err) = self else {
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal");
        };
        match err {
            TagStreamError::UnknownHandle(_) => (StatusCode::NOT_FOUND, "unknown_handle"),
            TagStreamError::ConfigurationImpossible(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "configuration_impossible")
            }
            TagStreamError::InvalidParameter(_) => (StatusCode::BAD_REQUEST, "invalid_parameter"),
            TagStreamError::InvalidChannel(_) => (StatusCode::BAD_REQUEST, "invalid_channel"),
            TagStreamError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            TagStreamError::RegistryFull(_) => (StatusCode::SERVICE_UNAVAILABLE, "registry_full"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("{}", self);
        }
        let body = ErrorResponse {
            error: code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
