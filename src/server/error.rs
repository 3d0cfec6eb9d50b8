//! HTTP error responses.

use crate::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Crate error rendered as `{"error": {"message", "type"}}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::QueueSaturated { .. } | Error::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Backend(_) | Error::BatchDispatch { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        let message = match &self.0 {
            Error::Validation { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let body = Json(json!({
            "error": {
                "message": message,
                "type": self.0.kind(),
            }
        }));
        (status, body).into_response()
    }
}
