use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::dispatch::DispatchError;

pub mod admin;
pub mod dispatch;
pub mod logs;

// Errors surfaced to HTTP callers as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Endpoint store error: {0}")]
    StoreError(#[from] crate::endpoints::StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Dispatch(DispatchError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Dispatch(DispatchError::EmptyText) => StatusCode::BAD_REQUEST,
            ApiError::Dispatch(DispatchError::Upstream(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::StoreError(e) => {
                error!("Endpoint store failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
