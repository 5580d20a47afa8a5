//! HTTP错误映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use ertrack_core::ErError;
use serde_json::json;
use tracing::{error, warn};

/// 处理器统一错误
#[derive(Debug)]
pub struct ApiError(pub ErError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<ErError> for ApiError {
    fn from(err: ErError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ErError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ErError::NotFound(_) => StatusCode::NOT_FOUND,
            ErError::Conflict(_) => StatusCode::CONFLICT,
            ErError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = Json(json!({
            "error": true,
            "message": self.0.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
