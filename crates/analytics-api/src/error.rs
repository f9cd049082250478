//! Response envelopes and the API error type.
//!
//! Success bodies are `{"data": ..., "success": true}`. Error bodies are
//! `{"success": false, "error": ..., "details"?: ..., "request_id": ...}`;
//! the request id is filled in by [`crate::request_id::request_id_middleware`].

use crate::rate_limiting::RateLimitDecision;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stackpulse_analytics_core::AnalyticsError;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            data,
            success: true,
        })
    }
}

/// Error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    pub request_id: Option<String>,
}

/// Errors returned by handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Please retry after the specified time.")]
    RateLimited(RateLimitDecision),

    /// Store and internal failures; the message is forwarded as-is
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    /// A 400 naming the offending field
    pub fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiError::BadRequest {
            details: Some(serde_json::json!({ "field": field, "message": message })),
            message: format!("Invalid parameter '{}'", field),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::ValidationError(message) => ApiError::bad_request(message),
            AnalyticsError::ComponentNotFound(id) => {
                ApiError::NotFound(format!("Component '{}' not found", id))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            details: match &self {
                ApiError::BadRequest { details, .. } => details.clone(),
                _ => None,
            },
            retry_after: match &self {
                ApiError::RateLimited(decision) => Some(decision.retry_after),
                _ => None,
            },
            request_id: None,
        };

        let mut response = (status, Json(body.clone())).into_response();
        if let ApiError::RateLimited(decision) = &self {
            decision.apply_headers(response.headers_mut());
        }
        // Picked up by the request id middleware to stamp the id into the body
        response.extensions_mut().insert(body);
        response
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
