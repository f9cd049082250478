//! Request id middleware.
//!
//! Every request gets a UUID (or keeps a well-formed inbound `x-request-id`),
//! stored as a [`RequestId`] extension and echoed in the `x-request-id`
//! response header. Error bodies produced by [`crate::error::ApiError`] get
//! the id stamped into their `request_id` field.

use crate::error::ErrorResponse;
use axum::{
    body::Body,
    extract::Request,
    http::header::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maximum accepted length of an inbound request id
const MAX_REQUEST_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

fn inbound_request_id(req: &Request) -> Option<String> {
    let value = req.headers().get(REQUEST_ID_HEADER)?.to_str().ok()?;
    let valid = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| value.to_string())
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id =
        inbound_request_id(&req).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Some(mut error) = response.extensions_mut().remove::<ErrorResponse>() {
        error.request_id = Some(request_id.clone());
        match serde_json::to_vec(&error) {
            Ok(bytes) => {
                let (mut parts, _) = response.into_parts();
                parts.headers.remove(axum::http::header::CONTENT_LENGTH);
                response = Response::from_parts(parts, Body::from(bytes));
            }
            Err(e) => tracing::warn!(error = %e, "Failed to stamp request id into error body"),
        }
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
