//! Raw response construction.
//!
//! The wire contract pins exact status codes, JSON envelopes, and the
//! `Retry-After` header, so these endpoints build `http::Response` values
//! directly instead of going through dropshot's typed response wrappers.

use dropshot::{Body, HttpError};
use http::{Response, StatusCode};
use schemars::JsonSchema;
use serde::Serialize;

use crate::error::ApiError;

/// Failure envelope returned by every endpoint.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ErrorEnvelope {
    /// Always false.
    pub success: bool,

    /// Stable machine-readable failure code.
    #[serde(rename = "errorCode")]
    pub error_code: String,

    /// Human readable message; generic for internal failures.
    pub message: String,

    /// Whole seconds until a rate-limited client may retry.
    #[serde(rename = "retryAfterSeconds", skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

/// Serialize `body` as a JSON response with the given status.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Body>, HttpError> {
    let payload = serde_json::to_vec(body).map_err(|e| {
        tracing::warn!(error = %e, "failed to serialize response");
        HttpError::for_internal_error(format!("failed to serialize response: {}", e))
    })?;
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))?)
}

/// Build the failure envelope for an [ApiError], attaching `Retry-After`
/// on rate-limit denials.
pub fn error_response(error: &ApiError) -> Result<Response<Body>, HttpError> {
    let envelope = ErrorEnvelope {
        success: false,
        error_code: error.error_code().to_string(),
        message: error.public_message(),
        retry_after_seconds: error.retry_after_seconds(),
    };
    let payload = serde_json::to_vec(&envelope).map_err(|e| {
        tracing::warn!(error = %e, "failed to serialize error envelope");
        HttpError::for_internal_error(format!("failed to serialize error envelope: {}", e))
    })?;

    let mut builder = Response::builder()
        .status(error.status())
        .header(http::header::CONTENT_TYPE, "application/json");
    if let Some(retry_after) = error.retry_after_seconds() {
        builder = builder.header(http::header::RETRY_AFTER, retry_after.to_string());
    }
    Ok(builder.body(Body::from(payload))?)
}

/// A one-off failure envelope with an explicit status and code, used by
/// the admin surface.
pub fn envelope_error(
    status: StatusCode,
    error_code: &str,
    message: impl Into<String>,
) -> Result<Response<Body>, HttpError> {
    json_response(
        status,
        &ErrorEnvelope {
            success: false,
            error_code: error_code.to_string(),
            message: message.into(),
            retry_after_seconds: None,
        },
    )
}
