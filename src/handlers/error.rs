//! Error responses for the HTTP API.
//!
//! Every failure renders as `{"isOK": false, "error": "..."}` with a status
//! code that reflects the cause.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::api::StatusResponse;
use crate::session::SessionError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::UnknownSession(_) | SessionError::SessionGone => StatusCode::NOT_FOUND,
            SessionError::SessionTerminated => StatusCode::GONE,
            SessionError::NotAuthenticated => StatusCode::FORBIDDEN,
            SessionError::UnknownRecipient(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::External(_) => StatusCode::BAD_GATEWAY,
            SessionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(StatusResponse::error(self.message))).into_response()
    }
}

/// Give the request-timeout layer's empty 408 the API's error body.
pub async fn render_timeout(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return ApiError::new(StatusCode::REQUEST_TIMEOUT, "request timed out").into_response();
    }
    response
}

/// Extract a required, non-blank string field.
pub fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::validation(format!("{field} is required"))),
    }
}
