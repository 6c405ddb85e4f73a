use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::AppEnv;
use crate::utils::ErrorResponse;

pub const EXTERNAL_API_ERROR: &str = "External API error";
pub const NO_RESPONSE: &str = "No response from API";
pub const REQUEST_SETUP: &str = "Error during API request setup";
pub const INVALID_RESPONSE: &str = "Invalid response from API";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// The provider answered with a non-success status.
    Upstream,
    /// The request went out but nothing usable came back (network, DNS, timeout).
    NoResponse,
    /// The request could not be built.
    RequestSetup,
    /// Inbound parameters were rejected before reaching the service.
    Validation,
    /// Refused by this server itself (unknown route, rate limit).
    Rejected,
    Internal,
}

/// Uniform error surfaced by the upstream client, the service and the router.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (status {status_code})")]
pub struct ApiError {
    pub status_code: u16,
    pub message: String,
    pub is_operational: bool,
    pub kind: ApiErrorKind,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        let kind = match status_code {
            400 => ApiErrorKind::Validation,
            s if s >= 500 => ApiErrorKind::Internal,
            _ => ApiErrorKind::Rejected,
        };
        Self {
            status_code,
            message: message.into(),
            is_operational: true,
            kind,
            details: None,
        }
    }

    pub fn upstream(status_code: u16, message: Option<String>) -> Self {
        Self {
            status_code,
            message: message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| EXTERNAL_API_ERROR.to_string()),
            is_operational: true,
            kind: ApiErrorKind::Upstream,
            details: None,
        }
    }

    pub fn no_response() -> Self {
        Self {
            status_code: 500,
            message: NO_RESPONSE.to_string(),
            is_operational: true,
            kind: ApiErrorKind::NoResponse,
            details: None,
        }
    }

    pub fn request_setup() -> Self {
        Self {
            status_code: 500,
            message: REQUEST_SETUP.to_string(),
            is_operational: true,
            kind: ApiErrorKind::RequestSetup,
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            status_code: 400,
            message: message.into(),
            is_operational: true,
            kind: ApiErrorKind::Validation,
            details: Some(details),
        }
    }

    /// Unexpected failure; the message is hidden from clients outside development.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            message: message.into(),
            is_operational: false,
            kind: ApiErrorKind::Internal,
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn into_response_with(self, app_env: AppEnv) -> Response {
        let status = self.status();
        let debug = app_env.is_development().then(|| format!("{:?}", self));
        let error = if self.is_operational || app_env.is_development() {
            self.message
        } else {
            "Internal Server Error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error,
            status_code: status.as_u16(),
            details: self.details,
            debug,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_response_with(AppEnv::Production)
    }
}
