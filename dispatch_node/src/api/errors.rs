//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use crate::error::DispatchError;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: u64,
}

impl ApiError {
    pub fn new(code: u16, message: String) -> Self {
        Self {
            code,
            message,
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn with_details(code: u16, message: String, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(400, message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(404, message.to_string())
    }

    pub fn internal_server_error(message: &str) -> Self {
        Self::new(500, message.to_string())
    }

    pub fn service_unavailable(message: &str) -> Self {
        Self::new(503, message.to_string())
    }

    pub fn job_not_found(job_id: &str) -> Self {
        Self::with_details(
            404,
            "Job not found".to_string(),
            serde_json::json!({ "jobId": job_id }),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// `{success: false, error}` body used by the drone assignment endpoint.
#[derive(Debug, Serialize)]
pub struct FailureEnvelope {
    pub success: bool,
    pub error: String,
    #[serde(skip)]
    status: StatusCode,
}

impl FailureEnvelope {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            status,
        }
    }
}

impl IntoResponse for FailureEnvelope {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match &err {
            DispatchError::JobNotFound(id) => Self::job_not_found(id),
            DispatchError::NoDroneAvailable(_) => Self::service_unavailable(&err.to_string()),
            DispatchError::InvalidAddress(..) | DispatchError::Amount(_) => {
                Self::bad_request(&err.to_string())
            }
            _ => Self::internal_server_error(&err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_error_mapping() {
        assert_eq!(ApiError::from(DispatchError::JobNotFound("9".into())).code, 404);
        assert_eq!(ApiError::from(DispatchError::NoDroneAvailable("x".into())).code, 503);
        assert_eq!(ApiError::from(DispatchError::Config("x".into())).code, 500);
    }

    #[test]
    fn test_details_omitted_when_absent() {
        let json = serde_json::to_value(ApiError::bad_request("nope")).unwrap();
        assert_eq!(json["code"], 400);
        assert!(json.get("details").is_none());

        let json = serde_json::to_value(ApiError::job_not_found("7")).unwrap();
        assert_eq!(json["details"]["jobId"], "7");
    }
}
