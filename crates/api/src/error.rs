//! API error types

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use opsuite_billing::BillingError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid callback token")]
    Unauthorized,

    /// The payment provider rejected or failed the request
    #[error("{0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::Validation(msg) => ApiError::Validation(msg),
            BillingError::NotFound(msg) => ApiError::NotFound(msg),
            BillingError::Unauthorized => ApiError::Unauthorized,
            BillingError::Provider(msg) => ApiError::Upstream(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal API error");
                "Internal server error".to_string()
            }
            ApiError::Upstream(detail) => {
                tracing::warn!(error = %detail, "Payment provider error");
                format!("Payment provider error: {}", detail)
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "message": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_errors_map_to_status() {
        let cases = [
            (BillingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (BillingError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BillingError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                BillingError::Provider("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::Database("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                BillingError::Pdf("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let response = ApiError::Internal("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
