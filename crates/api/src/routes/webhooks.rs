//! Xendit callback endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use opsuite_billing::WebhookOutcome;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header Xendit uses to carry the shared callback token
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// `{success, message}` plus the reconciler's outcome, tagged by `result`
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    pub outcome: WebhookOutcome,
}

/// POST /api/v1/webhooks/xendit
///
/// Every accepted callback is answered with 200 so Xendit stops retrying,
/// including unhandled events and transitions that conflict with a terminal
/// state. The token is checked before the body is parsed.
pub async fn xendit_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    state.billing.webhooks.verify_token(token)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid callback payload: {}", e)))?;

    let outcome = state.billing.webhooks.handle(token, &payload).await?;

    Ok(Json(WebhookResponse {
        success: true,
        message: outcome.message(),
        outcome,
    }))
}

/// OPTIONS /api/v1/webhooks/xendit
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}
