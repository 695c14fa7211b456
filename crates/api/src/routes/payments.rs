//! Payment session creation
//!
//! Issues an invoice and opens the matching Xendit charge for the selected
//! payment method. Provider failures cancel the invoice before the error is
//! returned.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use opsuite_billing::{PaymentSession, PaymentSessionRequest};
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PaymentSessionResponse {
    pub success: bool,
    #[serde(flatten)]
    pub session: PaymentSession,
}

/// POST /api/v1/payments/sessions
pub async fn create_payment_session(
    State(state): State<AppState>,
    payload: Result<Json<PaymentSessionRequest>, JsonRejection>,
) -> ApiResult<Json<PaymentSessionResponse>> {
    let Json(request) = payload?;

    let session = state.billing.checkout.create_session(&request).await?;

    Ok(Json(PaymentSessionResponse {
        success: true,
        session,
    }))
}
