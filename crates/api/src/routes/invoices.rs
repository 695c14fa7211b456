//! Invoice PDF endpoint

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePdfRequest {
    pub invoice_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoicePdfResponse {
    pub success: bool,
    pub invoice_id: Uuid,
    pub invoice_number: String,
    /// Base64-encoded PDF
    pub pdf_data: String,
}

/// POST /api/v1/invoices/pdf
pub async fn generate_invoice_pdf(
    State(state): State<AppState>,
    payload: Result<Json<InvoicePdfRequest>, JsonRejection>,
) -> ApiResult<Json<InvoicePdfResponse>> {
    let Json(request) = payload?;

    let raw = request
        .invoice_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::Validation("Invoice ID is required".to_string()))?;
    let invoice_id = Uuid::parse_str(raw)
        .map_err(|_| ApiError::Validation("Invoice ID is not a valid UUID".to_string()))?;

    let pdf = state.billing.invoices.generate(invoice_id).await?;

    Ok(Json(InvoicePdfResponse {
        success: true,
        invoice_id: pdf.invoice_id,
        invoice_number: pdf.invoice_number,
        pdf_data: pdf.pdf_data,
    }))
}
