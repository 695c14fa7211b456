//! Trial status endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use opsuite_billing::TrialCountdown;
use opsuite_shared::SubscriptionStatus;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TrialStatusResponse {
    pub success: bool,
    pub organization_id: Uuid,
    pub subscription_status: SubscriptionStatus,
    pub trial_expired: bool,
    /// Absent when the organization has no trial end date
    pub countdown: Option<TrialCountdown>,
    pub show_warning: bool,
}

/// GET /api/v1/organizations/{id}/trial
///
/// Runs the trial resolver first so the snapshot reflects any expiry it
/// just applied.
pub async fn get_trial_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TrialStatusResponse>> {
    let org_id = Uuid::parse_str(id.trim())
        .map_err(|_| ApiError::Validation("Organization ID is not a valid UUID".to_string()))?;

    let now = OffsetDateTime::now_utc();
    let expired = state.billing.trial.check_trial_status_at(org_id, now).await;

    let org = state
        .billing
        .store
        .get_organization(org_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Organization not found".to_string()))?;

    let countdown = TrialCountdown::for_organization(&org, now);
    let show_warning = org.subscription_status == SubscriptionStatus::Trial
        && countdown.is_some_and(|c| c.in_warning_window());

    tracing::debug!(
        org_id = %org_id,
        expired = expired,
        status = %org.subscription_status,
        "Trial status requested"
    );

    Ok(Json(TrialStatusResponse {
        success: true,
        organization_id: org.id,
        subscription_status: org.subscription_status,
        trial_expired: org.trial_expired,
        countdown,
        show_warning,
    }))
}
