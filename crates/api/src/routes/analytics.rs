//! Subscription analytics ingestion
//!
//! Lets the SPA record funnel events such as `upgrade_clicked` or
//! `trial_warning_shown`. The insert runs in the background; the client only
//! learns whether the event was well-formed.

use axum::{extract::rejection::JsonRejection, extract::State, http::StatusCode, Json};
use opsuite_billing::SubscriptionEventKind;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TrackEventRequest {
    #[serde(rename = "organizationId")]
    pub organization_id: Option<String>,
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_data: Value,
}

impl TrackEventRequest {
    fn into_event(self) -> ApiResult<(Uuid, Option<Uuid>, SubscriptionEventKind)> {
        let organization_id = parse_id(self.organization_id.as_deref(), "Organization ID")?
            .ok_or_else(|| ApiError::Validation("Organization ID is required".to_string()))?;
        let user_id = parse_id(self.user_id.as_deref(), "User ID")?;

        let event_type = self
            .event_type
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ApiError::Validation("Event type is required".to_string()))?;

        let event_data = match self.event_data {
            Value::Null => json!({}),
            other => other,
        };

        let kind = serde_json::from_value::<SubscriptionEventKind>(json!({
            "event_type": event_type,
            "event_data": event_data,
        }))
        .map_err(|e| ApiError::Validation(format!("Invalid event {}: {}", event_type, e)))?;

        Ok((organization_id, user_id, kind))
    }
}

fn parse_id(raw: Option<&str>, label: &str) -> ApiResult<Option<Uuid>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => Uuid::parse_str(s)
            .map(Some)
            .map_err(|_| ApiError::Validation(format!("{} is not a valid UUID", label))),
    }
}

/// POST /api/v1/analytics/subscription-events
pub async fn track_subscription_event(
    State(state): State<AppState>,
    payload: Result<Json<TrackEventRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(request) = payload?;
    let (organization_id, user_id, kind) = request.into_event()?;

    state.billing.events.track(organization_id, user_id, kind);

    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true }))))
}
