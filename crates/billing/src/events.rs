//! Subscription funnel analytics
//!
//! Fire-and-forget logging of trial and checkout milestones into the
//! append-only `subscription_events` table. Tracking never fails the caller:
//! inserts run on a spawned task and errors are only logged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// One analytics event, with the payload each event type carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "event_data", rename_all = "snake_case")]
pub enum SubscriptionEventKind {
    TrialStarted {
        #[serde(with = "time::serde::rfc3339")]
        trial_end_date: OffsetDateTime,
    },
    TrialWarningShown {
        days_left: i64,
    },
    TrialExpired {
        #[serde(default, with = "time::serde::rfc3339::option")]
        trial_end_date: Option<OffsetDateTime>,
    },
    UpgradeClicked {
        /// Where in the UI the upgrade prompt was clicked
        source: String,
    },
    CheckoutStarted {
        plan_id: Uuid,
        invoice_id: Uuid,
        payment_method_code: String,
        amount: i64,
    },
    PaymentCompleted {
        invoice_id: Uuid,
        amount: i64,
        payment_id: Option<String>,
    },
    PaymentFailed {
        invoice_id: Uuid,
        reason: String,
    },
    SubscriptionActivated {
        plan_id: Uuid,
    },
}

impl SubscriptionEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            SubscriptionEventKind::TrialStarted { .. } => "trial_started",
            SubscriptionEventKind::TrialWarningShown { .. } => "trial_warning_shown",
            SubscriptionEventKind::TrialExpired { .. } => "trial_expired",
            SubscriptionEventKind::UpgradeClicked { .. } => "upgrade_clicked",
            SubscriptionEventKind::CheckoutStarted { .. } => "checkout_started",
            SubscriptionEventKind::PaymentCompleted { .. } => "payment_completed",
            SubscriptionEventKind::PaymentFailed { .. } => "payment_failed",
            SubscriptionEventKind::SubscriptionActivated { .. } => "subscription_activated",
        }
    }

    /// The `event_data` column value
    pub fn event_data(&self) -> BillingResult<serde_json::Value> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("event_data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }
}

/// One `subscription_events` row
#[derive(Debug, Clone)]
pub struct NewSubscriptionEvent {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: SubscriptionEventKind,
}

/// Writes analytics events without blocking the request that produced them
#[derive(Clone)]
pub struct SubscriptionEventTracker {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionEventTracker {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Queue an event. The returned handle may be dropped; it exists so tests
    /// can wait for the insert.
    pub fn track(
        &self,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        kind: SubscriptionEventKind,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let event_type = kind.event_type();
            let event = NewSubscriptionEvent {
                organization_id,
                user_id,
                kind,
            };
            if let Err(e) = store.insert_subscription_event(event).await {
                tracing::warn!(
                    org_id = %organization_id,
                    event_type = event_type,
                    error = %e,
                    "Failed to record subscription event"
                );
            }
        })
    }
}
