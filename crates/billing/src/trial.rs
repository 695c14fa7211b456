//! Trial status resolution
//!
//! Decides whether an organization's trial has lapsed and repairs records
//! whose trial columns drifted out of shape. Callers treat the resolver as
//! advisory: it never returns an error, only whether it changed anything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opsuite_shared::SubscriptionStatus;
use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{SubscriptionEventKind, SubscriptionEventTracker};
use crate::models::Organization;
use crate::store::BillingStore;

/// Length of a free trial
pub const TRIAL_LENGTH_DAYS: i64 = 14;

/// Organizations handled per sweep pass
const LAPSED_TRIAL_BATCH: i64 = 500;

/// External job notified after a trial is expired (e.g. to send the
/// "your trial ended" email). Best effort only.
#[async_trait]
pub trait ExpirationSweep: Send + Sync {
    async fn trigger(&self, organization_id: Uuid) -> BillingResult<()>;
}

/// Invokes the hosted expiration function over HTTP
pub struct HttpExpirationSweep {
    http: reqwest::Client,
    url: String,
    service_role_key: String,
}

impl HttpExpirationSweep {
    pub fn new(config: &BillingConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: config.trial_sweep_url.clone(),
            service_role_key: config.supabase_service_role_key.clone(),
        })
    }
}

#[async_trait]
impl ExpirationSweep for HttpExpirationSweep {
    async fn trigger(&self, organization_id: Uuid) -> BillingResult<()> {
        if self.url.is_empty() {
            tracing::debug!(org_id = %organization_id, "No expiration sweep URL configured");
            return Ok(());
        }

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.service_role_key)
            .json(&json!({ "organization_id": organization_id }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(BillingError::Provider(format!(
                "Expiration sweep returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// What the resolver will do for a given organization row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialDecision {
    /// Trial end date passed but the row still looks live
    Expire,
    /// `trial_start_date` missing; derive it from the end date
    BackfillStart(OffsetDateTime),
    Unchanged,
}

impl TrialDecision {
    pub fn for_organization(org: &Organization, now: OffsetDateTime) -> Self {
        let expired_by_date = matches!(org.trial_end_date, Some(end) if end < now);

        if expired_by_date
            && (org.subscription_status == SubscriptionStatus::Trial || !org.trial_expired)
        {
            return TrialDecision::Expire;
        }

        match (org.trial_start_date, org.trial_end_date) {
            (None, Some(end)) => {
                TrialDecision::BackfillStart(end - time::Duration::days(TRIAL_LENGTH_DAYS))
            }
            _ => TrialDecision::Unchanged,
        }
    }
}

/// Lapses trials and self-heals trial columns
#[derive(Clone)]
pub struct TrialStatusResolver {
    store: Arc<dyn BillingStore>,
    sweep: Arc<dyn ExpirationSweep>,
    tracker: SubscriptionEventTracker,
}

impl TrialStatusResolver {
    pub fn new(store: Arc<dyn BillingStore>, sweep: Arc<dyn ExpirationSweep>) -> Self {
        let tracker = SubscriptionEventTracker::new(store.clone());
        Self {
            store,
            sweep,
            tracker,
        }
    }

    /// Returns `true` only when this call expired the trial
    pub async fn check_trial_status(&self, org_id: Uuid) -> bool {
        self.check_trial_status_at(org_id, OffsetDateTime::now_utc())
            .await
    }

    pub async fn check_trial_status_at(&self, org_id: Uuid, now: OffsetDateTime) -> bool {
        match self.resolve(org_id, now).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!(org_id = %org_id, error = %e, "Trial status check failed");
                false
            }
        }
    }

    async fn resolve(&self, org_id: Uuid, now: OffsetDateTime) -> BillingResult<bool> {
        let Some(org) = self.store.get_organization(org_id).await? else {
            tracing::debug!(org_id = %org_id, "Trial check for unknown organization");
            return Ok(false);
        };

        match TrialDecision::for_organization(&org, now) {
            TrialDecision::Expire => {
                self.store.mark_trial_expired(org_id).await?;
                tracing::info!(
                    org_id = %org_id,
                    trial_end_date = ?org.trial_end_date,
                    previous_status = org.subscription_status.as_str(),
                    "Trial expired"
                );
                self.after_expiry(&org).await;
                Ok(true)
            }
            TrialDecision::BackfillStart(start) => {
                self.store.backfill_trial_start(org_id, start).await?;
                tracing::info!(
                    org_id = %org_id,
                    trial_start_date = %start,
                    "Backfilled missing trial start date"
                );
                Ok(false)
            }
            TrialDecision::Unchanged => Ok(false),
        }
    }

    /// Non-fatal follow-ups of an expiry
    async fn after_expiry(&self, org: &Organization) {
        let entry = AuditEntry::new(org.id, AuditAction::TrialExpired).details(json!({
            "trial_end_date": org.trial_end_date.map(|d| d.to_string()),
            "previous_status": org.subscription_status.as_str(),
        }));
        if let Err(e) = self.store.insert_audit_log(entry).await {
            tracing::warn!(org_id = %org.id, error = %e, "Failed to write trial expiry audit log");
        }

        if let Err(e) = self.sweep.trigger(org.id).await {
            tracing::warn!(org_id = %org.id, error = %e, "Expiration sweep trigger failed");
        }

        self.tracker.track(
            org.id,
            None,
            SubscriptionEventKind::TrialExpired {
                trial_end_date: org.trial_end_date,
            },
        );
    }

    /// Expire every trial that lapsed before `now`. Returns how many changed.
    pub async fn expire_lapsed_trials(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let org_ids = self.store.list_lapsed_trials(now, LAPSED_TRIAL_BATCH).await?;
        let mut expired = 0;
        for org_id in &org_ids {
            if self.check_trial_status_at(*org_id, now).await {
                expired += 1;
            }
        }

        if !org_ids.is_empty() {
            tracing::info!(
                candidates = org_ids.len(),
                expired = expired,
                "Lapsed trial sweep finished"
            );
        }
        Ok(expired)
    }
}
