//! Billing Invariants Module
//!
//! Runnable consistency checks over trial and payment state. Each check is a
//! read-only SQL query; the worker runs the full set once a day and logs
//! anything that drifted (for example an invoice left `issued` by a crash
//! between writes).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Issued invoices younger than this may still be waiting on the provider
const ORPHAN_GRACE_MINUTES: i32 = 60;

/// The expiry sweep runs every 15 minutes; give it two passes
const UNSWEPT_GRACE_MINUTES: i32 = 30;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Organization(s) affected
    pub org_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Money received but not reflected in access
    Critical,
    /// Record contradicts itself
    High,
    /// Leftover of an interrupted flow
    Medium,
    /// Housekeeping lag
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

impl InvariantCheckSummary {
    pub fn from_violations(
        checked_at: OffsetDateTime,
        checks_run: usize,
        mut violations: Vec<InvariantViolation>,
    ) -> Self {
        violations.sort_by_key(|v| v.severity);
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Self {
            checked_at,
            checks_run,
            checks_passed: checks_run.saturating_sub(checks_failed),
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }

    /// Most severe violation level found, if any
    pub fn worst_severity(&self) -> Option<ViolationSeverity> {
        self.violations.iter().map(|v| v.severity).min()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrialWindowRow {
    org_id: Uuid,
    org_name: String,
    trial_start_date: OffsetDateTime,
    trial_end_date: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct OrgNameRow {
    org_id: Uuid,
    org_name: String,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    invoice_id: Uuid,
    org_id: Uuid,
    invoice_number: String,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct PendingTransactionRow {
    transaction_id: Uuid,
    invoice_id: Uuid,
    org_id: Uuid,
    expires_at: OffsetDateTime,
}

/// Service for running billing invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for name in Self::available_checks() {
            violations.extend(self.run_check(name).await?);
        }

        Ok(InvariantCheckSummary::from_violations(
            now,
            Self::available_checks().len(),
            violations,
        ))
    }

    /// Invariant 1: `trial_end_date >= trial_start_date`
    async fn check_trial_dates_ordered(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<TrialWindowRow> = sqlx::query_as(
            r#"
            SELECT id AS org_id, name AS org_name, trial_start_date, trial_end_date
            FROM organizations
            WHERE trial_start_date IS NOT NULL
              AND trial_end_date IS NOT NULL
              AND trial_end_date < trial_start_date
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "trial_dates_ordered".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization '{}' has a trial that ends before it starts",
                    row.org_name
                ),
                context: serde_json::json!({
                    "trial_start_date": row.trial_start_date.to_string(),
                    "trial_end_date": row.trial_end_date.to_string(),
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 2: an expired trial is never still in `trial` status
    async fn check_expired_trial_status(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrgNameRow> = sqlx::query_as(
            r#"
            SELECT id AS org_id, name AS org_name
            FROM organizations
            WHERE trial_expired = TRUE AND subscription_status = 'trial'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "expired_trial_status".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Organization '{}' is flagged trial_expired but still in trial status",
                    row.org_name
                ),
                context: serde_json::json!({ "org_name": row.org_name }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: every paid invoice has a completed transaction
    async fn check_paid_invoice_has_payment(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT i.id AS invoice_id, i.organization_id AS org_id, i.invoice_number, i.created_at
            FROM invoices i
            WHERE i.status = 'paid'
              AND NOT EXISTS (
                  SELECT 1 FROM payment_transactions t
                  WHERE t.invoice_id = i.id AND t.status = 'completed'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "paid_invoice_has_payment".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Invoice {} is paid but has no completed payment transaction",
                    row.invoice_number
                ),
                context: serde_json::json!({
                    "invoice_id": row.invoice_id,
                    "created_at": row.created_at.to_string(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 4: issued invoices get a transaction shortly after creation
    ///
    /// The payment session cancels its invoice when the provider call fails,
    /// so a survivor means the process died between the two writes.
    async fn check_no_orphaned_invoices(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<InvoiceRow> = sqlx::query_as(
            r#"
            SELECT i.id AS invoice_id, i.organization_id AS org_id, i.invoice_number, i.created_at
            FROM invoices i
            WHERE i.status = 'issued'
              AND i.created_at < NOW() - ($1 || ' minutes')::INTERVAL
              AND NOT EXISTS (
                  SELECT 1 FROM payment_transactions t WHERE t.invoice_id = i.id
              )
            "#,
        )
        .bind(ORPHAN_GRACE_MINUTES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_orphaned_invoices".to_string(),
                org_ids: vec![row.org_id],
                description: format!(
                    "Invoice {} is issued but has no payment transaction",
                    row.invoice_number
                ),
                context: serde_json::json!({
                    "invoice_id": row.invoice_id,
                    "created_at": row.created_at.to_string(),
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 5: pending transactions do not outlive `expires_at`
    async fn check_pending_transactions_swept(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PendingTransactionRow> = sqlx::query_as(
            r#"
            SELECT id AS transaction_id, invoice_id, organization_id AS org_id, expires_at
            FROM payment_transactions
            WHERE status = 'pending'
              AND expires_at < NOW() - ($1 || ' minutes')::INTERVAL
            "#,
        )
        .bind(UNSWEPT_GRACE_MINUTES)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "pending_transactions_swept".to_string(),
                org_ids: vec![row.org_id],
                description: "Pending transaction is past its expiry and was not swept".to_string(),
                context: serde_json::json!({
                    "transaction_id": row.transaction_id,
                    "invoice_id": row.invoice_id,
                    "expires_at": row.expires_at.to_string(),
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "trial_dates_ordered" => self.check_trial_dates_ordered().await,
            "expired_trial_status" => self.check_expired_trial_status().await,
            "paid_invoice_has_payment" => self.check_paid_invoice_has_payment().await,
            "no_orphaned_invoices" => self.check_no_orphaned_invoices().await,
            "pending_transactions_swept" => self.check_pending_transactions_swept().await,
            other => Err(BillingError::Validation(format!(
                "Unknown invariant check: {}",
                other
            ))),
        }
    }

    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "trial_dates_ordered",
            "expired_trial_status",
            "paid_invoice_has_payment",
            "no_orphaned_invoices",
            "pending_transactions_swept",
        ]
    }
}
