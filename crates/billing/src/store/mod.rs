//! Persistence seam for the billing core
//!
//! Services talk to the database through [`BillingStore`] so the trial and
//! payment flows can run against Postgres in production and an in-memory
//! store in tests. Each method is a single statement; the flows that issue
//! several writes are not wrapped in a database transaction.

mod postgres;

pub use postgres::PgBillingStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::error::BillingResult;
use crate::events::NewSubscriptionEvent;
use crate::models::{
    Invoice, NewInvoice, NewPaymentTransaction, Organization, PaymentMethod, PaymentTransaction,
    SubscriptionActivation, SubscriptionPlan, TransactionStatusUpdate,
};
use crate::notifications::NewNotification;

#[async_trait]
pub trait BillingStore: Send + Sync {
    // ---- organizations ----

    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>>;

    /// `trial_expired = true, subscription_status = 'expired'`. A missing
    /// `trial_start_date` is filled from the end date in the same write.
    async fn mark_trial_expired(&self, org_id: Uuid) -> BillingResult<()>;

    async fn backfill_trial_start(
        &self,
        org_id: Uuid,
        trial_start_date: OffsetDateTime,
    ) -> BillingResult<()>;

    /// Organizations whose trial ended before `now` but are not yet marked expired
    async fn list_lapsed_trials(&self, now: OffsetDateTime, limit: i64)
        -> BillingResult<Vec<Uuid>>;

    async fn activate_subscription(&self, activation: SubscriptionActivation) -> BillingResult<()>;

    /// Profile ids with role `admin` or `owner`
    async fn list_org_admins(&self, org_id: Uuid) -> BillingResult<Vec<Uuid>>;

    // ---- catalog ----

    async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Option<SubscriptionPlan>>;

    async fn get_payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>>;

    // ---- invoices ----

    /// Next value of the store-side invoice number generator
    async fn next_invoice_number(&self) -> BillingResult<String>;

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice>;

    async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Lookup by `payment_details.external_id`
    async fn find_invoice_by_external_id(&self, external_id: &str)
        -> BillingResult<Option<Invoice>>;

    async fn mark_invoice_paid(&self, invoice_id: Uuid, paid_at: OffsetDateTime)
        -> BillingResult<()>;

    /// Status `cancelled` with `payment_details.cancellation_reason` set
    async fn cancel_invoice(&self, invoice_id: Uuid, reason: &str) -> BillingResult<()>;

    /// Sets `payment_details.pdf_generated = true`
    async fn mark_invoice_pdf_generated(&self, invoice_id: Uuid) -> BillingResult<()>;

    // ---- payment transactions ----

    async fn insert_transaction(
        &self,
        transaction: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction>;

    async fn latest_transaction_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<PaymentTransaction>>;

    async fn set_transaction_status(&self, update: TransactionStatusUpdate) -> BillingResult<()>;

    /// Pending transactions whose `expires_at` is before `now`
    async fn list_stale_pending_transactions(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<PaymentTransaction>>;

    // ---- append-only logs ----

    async fn insert_audit_log(&self, entry: AuditEntry) -> BillingResult<()>;

    async fn insert_notification(&self, notification: NewNotification) -> BillingResult<()>;

    async fn insert_subscription_event(&self, event: NewSubscriptionEvent) -> BillingResult<()>;
}
