//! In-memory fakes for the store, provider and sweep seams
//!
//! Compiled for this crate's tests and, through the `test-util` feature, for
//! dependent crates' tests.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use opsuite_shared::SubscriptionStatus;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::error::{BillingError, BillingResult};
use crate::events::NewSubscriptionEvent;
use crate::models::{
    Invoice, InvoiceStatus, NewInvoice, NewPaymentTransaction, Organization, PaymentMethod,
    PaymentMethodType, PaymentTransaction, ProviderPaymentDetails, SubscriptionActivation,
    SubscriptionPlan, TransactionStatus, TransactionStatusUpdate,
};
use crate::notifications::NewNotification;
use crate::store::BillingStore;
use crate::trial::{ExpirationSweep, TRIAL_LENGTH_DAYS};
use crate::xendit::{ChargeRequest, PaymentGateway, ProviderCharge};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Tables {
    organizations: Vec<Organization>,
    profiles: Vec<(Uuid, Uuid, String)>,
    plans: Vec<SubscriptionPlan>,
    payment_methods: Vec<PaymentMethod>,
    invoices: Vec<Invoice>,
    transactions: Vec<PaymentTransaction>,
    audit_logs: Vec<AuditEntry>,
    notifications: Vec<NewNotification>,
    subscription_events: Vec<NewSubscriptionEvent>,
    invoice_seq: u32,
    writes: usize,
    failing: HashSet<&'static str>,
}

impl Tables {
    fn write(&mut self, table: &'static str) -> BillingResult<()> {
        if self.failing.contains(table) {
            return Err(BillingError::Database(format!("{} unavailable", table)));
        }
        self.writes += 1;
        Ok(())
    }

    fn org_mut(&mut self, org_id: Uuid) -> Option<&mut Organization> {
        self.organizations.iter_mut().find(|o| o.id == org_id)
    }

    fn invoice_mut(&mut self, invoice_id: Uuid) -> Option<&mut Invoice> {
        self.invoices.iter_mut().find(|i| i.id == invoice_id)
    }
}

/// [`BillingStore`] over plain vectors. Every successful write bumps a
/// counter so tests can assert that a rejected request changed nothing.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- seeding (not counted as writes) ----

    pub fn add_organization(&self, org: Organization) -> Uuid {
        let id = org.id;
        lock(&self.tables).organizations.push(org);
        id
    }

    /// Organization in the middle of a running trial
    pub fn add_org(&self, name: &str) -> Uuid {
        let now = OffsetDateTime::now_utc();
        self.add_organization(Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: Some(format!("billing@{}.test", name.to_lowercase().replace(' ', "-"))),
            address: None,
            trial_start_date: Some(now - Duration::days(7)),
            trial_end_date: Some(now + Duration::days(7)),
            trial_expired: false,
            subscription_status: SubscriptionStatus::Trial,
            subscription_plan_id: None,
            subscription_start_date: None,
            subscription_end_date: None,
        })
    }

    pub fn add_trial_org(
        &self,
        trial_start_date: Option<OffsetDateTime>,
        trial_end_date: Option<OffsetDateTime>,
    ) -> Uuid {
        self.add_organization(Organization {
            id: Uuid::new_v4(),
            name: "Trial Org".to_string(),
            email: None,
            address: None,
            trial_start_date,
            trial_end_date,
            trial_expired: false,
            subscription_status: SubscriptionStatus::Trial,
            subscription_plan_id: None,
            subscription_start_date: None,
            subscription_end_date: None,
        })
    }

    pub fn add_profile(&self, org_id: Uuid, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.tables)
            .profiles
            .push((id, org_id, role.to_string()));
        id
    }

    /// Active IDR plan billed every 30 days
    pub fn add_plan(&self, name: &str, price: i64) -> Uuid {
        let id = Uuid::new_v4();
        lock(&self.tables).plans.push(SubscriptionPlan {
            id,
            name: name.to_string(),
            price,
            currency: "IDR".to_string(),
            billing_period_days: 30,
            is_active: true,
        });
        id
    }

    pub fn deactivate_plan(&self, plan_id: Uuid) {
        let mut tables = lock(&self.tables);
        if let Some(plan) = tables.plans.iter_mut().find(|p| p.id == plan_id) {
            plan.is_active = false;
        }
    }

    pub fn add_payment_method(&self, code: &str, method_type: PaymentMethodType, channel: &str) {
        lock(&self.tables).payment_methods.push(PaymentMethod {
            code: code.to_string(),
            name: code.to_string(),
            method_type,
            channel_code: channel.to_string(),
            is_active: true,
        });
    }

    /// Move a transaction's expiry, e.g. into the past for sweep tests
    pub fn set_transaction_expiry(&self, transaction_id: Uuid, expires_at: OffsetDateTime) {
        let mut tables = lock(&self.tables);
        if let Some(tx) = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
        {
            tx.expires_at = expires_at;
        }
    }

    /// Make every subsequent write to `table` fail
    pub fn fail_writes(&self, table: &'static str) {
        lock(&self.tables).failing.insert(table);
    }

    // ---- inspection ----

    pub fn write_count(&self) -> usize {
        lock(&self.tables).writes
    }

    pub fn organization(&self, org_id: Uuid) -> Option<Organization> {
        lock(&self.tables)
            .organizations
            .iter()
            .find(|o| o.id == org_id)
            .cloned()
    }

    pub fn invoices(&self) -> Vec<Invoice> {
        lock(&self.tables).invoices.clone()
    }

    pub fn invoice(&self, invoice_id: Uuid) -> Option<Invoice> {
        lock(&self.tables)
            .invoices
            .iter()
            .find(|i| i.id == invoice_id)
            .cloned()
    }

    pub fn transactions(&self) -> Vec<PaymentTransaction> {
        lock(&self.tables).transactions.clone()
    }

    pub fn audit_logs(&self) -> Vec<AuditEntry> {
        lock(&self.tables).audit_logs.clone()
    }

    pub fn notifications(&self) -> Vec<NewNotification> {
        lock(&self.tables).notifications.clone()
    }

    pub fn subscription_events(&self) -> Vec<NewSubscriptionEvent> {
        lock(&self.tables).subscription_events.clone()
    }

    /// Let spawned analytics inserts run until `count` events are stored
    pub async fn wait_for_events(&self, count: usize) {
        for _ in 0..100 {
            if lock(&self.tables).subscription_events.len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        Ok(self.organization(org_id))
    }

    async fn mark_trial_expired(&self, org_id: Uuid) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("organizations")?;
        if let Some(org) = tables.org_mut(org_id) {
            org.trial_expired = true;
            org.subscription_status = SubscriptionStatus::Expired;
            if org.trial_start_date.is_none() {
                org.trial_start_date = org
                    .trial_end_date
                    .map(|end| end - Duration::days(TRIAL_LENGTH_DAYS));
            }
        }
        Ok(())
    }

    async fn backfill_trial_start(
        &self,
        org_id: Uuid,
        trial_start_date: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("organizations")?;
        if let Some(org) = tables.org_mut(org_id) {
            if org.trial_start_date.is_none() {
                org.trial_start_date = Some(trial_start_date);
            }
        }
        Ok(())
    }

    async fn list_lapsed_trials(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<Uuid>> {
        let tables = lock(&self.tables);
        Ok(tables
            .organizations
            .iter()
            .filter(|o| matches!(o.trial_end_date, Some(end) if end < now))
            .filter(|o| o.subscription_status == SubscriptionStatus::Trial || !o.trial_expired)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|o| o.id)
            .collect())
    }

    async fn activate_subscription(&self, activation: SubscriptionActivation) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("organizations")?;
        if let Some(org) = tables.org_mut(activation.organization_id) {
            org.subscription_status = SubscriptionStatus::Active;
            org.subscription_plan_id = Some(activation.plan_id);
            org.subscription_start_date = Some(activation.period_start);
            org.subscription_end_date = Some(activation.period_end);
            if activation.clear_trial {
                org.trial_expired = false;
                org.trial_end_date = None;
            }
        }
        Ok(())
    }

    async fn list_org_admins(&self, org_id: Uuid) -> BillingResult<Vec<Uuid>> {
        Ok(lock(&self.tables)
            .profiles
            .iter()
            .filter(|(_, org, role)| *org == org_id && (role == "admin" || role == "owner"))
            .map(|(id, _, _)| *id)
            .collect())
    }

    async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Option<SubscriptionPlan>> {
        Ok(lock(&self.tables)
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .cloned())
    }

    async fn get_payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        Ok(lock(&self.tables)
            .payment_methods
            .iter()
            .find(|m| m.code == code)
            .cloned())
    }

    async fn next_invoice_number(&self) -> BillingResult<String> {
        let mut tables = lock(&self.tables);
        tables.invoice_seq += 1;
        let now = OffsetDateTime::now_utc();
        Ok(format!(
            "INV-{}{:02}-{:05}",
            now.year(),
            u8::from(now.month()),
            tables.invoice_seq
        ))
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let mut tables = lock(&self.tables);
        tables.write("invoices")?;
        let row = Invoice {
            id: Uuid::new_v4(),
            organization_id: invoice.organization_id,
            plan_id: invoice.plan_id,
            invoice_number: invoice.invoice_number,
            amount: invoice.amount,
            tax_amount: invoice.tax_amount,
            total_amount: invoice.total_amount,
            status: InvoiceStatus::Issued,
            due_date: invoice.due_date,
            paid_at: None,
            payment_details: invoice.payment_details,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.invoices.push(row.clone());
        Ok(row)
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>> {
        Ok(self.invoice(invoice_id))
    }

    async fn find_invoice_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        Ok(lock(&self.tables)
            .invoices
            .iter()
            .find(|i| i.payment_details.external_id == external_id)
            .cloned())
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("invoices")?;
        if let Some(invoice) = tables.invoice_mut(invoice_id) {
            invoice.status = InvoiceStatus::Paid;
            invoice.paid_at = Some(paid_at);
        }
        Ok(())
    }

    async fn cancel_invoice(&self, invoice_id: Uuid, reason: &str) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("invoices")?;
        if let Some(invoice) = tables.invoice_mut(invoice_id) {
            invoice.status = InvoiceStatus::Cancelled;
            invoice.payment_details.cancellation_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn mark_invoice_pdf_generated(&self, invoice_id: Uuid) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("invoices")?;
        if let Some(invoice) = tables.invoice_mut(invoice_id) {
            invoice.payment_details.pdf_generated = true;
        }
        Ok(())
    }

    async fn insert_transaction(
        &self,
        transaction: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction> {
        let mut tables = lock(&self.tables);
        tables.write("payment_transactions")?;
        let row = PaymentTransaction {
            id: Uuid::new_v4(),
            invoice_id: transaction.invoice_id,
            organization_id: transaction.organization_id,
            provider_reference: transaction.provider_reference,
            payment_url: transaction.payment_url,
            status: TransactionStatus::Pending,
            amount: transaction.amount,
            payment_details: transaction.payment_details,
            provider_payment_id: None,
            expires_at: transaction.expires_at,
            completed_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.transactions.push(row.clone());
        Ok(row)
    }

    async fn latest_transaction_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<PaymentTransaction>> {
        Ok(lock(&self.tables)
            .transactions
            .iter()
            .rev()
            .find(|t| t.invoice_id == invoice_id)
            .cloned())
    }

    async fn set_transaction_status(&self, update: TransactionStatusUpdate) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("payment_transactions")?;
        if let Some(tx) = tables
            .transactions
            .iter_mut()
            .find(|t| t.id == update.transaction_id)
        {
            tx.status = update.status;
            if update.provider_payment_id.is_some() {
                tx.provider_payment_id = update.provider_payment_id;
            }
            if update.completed_at.is_some() {
                tx.completed_at = update.completed_at;
            }
        }
        Ok(())
    }

    async fn list_stale_pending_transactions(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<PaymentTransaction>> {
        Ok(lock(&self.tables)
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending && t.expires_at < now)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn insert_audit_log(&self, entry: AuditEntry) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("audit_logs")?;
        tables.audit_logs.push(entry);
        Ok(())
    }

    async fn insert_notification(&self, notification: NewNotification) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("notifications")?;
        tables.notifications.push(notification);
        Ok(())
    }

    async fn insert_subscription_event(&self, event: NewSubscriptionEvent) -> BillingResult<()> {
        let mut tables = lock(&self.tables);
        tables.write("subscription_events")?;
        tables.subscription_events.push(event);
        Ok(())
    }
}

/// Provider fake that answers every charge from a script
pub struct ScriptedGateway {
    failure: Option<String>,
    requests: Mutex<Vec<ChargeRequest>>,
}

impl ScriptedGateway {
    pub fn succeeding() -> Self {
        Self {
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every charge fails with a provider error carrying `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChargeRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> BillingResult<ProviderCharge> {
        let n = {
            let mut requests = lock(&self.requests);
            requests.push(request.clone());
            requests.len()
        };

        if let Some(message) = &self.failure {
            return Err(BillingError::Provider(message.clone()));
        }

        let details = match request.method_type {
            PaymentMethodType::BankTransfer => ProviderPaymentDetails::BankTransfer {
                bank_code: request.channel_code.clone(),
                account_number: format!("88081{:08}", n),
            },
            PaymentMethodType::Ewallet => ProviderPaymentDetails::Ewallet {
                channel_code: request.channel_code.clone(),
                checkout_url: format!("https://ewallet.test/checkout/{}", request.external_id),
            },
            PaymentMethodType::RetailOutlet => ProviderPaymentDetails::RetailOutlet {
                retail_outlet_name: request.channel_code.clone(),
                payment_code: format!("TEST{:06}", n),
            },
            PaymentMethodType::CreditCard => ProviderPaymentDetails::CreditCard {
                invoice_url: format!("https://checkout.test/web/{}", request.external_id),
            },
        };

        Ok(ProviderCharge {
            provider_reference: format!("{}-{}", request.method_type.as_str(), n),
            details,
        })
    }
}

/// Records which organizations the sweep was triggered for
#[derive(Default)]
pub struct RecordingSweep {
    fail: bool,
    calls: Mutex<Vec<Uuid>>,
}

impl RecordingSweep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the call, then reports failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Uuid> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ExpirationSweep for RecordingSweep {
    async fn trigger(&self, organization_id: Uuid) -> BillingResult<()> {
        lock(&self.calls).push(organization_id);
        if self.fail {
            return Err(BillingError::Provider("sweep unavailable".to_string()));
        }
        Ok(())
    }
}
