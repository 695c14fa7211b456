//! Postgres implementation of [`BillingStore`]

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::BillingStore;
use crate::audit::AuditEntry;
use crate::error::{BillingError, BillingResult};
use crate::events::NewSubscriptionEvent;
use crate::models::{
    Invoice, InvoicePaymentDetails, NewInvoice, NewPaymentTransaction, Organization,
    PaymentMethod, PaymentTransaction, ProviderPaymentDetails, SubscriptionActivation,
    SubscriptionPlan, TransactionStatusUpdate,
};
use crate::notifications::NewNotification;
use crate::trial::TRIAL_LENGTH_DAYS;

const ORGANIZATION_COLUMNS: &str = r#"
    id, name, email, address, trial_start_date, trial_end_date, trial_expired,
    subscription_status, subscription_plan_id, subscription_start_date,
    subscription_end_date
"#;

const INVOICE_COLUMNS: &str = r#"
    id, organization_id, plan_id, invoice_number, amount, tax_amount, total_amount,
    status, due_date, paid_at, payment_details, created_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    id, invoice_id, organization_id, provider_reference, payment_url, status, amount,
    payment_details, provider_payment_id, expires_at, completed_at, created_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    email: Option<String>,
    address: Option<String>,
    trial_start_date: Option<OffsetDateTime>,
    trial_end_date: Option<OffsetDateTime>,
    trial_expired: bool,
    subscription_status: String,
    subscription_plan_id: Option<Uuid>,
    subscription_start_date: Option<OffsetDateTime>,
    subscription_end_date: Option<OffsetDateTime>,
}

impl TryFrom<OrganizationRow> for Organization {
    type Error = BillingError;

    fn try_from(row: OrganizationRow) -> Result<Self, Self::Error> {
        Ok(Organization {
            id: row.id,
            name: row.name,
            email: row.email,
            address: row.address,
            trial_start_date: row.trial_start_date,
            trial_end_date: row.trial_end_date,
            trial_expired: row.trial_expired,
            subscription_status: row.subscription_status.parse()?,
            subscription_plan_id: row.subscription_plan_id,
            subscription_start_date: row.subscription_start_date,
            subscription_end_date: row.subscription_end_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    price: i64,
    currency: String,
    billing_period_days: i32,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentMethodRow {
    code: String,
    name: String,
    method_type: String,
    channel_code: String,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    organization_id: Uuid,
    plan_id: Uuid,
    invoice_number: String,
    amount: i64,
    tax_amount: i64,
    total_amount: i64,
    status: String,
    due_date: OffsetDateTime,
    paid_at: Option<OffsetDateTime>,
    payment_details: Json<InvoicePaymentDetails>,
    created_at: OffsetDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            id: row.id,
            organization_id: row.organization_id,
            plan_id: row.plan_id,
            invoice_number: row.invoice_number,
            amount: row.amount,
            tax_amount: row.tax_amount,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            due_date: row.due_date,
            paid_at: row.paid_at,
            payment_details: row.payment_details.0,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    invoice_id: Uuid,
    organization_id: Uuid,
    provider_reference: String,
    payment_url: String,
    status: String,
    amount: i64,
    payment_details: Json<ProviderPaymentDetails>,
    provider_payment_id: Option<String>,
    expires_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<TransactionRow> for PaymentTransaction {
    type Error = BillingError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        Ok(PaymentTransaction {
            id: row.id,
            invoice_id: row.invoice_id,
            organization_id: row.organization_id,
            provider_reference: row.provider_reference,
            payment_url: row.payment_url,
            status: row.status.parse()?,
            amount: row.amount,
            payment_details: row.payment_details.0,
            provider_payment_id: row.provider_payment_id,
            expires_at: row.expires_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

/// [`BillingStore`] over the Supabase Postgres database
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn get_organization(&self, org_id: Uuid) -> BillingResult<Option<Organization>> {
        let row: Option<OrganizationRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE id = $1",
            ORGANIZATION_COLUMNS
        ))
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Organization::try_from).transpose()
    }

    async fn mark_trial_expired(&self, org_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET trial_expired = TRUE,
                subscription_status = 'expired',
                trial_start_date = COALESCE(
                    trial_start_date,
                    trial_end_date - make_interval(days => $2)
                ),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(org_id)
        .bind(TRIAL_LENGTH_DAYS as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn backfill_trial_start(
        &self,
        org_id: Uuid,
        trial_start_date: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET trial_start_date = $2, updated_at = NOW()
            WHERE id = $1 AND trial_start_date IS NULL
            "#,
        )
        .bind(org_id)
        .bind(trial_start_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_lapsed_trials(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM organizations
            WHERE trial_end_date IS NOT NULL
              AND trial_end_date < $1
              AND (subscription_status = 'trial' OR trial_expired = FALSE)
            ORDER BY trial_end_date ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn activate_subscription(&self, activation: SubscriptionActivation) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET subscription_status = 'active',
                subscription_plan_id = $2,
                subscription_start_date = $3,
                subscription_end_date = $4,
                trial_expired = CASE WHEN $5 THEN FALSE ELSE trial_expired END,
                trial_end_date = CASE WHEN $5 THEN NULL ELSE trial_end_date END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(activation.organization_id)
        .bind(activation.plan_id)
        .bind(activation.period_start)
        .bind(activation.period_end)
        .bind(activation.clear_trial)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_org_admins(&self, org_id: Uuid) -> BillingResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM profiles WHERE organization_id = $1 AND role IN ('admin', 'owner')",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_plan(&self, plan_id: Uuid) -> BillingResult<Option<SubscriptionPlan>> {
        let row: Option<PlanRow> = sqlx::query_as(
            r#"
            SELECT id, name, price, currency, billing_period_days, is_active
            FROM subscription_plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SubscriptionPlan {
            id: r.id,
            name: r.name,
            price: r.price,
            currency: r.currency,
            billing_period_days: r.billing_period_days,
            is_active: r.is_active,
        }))
    }

    async fn get_payment_method(&self, code: &str) -> BillingResult<Option<PaymentMethod>> {
        let row: Option<PaymentMethodRow> = sqlx::query_as(
            r#"
            SELECT code, name, method_type, channel_code, is_active
            FROM payment_methods
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(PaymentMethod {
                method_type: r.method_type.parse()?,
                code: r.code,
                name: r.name,
                channel_code: r.channel_code,
                is_active: r.is_active,
            })
        })
        .transpose()
    }

    async fn next_invoice_number(&self) -> BillingResult<String> {
        let (number,): (String,) = sqlx::query_as("SELECT generate_invoice_number()")
            .fetch_one(&self.pool)
            .await?;
        Ok(number)
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let row: InvoiceRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO invoices
                (organization_id, plan_id, invoice_number, amount, tax_amount,
                 total_amount, status, due_date, payment_details)
            VALUES ($1, $2, $3, $4, $5, $6, 'issued', $7, $8)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(invoice.organization_id)
        .bind(invoice.plan_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.amount)
        .bind(invoice.tax_amount)
        .bind(invoice.total_amount)
        .bind(invoice.due_date)
        .bind(Json(&invoice.payment_details))
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn get_invoice(&self, invoice_id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Invoice::try_from).transpose()
    }

    async fn find_invoice_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE payment_details->>'external_id' = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            INVOICE_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Invoice::try_from).transpose()
    }

    async fn mark_invoice_paid(
        &self,
        invoice_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE invoices SET status = 'paid', paid_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(invoice_id)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_invoice(&self, invoice_id: Uuid, reason: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET status = 'cancelled',
                payment_details = payment_details || jsonb_build_object('cancellation_reason', $2::TEXT),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_invoice_pdf_generated(&self, invoice_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET payment_details = payment_details || '{"pdf_generated": true}'::JSONB,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_transaction(
        &self,
        transaction: NewPaymentTransaction,
    ) -> BillingResult<PaymentTransaction> {
        let row: TransactionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO payment_transactions
                (invoice_id, organization_id, provider_reference, payment_url, status,
                 amount, payment_details, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.invoice_id)
        .bind(transaction.organization_id)
        .bind(&transaction.provider_reference)
        .bind(&transaction.payment_url)
        .bind(transaction.amount)
        .bind(Json(&transaction.payment_details))
        .bind(transaction.expires_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn latest_transaction_for_invoice(
        &self,
        invoice_id: Uuid,
    ) -> BillingResult<Option<PaymentTransaction>> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payment_transactions
            WHERE invoice_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PaymentTransaction::try_from).transpose()
    }

    async fn set_transaction_status(&self, update: TransactionStatusUpdate) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE payment_transactions
            SET status = $2,
                provider_payment_id = COALESCE($3, provider_payment_id),
                completed_at = COALESCE($4, completed_at),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(update.transaction_id)
        .bind(update.status.as_str())
        .bind(update.provider_payment_id)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_stale_pending_transactions(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> BillingResult<Vec<PaymentTransaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payment_transactions
            WHERE status = 'pending' AND expires_at < $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PaymentTransaction::try_from).collect()
    }

    async fn insert_audit_log(&self, entry: AuditEntry) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (organization_id, action, entity_type, entity_id, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.organization_id)
        .bind(entry.action.as_str())
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_notification(&self, notification: NewNotification) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (user_id, organization_id, title, message, notification_type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.organization_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.notification_type.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_subscription_event(&self, event: NewSubscriptionEvent) -> BillingResult<()> {
        let event_data = event.kind.event_data()?;

        sqlx::query(
            r#"
            INSERT INTO subscription_events (organization_id, user_id, event_type, event_data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.organization_id)
        .bind(event.user_id)
        .bind(event.kind.event_type())
        .bind(event_data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
