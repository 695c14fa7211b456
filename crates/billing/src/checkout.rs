//! Payment session creation
//!
//! Opens a provider charge for a plan purchase. The flow writes an invoice
//! before calling the provider, so it runs as a saga: once the invoice
//! exists, any later failure cancels it with the reason recorded instead of
//! leaving an `issued` invoice with no transaction behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{SubscriptionEventKind, SubscriptionEventTracker};
use crate::models::{
    Invoice, InvoicePaymentDetails, NewInvoice, NewPaymentTransaction,
    Organization, PaymentMethod, PaymentTransaction, ProviderPaymentDetails, SubscriptionPlan,
    TransactionStatus,
};
use crate::store::BillingStore;
use crate::xendit::{ChargeRequest, PaymentGateway};

/// Invoices fall due three days after issue
const INVOICE_DUE_DAYS: i64 = 3;

/// Provider charges stay payable for a day
const TRANSACTION_TTL_HOURS: i64 = 24;

/// Client request body. Fields are optional here so a missing one becomes a
/// validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSessionRequest {
    pub organization_id: Option<String>,
    pub plan_id: Option<String>,
    pub payment_method_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSessionRequest {
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method_code: String,
}

impl PaymentSessionRequest {
    pub fn validate(&self) -> BillingResult<ValidatedSessionRequest> {
        let organization_id = required_uuid(self.organization_id.as_deref(), "organizationId")?;
        let plan_id = required_uuid(self.plan_id.as_deref(), "planId")?;
        let payment_method_code = required(self.payment_method_code.as_deref(), "paymentMethodCode")?;

        Ok(ValidatedSessionRequest {
            organization_id,
            plan_id,
            payment_method_code: payment_method_code.to_string(),
        })
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> BillingResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(BillingError::Validation(format!("{} is required", field))),
    }
}

fn required_uuid(value: Option<&str>, field: &str) -> BillingResult<Uuid> {
    let raw = required(value, field)?;
    Uuid::parse_str(raw)
        .map_err(|_| BillingError::Validation(format!("{} must be a valid UUID", field)))
}

/// Transaction part of a created session
#[derive(Debug, Clone, Serialize)]
pub struct SessionTransaction {
    pub id: Uuid,
    pub status: TransactionStatus,
    pub payment_url: String,
    pub payment_details: ProviderPaymentDetails,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInvoice {
    pub id: Uuid,
    pub invoice_number: String,
    /// Amount due, tax included
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub transaction: SessionTransaction,
    pub invoice: SessionInvoice,
}

impl PaymentSession {
    fn new(invoice: &Invoice, transaction: PaymentTransaction) -> Self {
        Self {
            transaction: SessionTransaction {
                id: transaction.id,
                status: transaction.status,
                payment_url: transaction.payment_url,
                payment_details: transaction.payment_details,
                expires_at: transaction.expires_at,
            },
            invoice: SessionInvoice {
                id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                amount: invoice.total_amount,
            },
        }
    }
}

/// Creates invoices and provider charges for plan purchases
#[derive(Clone)]
pub struct PaymentSessionService {
    store: Arc<dyn BillingStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: BillingConfig,
    tracker: SubscriptionEventTracker,
}

impl PaymentSessionService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: BillingConfig,
    ) -> Self {
        let tracker = SubscriptionEventTracker::new(store.clone());
        Self {
            store,
            gateway,
            config,
            tracker,
        }
    }

    pub async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> BillingResult<PaymentSession> {
        let input = request.validate()?;

        let plan = self
            .store
            .get_plan(input.plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| BillingError::NotFound("Subscription plan not found".to_string()))?;

        let org = self
            .store
            .get_organization(input.organization_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Organization not found".to_string()))?;

        let method = self
            .store
            .get_payment_method(&input.payment_method_code)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| BillingError::NotFound("Payment method not found".to_string()))?;

        let now = OffsetDateTime::now_utc();
        let external_id = format!("{}-{}", org.id, now.unix_timestamp_nanos() / 1_000_000);

        let invoice = self.issue_invoice(&org, &plan, &method, &external_id, now).await?;

        tracing::info!(
            org_id = %org.id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            external_id = %external_id,
            payment_method = %method.code,
            total_amount = invoice.total_amount,
            "Invoice issued for payment session"
        );

        // The invoice exists from here on; every failure must cancel it
        let transaction = match self.open_charge(&org, &plan, &method, &invoice, now).await {
            Ok(transaction) => transaction,
            Err(e) => {
                self.abort_session(&invoice, &e).await;
                return Err(e);
            }
        };

        let audit = AuditEntry::new(org.id, AuditAction::PaymentSessionCreated)
            .transaction(transaction.id)
            .details(json!({
                "invoice_id": invoice.id,
                "invoice_number": invoice.invoice_number,
                "external_id": external_id,
                "payment_method_code": method.code,
                "amount": invoice.total_amount,
            }));
        if let Err(e) = self.store.insert_audit_log(audit).await {
            tracing::error!(
                org_id = %org.id,
                transaction_id = %transaction.id,
                error = %e,
                "Failed to write payment session audit log"
            );
        }

        self.tracker.track(
            org.id,
            None,
            SubscriptionEventKind::CheckoutStarted {
                plan_id: plan.id,
                invoice_id: invoice.id,
                payment_method_code: method.code.clone(),
                amount: invoice.total_amount,
            },
        );

        tracing::info!(
            org_id = %org.id,
            transaction_id = %transaction.id,
            provider_reference = %transaction.provider_reference,
            "Payment session created"
        );

        Ok(PaymentSession::new(&invoice, transaction))
    }

    async fn issue_invoice(
        &self,
        org: &Organization,
        plan: &SubscriptionPlan,
        method: &PaymentMethod,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Invoice> {
        let invoice_number = self.store.next_invoice_number().await?;
        let tax_amount = self.config.tax_for(plan.price);

        self.store
            .insert_invoice(NewInvoice {
                organization_id: org.id,
                plan_id: plan.id,
                invoice_number,
                amount: plan.price,
                tax_amount,
                total_amount: plan.price + tax_amount,
                due_date: now + Duration::days(INVOICE_DUE_DAYS),
                payment_details: InvoicePaymentDetails {
                    external_id: external_id.to_string(),
                    payment_method_code: method.code.clone(),
                    pdf_generated: false,
                    cancellation_reason: None,
                },
            })
            .await
    }

    async fn open_charge(
        &self,
        org: &Organization,
        plan: &SubscriptionPlan,
        method: &PaymentMethod,
        invoice: &Invoice,
        now: OffsetDateTime,
    ) -> BillingResult<PaymentTransaction> {
        let expires_at = now + Duration::hours(TRANSACTION_TTL_HOURS);

        let charge = self
            .gateway
            .create_charge(&ChargeRequest {
                external_id: invoice.payment_details.external_id.clone(),
                amount: invoice.total_amount,
                currency: plan.currency.clone(),
                customer_name: org.name.clone(),
                customer_email: org.email.clone(),
                description: format!("{} subscription - {}", plan.name, invoice.invoice_number),
                method_type: method.method_type,
                channel_code: method.channel_code.clone(),
                expires_at,
            })
            .await?;

        self.store
            .insert_transaction(NewPaymentTransaction {
                invoice_id: invoice.id,
                organization_id: org.id,
                payment_url: charge.payment_url(),
                provider_reference: charge.provider_reference,
                amount: invoice.total_amount,
                payment_details: charge.details,
                expires_at,
            })
            .await
    }

    /// Compensation step: cancel the invoice the failed session issued
    async fn abort_session(&self, invoice: &Invoice, cause: &BillingError) {
        let reason = match cause {
            BillingError::Provider(msg) => format!("provider_error: {}", msg),
            other => format!("session_error: {}", other),
        };

        tracing::warn!(
            org_id = %invoice.organization_id,
            invoice_id = %invoice.id,
            reason = %reason,
            "Payment session failed, cancelling invoice"
        );

        if let Err(e) = self.store.cancel_invoice(invoice.id, &reason).await {
            tracing::error!(
                invoice_id = %invoice.id,
                error = %e,
                "Failed to cancel invoice of aborted payment session"
            );
            return;
        }

        let audit = AuditEntry::new(invoice.organization_id, AuditAction::PaymentSessionAborted)
            .invoice(invoice.id)
            .details(json!({
                "invoice_number": invoice.invoice_number,
                "reason": reason,
            }));
        if let Err(e) = self.store.insert_audit_log(audit).await {
            tracing::warn!(invoice_id = %invoice.id, error = %e, "Failed to audit aborted session");
        }
    }
}
