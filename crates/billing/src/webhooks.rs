//! Xendit webhook handling
//!
//! Reconciles provider callbacks into invoice, transaction and organization
//! state. Callbacks arrive at least once and possibly out of order, so the
//! transaction status is a small state machine:
//!
//! ```text
//! pending ──► completed | failed | expired   (terminal)
//! ```
//!
//! Re-delivery of the terminal status already stored re-applies the same
//! values and re-runs the side effects (audit, admin notifications,
//! analytics). A callback asking for a *different* terminal status is
//! acknowledged and ignored.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::error::{BillingError, BillingResult};
use crate::events::{SubscriptionEventKind, SubscriptionEventTracker};
use crate::models::{
    Invoice, PaymentTransaction, SubscriptionActivation, TransactionStatus,
    TransactionStatusUpdate,
};
use crate::notifications::{AdminNotifier, NotificationType};
use crate::store::BillingStore;

/// Used when the invoice's plan row has disappeared
const DEFAULT_BILLING_PERIOD_DAYS: i64 = 30;

/// Stale transactions expired per sweep pass
const STALE_TRANSACTION_BATCH: i64 = 200;

// =============================================================================
// Callback parsing
// =============================================================================

/// Provider event names the reconciler knows about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XenditEvent {
    VirtualAccountPaymentPaid,
    VirtualAccountExpired,
    EwalletPaymentSucceeded,
    EwalletPaymentFailed,
    /// Outcome carried in `data.status`
    EwalletCapture,
    FixedPaymentCodePaymentPaid,
    FixedPaymentCodeExpired,
    InvoicePaid,
    InvoiceExpired,
    PaymentSucceeded,
    PaymentFailed,
    Unknown(String),
}

impl XenditEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "virtual_account_payment_paid" => XenditEvent::VirtualAccountPaymentPaid,
            "virtual_account_expired" => XenditEvent::VirtualAccountExpired,
            "ewallet.payment_succeeded" => XenditEvent::EwalletPaymentSucceeded,
            "ewallet.payment_failed" => XenditEvent::EwalletPaymentFailed,
            "ewallet.capture" => XenditEvent::EwalletCapture,
            "fixed_payment_code_payment_paid" => XenditEvent::FixedPaymentCodePaymentPaid,
            "fixed_payment_code_expired" => XenditEvent::FixedPaymentCodeExpired,
            "invoice_paid" => XenditEvent::InvoicePaid,
            "invoice_expired" => XenditEvent::InvoiceExpired,
            "payment.succeeded" => XenditEvent::PaymentSucceeded,
            "payment.failed" => XenditEvent::PaymentFailed,
            other => XenditEvent::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            XenditEvent::VirtualAccountPaymentPaid => "virtual_account_payment_paid",
            XenditEvent::VirtualAccountExpired => "virtual_account_expired",
            XenditEvent::EwalletPaymentSucceeded => "ewallet.payment_succeeded",
            XenditEvent::EwalletPaymentFailed => "ewallet.payment_failed",
            XenditEvent::EwalletCapture => "ewallet.capture",
            XenditEvent::FixedPaymentCodePaymentPaid => "fixed_payment_code_payment_paid",
            XenditEvent::FixedPaymentCodeExpired => "fixed_payment_code_expired",
            XenditEvent::InvoicePaid => "invoice_paid",
            XenditEvent::InvoiceExpired => "invoice_expired",
            XenditEvent::PaymentSucceeded => "payment.succeeded",
            XenditEvent::PaymentFailed => "payment.failed",
            XenditEvent::Unknown(name) => name,
        }
    }
}

/// Terminal outcome reported by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Completed,
    Failed,
    Expired,
}

impl PaymentOutcome {
    pub fn transaction_status(self) -> TransactionStatus {
        match self {
            PaymentOutcome::Completed => TransactionStatus::Completed,
            PaymentOutcome::Failed => TransactionStatus::Failed,
            PaymentOutcome::Expired => TransactionStatus::Expired,
        }
    }
}

/// Provider-independent view of a payment callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayment {
    pub external_id: String,
    pub outcome: PaymentOutcome,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
}

/// A callback body split into its event name and payload object
#[derive(Debug, Clone)]
pub struct XenditCallback {
    pub event: XenditEvent,
    data: Map<String, Value>,
}

impl XenditCallback {
    /// Accepts both `{event, data: {...}}` envelopes and flat callbacks.
    /// Flat callbacks without an `event` field are classified by shape.
    pub fn parse(payload: &Value) -> BillingResult<Self> {
        let body = payload
            .as_object()
            .ok_or_else(|| BillingError::Validation("Callback body must be a JSON object".to_string()))?;

        let data = match body.get("data") {
            Some(Value::Object(inner)) => inner.clone(),
            _ => body.clone(),
        };

        let event = match body.get("event").and_then(Value::as_str) {
            Some(name) => XenditEvent::from_name(name),
            None => Self::infer_event(&data),
        };

        Ok(Self { event, data })
    }

    fn infer_event(data: &Map<String, Value>) -> XenditEvent {
        let status = data.get("status").and_then(Value::as_str).unwrap_or_default();

        if data.contains_key("callback_virtual_account_id") {
            return XenditEvent::VirtualAccountPaymentPaid;
        }
        if data.contains_key("fixed_payment_code_id") && status == "COMPLETED" {
            return XenditEvent::FixedPaymentCodePaymentPaid;
        }
        match status {
            "PAID" | "SETTLED" => XenditEvent::InvoicePaid,
            "EXPIRED" => XenditEvent::InvoiceExpired,
            "" => XenditEvent::Unknown("unspecified".to_string()),
            other => XenditEvent::Unknown(format!("status:{}", other)),
        }
    }

    fn str_field(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.data.get(*k))
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn amount_field(&self) -> Option<i64> {
        ["paid_amount", "amount", "charge_amount", "capture_amount"]
            .iter()
            .filter_map(|k| self.data.get(*k))
            .find_map(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
    }

    /// Outcome for this callback, `None` when it carries nothing to apply
    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match &self.event {
            XenditEvent::VirtualAccountPaymentPaid
            | XenditEvent::EwalletPaymentSucceeded
            | XenditEvent::FixedPaymentCodePaymentPaid
            | XenditEvent::InvoicePaid
            | XenditEvent::PaymentSucceeded => Some(PaymentOutcome::Completed),
            XenditEvent::EwalletPaymentFailed | XenditEvent::PaymentFailed => {
                Some(PaymentOutcome::Failed)
            }
            XenditEvent::VirtualAccountExpired
            | XenditEvent::FixedPaymentCodeExpired
            | XenditEvent::InvoiceExpired => Some(PaymentOutcome::Expired),
            XenditEvent::EwalletCapture => {
                match self.str_field(&["status"]).as_deref() {
                    Some("SUCCEEDED") => Some(PaymentOutcome::Completed),
                    Some("FAILED") => Some(PaymentOutcome::Failed),
                    _ => None,
                }
            }
            XenditEvent::Unknown(_) => None,
        }
    }

    /// `Ok(None)` for unhandled events; validation error when a handled
    /// event lacks its correlation id
    pub fn normalize(&self) -> BillingResult<Option<NormalizedPayment>> {
        let Some(outcome) = self.outcome() else {
            return Ok(None);
        };

        let external_id = self
            .str_field(&["external_id", "reference_id"])
            .ok_or_else(|| BillingError::Validation("Missing external_id".to_string()))?;

        Ok(Some(NormalizedPayment {
            external_id,
            outcome,
            payment_id: self.str_field(&["payment_id", "id"]),
            amount: self.amount_field(),
        }))
    }
}

// =============================================================================
// State machine
// =============================================================================

/// How a requested outcome relates to the stored transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `pending` to a terminal status
    Advance,
    /// Terminal status delivered again
    Repeat,
    /// Terminal status asked to change; ignored
    Conflict,
}

impl Transition {
    pub fn between(current: TransactionStatus, requested: PaymentOutcome) -> Self {
        let requested = requested.transaction_status();
        match current {
            TransactionStatus::Pending => Transition::Advance,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Expired
                if current == requested =>
            {
                Transition::Repeat
            }
            TransactionStatus::Completed
            | TransactionStatus::Failed
            | TransactionStatus::Expired => Transition::Conflict,
        }
    }
}

/// Result of handling one callback; every variant is acknowledged with 200
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied {
        invoice_id: Uuid,
        status: TransactionStatus,
    },
    Reapplied {
        invoice_id: Uuid,
        status: TransactionStatus,
    },
    Conflict {
        invoice_id: Uuid,
        current: TransactionStatus,
        requested: TransactionStatus,
    },
    Unhandled {
        event: String,
    },
}

impl WebhookOutcome {
    pub fn message(&self) -> String {
        match self {
            WebhookOutcome::Applied { status, .. } => format!("Payment marked {}", status),
            WebhookOutcome::Reapplied { status, .. } => {
                format!("Payment already {}; update re-applied", status)
            }
            WebhookOutcome::Conflict { current, .. } => {
                format!("Payment already {}; callback ignored", current)
            }
            WebhookOutcome::Unhandled { event } => format!("Event {} acknowledged", event),
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Applies Xendit callbacks to billing state
#[derive(Clone)]
pub struct WebhookReconciler {
    store: Arc<dyn BillingStore>,
    notifier: AdminNotifier,
    tracker: SubscriptionEventTracker,
    callback_token: String,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn BillingStore>, callback_token: impl Into<String>) -> Self {
        Self {
            notifier: AdminNotifier::new(store.clone()),
            tracker: SubscriptionEventTracker::new(store.clone()),
            store,
            callback_token: callback_token.into(),
        }
    }

    /// Constant-time check of the `x-callback-token` header
    pub fn verify_token(&self, provided: Option<&str>) -> BillingResult<()> {
        let expected = self.callback_token.as_bytes();
        let matches = match provided {
            Some(token) if !expected.is_empty() => bool::from(token.as_bytes().ct_eq(expected)),
            _ => false,
        };

        if !matches {
            tracing::warn!(
                token_present = provided.is_some(),
                "Rejected Xendit callback with invalid token"
            );
            return Err(BillingError::Unauthorized);
        }
        Ok(())
    }

    /// Authenticate, classify and apply one callback
    pub async fn handle(
        &self,
        callback_token: Option<&str>,
        payload: &Value,
    ) -> BillingResult<WebhookOutcome> {
        self.verify_token(callback_token)?;

        let callback = XenditCallback::parse(payload)?;
        let event_name = callback.event.name().to_string();

        let Some(payment) = callback.normalize()? else {
            tracing::info!(event = %event_name, "Unhandled Xendit event acknowledged");
            return Ok(WebhookOutcome::Unhandled { event: event_name });
        };

        tracing::info!(
            event = %event_name,
            external_id = %payment.external_id,
            outcome = ?payment.outcome,
            payment_id = ?payment.payment_id,
            "Processing Xendit callback"
        );

        self.apply(&event_name, payment, OffsetDateTime::now_utc()).await
    }

    async fn apply(
        &self,
        event_name: &str,
        payment: NormalizedPayment,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let invoice = self
            .store
            .find_invoice_by_external_id(&payment.external_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Invoice not found".to_string()))?;

        let transaction = self
            .store
            .latest_transaction_for_invoice(invoice.id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Payment transaction not found".to_string()))?;

        if let Some(amount) = payment.amount {
            if amount != transaction.amount {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    expected = transaction.amount,
                    received = amount,
                    "Callback amount differs from transaction amount"
                );
            }
        }

        let requested = payment.outcome.transaction_status();
        let transition = Transition::between(transaction.status, payment.outcome);

        let repeated = match transition {
            Transition::Conflict => {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    transaction_id = %transaction.id,
                    current = %transaction.status,
                    requested = %requested,
                    event = %event_name,
                    "Ignoring callback that conflicts with terminal payment status"
                );
                return Ok(WebhookOutcome::Conflict {
                    invoice_id: invoice.id,
                    current: transaction.status,
                    requested,
                });
            }
            Transition::Repeat => {
                tracing::info!(
                    invoice_id = %invoice.id,
                    status = %requested,
                    "Duplicate callback, re-applying terminal status"
                );
                true
            }
            Transition::Advance => false,
        };

        match payment.outcome {
            PaymentOutcome::Completed => {
                self.settle_completed(event_name, &payment, &invoice, &transaction, now)
                    .await?
            }
            PaymentOutcome::Failed | PaymentOutcome::Expired => {
                self.settle_unpaid(event_name, &payment, &invoice, &transaction)
                    .await?
            }
        }

        Ok(if repeated {
            WebhookOutcome::Reapplied {
                invoice_id: invoice.id,
                status: requested,
            }
        } else {
            WebhookOutcome::Applied {
                invoice_id: invoice.id,
                status: requested,
            }
        })
    }

    async fn settle_completed(
        &self,
        event_name: &str,
        payment: &NormalizedPayment,
        invoice: &Invoice,
        transaction: &PaymentTransaction,
        now: OffsetDateTime,
    ) -> BillingResult<()> {
        // Re-deliveries keep the original timestamps
        let paid_at = invoice.paid_at.or(transaction.completed_at).unwrap_or(now);

        self.store
            .set_transaction_status(TransactionStatusUpdate {
                transaction_id: transaction.id,
                status: TransactionStatus::Completed,
                provider_payment_id: payment.payment_id.clone(),
                completed_at: Some(transaction.completed_at.unwrap_or(paid_at)),
            })
            .await?;
        self.store.mark_invoice_paid(invoice.id, paid_at).await?;

        let plan = self.store.get_plan(invoice.plan_id).await?;
        let period_days = plan
            .as_ref()
            .map(|p| i64::from(p.billing_period_days))
            .unwrap_or(DEFAULT_BILLING_PERIOD_DAYS);
        let plan_name = plan
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "subscription".to_string());

        let org = self
            .store
            .get_organization(invoice.organization_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Organization not found".to_string()))?;

        self.store
            .activate_subscription(SubscriptionActivation {
                organization_id: org.id,
                plan_id: invoice.plan_id,
                period_start: paid_at,
                period_end: paid_at + Duration::days(period_days),
                clear_trial: org.has_trial_state(),
            })
            .await?;

        tracing::info!(
            org_id = %org.id,
            invoice_id = %invoice.id,
            plan_id = %invoice.plan_id,
            was_on_trial = org.has_trial_state(),
            "Subscription activated from payment"
        );

        let audit = AuditEntry::new(org.id, AuditAction::PaymentCompleted)
            .transaction(transaction.id)
            .details(json!({
                "event": event_name,
                "invoice_id": invoice.id,
                "invoice_number": invoice.invoice_number,
                "external_id": payment.external_id,
                "payment_id": payment.payment_id,
                "amount": payment.amount.unwrap_or(transaction.amount),
            }));
        if let Err(e) = self.store.insert_audit_log(audit).await {
            tracing::error!(invoice_id = %invoice.id, error = %e, "Failed to audit completed payment");
        }

        self.notifier
            .notify_admins(
                org.id,
                NotificationType::PaymentSuccess,
                "Payment received",
                &format!(
                    "Payment for invoice {} was received. Your {} plan is now active.",
                    invoice.invoice_number, plan_name
                ),
            )
            .await;

        self.tracker.track(
            org.id,
            None,
            SubscriptionEventKind::PaymentCompleted {
                invoice_id: invoice.id,
                amount: transaction.amount,
                payment_id: payment.payment_id.clone(),
            },
        );
        self.tracker.track(
            org.id,
            None,
            SubscriptionEventKind::SubscriptionActivated {
                plan_id: invoice.plan_id,
            },
        );

        Ok(())
    }

    async fn settle_unpaid(
        &self,
        event_name: &str,
        payment: &NormalizedPayment,
        invoice: &Invoice,
        transaction: &PaymentTransaction,
    ) -> BillingResult<()> {
        let status = payment.outcome.transaction_status();
        let (action, reason) = match payment.outcome {
            PaymentOutcome::Expired => (AuditAction::PaymentExpired, "payment_expired"),
            PaymentOutcome::Failed | PaymentOutcome::Completed => {
                (AuditAction::PaymentFailed, "payment_failed")
            }
        };

        self.store
            .set_transaction_status(TransactionStatusUpdate {
                transaction_id: transaction.id,
                status,
                provider_payment_id: payment.payment_id.clone(),
                completed_at: None,
            })
            .await?;
        self.store.cancel_invoice(invoice.id, reason).await?;

        tracing::info!(
            org_id = %invoice.organization_id,
            invoice_id = %invoice.id,
            status = %status,
            event = %event_name,
            "Payment not completed, invoice cancelled"
        );

        let audit = AuditEntry::new(invoice.organization_id, action)
            .transaction(transaction.id)
            .details(json!({
                "event": event_name,
                "invoice_id": invoice.id,
                "invoice_number": invoice.invoice_number,
                "external_id": payment.external_id,
                "reason": reason,
            }));
        if let Err(e) = self.store.insert_audit_log(audit).await {
            tracing::error!(invoice_id = %invoice.id, error = %e, "Failed to audit unpaid payment");
        }

        let message = match payment.outcome {
            PaymentOutcome::Expired => format!(
                "Payment for invoice {} expired before it was completed.",
                invoice.invoice_number
            ),
            PaymentOutcome::Failed | PaymentOutcome::Completed => format!(
                "Payment for invoice {} failed. Please try again or use another method.",
                invoice.invoice_number
            ),
        };
        self.notifier
            .notify_admins(
                invoice.organization_id,
                NotificationType::PaymentFailed,
                "Payment not completed",
                &message,
            )
            .await;

        self.tracker.track(
            invoice.organization_id,
            None,
            SubscriptionEventKind::PaymentFailed {
                invoice_id: invoice.id,
                reason: reason.to_string(),
            },
        );

        Ok(())
    }

    /// Expire pending transactions whose payment window closed without a
    /// callback. Returns how many were expired.
    pub async fn expire_stale_transactions(&self, now: OffsetDateTime) -> BillingResult<usize> {
        let stale = self
            .store
            .list_stale_pending_transactions(now, STALE_TRANSACTION_BATCH)
            .await?;

        let mut expired = 0;
        for transaction in stale {
            match self.expire_transaction(&transaction).await {
                Ok(()) => expired += 1,
                Err(e) => {
                    tracing::error!(
                        transaction_id = %transaction.id,
                        invoice_id = %transaction.invoice_id,
                        error = %e,
                        "Failed to expire stale transaction"
                    );
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired = expired, "Expired stale payment transactions");
        }
        Ok(expired)
    }

    async fn expire_transaction(&self, transaction: &PaymentTransaction) -> BillingResult<()> {
        self.store
            .set_transaction_status(TransactionStatusUpdate {
                transaction_id: transaction.id,
                status: TransactionStatus::Expired,
                provider_payment_id: None,
                completed_at: None,
            })
            .await?;
        self.store
            .cancel_invoice(transaction.invoice_id, "payment_window_elapsed")
            .await?;

        let audit = AuditEntry::new(transaction.organization_id, AuditAction::PaymentExpired)
            .transaction(transaction.id)
            .details(json!({
                "invoice_id": transaction.invoice_id,
                "expires_at": transaction.expires_at.to_string(),
                "reason": "payment_window_elapsed",
            }));
        if let Err(e) = self.store.insert_audit_log(audit).await {
            tracing::warn!(transaction_id = %transaction.id, error = %e, "Failed to audit expiry");
        }
        Ok(())
    }
}
