// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Billing System
//!
//! End-to-end behaviour of the trial and payment flows against the in-memory
//! store:
//! - Trial resolution idempotence and date repair
//! - Payment session validation and provider dispatch
//! - Webhook authentication, duplicate delivery and conflicting callbacks
//! - Expiry of unpaid transactions

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use serde_json::{json, Value};

    use crate::models::PaymentMethodType;
    use crate::testing::{MemoryStore, RecordingSweep, ScriptedGateway};
    use crate::{BillingConfig, BillingService, PaymentSession, PaymentSessionRequest};
    use uuid::Uuid;

    pub const TOKEN: &str = "callback-token";

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub gateway: Arc<ScriptedGateway>,
        pub billing: BillingService,
        pub org_id: Uuid,
        pub plan_id: Uuid,
    }

    pub fn harness() -> Harness {
        harness_with(ScriptedGateway::succeeding())
    }

    pub fn harness_with(gateway: ScriptedGateway) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let org_id = store.add_org("Acme");
        store.add_profile(org_id, "owner");
        store.add_profile(org_id, "admin");
        store.add_profile(org_id, "member");
        let plan_id = store.add_plan("Premium", 150_000);
        store.add_payment_method("va_bca", PaymentMethodType::BankTransfer, "BCA");
        store.add_payment_method("ewallet_ovo", PaymentMethodType::Ewallet, "ID_OVO");
        store.add_payment_method("retail_alfamart", PaymentMethodType::RetailOutlet, "ALFAMART");
        store.add_payment_method("credit_card", PaymentMethodType::CreditCard, "CREDIT_CARD");

        let billing = BillingService::with_parts(
            BillingConfig::for_tests(),
            store.clone(),
            gateway.clone(),
            Arc::new(RecordingSweep::new()),
        );

        Harness {
            store,
            gateway,
            billing,
            org_id,
            plan_id,
        }
    }

    impl Harness {
        pub fn request(&self, code: &str) -> PaymentSessionRequest {
            PaymentSessionRequest {
                organization_id: Some(self.org_id.to_string()),
                plan_id: Some(self.plan_id.to_string()),
                payment_method_code: Some(code.to_string()),
            }
        }

        /// Create a session and let its analytics insert settle
        pub async fn open_session(&self, code: &str) -> (PaymentSession, String) {
            let before = self.store.subscription_events().len();
            let session = self
                .billing
                .checkout
                .create_session(&self.request(code))
                .await
                .unwrap();
            self.store.wait_for_events(before + 1).await;

            let external_id = self
                .store
                .invoice(session.invoice.id)
                .unwrap()
                .payment_details
                .external_id;
            (session, external_id)
        }

        /// Let every spawned analytics insert run
        pub async fn settle(&self) {
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
        }
    }

    pub fn event(name: &str, data: Value) -> Value {
        json!({ "event": name, "data": data })
    }

    pub fn va_paid(external_id: &str) -> Value {
        event(
            "virtual_account_payment_paid",
            json!({
                "external_id": external_id,
                "payment_id": "pay-va-001",
                "amount": 150000
            }),
        )
    }
}

#[cfg(test)]
mod trial_tests {
    use std::sync::Arc;

    use opsuite_shared::SubscriptionStatus;
    use time::macros::datetime;
    use time::Duration;

    use crate::testing::{MemoryStore, RecordingSweep};
    use crate::{TrialCountdown, TrialStatusResolver};

    // =========================================================================
    // Lapsed trial: first call expires, second call is a no-op
    // =========================================================================
    #[tokio::test]
    async fn test_lapsed_trial_expiry_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let resolver = TrialStatusResolver::new(store.clone(), Arc::new(RecordingSweep::new()));
        let now = datetime!(2025-05-01 09:00 UTC);
        let org_id = store.add_trial_org(
            Some(datetime!(2025-04-01 00:00 UTC)),
            Some(datetime!(2025-04-15 00:00 UTC)),
        );

        assert!(resolver.check_trial_status_at(org_id, now).await);
        store.wait_for_events(1).await;

        let org = store.organization(org_id).unwrap();
        assert!(org.trial_expired);
        assert_eq!(org.subscription_status, SubscriptionStatus::Expired);

        let writes = store.write_count();
        assert!(!resolver.check_trial_status_at(org_id, now).await);
        assert_eq!(store.write_count(), writes, "second call must not write");
        assert_eq!(
            store.subscription_events()[0].kind.event_type(),
            "trial_expired"
        );
    }

    // =========================================================================
    // Lapsed trial without a start date: one write, then nothing
    // =========================================================================
    #[tokio::test]
    async fn test_lapsed_trial_without_start_settles_in_one_call() {
        let store = Arc::new(MemoryStore::new());
        let resolver = TrialStatusResolver::new(store.clone(), Arc::new(RecordingSweep::new()));
        let now = datetime!(2025-05-01 09:00 UTC);
        let org_id = store.add_trial_org(None, Some(datetime!(2025-04-15 00:00 UTC)));

        assert!(resolver.check_trial_status_at(org_id, now).await);
        store.wait_for_events(1).await;

        let org = store.organization(org_id).unwrap();
        assert!(org.trial_expired);
        assert_eq!(org.trial_start_date, Some(datetime!(2025-04-01 00:00 UTC)));

        let writes = store.write_count();
        assert!(!resolver.check_trial_status_at(org_id, now).await);
        assert_eq!(store.write_count(), writes, "second call must not write");
        assert_eq!(
            store.organization(org_id).unwrap().trial_start_date,
            Some(datetime!(2025-04-01 00:00 UTC))
        );
    }

    // =========================================================================
    // Missing start date is backfilled to exactly end - 14 days
    // =========================================================================
    #[tokio::test]
    async fn test_missing_start_backfilled_from_end() {
        let store = Arc::new(MemoryStore::new());
        let resolver = TrialStatusResolver::new(store.clone(), Arc::new(RecordingSweep::new()));
        let end = datetime!(2025-08-20 15:30:45 UTC);
        let org_id = store.add_trial_org(None, Some(end));

        let changed = resolver
            .check_trial_status_at(org_id, datetime!(2025-08-10 00:00 UTC))
            .await;

        assert!(!changed, "backfill is not an expiry");
        let org = store.organization(org_id).unwrap();
        assert_eq!(org.trial_start_date, Some(end - Duration::days(14)));
        assert_eq!(org.subscription_status, SubscriptionStatus::Trial);

        // Converged: nothing left to repair
        let writes = store.write_count();
        resolver
            .check_trial_status_at(org_id, datetime!(2025-08-11 00:00 UTC))
            .await;
        assert_eq!(store.write_count(), writes);
    }

    // =========================================================================
    // Progress halfway through a 14-day trial
    // =========================================================================
    #[test]
    fn test_progress_at_midpoint() {
        let t0 = datetime!(2025-02-01 00:00 UTC);
        let countdown =
            TrialCountdown::compute(t0, t0 + Duration::days(14), t0 + Duration::days(7));
        assert_eq!(countdown.progress.round() as i64, 50);
    }

    // =========================================================================
    // Trial with no dates at all is left alone
    // =========================================================================
    #[tokio::test]
    async fn test_org_without_trial_dates_untouched() {
        let store = Arc::new(MemoryStore::new());
        let resolver = TrialStatusResolver::new(store.clone(), Arc::new(RecordingSweep::new()));
        let org_id = store.add_trial_org(None, None);

        assert!(!resolver.check_trial_status(org_id).await);
        assert_eq!(store.write_count(), 0);
    }
}

#[cfg(test)]
mod payment_session_tests {
    use super::support::*;
    use crate::xendit::NO_PAYMENT_URL;
    use crate::{BillingError, InvoiceStatus, PaymentSessionRequest, TransactionStatus};

    // =========================================================================
    // Any one required field omitted: validation error, zero rows
    // =========================================================================
    #[tokio::test]
    async fn test_each_missing_field_rejected_without_writes() {
        let h = harness();
        let full = h.request("va_bca");
        let variants = [
            PaymentSessionRequest {
                organization_id: None,
                ..full.clone()
            },
            PaymentSessionRequest {
                plan_id: None,
                ..full.clone()
            },
            PaymentSessionRequest {
                payment_method_code: None,
                ..full.clone()
            },
        ];

        for request in variants {
            let err = h.billing.checkout.create_session(&request).await.unwrap_err();
            assert!(matches!(err, BillingError::Validation(_)), "got {:?}", err);
        }

        assert_eq!(h.store.write_count(), 0);
        assert!(h.store.invoices().is_empty());
        assert!(h.store.transactions().is_empty());
        assert!(h.gateway.requests().is_empty());
    }

    // =========================================================================
    // Premium 150000 IDR via va_bca
    // =========================================================================
    #[tokio::test]
    async fn test_virtual_account_session() {
        let h = harness();
        let (session, _) = h.open_session("va_bca").await;

        let invoices = h.store.invoices();
        let transactions = h.store.transactions();
        assert_eq!(invoices.len(), 1);
        assert_eq!(transactions.len(), 1);

        assert_eq!(invoices[0].total_amount, 150_000);
        assert_eq!(invoices[0].status, InvoiceStatus::Issued);
        assert!(invoices[0].invoice_number.starts_with("INV-"));
        assert_eq!(transactions[0].status, TransactionStatus::Pending);
        assert_eq!(transactions[0].invoice_id, invoices[0].id);
        assert_eq!(session.transaction.payment_url, NO_PAYMENT_URL);
        assert_eq!(session.invoice.amount, 150_000);

        let ttl = transactions[0].expires_at - transactions[0].created_at;
        assert!((ttl.whole_hours() - 24).abs() <= 1);
        let due = invoices[0].due_date - invoices[0].created_at;
        assert!((due.whole_days() - 3).abs() <= 1);
    }

    // =========================================================================
    // Only URL-bearing channels get a payment URL
    // =========================================================================
    #[tokio::test]
    async fn test_payment_url_per_channel() {
        let h = harness();
        let (retail, _) = h.open_session("retail_alfamart").await;
        let (card, _) = h.open_session("credit_card").await;
        let (ewallet, _) = h.open_session("ewallet_ovo").await;

        assert_eq!(retail.transaction.payment_url, NO_PAYMENT_URL);
        assert_ne!(card.transaction.payment_url, NO_PAYMENT_URL);
        assert_ne!(ewallet.transaction.payment_url, NO_PAYMENT_URL);
    }

    // =========================================================================
    // Provider down: the invoice is cancelled, not orphaned
    // =========================================================================
    #[tokio::test]
    async fn test_provider_outage_leaves_no_issued_invoice() {
        let h = harness_with(crate::testing::ScriptedGateway::failing("SERVER_ERROR"));
        let err = h
            .billing
            .checkout
            .create_session(&h.request("ewallet_ovo"))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::Provider(_)));
        assert!(h
            .store
            .invoices()
            .iter()
            .all(|i| i.status == InvoiceStatus::Cancelled));
    }
}

#[cfg(test)]
mod webhook_tests {
    use serde_json::json;
    use time::Duration;
    use uuid::Uuid;

    use super::support::*;
    use crate::notifications::NotificationType;
    use crate::{
        AuditAction, BillingError, InvoiceStatus, TransactionStatus, WebhookOutcome,
    };
    use opsuite_shared::SubscriptionStatus;

    // =========================================================================
    // Wrong or missing token: 401, zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_bad_token_rejected_without_writes() {
        let h = harness();
        let (_, external_id) = h.open_session("va_bca").await;
        let writes = h.store.write_count();

        for token in [Some("wrong-token"), Some(""), None] {
            let err = h
                .billing
                .webhooks
                .handle(token, &va_paid(&external_id))
                .await
                .unwrap_err();
            assert!(matches!(err, BillingError::Unauthorized));
        }

        assert_eq!(h.store.write_count(), writes);
        assert_eq!(h.store.transactions()[0].status, TransactionStatus::Pending);
    }

    // =========================================================================
    // Completed payment activates the subscription and clears the trial
    // =========================================================================
    #[tokio::test]
    async fn test_completed_payment_activates_subscription() {
        let h = harness();
        let (session, external_id) = h.open_session("va_bca").await;

        let outcome = h
            .billing
            .webhooks
            .handle(Some(TOKEN), &va_paid(&external_id))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                invoice_id: session.invoice.id,
                status: TransactionStatus::Completed
            }
        );

        let tx = &h.store.transactions()[0];
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.provider_payment_id.as_deref(), Some("pay-va-001"));
        assert!(tx.completed_at.is_some());

        let invoice = h.store.invoice(session.invoice.id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        let paid_at = invoice.paid_at.unwrap();

        let org = h.store.organization(h.org_id).unwrap();
        assert_eq!(org.subscription_status, SubscriptionStatus::Active);
        assert_eq!(org.subscription_plan_id, Some(h.plan_id));
        assert!(!org.trial_expired);
        assert_eq!(org.trial_end_date, None);
        assert_eq!(org.subscription_start_date, Some(paid_at));
        assert_eq!(org.subscription_end_date, Some(paid_at + Duration::days(30)));

        let notifications = h.store.notifications();
        assert_eq!(notifications.len(), 2, "owner and admin, not member");
        assert!(notifications
            .iter()
            .all(|n| n.notification_type == NotificationType::PaymentSuccess));

        assert!(h
            .store
            .audit_logs()
            .iter()
            .any(|a| a.action == AuditAction::PaymentCompleted));

        h.settle().await;
        let kinds: Vec<_> = h
            .store
            .subscription_events()
            .iter()
            .map(|e| e.kind.event_type())
            .collect();
        assert!(kinds.contains(&"payment_completed"));
        assert!(kinds.contains(&"subscription_activated"));
    }

    // =========================================================================
    // Duplicate completed delivery: same terminal state, side effects re-run
    // =========================================================================
    #[tokio::test]
    async fn test_duplicate_completed_delivery_is_idempotent() {
        let h = harness();
        let (session, external_id) = h.open_session("va_bca").await;
        let payload = va_paid(&external_id);

        let first = h.billing.webhooks.handle(Some(TOKEN), &payload).await.unwrap();
        assert_eq!(
            first,
            WebhookOutcome::Applied {
                invoice_id: session.invoice.id,
                status: TransactionStatus::Completed,
            }
        );
        let tx_first = h.store.transactions()[0].clone();
        let invoice_first = h.store.invoice(session.invoice.id).unwrap();
        let org_first = h.store.organization(h.org_id).unwrap();

        let outcome = h.billing.webhooks.handle(Some(TOKEN), &payload).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Reapplied { .. }));

        let tx_second = &h.store.transactions()[0];
        let invoice_second = h.store.invoice(session.invoice.id).unwrap();
        let org_second = h.store.organization(h.org_id).unwrap();

        assert_eq!(tx_second.status, tx_first.status);
        assert_eq!(tx_second.completed_at, tx_first.completed_at);
        assert_eq!(invoice_second.status, invoice_first.status);
        assert_eq!(invoice_second.paid_at, invoice_first.paid_at);
        assert_eq!(org_second.subscription_status, org_first.subscription_status);
        assert_eq!(org_second.subscription_end_date, org_first.subscription_end_date);

        // Admins are notified again on re-delivery; no deduplication
        assert_eq!(h.store.notifications().len(), 4);
    }

    // =========================================================================
    // invoice_expired for an unknown external_id: 404, no state change
    // =========================================================================
    #[tokio::test]
    async fn test_expired_event_for_unknown_invoice_not_found() {
        let h = harness();
        h.open_session("va_bca").await;
        let writes = h.store.write_count();

        let payload = event(
            "invoice_expired",
            json!({ "external_id": format!("{}-1", Uuid::new_v4()), "status": "EXPIRED" }),
        );
        let err = h
            .billing
            .webhooks
            .handle(Some(TOKEN), &payload)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound(_)));
        assert_eq!(h.store.write_count(), writes);
        assert_eq!(h.store.invoices()[0].status, InvoiceStatus::Issued);
    }

    // =========================================================================
    // Conflicting callback after a terminal status is ignored
    // =========================================================================
    #[tokio::test]
    async fn test_expiry_after_payment_is_ignored() {
        let h = harness();
        let (session, external_id) = h.open_session("va_bca").await;
        h.billing
            .webhooks
            .handle(Some(TOKEN), &va_paid(&external_id))
            .await
            .unwrap();
        h.settle().await;
        let writes = h.store.write_count();

        let outcome = h
            .billing
            .webhooks
            .handle(
                Some(TOKEN),
                &event("virtual_account_expired", json!({ "external_id": external_id })),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Conflict {
                invoice_id: session.invoice.id,
                current: TransactionStatus::Completed,
                requested: TransactionStatus::Expired,
            }
        );
        assert_eq!(h.store.write_count(), writes);
        assert_eq!(
            h.store.invoice(session.invoice.id).unwrap().status,
            InvoiceStatus::Paid
        );
    }

    // =========================================================================
    // Failed e-wallet payment cancels the invoice and tells the admins
    // =========================================================================
    #[tokio::test]
    async fn test_failed_ewallet_payment_cancels_invoice() {
        let h = harness();
        let (session, external_id) = h.open_session("ewallet_ovo").await;

        let payload = event(
            "ewallet.capture",
            json!({ "reference_id": external_id, "status": "FAILED", "id": "ewc_9" }),
        );
        h.billing.webhooks.handle(Some(TOKEN), &payload).await.unwrap();

        assert_eq!(h.store.transactions()[0].status, TransactionStatus::Failed);
        let invoice = h.store.invoice(session.invoice.id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Cancelled);
        assert_eq!(
            invoice.payment_details.cancellation_reason.as_deref(),
            Some("payment_failed")
        );
        assert!(h
            .store
            .notifications()
            .iter()
            .all(|n| n.notification_type == NotificationType::PaymentFailed));
        assert_eq!(
            h.store.organization(h.org_id).unwrap().subscription_status,
            SubscriptionStatus::Trial
        );
    }

    // =========================================================================
    // Unknown events are acknowledged and change nothing
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_event_acknowledged() {
        let h = harness();
        let (_, external_id) = h.open_session("va_bca").await;
        let writes = h.store.write_count();

        let outcome = h
            .billing
            .webhooks
            .handle(
                Some(TOKEN),
                &event("disbursement.completed", json!({ "external_id": external_id })),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Unhandled {
                event: "disbursement.completed".to_string()
            }
        );
        assert_eq!(h.store.write_count(), writes);
    }

    // =========================================================================
    // Handled event without external_id is a 400
    // =========================================================================
    #[tokio::test]
    async fn test_missing_external_id_rejected() {
        let h = harness();
        let err = h
            .billing
            .webhooks
            .handle(Some(TOKEN), &event("invoice_paid", json!({ "id": "inv_1" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
        assert_eq!(h.store.write_count(), 0);
    }

    // =========================================================================
    // Invoice without a transaction: 404
    // =========================================================================
    #[tokio::test]
    async fn test_invoice_without_transaction_not_found() {
        let h = harness_with(crate::testing::ScriptedGateway::failing("DOWN"));
        let _ = h.billing.checkout.create_session(&h.request("va_bca")).await;
        let external_id = h.store.invoices()[0].payment_details.external_id.clone();
        let writes = h.store.write_count();

        let err = h
            .billing
            .webhooks
            .handle(Some(TOKEN), &va_paid(&external_id))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::NotFound(msg) if msg.contains("transaction")));
        assert_eq!(h.store.write_count(), writes);
    }

    // =========================================================================
    // Unpaid transactions past expires_at are swept once
    // =========================================================================
    #[tokio::test]
    async fn test_stale_transactions_expired_by_sweep() {
        let h = harness();
        let (session, _) = h.open_session("va_bca").await;
        let now = time::OffsetDateTime::now_utc();
        h.store
            .set_transaction_expiry(session.transaction.id, now - Duration::minutes(5));

        let expired = h.billing.webhooks.expire_stale_transactions(now).await.unwrap();
        assert_eq!(expired, 1);
        assert_eq!(h.store.transactions()[0].status, TransactionStatus::Expired);
        let invoice = h.store.invoice(session.invoice.id).unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Cancelled);
        assert!(h
            .store
            .audit_logs()
            .iter()
            .any(|a| a.action == AuditAction::PaymentExpired));

        assert_eq!(
            h.billing.webhooks.expire_stale_transactions(now).await.unwrap(),
            0
        );
    }
}
