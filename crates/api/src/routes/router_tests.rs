// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Router tests
//!
//! Drive the full axum router against the in-memory billing store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use opsuite_billing::testing::{MemoryStore, RecordingSweep, ScriptedGateway};
use opsuite_billing::{BillingConfig, BillingService, InvoiceStatus, PaymentMethodType};
use opsuite_shared::SubscriptionStatus;
use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;
use uuid::Uuid;

use super::create_router;
use crate::state::AppState;

const TOKEN: &str = "callback-token";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    org_id: Uuid,
    plan_id: Uuid,
}

fn app_with(gateway: ScriptedGateway) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let org_id = store.add_org("Acme");
    store.add_profile(org_id, "owner");
    let plan_id = store.add_plan("Premium", 150_000);
    store.add_payment_method("va_bca", PaymentMethodType::BankTransfer, "BCA");
    store.add_payment_method("ewallet_ovo", PaymentMethodType::Ewallet, "ID_OVO");

    let billing = BillingService::with_parts(
        BillingConfig::for_tests(),
        store.clone(),
        Arc::new(gateway),
        Arc::new(RecordingSweep::new()),
    );

    TestApp {
        router: create_router(AppState::new(billing)),
        store,
        org_id,
        plan_id,
    }
}

fn app() -> TestApp {
    app_with(ScriptedGateway::succeeding())
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn webhook(&self, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::post("/api/v1/webhooks/xendit")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("x-callback-token", token);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn open_session(&self, code: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/v1/payments/sessions",
                json!({
                    "organizationId": self.org_id.to_string(),
                    "planId": self.plan_id.to_string(),
                    "paymentMethodCode": code,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        self.store.wait_for_events(1).await;
        body
    }
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// =============================================================================
// Payment sessions
// =============================================================================

#[tokio::test]
async fn test_create_session_response_shape() {
    let app = app();
    let body = app.open_session("va_bca").await;

    assert_eq!(body["success"], true);
    assert_eq!(body["transaction"]["status"], "pending");
    assert_eq!(body["transaction"]["payment_url"], "N/A");
    assert_eq!(body["transaction"]["payment_details"]["type"], "bank_transfer");
    assert!(body["transaction"]["expires_at"].is_string());
    assert_eq!(body["invoice"]["amount"], 150_000);
    assert!(body["invoice"]["invoice_number"]
        .as_str()
        .unwrap()
        .starts_with("INV-"));
}

#[tokio::test]
async fn test_create_session_missing_field_is_400_without_writes() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/payments/sessions",
            json!({ "organizationId": app.org_id.to_string(), "planId": app.plan_id.to_string() }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_create_session_malformed_json_is_400() {
    let app = app();
    let (status, body) = app
        .send(
            Request::post("/api/v1/payments/sessions")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_create_session_unknown_method_is_404() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/payments/sessions",
            json!({
                "organizationId": app.org_id.to_string(),
                "planId": app.plan_id.to_string(),
                "paymentMethodCode": "va_unknown",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_provider_failure_is_500_and_cancels_invoice() {
    let app = app_with(ScriptedGateway::failing("channel unavailable"));
    let (status, body) = app
        .post(
            "/api/v1/payments/sessions",
            json!({
                "organizationId": app.org_id.to_string(),
                "planId": app.plan_id.to_string(),
                "paymentMethodCode": "va_bca",
            }),
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("channel unavailable"));

    let invoices = app.store.invoices();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].status, InvoiceStatus::Cancelled);
    assert!(app.store.transactions().is_empty());
}

// =============================================================================
// Webhooks
// =============================================================================

#[tokio::test]
async fn test_webhook_rejects_bad_token_before_parsing() {
    let app = app();

    let (status, body) = app
        .send(
            Request::post("/api/v1/webhooks/xendit")
                .header("x-callback-token", "wrong")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app.webhook(None, json!({ "event": "invoice_paid" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_webhook_invalid_json_with_valid_token_is_400() {
    let app = app();
    let (status, _) = app
        .send(
            Request::post("/api/v1/webhooks/xendit")
                .header("x-callback-token", TOKEN)
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_completes_payment_and_activates_org() {
    let app = app();
    let session = app.open_session("va_bca").await;
    let invoice_id: Uuid = session["invoice"]["id"].as_str().unwrap().parse().unwrap();
    let external_id = app
        .store
        .invoice(invoice_id)
        .unwrap()
        .payment_details
        .external_id;

    let (status, body) = app
        .webhook(
            Some(TOKEN),
            json!({
                "event": "virtual_account_payment_paid",
                "data": { "external_id": external_id, "payment_id": "pay-1", "amount": 150000 }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Payment marked completed");
    assert_eq!(body["outcome"]["result"], "applied");
    assert_eq!(body["outcome"]["status"], "completed");

    assert_eq!(app.store.invoice(invoice_id).unwrap().status, InvoiceStatus::Paid);
    let org = app.store.organization(app.org_id).unwrap();
    assert_eq!(org.subscription_status, SubscriptionStatus::Active);
    assert_eq!(org.subscription_plan_id, Some(app.plan_id));
    assert!(org.trial_end_date.is_none());
}

#[tokio::test]
async fn test_webhook_unknown_event_acknowledged() {
    let app = app();
    let (status, body) = app
        .webhook(
            Some(TOKEN),
            json!({ "event": "recurring.plan.activated", "data": { "id": "x" } }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"], "unhandled");
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_webhook_unknown_invoice_is_404() {
    let app = app();
    let (status, body) = app
        .webhook(
            Some(TOKEN),
            json!({ "event": "invoice_expired", "data": { "external_id": "missing-1" } }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invoice not found");
    assert_eq!(app.store.write_count(), 0);
}

#[tokio::test]
async fn test_webhook_preflight_is_empty_200() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::options("/api/v1/webhooks/xendit")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_cors_preflight_allows_any_origin() {
    let app = app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::options("/api/v1/payments/sessions")
                .header("origin", "https://app.example.com")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}

// =============================================================================
// Invoice PDF
// =============================================================================

#[tokio::test]
async fn test_invoice_pdf_returns_base64_document() {
    let app = app();
    let session = app.open_session("ewallet_ovo").await;
    let invoice_id = session["invoice"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post("/api/v1/invoices/pdf", json!({ "invoiceId": invoice_id }))
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["invoice_id"], invoice_id);
    assert_eq!(body["invoice_number"], session["invoice"]["invoice_number"]);

    let pdf = STANDARD.decode(body["pdf_data"].as_str().unwrap()).unwrap();
    assert!(pdf.starts_with(b"%PDF-1.4"));
}

#[tokio::test]
async fn test_invoice_pdf_validation_and_not_found() {
    let app = app();

    let (status, _) = app.post("/api/v1/invoices/pdf", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/v1/invoices/pdf", json!({ "invoiceId": "INV-1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .post(
            "/api/v1/invoices/pdf",
            json!({ "invoiceId": Uuid::new_v4().to_string() }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Invoice not found");
}

// =============================================================================
// Trial status
// =============================================================================

#[tokio::test]
async fn test_trial_status_running_trial() {
    let app = app();
    let (status, body) = app
        .send(
            Request::get(format!("/api/v1/organizations/{}/trial", app.org_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription_status"], "trial");
    assert_eq!(body["trial_expired"], false);
    assert_eq!(body["countdown"]["expired"], false);
    assert_eq!(body["countdown"]["days_left"], 7);
    assert_eq!(body["show_warning"], false);
}

#[tokio::test]
async fn test_trial_status_expires_lapsed_trial() {
    let app = app();
    let now = OffsetDateTime::now_utc();
    let org_id = app
        .store
        .add_trial_org(Some(now - Duration::days(15)), Some(now - Duration::days(1)));

    let (status, body) = app
        .send(
            Request::get(format!("/api/v1/organizations/{}/trial", org_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription_status"], "expired");
    assert_eq!(body["trial_expired"], true);
    assert_eq!(body["countdown"]["expired"], true);
    assert_eq!(body["countdown"]["progress"], 0.0);
}

#[tokio::test]
async fn test_trial_status_warning_window() {
    let app = app();
    let now = OffsetDateTime::now_utc();
    let org_id = app.store.add_trial_org(
        Some(now - Duration::days(12)),
        Some(now + Duration::days(2)),
    );

    let (status, body) = app
        .send(
            Request::get(format!("/api/v1/organizations/{}/trial", org_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["countdown"]["days_left"], 2);
    assert_eq!(body["show_warning"], true);
}

#[tokio::test]
async fn test_trial_status_bad_id_and_unknown_org() {
    let app = app();

    let (status, _) = app
        .send(
            Request::get("/api/v1/organizations/not-a-uuid/trial")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(
            Request::get(format!("/api/v1/organizations/{}/trial", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

// =============================================================================
// Analytics
// =============================================================================

#[tokio::test]
async fn test_analytics_event_recorded() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/analytics/subscription-events",
            json!({
                "organizationId": app.org_id.to_string(),
                "event_type": "trial_warning_shown",
                "event_data": { "days_left": 2 }
            }),
        )
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);

    app.store.wait_for_events(1).await;
    let events = app.store.subscription_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].organization_id, app.org_id);
    assert_eq!(events[0].kind.event_type(), "trial_warning_shown");
}

#[tokio::test]
async fn test_analytics_unknown_event_rejected() {
    let app = app();
    let (status, body) = app
        .post(
            "/api/v1/analytics/subscription-events",
            json!({
                "organizationId": app.org_id.to_string(),
                "event_type": "page_viewed",
                "event_data": {}
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}
