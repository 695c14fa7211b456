//! HTTP routes

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod analytics;
pub mod invoices;
pub mod payments;
pub mod trial;
pub mod webhooks;

#[cfg(test)]
mod router_tests;

/// Build the full application router
pub fn create_router(state: AppState) -> Router {
    // Browser clients call these endpoints directly from the SPA origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(webhooks::CALLBACK_TOKEN_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/v1/payments/sessions",
            post(payments::create_payment_session),
        )
        .route(
            "/api/v1/webhooks/xendit",
            post(webhooks::xendit_webhook).options(webhooks::preflight),
        )
        .route("/api/v1/invoices/pdf", post(invoices::generate_invoice_pdf))
        .route(
            "/api/v1/organizations/{id}/trial",
            get(trial::get_trial_status),
        )
        .route(
            "/api/v1/analytics/subscription-events",
            post(analytics::track_subscription_event),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
