// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider messages
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Opsuite Billing Module
//!
//! Trial lifecycle and Xendit payment reconciliation.
//!
//! ## Features
//!
//! - **Trial resolution**: Expire lapsed trials and repair missing trial dates
//! - **Trial countdown**: Remaining-time snapshots, session banner state, refresh timer
//! - **Payment sessions**: Invoice + Xendit charge creation, cancelled on failure
//! - **Webhooks**: Xendit callback reconciliation into invoice, transaction and organization state
//! - **Invoice PDF**: One-page A4 invoice rendering
//! - **Analytics**: Fire-and-forget subscription funnel events
//! - **Invariants**: Read-only consistency checks for the worker

pub mod audit;
pub mod checkout;
pub mod config;
pub mod countdown;
pub mod error;
pub mod events;
pub mod invariants;
pub mod invoice_pdf;
pub mod models;
pub mod notifications;
pub mod pdf;
pub mod store;
pub mod trial;
pub mod webhooks;
pub mod xendit;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[cfg(test)]
mod edge_case_tests;

use std::sync::Arc;

use sqlx::PgPool;

// Audit
pub use audit::{AuditAction, AuditEntry};

// Checkout
pub use checkout::{PaymentSession, PaymentSessionRequest, PaymentSessionService};

// Config
pub use config::BillingConfig;

// Countdown
pub use countdown::{BannerView, CountdownTicker, TrialBanner, TrialCountdown};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{SubscriptionEventKind, SubscriptionEventTracker};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Invoice PDF
pub use invoice_pdf::{InvoicePdf, InvoicePdfService};

// Models
pub use models::{
    Invoice, InvoiceStatus, Organization, PaymentMethodType, PaymentTransaction,
    ProviderPaymentDetails, TransactionStatus,
};

// Store
pub use store::{BillingStore, PgBillingStore};

// Trial
pub use trial::{ExpirationSweep, HttpExpirationSweep, TrialStatusResolver, TRIAL_LENGTH_DAYS};

// Webhooks
pub use webhooks::{WebhookOutcome, WebhookReconciler, XenditCallback, XenditEvent};

// Xendit
pub use xendit::{PaymentGateway, XenditClient};

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub config: BillingConfig,
    pub store: Arc<dyn BillingStore>,
    pub trial: TrialStatusResolver,
    pub checkout: PaymentSessionService,
    pub webhooks: WebhookReconciler,
    pub invoices: InvoicePdfService,
    pub events: SubscriptionEventTracker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::new(BillingConfig::from_env()?, pool)
    }

    /// Create a new billing service with explicit config, backed by Postgres and Xendit
    pub fn new(config: BillingConfig, pool: PgPool) -> BillingResult<Self> {
        let store: Arc<dyn BillingStore> = Arc::new(PgBillingStore::new(pool));
        let gateway = Arc::new(XenditClient::new(&config)?);
        let sweep = Arc::new(HttpExpirationSweep::new(&config)?);

        Ok(Self::with_parts(config, store, gateway, sweep))
    }

    /// Assemble from explicit store, provider and sweep implementations
    pub fn with_parts(
        config: BillingConfig,
        store: Arc<dyn BillingStore>,
        gateway: Arc<dyn PaymentGateway>,
        sweep: Arc<dyn ExpirationSweep>,
    ) -> Self {
        Self {
            trial: TrialStatusResolver::new(store.clone(), sweep),
            checkout: PaymentSessionService::new(store.clone(), gateway, config.clone()),
            webhooks: WebhookReconciler::new(store.clone(), config.xendit_webhook_token.clone()),
            invoices: InvoicePdfService::new(store.clone(), config.company_name.clone()),
            events: SubscriptionEventTracker::new(store.clone()),
            store,
            config,
        }
    }
}
