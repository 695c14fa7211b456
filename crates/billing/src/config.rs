//! Billing configuration

use crate::error::{BillingError, BillingResult};

const DEFAULT_XENDIT_BASE_URL: &str = "https://api.xendit.co";

/// Settings for the payment provider and the trial sweep trigger
#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub xendit_api_key: String,
    /// Shared secret Xendit sends in `x-callback-token`
    pub xendit_webhook_token: String,
    pub xendit_base_url: String,
    /// Base URL of the SPA; used for e-wallet and card redirect targets
    pub public_app_url: String,
    pub supabase_url: String,
    pub supabase_service_role_key: String,
    /// Endpoint of the external expiration sweep. Empty disables the trigger.
    pub trial_sweep_url: String,
    /// VAT/PPN applied on top of the plan price, in whole percent
    pub tax_rate_percent: i64,
    /// Seller name printed on invoice PDFs
    pub company_name: String,
}

impl BillingConfig {
    /// Load from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let xendit_api_key = std::env::var("XENDIT_API_KEY")
            .map_err(|_| BillingError::Config("XENDIT_API_KEY not set".to_string()))?;
        let xendit_webhook_token = std::env::var("XENDIT_WEBHOOK_TOKEN")
            .map_err(|_| BillingError::Config("XENDIT_WEBHOOK_TOKEN not set".to_string()))?;

        if xendit_webhook_token.trim().is_empty() {
            return Err(BillingError::Config(
                "XENDIT_WEBHOOK_TOKEN must not be empty".to_string(),
            ));
        }

        let supabase_url = std::env::var("SUPABASE_URL").unwrap_or_default();
        let trial_sweep_url = std::env::var("TRIAL_SWEEP_URL").unwrap_or_else(|_| {
            if supabase_url.is_empty() {
                String::new()
            } else {
                format!(
                    "{}/functions/v1/check-trial-expiration",
                    supabase_url.trim_end_matches('/')
                )
            }
        });

        let tax_rate_percent = match std::env::var("INVOICE_TAX_RATE_PERCENT") {
            Ok(raw) => raw.parse::<i64>().map_err(|_| {
                BillingError::Config(format!("INVOICE_TAX_RATE_PERCENT is not a number: {}", raw))
            })?,
            Err(_) => 0,
        };
        if !(0..=100).contains(&tax_rate_percent) {
            return Err(BillingError::Config(format!(
                "INVOICE_TAX_RATE_PERCENT out of range: {}",
                tax_rate_percent
            )));
        }

        Ok(Self {
            xendit_api_key,
            xendit_webhook_token,
            xendit_base_url: std::env::var("XENDIT_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_XENDIT_BASE_URL.to_string()),
            public_app_url: std::env::var("PUBLIC_APP_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            supabase_url,
            supabase_service_role_key: std::env::var("SUPABASE_SERVICE_ROLE_KEY")
                .unwrap_or_default(),
            trial_sweep_url,
            tax_rate_percent,
            company_name: std::env::var("COMPANY_NAME").unwrap_or_else(|_| "Opsuite".to_string()),
        })
    }

    /// Tax owed on `amount` at the configured rate, rounded half up
    pub fn tax_for(&self, amount: i64) -> i64 {
        (amount * self.tax_rate_percent + 50) / 100
    }
}

#[cfg(any(test, feature = "test-util"))]
impl BillingConfig {
    /// Fixed settings for unit tests; the callback token is `callback-token`
    pub fn for_tests() -> Self {
        Self {
            xendit_api_key: "xnd_development_test".to_string(),
            xendit_webhook_token: "callback-token".to_string(),
            xendit_base_url: DEFAULT_XENDIT_BASE_URL.to_string(),
            public_app_url: "https://app.example.com".to_string(),
            supabase_url: "https://project.supabase.co".to_string(),
            supabase_service_role_key: "service-role".to_string(),
            trial_sweep_url: String::new(),
            tax_rate_percent: 0,
            company_name: "Opsuite".to_string(),
        }
    }
}
