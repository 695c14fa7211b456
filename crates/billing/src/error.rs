//! Billing error types

use opsuite_shared::ParseEnumError;

/// Errors raised by the billing core
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Required input missing or malformed. Raised before any side effect.
    #[error("{0}")]
    Validation(String),

    /// Referenced organization, plan, payment method, invoice or transaction does not exist
    #[error("{0}")]
    NotFound(String),

    /// Webhook callback token missing or wrong
    #[error("Invalid callback token")]
    Unauthorized,

    /// The payment provider answered with a non-2xx status or an unusable body
    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(String),

    /// Stored data violates an expected shape (unknown enum value, bad JSON blob)
    #[error("Invalid stored state: {0}")]
    InvalidState(String),

    #[error("PDF rendering failed: {0}")]
    Pdf(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BillingResult<T> = Result<T, BillingError>;

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Provider(err.to_string())
    }
}

impl From<ParseEnumError> for BillingError {
    fn from(err: ParseEnumError) -> Self {
        BillingError::InvalidState(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::InvalidState(err.to_string())
    }
}
