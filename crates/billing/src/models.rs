//! Billing records
//!
//! Domain shapes of the rows the billing core reads and writes. The JSON
//! columns (`invoices.payment_details`, `payment_transactions.payment_details`)
//! are typed here so a producer cannot drift from what consumers expect.

use opsuite_shared::{ParseEnumError, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Organization
// =============================================================================

/// Tenant root record, trimmed to the columns billing cares about
#[derive(Debug, Clone, Serialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub address: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_end_date: Option<OffsetDateTime>,
    pub trial_expired: bool,
    pub subscription_status: SubscriptionStatus,
    pub subscription_plan_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_start_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end_date: Option<OffsetDateTime>,
}

impl Organization {
    /// Whether the organization still carries trial state, running or lapsed
    pub fn has_trial_state(&self) -> bool {
        self.subscription_status == SubscriptionStatus::Trial
            || self.trial_expired
            || self.trial_end_date.is_some()
    }
}

/// Column changes applied when a payment activates a subscription
#[derive(Debug, Clone)]
pub struct SubscriptionActivation {
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub period_start: OffsetDateTime,
    pub period_end: OffsetDateTime,
    /// Reset `trial_expired` and null out `trial_end_date`
    pub clear_trial: bool,
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    /// Whole currency units (IDR has no minor unit in practice)
    pub price: i64,
    pub currency: String,
    pub billing_period_days: i32,
    pub is_active: bool,
}

/// Payment channel families supported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodType {
    BankTransfer,
    Ewallet,
    RetailOutlet,
    CreditCard,
}

impl PaymentMethodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethodType::BankTransfer => "bank_transfer",
            PaymentMethodType::Ewallet => "ewallet",
            PaymentMethodType::RetailOutlet => "retail_outlet",
            PaymentMethodType::CreditCard => "credit_card",
        }
    }
}

impl std::str::FromStr for PaymentMethodType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank_transfer" => Ok(PaymentMethodType::BankTransfer),
            "ewallet" => Ok(PaymentMethodType::Ewallet),
            "retail_outlet" => Ok(PaymentMethodType::RetailOutlet),
            "credit_card" => Ok(PaymentMethodType::CreditCard),
            other => Err(ParseEnumError::new("payment_method_type", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethod {
    /// Client-facing code, e.g. `va_bca`, `ewallet_dana`
    pub code: String,
    pub name: String,
    pub method_type: PaymentMethodType,
    /// Provider channel, e.g. `BCA`, `ID_DANA`, `ALFAMART`
    pub channel_code: String,
    pub is_active: bool,
}

// =============================================================================
// Invoice
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Issued,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Issued => "issued",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issued" => Ok(InvoiceStatus::Issued),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(ParseEnumError::new("invoice_status", other)),
        }
    }
}

/// Contents of `invoices.payment_details`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePaymentDetails {
    /// Correlation id sent to the provider, `{org_id}-{millis}`
    pub external_id: String,
    pub payment_method_code: String,
    #[serde(default)]
    pub pdf_generated: bool,
    /// Set when the invoice is cancelled by a failed payment or a failed session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub invoice_number: String,
    pub amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub status: InvoiceStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub due_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    pub payment_details: InvoicePaymentDetails,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub invoice_number: String,
    pub amount: i64,
    pub tax_amount: i64,
    pub total_amount: i64,
    pub due_date: OffsetDateTime,
    pub payment_details: InvoicePaymentDetails,
}

// =============================================================================
// Payment transaction
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }

    /// Completed, failed and expired never change again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Invoice status that mirrors this transaction status
    pub fn invoice_status(&self) -> InvoiceStatus {
        match self {
            TransactionStatus::Pending => InvoiceStatus::Issued,
            TransactionStatus::Completed => InvoiceStatus::Paid,
            TransactionStatus::Failed | TransactionStatus::Expired => InvoiceStatus::Cancelled,
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(ParseEnumError::new("transaction_status", other)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of `payment_transactions.payment_details`, one variant per channel family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderPaymentDetails {
    BankTransfer {
        bank_code: String,
        account_number: String,
    },
    Ewallet {
        channel_code: String,
        checkout_url: String,
    },
    RetailOutlet {
        retail_outlet_name: String,
        payment_code: String,
    },
    CreditCard {
        invoice_url: String,
    },
}

impl ProviderPaymentDetails {
    /// Redirect target for the payer, `None` for pay-by-reference channels
    pub fn redirect_url(&self) -> Option<&str> {
        match self {
            ProviderPaymentDetails::Ewallet { checkout_url, .. } => Some(checkout_url),
            ProviderPaymentDetails::CreditCard { invoice_url } => Some(invoice_url),
            ProviderPaymentDetails::BankTransfer { .. }
            | ProviderPaymentDetails::RetailOutlet { .. } => None,
        }
    }

    /// Human-readable channel line for the invoice PDF
    pub fn describe(&self) -> String {
        match self {
            ProviderPaymentDetails::BankTransfer {
                bank_code,
                account_number,
            } => format!("{} Virtual Account {}", bank_code, account_number),
            ProviderPaymentDetails::Ewallet { channel_code, .. } => {
                format!("E-Wallet {}", channel_code.trim_start_matches("ID_"))
            }
            ProviderPaymentDetails::RetailOutlet {
                retail_outlet_name,
                payment_code,
            } => format!("{} payment code {}", retail_outlet_name, payment_code),
            ProviderPaymentDetails::CreditCard { .. } => "Credit Card".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub organization_id: Uuid,
    pub provider_reference: String,
    pub payment_url: String,
    pub status: TransactionStatus,
    pub amount: i64,
    pub payment_details: ProviderPaymentDetails,
    pub provider_payment_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPaymentTransaction {
    pub invoice_id: Uuid,
    pub organization_id: Uuid,
    pub provider_reference: String,
    pub payment_url: String,
    pub amount: i64,
    pub payment_details: ProviderPaymentDetails,
    pub expires_at: OffsetDateTime,
}

/// Terminal status write for a transaction
#[derive(Debug, Clone)]
pub struct TransactionStatusUpdate {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub provider_payment_id: Option<String>,
    pub completed_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_details_tagged_by_type() {
        let details = ProviderPaymentDetails::BankTransfer {
            bank_code: "BCA".to_string(),
            account_number: "1234567890".to_string(),
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["type"], "bank_transfer");
        assert_eq!(json["bank_code"], "BCA");

        let parsed: ProviderPaymentDetails = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, details);
    }

    #[test]
    fn test_provider_details_rejects_unknown_variant() {
        let json = serde_json::json!({"type": "crypto", "wallet": "0x0"});
        assert!(serde_json::from_value::<ProviderPaymentDetails>(json).is_err());
    }

    #[test]
    fn test_redirect_url_only_for_url_bearing_channels() {
        let va = ProviderPaymentDetails::BankTransfer {
            bank_code: "BNI".to_string(),
            account_number: "880812345".to_string(),
        };
        let card = ProviderPaymentDetails::CreditCard {
            invoice_url: "https://checkout.xendit.co/web/abc".to_string(),
        };
        assert_eq!(va.redirect_url(), None);
        assert_eq!(card.redirect_url(), Some("https://checkout.xendit.co/web/abc"));
    }

    #[test]
    fn test_invoice_details_defaults_missing_flags() {
        let details: InvoicePaymentDetails = serde_json::from_value(serde_json::json!({
            "external_id": "org-1",
            "payment_method_code": "va_bca",
        }))
        .unwrap();
        assert!(!details.pdf_generated);
        assert!(details.cancellation_reason.is_none());
    }

    #[test]
    fn test_transaction_status_mirrors_invoice_status() {
        assert_eq!(TransactionStatus::Completed.invoice_status(), InvoiceStatus::Paid);
        assert_eq!(TransactionStatus::Failed.invoice_status(), InvoiceStatus::Cancelled);
        assert_eq!(TransactionStatus::Expired.invoice_status(), InvoiceStatus::Cancelled);
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Expired.is_terminal());
    }
}
