//! Xendit payment provider client
//!
//! Thin reqwest wrapper over the four Xendit charge APIs the checkout uses.
//! Each payment method family maps to a different endpoint and yields a
//! provider reference plus, for redirect-based channels, a checkout URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::models::{PaymentMethodType, ProviderPaymentDetails};

/// Placeholder stored in `payment_url` for pay-by-reference channels
pub const NO_PAYMENT_URL: &str = "N/A";

/// Provider calls are not retried; a hung request should still fail the session.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A charge to open with the provider
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub external_id: String,
    pub amount: i64,
    pub currency: String,
    /// Shown on VA / retail payment screens
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub description: String,
    pub method_type: PaymentMethodType,
    pub channel_code: String,
    pub expires_at: OffsetDateTime,
}

/// What the provider handed back for a charge
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCharge {
    pub provider_reference: String,
    pub details: ProviderPaymentDetails,
}

impl ProviderCharge {
    /// Value for `payment_transactions.payment_url`
    pub fn payment_url(&self) -> String {
        self.details
            .redirect_url()
            .unwrap_or(NO_PAYMENT_URL)
            .to_string()
    }
}

/// Seam between the checkout flow and the payment provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> BillingResult<ProviderCharge>;
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateVirtualAccount<'a> {
    external_id: &'a str,
    bank_code: &'a str,
    name: &'a str,
    expected_amount: i64,
    is_closed: bool,
    is_single_use: bool,
    expiration_date: String,
}

#[derive(Debug, Deserialize)]
struct VirtualAccountResponse {
    id: String,
    account_number: String,
    bank_code: String,
}

#[derive(Debug, Serialize)]
struct CreateEwalletCharge<'a> {
    reference_id: &'a str,
    currency: &'a str,
    amount: i64,
    checkout_method: &'static str,
    channel_code: &'a str,
    channel_properties: EwalletChannelProperties,
}

#[derive(Debug, Serialize)]
struct EwalletChannelProperties {
    success_redirect_url: String,
    failure_redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct EwalletChargeResponse {
    id: String,
    #[serde(default)]
    actions: EwalletActions,
}

#[derive(Debug, Default, Deserialize)]
struct EwalletActions {
    desktop_web_checkout_url: Option<String>,
    mobile_web_checkout_url: Option<String>,
    mobile_deeplink_checkout_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateFixedPaymentCode<'a> {
    external_id: &'a str,
    retail_outlet_name: &'a str,
    name: &'a str,
    expected_amount: i64,
    expiration_date: String,
}

#[derive(Debug, Deserialize)]
struct FixedPaymentCodeResponse {
    id: String,
    payment_code: String,
    retail_outlet_name: String,
}

#[derive(Debug, Serialize)]
struct CreateInvoice<'a> {
    external_id: &'a str,
    amount: i64,
    currency: &'a str,
    description: &'a str,
    invoice_duration: i64,
    payment_methods: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    payer_email: Option<&'a str>,
    success_redirect_url: String,
    failure_redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: String,
    invoice_url: String,
}

#[derive(Debug, Deserialize)]
struct XenditErrorEnvelope {
    error_code: Option<String>,
    message: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Xendit REST client authenticated with the secret API key
#[derive(Clone)]
pub struct XenditClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    public_app_url: String,
}

impl XenditClient {
    pub fn new(config: &BillingConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.xendit_api_key.clone(),
            base_url: config.xendit_base_url.trim_end_matches('/').to_string(),
            public_app_url: config.public_app_url.trim_end_matches('/').to_string(),
        })
    }

    fn success_url(&self, external_id: &str) -> String {
        format!(
            "{}/billing/payment-success?ref={}",
            self.public_app_url, external_id
        )
    }

    fn failure_url(&self, external_id: &str) -> String {
        format!(
            "{}/billing/payment-failed?ref={}",
            self.public_app_url, external_id
        )
    }

    async fn post<B: Serialize + ?Sized, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        context: &str,
    ) -> BillingResult<R> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.api_key, Some(""))
            .json(body)
            .send()
            .await?;

        let resp = Self::ensure_success(resp, context).await?;
        let parsed = resp.json::<R>().await.map_err(|e| {
            BillingError::Provider(format!("{}: unexpected response body: {}", context, e))
        })?;
        Ok(parsed)
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> BillingResult<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (error_code, message) = match serde_json::from_str::<XenditErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error_code, envelope.message),
            Err(_) => (None, None),
        };

        tracing::error!(
            status = %status,
            xendit_error_code = ?error_code,
            xendit_message = ?message,
            response_body = %body,
            context = %context,
            "Xendit API request failed"
        );

        Err(BillingError::Provider(format!(
            "{} failed with status {}: {}",
            context,
            status,
            message
                .or(error_code)
                .unwrap_or_else(|| "no error message".to_string())
        )))
    }

    async fn create_virtual_account(&self, req: &ChargeRequest) -> BillingResult<ProviderCharge> {
        let body = CreateVirtualAccount {
            external_id: &req.external_id,
            bank_code: &req.channel_code,
            name: &req.customer_name,
            expected_amount: req.amount,
            is_closed: true,
            is_single_use: true,
            expiration_date: format_timestamp(req.expires_at)?,
        };
        let va: VirtualAccountResponse = self
            .post("/callback_virtual_accounts", &body, "create virtual account")
            .await?;

        Ok(ProviderCharge {
            provider_reference: va.id,
            details: ProviderPaymentDetails::BankTransfer {
                bank_code: va.bank_code,
                account_number: va.account_number,
            },
        })
    }

    async fn create_ewallet_charge(&self, req: &ChargeRequest) -> BillingResult<ProviderCharge> {
        let body = CreateEwalletCharge {
            reference_id: &req.external_id,
            currency: &req.currency,
            amount: req.amount,
            checkout_method: "ONE_TIME_PAYMENT",
            channel_code: &req.channel_code,
            channel_properties: EwalletChannelProperties {
                success_redirect_url: self.success_url(&req.external_id),
                failure_redirect_url: self.failure_url(&req.external_id),
            },
        };
        let charge: EwalletChargeResponse = self
            .post("/ewallets/charges", &body, "create e-wallet charge")
            .await?;

        let checkout_url = charge
            .actions
            .desktop_web_checkout_url
            .or(charge.actions.mobile_web_checkout_url)
            .or(charge.actions.mobile_deeplink_checkout_url)
            .ok_or_else(|| {
                BillingError::Provider(format!(
                    "e-wallet charge {} returned no checkout URL",
                    charge.id
                ))
            })?;

        Ok(ProviderCharge {
            provider_reference: charge.id,
            details: ProviderPaymentDetails::Ewallet {
                channel_code: req.channel_code.clone(),
                checkout_url,
            },
        })
    }

    async fn create_retail_payment_code(
        &self,
        req: &ChargeRequest,
    ) -> BillingResult<ProviderCharge> {
        let body = CreateFixedPaymentCode {
            external_id: &req.external_id,
            retail_outlet_name: &req.channel_code,
            name: &req.customer_name,
            expected_amount: req.amount,
            expiration_date: format_timestamp(req.expires_at)?,
        };
        let code: FixedPaymentCodeResponse = self
            .post("/fixed_payment_code", &body, "create retail payment code")
            .await?;

        Ok(ProviderCharge {
            provider_reference: code.id,
            details: ProviderPaymentDetails::RetailOutlet {
                retail_outlet_name: code.retail_outlet_name,
                payment_code: code.payment_code,
            },
        })
    }

    async fn create_card_invoice(&self, req: &ChargeRequest) -> BillingResult<ProviderCharge> {
        let duration = (req.expires_at - OffsetDateTime::now_utc())
            .whole_seconds()
            .max(60);
        let body = CreateInvoice {
            external_id: &req.external_id,
            amount: req.amount,
            currency: &req.currency,
            description: &req.description,
            invoice_duration: duration,
            payment_methods: ["CREDIT_CARD"],
            payer_email: req.customer_email.as_deref(),
            success_redirect_url: self.success_url(&req.external_id),
            failure_redirect_url: self.failure_url(&req.external_id),
        };
        let invoice: InvoiceResponse = self
            .post("/v2/invoices", &body, "create card invoice")
            .await?;

        Ok(ProviderCharge {
            provider_reference: invoice.id,
            details: ProviderPaymentDetails::CreditCard {
                invoice_url: invoice.invoice_url,
            },
        })
    }
}

#[async_trait]
impl PaymentGateway for XenditClient {
    async fn create_charge(&self, request: &ChargeRequest) -> BillingResult<ProviderCharge> {
        tracing::info!(
            external_id = %request.external_id,
            method_type = request.method_type.as_str(),
            channel = %request.channel_code,
            amount = request.amount,
            "Creating Xendit charge"
        );

        match request.method_type {
            PaymentMethodType::BankTransfer => self.create_virtual_account(request).await,
            PaymentMethodType::Ewallet => self.create_ewallet_charge(request).await,
            PaymentMethodType::RetailOutlet => self.create_retail_payment_code(request).await,
            PaymentMethodType::CreditCard => self.create_card_invoice(request).await,
        }
    }
}

fn format_timestamp(ts: OffsetDateTime) -> BillingResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| BillingError::Provider(format!("Invalid expiration timestamp: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pay_by_reference_channels_use_placeholder_url() {
        let charge = ProviderCharge {
            provider_reference: "va_123".to_string(),
            details: ProviderPaymentDetails::BankTransfer {
                bank_code: "BCA".to_string(),
                account_number: "1076612345".to_string(),
            },
        };
        assert_eq!(charge.payment_url(), NO_PAYMENT_URL);
    }

    #[test]
    fn test_ewallet_charge_uses_checkout_url() {
        let charge = ProviderCharge {
            provider_reference: "ewc_123".to_string(),
            details: ProviderPaymentDetails::Ewallet {
                channel_code: "ID_DANA".to_string(),
                checkout_url: "https://link.dana.id/pay".to_string(),
            },
        };
        assert_eq!(charge.payment_url(), "https://link.dana.id/pay");
    }

    #[test]
    fn test_virtual_account_body_is_closed_single_use() {
        let body = CreateVirtualAccount {
            external_id: "org-1700000000000",
            bank_code: "BCA",
            name: "Acme",
            expected_amount: 150_000,
            is_closed: true,
            is_single_use: true,
            expiration_date: "2025-01-02T00:00:00Z".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["is_closed"], true);
        assert_eq!(json["expected_amount"], 150_000);
        assert_eq!(json["bank_code"], "BCA");
    }

    #[test]
    fn test_card_invoice_omits_missing_email() {
        let body = CreateInvoice {
            external_id: "org-1",
            amount: 10,
            currency: "IDR",
            description: "Premium",
            invoice_duration: 86_400,
            payment_methods: ["CREDIT_CARD"],
            payer_email: None,
            success_redirect_url: "s".to_string(),
            failure_redirect_url: "f".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("payer_email").is_none());
        assert_eq!(json["payment_methods"][0], "CREDIT_CARD");
    }

    #[test]
    fn test_ewallet_response_tolerates_missing_actions() {
        let parsed: EwalletChargeResponse =
            serde_json::from_str(r#"{"id":"ewc_1","status":"PENDING"}"#).unwrap();
        assert!(parsed.actions.desktop_web_checkout_url.is_none());
    }
}
