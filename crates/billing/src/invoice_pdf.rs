//! Invoice PDF rendering
//!
//! Lays out a one-page invoice for a single plan subscription and returns it
//! base64-encoded. The document is rebuilt on every request; nothing is
//! stored besides the `pdf_generated` flag on the invoice.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{Invoice, Organization, PaymentTransaction, SubscriptionPlan};
use crate::pdf::{Font, PdfPage, PAGE_WIDTH};
use crate::store::BillingStore;

const MARGIN: f32 = 50.0;
const RIGHT_EDGE: f32 = PAGE_WIDTH - MARGIN;

/// Response payload of a rendered invoice
#[derive(Debug, Clone, Serialize)]
pub struct InvoicePdf {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    /// Base64-encoded PDF bytes
    pub pdf_data: String,
}

/// Everything printed on the invoice
#[derive(Debug, Clone)]
pub struct InvoiceDocument<'a> {
    pub company_name: &'a str,
    pub invoice: &'a Invoice,
    pub organization: &'a Organization,
    pub plan: Option<&'a SubscriptionPlan>,
    pub transaction: Option<&'a PaymentTransaction>,
}

#[derive(Clone)]
pub struct InvoicePdfService {
    store: Arc<dyn BillingStore>,
    company_name: String,
}

impl InvoicePdfService {
    pub fn new(store: Arc<dyn BillingStore>, company_name: impl Into<String>) -> Self {
        Self {
            store,
            company_name: company_name.into(),
        }
    }

    pub async fn generate(&self, invoice_id: Uuid) -> BillingResult<InvoicePdf> {
        let invoice = self
            .store
            .get_invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Invoice not found".to_string()))?;

        let organization = self
            .store
            .get_organization(invoice.organization_id)
            .await?
            .ok_or_else(|| BillingError::NotFound("Organization not found".to_string()))?;

        let plan = self.store.get_plan(invoice.plan_id).await?;
        let transaction = self.store.latest_transaction_for_invoice(invoice.id).await?;

        let bytes = render_invoice(&InvoiceDocument {
            company_name: &self.company_name,
            invoice: &invoice,
            organization: &organization,
            plan: plan.as_ref(),
            transaction: transaction.as_ref(),
        })?;

        if let Err(e) = self.store.mark_invoice_pdf_generated(invoice.id).await {
            tracing::warn!(
                invoice_id = %invoice.id,
                error = %e,
                "Failed to flag invoice PDF as generated"
            );
        }

        tracing::debug!(
            invoice_id = %invoice.id,
            size_bytes = bytes.len(),
            "Rendered invoice PDF"
        );

        Ok(InvoicePdf {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            pdf_data: STANDARD.encode(bytes),
        })
    }
}

/// Rupiah amount with dot thousands separators, e.g. `Rp 150.000`
pub fn format_idr(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-Rp {}", grouped)
    } else {
        format!("Rp {}", grouped)
    }
}

fn format_date(ts: OffsetDateTime) -> BillingResult<String> {
    ts.format(format_description!("[day] [month repr:short] [year]"))
        .map_err(|e| BillingError::Pdf(e.to_string()))
}

pub fn render_invoice(doc: &InvoiceDocument<'_>) -> BillingResult<Vec<u8>> {
    let invoice = doc.invoice;
    let mut page = PdfPage::new();

    // Header
    page.fill_rect(0.0, 0.0, PAGE_WIDTH, 8.0, 0.2);
    page.text(MARGIN, 60.0, 20.0, Font::Bold, doc.company_name);
    page.text_right(RIGHT_EDGE, 60.0, 24.0, Font::Bold, "INVOICE");
    page.text_right(RIGHT_EDGE, 84.0, 10.0, Font::Regular, &invoice.invoice_number);
    page.text(MARGIN, 120.0, 10.0, Font::Regular, "Issued");
    page.text(140.0, 120.0, 10.0, Font::Regular, &format_date(invoice.created_at)?);
    page.text(MARGIN, 136.0, 10.0, Font::Regular, "Due");
    page.text(140.0, 136.0, 10.0, Font::Regular, &format_date(invoice.due_date)?);
    page.text(MARGIN, 152.0, 10.0, Font::Regular, "Status");
    page.text(
        140.0,
        152.0,
        10.0,
        Font::Bold,
        &invoice.status.as_str().to_uppercase(),
    );

    // Bill to
    page.text(MARGIN, 196.0, 11.0, Font::Bold, "Bill To");
    page.text(MARGIN, 214.0, 10.0, Font::Regular, &doc.organization.name);
    let mut top = 228.0;
    for line in [&doc.organization.email, &doc.organization.address]
        .into_iter()
        .flatten()
    {
        page.text(MARGIN, top, 10.0, Font::Regular, line);
        top += 14.0;
    }

    // Line item
    page.fill_rect(MARGIN, 290.0, RIGHT_EDGE - MARGIN, 20.0, 0.92);
    page.text(MARGIN + 6.0, 304.0, 10.0, Font::Bold, "Description");
    page.text(330.0, 304.0, 10.0, Font::Bold, "Qty");
    page.text_right(RIGHT_EDGE - 6.0, 304.0, 10.0, Font::Bold, "Amount");

    page.text(MARGIN + 6.0, 330.0, 10.0, Font::Regular, "Plan Subscription");
    if let Some(plan) = doc.plan {
        page.text(
            MARGIN + 6.0,
            344.0,
            8.0,
            Font::Regular,
            &format!("{} - {} days", plan.name, plan.billing_period_days),
        );
    }
    page.text(330.0, 330.0, 10.0, Font::Regular, "1");
    page.text_right(
        RIGHT_EDGE - 6.0,
        330.0,
        10.0,
        Font::Regular,
        &format_idr(invoice.amount),
    );
    page.line(MARGIN, 356.0, RIGHT_EDGE, 356.0, 0.5);

    // Totals
    let totals = [
        ("Subtotal", invoice.amount, Font::Regular),
        ("Tax", invoice.tax_amount, Font::Regular),
        ("Total", invoice.total_amount, Font::Bold),
    ];
    let mut top = 378.0;
    for (label, amount, font) in totals {
        page.text(330.0, top, 10.0, font, label);
        page.text_right(RIGHT_EDGE - 6.0, top, 10.0, font, &format_idr(amount));
        top += 16.0;
    }

    // Payment
    page.text(MARGIN, 460.0, 11.0, Font::Bold, "Payment");
    match doc.transaction {
        Some(tx) => {
            page.text(MARGIN, 478.0, 10.0, Font::Regular, &tx.payment_details.describe());
            page.text(
                MARGIN,
                492.0,
                10.0,
                Font::Regular,
                &format!("Reference {}", tx.provider_reference),
            );
            page.text(
                MARGIN,
                506.0,
                10.0,
                Font::Regular,
                &format!("Status {}", tx.status),
            );
        }
        None => {
            page.text(MARGIN, 478.0, 10.0, Font::Regular, "No payment recorded");
        }
    }
    if let Some(paid_at) = invoice.paid_at {
        page.text(
            MARGIN,
            520.0,
            10.0,
            Font::Regular,
            &format!("Paid on {}", format_date(paid_at)?),
        );
    }

    // Footer
    page.line(MARGIN, 780.0, RIGHT_EDGE, 780.0, 0.5);
    page.text(MARGIN, 798.0, 9.0, Font::Regular, "Thank you for your business.");
    page.text_right(
        RIGHT_EDGE,
        798.0,
        9.0,
        Font::Regular,
        &format!("Generated {}", format_date(OffsetDateTime::now_utc())?),
    );

    Ok(page.finish())
}
