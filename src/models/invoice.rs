//! Invoice, invoice line and invoice request models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{lenient_id, Expense, Payment};
use crate::money::Amount;

/// VAT treatment of a whole invoice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VatScheme {
    #[default]
    Standard,
    ReverseChargeEu,
    ZeroOutsideEu,
    Exempt,
}

impl VatScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatScheme::Standard => "STANDARD",
            VatScheme::ReverseChargeEu => "REVERSE_CHARGE_EU",
            VatScheme::ZeroOutsideEu => "ZERO_OUTSIDE_EU",
            VatScheme::Exempt => "EXEMPT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "STANDARD" => Some(VatScheme::Standard),
            "REVERSE_CHARGE_EU" => Some(VatScheme::ReverseChargeEu),
            "ZERO_OUTSIDE_EU" => Some(VatScheme::ZeroOutsideEu),
            "EXEMPT" => Some(VatScheme::Exempt),
            _ => None,
        }
    }

    /// Stored values outside the known set are treated as standard VAT.
    pub fn parse_or_standard(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Schemes where no VAT is charged on the invoice.
    pub fn charges_no_vat(&self) -> bool {
        !matches!(self, VatScheme::Standard)
    }
}

/// Lifecycle states the portal writes. Legacy rows may hold other values,
/// which is why [`Invoice::status`] stays a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Partial,
    Paid,
    Closed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Partial => "PARTIAL",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Closed => "CLOSED",
        }
    }

    /// Statuses that count as settled for enrollment auto-accept.
    pub const SETTLED: [InvoiceStatus; 2] = [InvoiceStatus::Paid, InvoiceStatus::Closed];
}

/// An invoice header with its derived payment figures.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Invoice {
    pub id: i64,
    pub invoice_no: String,
    pub issue_date: Option<NaiveDate>,
    pub supply_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub currency: String,
    pub client_name: String,
    pub client_address: String,
    pub client_vat_number: String,
    pub vat_scheme: VatScheme,
    pub notes: String,
    pub status: String,
    pub net_total: Amount,
    pub vat_total: Amount,
    pub gross_total: Amount,
    pub paid_total: Amount,
    pub balance: Amount,
    pub stripe_payment_url: Option<String>,
    pub stripe_payment_link_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub customer_registration_id: Option<i64>,
    /// Set when a stored total column was NULL and needs recomputing.
    #[serde(skip)]
    pub totals_missing: bool,
}

impl Invoice {
    /// Gross minus payments, never negative.
    pub fn outstanding(&self) -> Amount {
        (self.gross_total - self.paid_total).non_negative()
    }
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: i64,
    pub description: String,
    pub qty: Amount,
    pub unit_price: Amount,
    pub vat_rate: Amount,
    pub line_net: Amount,
    pub line_vat: Amount,
    pub line_total: Amount,
}

/// One submitted invoice line before normalisation.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct InvoiceLineInput {
    pub description: String,
    pub qty: Amount,
    pub unit_price: Amount,
    pub vat_rate: Option<Amount>,
}

/// Request body for creating an invoice.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CreateInvoiceRequest {
    pub issue_date: Option<String>,
    pub supply_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub vat_scheme: Option<String>,
    pub client_name: String,
    pub client_address: String,
    pub client_vat_number: String,
    pub notes: String,
    #[serde(deserialize_with = "lenient_id")]
    pub customer_registration_id: Option<i64>,
    pub lines: Vec<InvoiceLineInput>,
}

/// Request body for recording a payment against an invoice.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordPaymentRequest {
    pub amount: Amount,
    pub date: Option<String>,
    pub method: Option<String>,
    pub reference: String,
    pub note: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct NewInvoiceQuery {
    #[serde(deserialize_with = "lenient_id")]
    pub customer_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct InvoiceLookupQuery {
    pub q: String,
    pub include_closed: Option<String>,
}

/// Typeahead entry for linking income to an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceLookupResult {
    pub id: i64,
    pub invoice_no: String,
    pub client_name: String,
    pub currency: String,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub status: String,
    pub gross_total: f64,
    pub outstanding: f64,
    pub label: String,
}

impl InvoiceLookupResult {
    pub fn from_invoice(invoice: &Invoice) -> Self {
        let outstanding = invoice.outstanding();
        Self {
            id: invoice.id,
            invoice_no: invoice.invoice_no.clone(),
            client_name: invoice.client_name.clone(),
            currency: invoice.currency.clone(),
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            status: invoice.status.clone(),
            gross_total: invoice.gross_total.to_f64(),
            outstanding: outstanding.to_f64(),
            label: format!(
                "{} · {} · {} {} due",
                invoice.invoice_no, invoice.client_name, invoice.currency, outstanding
            ),
        }
    }
}

/// Everything the invoice page shows.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
    pub warnings: Vec<String>,
    pub customer_link: Option<String>,
    pub linked_expenses: Vec<Expense>,
    pub linked_total: Amount,
    pub margin_after_freelancers: Amount,
    pub payments_count: i64,
    pub all_expenses_count: i64,
    pub can_delete: bool,
}

/// A stored invoice with its lines.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithLines {
    pub invoice: Invoice,
    pub lines: Vec<InvoiceLine>,
}

/// Prefill values for the new-invoice form.
#[derive(Debug, Clone, Serialize, Default)]
pub struct NewInvoiceForm {
    pub prefill: Option<super::CustomerPrefill>,
    pub invoice_prefix: String,
}

/// Invoice preselection for the income form.
#[derive(Debug, Clone, Serialize)]
pub struct IncomePrefill {
    pub id: i64,
    pub invoice_no: String,
    pub client_name: String,
    pub currency: String,
    pub outstanding: Amount,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vat_scheme_round_trip_and_fallback() {
        assert_eq!(VatScheme::parse("reverse_charge_eu"), Some(VatScheme::ReverseChargeEu));
        assert_eq!(VatScheme::parse_or_standard("BOGUS"), VatScheme::Standard);
        assert!(VatScheme::Exempt.charges_no_vat());
        assert!(!VatScheme::Standard.charges_no_vat());

        let json = serde_json::to_string(&VatScheme::ZeroOutsideEu).unwrap();
        assert_eq!(json, "\"ZERO_OUTSIDE_EU\"");
    }

    #[test]
    fn test_lookup_label() {
        let invoice = Invoice {
            id: 7,
            invoice_no: "INV-2025-0007".to_string(),
            client_name: "Acme".to_string(),
            currency: "EUR".to_string(),
            gross_total: Amount::from_units(121),
            paid_total: Amount::from_units(21),
            ..Default::default()
        };
        let result = InvoiceLookupResult::from_invoice(&invoice);
        assert_eq!(result.label, "INV-2025-0007 · Acme · EUR 100.00 due");
        assert_eq!(result.outstanding, 100.0);
    }

    #[test]
    fn test_outstanding_never_negative() {
        let invoice = Invoice {
            gross_total: Amount::from_units(10),
            paid_total: Amount::from_units(12),
            ..Default::default()
        };
        assert_eq!(invoice.outstanding(), Amount::ZERO);
    }

    #[test]
    fn test_create_request_accepts_string_customer_id() {
        let request: CreateInvoiceRequest = serde_json::from_str(
            r#"{"client_name":"Acme","customer_registration_id":"42","lines":[{"description":"Work","qty":"2","unit_price":50}]}"#,
        )
        .unwrap();
        assert_eq!(request.customer_registration_id, Some(42));
        assert_eq!(request.lines[0].qty, Amount::from_units(2));
        assert!(request.lines[0].vat_rate.is_none());
    }
}
