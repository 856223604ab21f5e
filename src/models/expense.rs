//! Expenses and freelancer payouts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{lenient_id, Invoice};
use crate::money::Amount;

/// Categories that count as freelancer payouts.
pub const PAYOUT_CATEGORIES: [&str; 2] = ["Freelancer", "Subcontractor"];

#[derive(Debug, Clone, Serialize, Default)]
pub struct Expense {
    pub id: i64,
    pub date: Option<NaiveDate>,
    pub vendor: String,
    pub category: String,
    pub description: String,
    pub currency: String,
    pub vat_rate: Amount,
    pub amount_net: Amount,
    pub vat_amount: Amount,
    pub amount_gross: Amount,
    pub receipt_path: Option<String>,
    pub invoice_id: Option<i64>,
    pub pay_method: Option<String>,
    pub pay_reference: Option<String>,
}

/// Expense ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub date: NaiveDate,
    pub vendor: String,
    pub category: String,
    pub description: String,
    pub currency: String,
    pub vat_rate: Amount,
    pub amount_net: Amount,
    pub vat_amount: Amount,
    pub amount_gross: Amount,
    pub invoice_id: Option<i64>,
    pub pay_method: String,
    pub pay_reference: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CreateExpenseRequest {
    pub date: Option<String>,
    pub vendor: String,
    pub category: Option<String>,
    pub description: String,
    pub currency: Option<String>,
    pub amount_gross: Amount,
    pub vat_rate: Option<Amount>,
    /// Defaults to `bank`.
    pub pay_method: Option<String>,
    pub pay_reference: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CreatePayoutRequest {
    pub date: Option<String>,
    pub freelancer_name: String,
    #[serde(deserialize_with = "lenient_id")]
    pub invoice_id: Option<i64>,
    pub amount_gross: Amount,
    pub vat_rate: Option<Amount>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub reference: String,
    pub notes: String,
}

/// Payout list with the invoices the payouts point at.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutList {
    pub payouts: Vec<Expense>,
    pub invoices: std::collections::BTreeMap<i64, Invoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayoutForm {
    pub invoices: Vec<Invoice>,
    pub invoice_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct PayoutFormQuery {
    #[serde(deserialize_with = "lenient_id")]
    pub invoice_id: Option<i64>,
}
