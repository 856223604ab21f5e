//! Dashboard and VAT return figures.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{CompanySettings, Expense, Invoice, Payment};
use crate::money::Amount;

/// Quarterly VAT figures.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VatSummary {
    pub year: i32,
    pub quarter: u32,
    pub q_start: NaiveDate,
    pub q_end: NaiveDate,
    pub sales_21: Amount,
    pub sales_9: Amount,
    pub sales_0: Amount,
    pub vat_out: Amount,
    pub vat_in: Amount,
    pub vat_due: Amount,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct VatQuery {
    pub year: Option<i32>,
    pub quarter: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub company: CompanySettings,
    pub ytd_income: Amount,
    pub ytd_expenses: Amount,
    pub vat: VatSummary,
    pub recent_invoices: Vec<Invoice>,
    pub recent_expenses: Vec<Expense>,
    pub recent_payments: Vec<Payment>,
}
