//! Incoming payments (income).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{lenient_id, Invoice};
use crate::money::Amount;

#[derive(Debug, Clone, Serialize, Default)]
pub struct Payment {
    pub id: i64,
    pub invoice_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub amount: Amount,
    /// bank, cash, western_union or other; free text is kept as entered.
    pub method: String,
    pub reference: Option<String>,
    pub note: Option<String>,
}

/// Payment ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: Option<i64>,
    pub date: NaiveDate,
    pub amount: Amount,
    pub method: String,
    pub reference: String,
    pub note: String,
}

/// Request body for recording income.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CreateIncomeRequest {
    #[serde(deserialize_with = "lenient_id")]
    pub invoice_id: Option<i64>,
    pub amount: Amount,
    pub date: Option<String>,
    pub method: Option<String>,
    pub reference: String,
    pub note: String,
    /// Checkbox style flag; absent means close.
    pub close_invoice: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct IncomeNewQuery {
    #[serde(deserialize_with = "lenient_id")]
    pub invoice_id: Option<i64>,
}

/// Result of recording income.
#[derive(Debug, Clone, Serialize)]
pub struct IncomeRecorded {
    pub payment: Payment,
    pub invoice: Option<Invoice>,
}

/// The income form, optionally preselecting an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct IncomeForm {
    pub invoice: Option<super::IncomePrefill>,
    pub amount_default: String,
}
