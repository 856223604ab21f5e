//! Freelancer and subcontractor payouts, booked as expenses.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Local;

use super::expenses::non_blank_or;
use super::invoices::method_or_bank;
use super::{success, success_with, ApiResult, Notice};
use crate::accounting::split_gross;
use crate::models::{
    parse_date, CreatePayoutRequest, Expense, NewExpense, PayoutForm, PayoutFormQuery, PayoutList,
    PAYOUT_CATEGORIES,
};
use crate::money::Amount;
use crate::AppState;

/// Invoices offered in the payout form.
const FORM_INVOICE_LIMIT: i64 = 50;

/// GET /api/freelancers - Payouts with the invoices they are linked to.
pub async fn list_payouts(State(state): State<AppState>) -> ApiResult<PayoutList> {
    let payouts = state.repo.list_payouts().await?;

    let mut invoice_ids: Vec<i64> = payouts.iter().filter_map(|p| p.invoice_id).collect();
    invoice_ids.sort_unstable();
    invoice_ids.dedup();
    let invoices = state.repo.invoices_by_ids(&invoice_ids).await?;

    success(PayoutList { payouts, invoices })
}

/// GET /api/freelancers/new - Payout form with the latest invoices to link to.
pub async fn new_payout_form(
    State(state): State<AppState>,
    Query(query): Query<PayoutFormQuery>,
) -> ApiResult<PayoutForm> {
    success(PayoutForm {
        invoices: state.repo.latest_invoices(FORM_INVOICE_LIMIT).await?,
        invoice_id: query.invoice_id,
    })
}

/// POST /api/freelancers - Record a payout, optionally against an invoice.
pub async fn create_payout(
    State(state): State<AppState>,
    Json(request): Json<CreatePayoutRequest>,
) -> ApiResult<Expense> {
    if let Some(invoice_id) = request.invoice_id {
        state.repo.require_invoice(invoice_id).await?;
    }

    let vat_rate = request.vat_rate.unwrap_or(Amount::ZERO);
    let (amount_net, vat_amount) = split_gross(request.amount_gross, vat_rate);

    let payout = state
        .repo
        .create_expense(&NewExpense {
            date: parse_date(request.date.as_deref()).unwrap_or_else(|| Local::now().date_naive()),
            vendor: request.freelancer_name.trim().to_string(),
            category: PAYOUT_CATEGORIES[0].to_string(),
            description: request.notes.trim().to_string(),
            currency: non_blank_or(request.currency.as_deref(), "EUR").to_uppercase(),
            vat_rate,
            amount_net,
            vat_amount,
            amount_gross: request.amount_gross,
            invoice_id: request.invoice_id,
            pay_method: method_or_bank(request.method.as_deref()),
            pay_reference: request.reference.trim().to_string(),
        })
        .await?;
    tracing::info!(
        "Payout {} to {} saved (invoice {:?})",
        payout.id,
        payout.vendor,
        payout.invoice_id
    );

    success_with(payout, vec![Notice::success("Freelancer payout saved.")])
}
