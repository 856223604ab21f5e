//! Income (incoming payments) endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Local;

use super::invoices::method_or_bank;
use super::{success, success_with, ApiResult, Notice};
use crate::models::{
    parse_date, truthy, CreateIncomeRequest, IncomeForm, IncomeNewQuery, IncomePrefill,
    IncomeRecorded, InvoiceStatus, NewPayment,
};
use crate::AppState;

/// GET /api/income/new - Income form, defaulting the amount to what is still due.
pub async fn new_income_form(
    State(state): State<AppState>,
    Query(query): Query<IncomeNewQuery>,
) -> ApiResult<IncomeForm> {
    let invoice = match query.invoice_id {
        Some(id) => state.repo.get_invoice(id).await?,
        None => None,
    };

    let form = match invoice {
        Some(invoice) => {
            let outstanding = invoice.outstanding();
            IncomeForm {
                amount_default: outstanding.to_string(),
                invoice: Some(IncomePrefill {
                    id: invoice.id,
                    invoice_no: invoice.invoice_no,
                    client_name: invoice.client_name,
                    currency: invoice.currency,
                    outstanding,
                    status: invoice.status,
                }),
            }
        }
        None => IncomeForm {
            invoice: None,
            amount_default: String::new(),
        },
    };
    success(form)
}

/// POST /api/income - Record income, optionally settling an invoice.
///
/// An unknown invoice id records the payment unlinked.
pub async fn create_income(
    State(state): State<AppState>,
    Json(request): Json<CreateIncomeRequest>,
) -> ApiResult<IncomeRecorded> {
    let invoice = match request.invoice_id {
        Some(id) => state.repo.get_invoice(id).await?,
        None => None,
    };

    let payment = state
        .repo
        .add_payment(&NewPayment {
            invoice_id: invoice.as_ref().map(|inv| inv.id),
            date: parse_date(request.date.as_deref()).unwrap_or_else(|| Local::now().date_naive()),
            amount: request.amount,
            method: method_or_bank(request.method.as_deref()),
            reference: request.reference.trim().to_string(),
            note: request.note.trim().to_string(),
        })
        .await?;

    let Some(invoice) = invoice else {
        let message = format!("Income €{} saved.", payment.amount);
        return success_with(
            IncomeRecorded {
                payment,
                invoice: None,
            },
            vec![Notice::success(message)],
        );
    };

    let close = truthy(request.close_invoice.as_ref(), true);
    let invoice = if close {
        let closed = InvoiceStatus::Closed.as_str();
        state.repo.set_invoice_status(invoice.id, closed).await?;
        state.repo.require_invoice(invoice.id).await?
    } else {
        state.repo.refresh_invoice_status(invoice.id).await?
    };
    if let Err(e) = state.search.index_invoice(&invoice).await {
        tracing::warn!("Failed to re-index invoice {}: {}", invoice.invoice_no, e);
    }
    tracing::info!(
        "Income {} linked to invoice {} (closed: {})",
        payment.amount,
        invoice.invoice_no,
        close
    );

    let mut message = format!(
        "Income €{} saved and linked to invoice {}.",
        payment.amount, invoice.invoice_no
    );
    if close {
        message.push_str(" Invoice CLOSED.");
    }
    success_with(
        IncomeRecorded {
            payment,
            invoice: Some(invoice),
        },
        vec![Notice::success(message)],
    )
}
