//! Invoice API endpoints and the typeahead lookups used by the invoice forms.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    Json,
};
use chrono::{Duration, Local};

use super::{customers_db, success, success_with, ApiResult, LookupResults, Notice};
use crate::accounting::{self, compliance_warnings, ensure_company, normalize_line};
use crate::db::LOOKUP_LIMIT;
use crate::errors::AppError;
use crate::models::{
    parse_date, CreateInvoiceRequest, CustomerLookupQuery, CustomerLookupResult, Invoice,
    InvoiceDetail, InvoiceListQuery, InvoiceLookupQuery, InvoiceLookupResult,
    InvoiceWithLines, NewInvoiceForm, NewInvoiceQuery, NewPayment, Payment, RecordPaymentRequest,
    VatScheme,
};
use crate::money::Amount;
use crate::search::matches_invoice;
use crate::AppState;

/// Days between issue and due date when no due date is given.
const PAYMENT_TERM_DAYS: i64 = 14;

/// Minimum query length for both typeaheads.
const MIN_LOOKUP_CHARS: usize = 2;

/// GET /api/invoices - List invoices, newest issue date first.
pub async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoiceListQuery>,
) -> ApiResult<Vec<Invoice>> {
    success(state.repo.list_invoices(query.status.as_deref()).await?)
}

/// GET /api/invoices/new - Form defaults, prefilled from a registration when asked.
pub async fn new_invoice_form(
    State(state): State<AppState>,
    Query(query): Query<NewInvoiceQuery>,
) -> ApiResult<NewInvoiceForm> {
    let company = ensure_company(&state.repo).await?;
    let mut form = NewInvoiceForm {
        prefill: None,
        invoice_prefix: company.invoice_prefix,
    };
    let mut notices = Vec::new();

    if let Some(customer_id) = query.customer_id {
        let loaded = match customers_db(&state) {
            Ok(customers) => customers.get_registration(customer_id).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(registration) => form.prefill = registration.map(|reg| reg.prefill()),
            Err(e) => notices.push(Notice::warning(format!(
                "Customers DB not available for preload: {}",
                e.message()
            ))),
        }
    }

    success_with(form, notices)
}

/// POST /api/invoices - Create an invoice with its lines.
pub async fn create_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateInvoiceRequest>,
) -> ApiResult<InvoiceWithLines> {
    let company = ensure_company(&state.repo).await?;

    let today = Local::now().date_naive();
    let issue_date = parse_date(request.issue_date.as_deref()).unwrap_or(today);
    let supply_date = parse_date(request.supply_date.as_deref()).unwrap_or(issue_date);
    let due_date = parse_date(request.due_date.as_deref())
        .unwrap_or(issue_date + Duration::days(PAYMENT_TERM_DAYS));

    let currency = match request.currency.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_uppercase(),
        _ => "EUR".to_string(),
    };

    let invoice = Invoice {
        issue_date: Some(issue_date),
        supply_date: Some(supply_date),
        due_date: Some(due_date),
        currency,
        client_name: request.client_name.trim().to_string(),
        client_address: request.client_address.trim().to_string(),
        client_vat_number: request.client_vat_number.trim().to_string(),
        vat_scheme: VatScheme::parse_or_standard(request.vat_scheme.as_deref().unwrap_or("")),
        notes: request.notes.trim().to_string(),
        customer_registration_id: request.customer_registration_id,
        ..Default::default()
    };
    let lines = request.lines.iter().filter_map(normalize_line).collect();

    let (mut invoice, lines) = state
        .repo
        .create_invoice(&company.invoice_prefix, invoice, lines)
        .await?;

    if let Err(e) = state.search.index_invoice(&invoice).await {
        tracing::warn!("Failed to index invoice {}: {}", invoice.invoice_no, e);
    }

    let mut notices = Vec::new();
    let success_url = invoice_url(&headers, invoice.id);
    attach_stripe_link(&state, &mut invoice, success_url.as_deref(), &mut notices).await;

    for warning in compliance_warnings(&company, &invoice, lines.len()) {
        notices.push(Notice::warning(format!("Invoice warning: {}", warning)));
    }
    notices.push(Notice::success(format!("Invoice {} created.", invoice.invoice_no)));

    success_with(InvoiceWithLines { invoice, lines }, notices)
}

/// GET /api/invoices/{id} - Invoice page data.
///
/// Missing totals are recomputed and stored, and a payment link is attached
/// when the invoice has none yet.
pub async fn get_invoice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<InvoiceDetail> {
    let company = ensure_company(&state.repo).await?;
    let mut invoice = state.repo.require_invoice(id).await?;
    let mut lines = state.repo.get_invoice_lines(id).await?;
    let mut notices = Vec::new();

    if accounting::ensure_invoice_totals(&mut invoice, &mut lines) {
        if let Err(e) = state.repo.save_invoice_totals(&invoice, &lines).await {
            tracing::warn!("Could not store recomputed totals of invoice {}: {}", id, e);
        }
    }

    if invoice.stripe_payment_url.as_deref().unwrap_or("").is_empty() {
        let success_url = invoice_url(&headers, invoice.id);
        attach_stripe_link(&state, &mut invoice, success_url.as_deref(), &mut notices).await;
    }

    let customer_link = invoice
        .customer_registration_id
        .map(|rid| format!("/api/customers/{}", rid));
    let warnings = compliance_warnings(&company, &invoice, lines.len());

    let linked_expenses = state.repo.payouts_for_invoice(id).await?;
    let linked_total: Amount = linked_expenses.iter().map(|e| e.amount_gross).sum();
    let margin_after_freelancers = invoice.gross_total - linked_total;

    let payments = state.repo.payments_for_invoice(id).await?;
    let payments_count = state.repo.count_payments(id).await?;
    let all_expenses_count = state.repo.count_expenses(id).await?;

    success_with(
        InvoiceDetail {
            invoice,
            lines,
            payments,
            warnings,
            customer_link,
            linked_expenses,
            linked_total,
            margin_after_freelancers,
            payments_count,
            all_expenses_count,
            can_delete: payments_count == 0 && all_expenses_count == 0,
        },
        notices,
    )
}

/// POST /api/invoices/{id}/payments - Record a payment and update the status.
pub async fn record_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RecordPaymentRequest>,
) -> ApiResult<Payment> {
    let invoice = state.repo.require_invoice(id).await?;

    let payment = state
        .repo
        .add_payment(&NewPayment {
            invoice_id: Some(id),
            date: parse_date(request.date.as_deref()).unwrap_or_else(|| Local::now().date_naive()),
            amount: request.amount,
            method: method_or_bank(request.method.as_deref()),
            reference: request.reference.trim().to_string(),
            note: request.note.trim().to_string(),
        })
        .await?;

    let refreshed = state.repo.refresh_invoice_status(id).await?;
    if let Err(e) = state.search.index_invoice(&refreshed).await {
        tracing::warn!("Failed to re-index invoice {}: {}", refreshed.invoice_no, e);
    }
    tracing::info!("Payment {} recorded for {}", payment.amount, invoice.invoice_no);

    let message = format!("Payment €{} recorded for {}.", payment.amount, invoice.invoice_no);
    success_with(payment, vec![Notice::success(message)])
}

/// DELETE /api/invoices/{id} - Delete an invoice without payments or linked expenses.
pub async fn delete_invoice(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    let invoice = state.repo.require_invoice(id).await?;
    state.repo.delete_invoice(id).await?;

    if let Err(e) = state.search.remove_invoice(id).await {
        tracing::warn!("Failed to remove invoice {} from index: {}", id, e);
    }
    tracing::info!("Deleted invoice {} (id {})", invoice.invoice_no, id);

    let label = if invoice.invoice_no.is_empty() {
        id.to_string()
    } else {
        invoice.invoice_no
    };
    success_with((), vec![Notice::success(format!("Invoice {} deleted.", label))])
}

/// GET /api/invoices/lookup - Typeahead over invoice number and client name.
pub async fn lookup_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoiceLookupQuery>,
) -> ApiResult<LookupResults<InvoiceLookupResult>> {
    let q = query.q.trim();
    if q.chars().count() < MIN_LOOKUP_CHARS {
        return success(LookupResults::empty());
    }
    let include_closed = query.include_closed.as_deref() == Some("1");

    let ids = state.search.lookup(q)?;
    let results = state
        .repo
        .lookup_candidates(&ids, include_closed)
        .await?
        .iter()
        .filter(|invoice| matches_invoice(invoice, q))
        .take(LOOKUP_LIMIT as usize)
        .map(InvoiceLookupResult::from_invoice)
        .collect();
    success(LookupResults { results, error: None })
}

/// GET /api/customers/lookup - Typeahead over registrations for the invoice form.
pub async fn lookup_customers(
    State(state): State<AppState>,
    Query(query): Query<CustomerLookupQuery>,
) -> ApiResult<LookupResults<CustomerLookupResult>> {
    let q = query.q.trim();
    if q.chars().count() < MIN_LOOKUP_CHARS {
        return success(LookupResults::empty());
    }

    let customers = match customers_db(&state) {
        Ok(customers) => customers,
        Err(e) => {
            return success(LookupResults {
                results: Vec::new(),
                error: Some(e.message()),
            })
        }
    };

    match customers.lookup_registrations(q).await {
        Ok(rows) => success(LookupResults {
            results: rows.iter().map(CustomerLookupResult::from_registration).collect(),
            error: None,
        }),
        Err(e) => success(LookupResults {
            results: Vec::new(),
            error: Some(e.message()),
        }),
    }
}

/// Create a payment link for `invoice` and store it. Failures become notices.
async fn attach_stripe_link(
    state: &AppState,
    invoice: &mut Invoice,
    success_url: Option<&str>,
    notices: &mut Vec<Notice>,
) {
    let link = match state.stripe.create_or_get_payment_link(invoice, success_url).await {
        Ok(link) => link,
        Err(e) => {
            notices.push(Notice::warning(format!("Stripe: {}", e.message())));
            return;
        }
    };
    if !link.created {
        return;
    }

    let stored = state
        .repo
        .set_stripe_link(
            invoice.id,
            &link.url,
            link.link_id.as_deref(),
            link.session_id.as_deref(),
        )
        .await;
    match stored {
        Ok(()) => {
            invoice.stripe_payment_url = Some(link.url);
            if link.link_id.is_some() {
                invoice.stripe_payment_link_id = link.link_id;
            }
            if link.session_id.is_some() {
                invoice.stripe_checkout_session_id = link.session_id;
            }
            notices.push(Notice::success("Stripe payment link attached to invoice."));
        }
        Err(e) => notices.push(Notice::warning(format!("Stripe: {}", e.message()))),
    }
}

/// Absolute URL of the invoice page, used as the Stripe return target.
fn invoice_url(headers: &HeaderMap, id: i64) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{}://{}/api/invoices/{}", scheme, host, id))
}

pub(crate) fn method_or_bank(method: Option<&str>) -> String {
    match method.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => "bank".to_string(),
    }
}
