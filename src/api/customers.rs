//! Customer (course registration) endpoints.
//!
//! Registrations live in the customers database; invoices in the books. A
//! registration with a paid or closed invoice counts as accepted, and the list
//! and detail views persist that before reading.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{customers_db, success, success_with, ApiResult, Notice};
use crate::db::CustomersRepository;
use crate::errors::AppError;
use crate::models::{
    Consents, CustomerDetail, CustomerFilter, CustomerListItem, CustomerListQuery, CustomerPage,
    EnrollmentStatus, InvoiceBadge, SetStatusRequest,
};
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 100;

/// GET /api/customers - One page of registrations with status and invoice badges.
pub async fn list_customers(
    State(state): State<AppState>,
    Query(query): Query<CustomerListQuery>,
) -> ApiResult<CustomerPage> {
    let customers = customers_db(&state)?;
    let mut notices = Vec::new();
    sync_acceptance(&state, &customers, &mut notices).await;

    let filter = CustomerFilter {
        q: query.q.trim().to_string(),
        session: query.session.trim().to_string(),
        referral: query.referral.trim().to_string(),
    };
    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let (rows, total) = customers
        .search_registrations(&filter, size, (page - 1) * size)
        .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let statuses = state.repo.invoice_statuses_for(&ids).await?;
    let settled = state.repo.settled_among(&ids).await?;

    let items = rows
        .into_iter()
        .map(|registration| {
            let invoice_badge = match statuses.get(&registration.id) {
                Some((set, count)) => InvoiceBadge::summarize(set, *count),
                None => InvoiceBadge::summarize(&Default::default(), 0),
            };
            CustomerListItem {
                full_name: registration.full_name(),
                effective_status: registration.effective_status(settled.contains(&registration.id)),
                invoice_badge,
                registration,
            }
        })
        .collect();

    let pages = ((total + size - 1) / size).max(1);
    success_with(
        CustomerPage {
            customers: items,
            q: filter.q,
            session: filter.session,
            referral: filter.referral,
            page,
            pages,
            size,
            total,
        },
        notices,
    )
}

/// GET /api/customers/{id} - Registration profile with consents and effective status.
pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CustomerDetail> {
    let customers = customers_db(&state)?;
    let mut notices = Vec::new();
    sync_acceptance(&state, &customers, &mut notices).await;

    let registration = customers
        .get_registration(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Customer not found.".to_string()))?;

    let settled = state.repo.settled_among(&[registration.id]).await?;
    let status = registration.effective_status(settled.contains(&registration.id));

    success_with(
        CustomerDetail {
            full_name: registration.full_name(),
            initial: registration.initial(),
            consents: Consents {
                contact_ok: registration.consent_contact_ok,
                marketing_ok: registration.consent_marketing_ok,
                data_ok: registration.data_processing_ok,
            },
            effective_status: status.effective,
            accepted_via_invoice: status.via_invoice,
            registration,
        },
        notices,
    )
}

/// POST /api/customers/{id}/status - Set the enrollment status by hand.
pub async fn set_customer_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<SetStatusRequest>,
) -> ApiResult<CustomerDetail> {
    let status = EnrollmentStatus::parse(&request.status)
        .ok_or_else(|| AppError::validation("Invalid enrollment status."))?;
    let customers = customers_db(&state)?;

    if customers.get_registration(id).await?.is_none() {
        return Err(AppError::NotFound("Customer not found.".to_string()));
    }
    customers.set_status(id, status).await?;
    tracing::info!("Enrollment of registration {} set to {}", id, status.as_str());

    let mut response = get_customer(State(state), Path(id)).await?;
    response
        .notices
        .push(Notice::success(format!("Enrollment set to {}.", status.as_str())));
    Ok(response)
}

/// Store `accepted` for every registration with a settled invoice.
async fn sync_acceptance(
    state: &AppState,
    customers: &CustomersRepository,
    notices: &mut Vec<Notice>,
) {
    let result = async {
        let ids = state.repo.settled_registration_ids().await?;
        if ids.is_empty() {
            return Ok::<u64, AppError>(0);
        }
        customers.accept_registrations(&ids).await
    }
    .await;

    match result {
        Ok(0) => {}
        Ok(updated) => tracing::info!("Auto-accepted {} registration(s)", updated),
        Err(e) => {
            tracing::warn!("Auto-accept sync failed: {}", e);
            notices.push(Notice::warning(format!("Auto-accept sync error: {}", e.message())));
        }
    }
}
