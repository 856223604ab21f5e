//! Dashboard and VAT return endpoints.

use axum::extract::{Query, State};
use chrono::{Datelike, Local, NaiveDate};

use super::{success, ApiResult};
use crate::accounting::{self, ensure_company};
use crate::errors::AppError;
use crate::models::{Dashboard, VatQuery, VatSummary};
use crate::AppState;

const RECENT_LIMIT: i64 = 6;

/// GET /api/dashboard - Year-to-date totals, this quarter's VAT and recent activity.
pub async fn get_dashboard(State(state): State<AppState>) -> ApiResult<Dashboard> {
    let company = ensure_company(&state.repo).await?;
    let today = Local::now().date_naive();
    let start_of_year = NaiveDate::from_ymd_opt(today.year(), 1, 1)
        .ok_or_else(|| AppError::Internal("Invalid start of year".to_string()))?;

    let ytd_income = state.repo.income_since(start_of_year).await?;
    let ytd_expenses = state.repo.expenses_since(start_of_year).await?;
    let vat = accounting::vat_summary(&state.repo, today.year(), accounting::quarter_of(today)).await?;

    success(Dashboard {
        company,
        ytd_income,
        ytd_expenses,
        vat,
        recent_invoices: state.repo.latest_invoices(RECENT_LIMIT).await?,
        recent_expenses: state.repo.recent_expenses(RECENT_LIMIT).await?,
        recent_payments: state.repo.recent_payments(RECENT_LIMIT).await?,
    })
}

/// GET /api/vat - VAT return for a quarter, the current one by default.
pub async fn get_vat(
    State(state): State<AppState>,
    Query(query): Query<VatQuery>,
) -> ApiResult<VatSummary> {
    let today = Local::now().date_naive();
    let year = query.year.unwrap_or_else(|| today.year());
    let quarter = query.quarter.unwrap_or_else(|| accounting::quarter_of(today));

    success(accounting::vat_summary(&state.repo, year, quarter).await?)
}
