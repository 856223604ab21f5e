use axum::{extract::State, Json};

use super::{success, success_with, ApiResult, Notice};
use crate::accounting::ensure_company;
use crate::models::{CompanySettings, UpdateCompanyRequest};
use crate::AppState;

/// GET /api/settings - Company settings with defaults filled in.
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<CompanySettings> {
    success(ensure_company(&state.repo).await?)
}

/// PUT /api/settings - Save company settings.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(request): Json<UpdateCompanyRequest>,
) -> ApiResult<CompanySettings> {
    let mut company = ensure_company(&state.repo).await?;
    request.apply_to(&mut company);
    state.repo.save_company(&company).await?;
    tracing::info!("Company settings saved");

    success_with(company, vec![Notice::success("Company settings saved.")])
}
