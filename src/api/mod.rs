//! REST API module.
//!
//! Contains all routes and handlers of the portal. Non-fatal outcomes that
//! the operator should see travel in `notices` next to the data.

mod auth;
mod course;
mod customers;
mod dashboard;
mod expenses;
mod freelancers;
mod health;
mod income;
mod invoices;
mod settings;
mod students;

pub use auth::*;
pub use course::*;
pub use customers::*;
pub use dashboard::*;
pub use expenses::*;
pub use freelancers::*;
pub use health::*;
pub use income::*;
pub use invoices::*;
pub use settings::*;
pub use students::*;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::CustomersRepository;
use crate::errors::AppError;
use crate::AppState;

/// A message shown to the operator alongside a successful response.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notice {
    pub level: &'static str,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: "success",
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: "warning",
            message: message.into(),
        }
    }
}

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub notices: Vec<Notice>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            notices: Vec::new(),
        }
    }

    pub fn with_notices(data: T, notices: Vec<Notice>) -> Self {
        Self {
            success: true,
            data,
            notices,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Create a successful API response carrying notices.
pub fn success_with<T: Serialize>(data: T, notices: Vec<Notice>) -> ApiResult<T> {
    Ok(ApiResponse::with_notices(data, notices))
}

/// Typeahead payload. Lookups never fail outright; problems land in `error`.
#[derive(Debug, Serialize)]
pub struct LookupResults<T: Serialize> {
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> LookupResults<T> {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            error: None,
        }
    }
}

/// The customers database, or 503 when it is not configured.
pub(crate) fn customers_db(state: &AppState) -> Result<Arc<CustomersRepository>, AppError> {
    state.customers.clone().ok_or_else(|| {
        AppError::CustomersUnavailable(
            "Customers DB not configured. Set CUSTOMERS_DATABASE_URL or CUSTOMERS_* env vars."
                .to_string(),
        )
    })
}

/// JSON 404 for unknown routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}
