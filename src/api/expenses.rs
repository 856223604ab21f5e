//! Expense endpoints, receipt uploads included.

use std::path::Path as FsPath;

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use chrono::Local;
use unicode_normalization::UnicodeNormalization;

use super::invoices::method_or_bank;
use super::{success, success_with, ApiResult, Notice};
use crate::accounting::{split_gross, DEFAULT_VAT_RATE};
use crate::errors::AppError;
use crate::models::{parse_date, CreateExpenseRequest, Expense, NewExpense};
use crate::AppState;

/// Multipart field holding the receipt file.
const RECEIPT_FIELD: &str = "receipt";

/// GET /api/expenses - List expenses, newest first.
pub async fn list_expenses(State(state): State<AppState>) -> ApiResult<Vec<Expense>> {
    success(state.repo.list_expenses().await?)
}

/// POST /api/expenses - Book an expense from its VAT-inclusive amount.
pub async fn create_expense(
    State(state): State<AppState>,
    Json(request): Json<CreateExpenseRequest>,
) -> ApiResult<Expense> {
    let vat_rate = request.vat_rate.unwrap_or(DEFAULT_VAT_RATE);
    let (amount_net, vat_amount) = split_gross(request.amount_gross, vat_rate);

    let expense = state
        .repo
        .create_expense(&NewExpense {
            date: parse_date(request.date.as_deref()).unwrap_or_else(|| Local::now().date_naive()),
            vendor: request.vendor.trim().to_string(),
            category: non_blank_or(request.category.as_deref(), "General"),
            description: request.description.trim().to_string(),
            currency: non_blank_or(request.currency.as_deref(), "EUR").to_uppercase(),
            vat_rate,
            amount_net,
            vat_amount,
            amount_gross: request.amount_gross,
            invoice_id: None,
            pay_method: method_or_bank(request.pay_method.as_deref()),
            pay_reference: request.pay_reference.trim().to_string(),
        })
        .await?;
    tracing::info!("Expense {} saved ({} {})", expense.id, expense.currency, expense.amount_gross);

    success_with(expense, vec![Notice::success("Expense saved.")])
}

/// POST /api/expenses/{id}/receipt - Attach a receipt file to an expense.
pub async fn upload_receipt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<Expense> {
    if state.repo.get_expense(id).await?.is_none() {
        return Err(AppError::NotFound(format!("Expense {} not found", id)));
    }

    let mut stored = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some(RECEIPT_FIELD) {
            continue;
        }
        let original = field.file_name().unwrap_or_default().to_string();
        if original.is_empty() {
            continue;
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid upload: {}", e)))?;

        let file_name = receipt_file_name(&original, &Local::now().format("%Y%m%d%H%M%S").to_string());
        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        tokio::fs::write(state.config.upload_dir.join(&file_name), &bytes).await?;
        stored = Some(file_name);
        break;
    }

    let Some(file_name) = stored else {
        return Err(AppError::validation("No receipt file uploaded."));
    };
    state.repo.set_receipt_path(id, &file_name).await?;
    tracing::info!("Receipt {} stored for expense {}", file_name, id);

    let expense = state
        .repo
        .get_expense(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Expense {} not found", id)))?;
    success_with(expense, vec![Notice::success("Receipt uploaded.")])
}

pub(crate) fn non_blank_or(value: Option<&str>, default: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

/// `{base}_{timestamp}{ext}` from a sanitized upload name.
fn receipt_file_name(original: &str, timestamp: &str) -> String {
    let safe = secure_filename(original);
    let path = FsPath::new(&safe);
    let base = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("receipt");
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("{}_{}{}", base, timestamp, ext)
}

/// Reduce an upload name to a flat ASCII file name.
fn secure_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name);
    // Accented letters decompose to base letter plus mark; the mark is dropped below.
    let decomposed: String = last.nfkd().collect();
    let joined = decomposed.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "receipt".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My Receipt 2025.pdf"), "My_Receipt_2025.pdf");
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\bon.jpg"), "bon.jpg");
        assert_eq!(secure_filename("café.png"), "cafe.png");
        assert_eq!(secure_filename("Façture Zoë.pdf"), "Facture_Zoe.pdf");
        assert_eq!(secure_filename("ﬁle½.txt"), "file12.txt");
        assert_eq!(secure_filename("..."), "receipt");
    }

    #[test]
    fn test_receipt_file_name() {
        assert_eq!(
            receipt_file_name("taxi bon.pdf", "20250301120000"),
            "taxi_bon_20250301120000.pdf"
        );
        assert_eq!(receipt_file_name("README", "20250301120000"), "README_20250301120000");
        assert_eq!(receipt_file_name("???", "20250301120000"), "receipt_20250301120000");
    }

    #[test]
    fn test_non_blank_or() {
        assert_eq!(non_blank_or(None, "General"), "General");
        assert_eq!(non_blank_or(Some("  "), "General"), "General");
        assert_eq!(non_blank_or(Some(" Travel "), "General"), "Travel");
    }
}
