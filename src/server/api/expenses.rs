//! Expense, category and export endpoints

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::{split_ids, FilePayload};
use crate::export::{self, ExportFormat, Report};
use crate::models::{
    normalize_amount, sort_categories_for_display, Category, Expense, ExpenseListFilter,
    NewExpense,
};
use crate::receipts::Attachment;
use crate::server::{ApiError, AppState, AuthAccount};
use crate::store::DuplicateReceipt;

/// Query parameters for listing
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Comma-separated category ids
    pub business_purpose_id: Option<String>,
    pub merchant: Option<String>,
}

impl ListQuery {
    fn filter(&self) -> ExpenseListFilter {
        ExpenseListFilter {
            from: self.from,
            to: self.to,
            category_ids: split_ids(self.business_purpose_id.as_deref()),
            merchant: self.merchant.clone(),
        }
    }
}

pub async fn list_expenses(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Expense>>, ApiError> {
    let expenses = state.store.list_expenses(&account, &query.filter())?;
    Ok(Json(expenses))
}

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub date: NaiveDate,
    pub merchant_name: String,
    pub amount: Decimal,
    #[serde(default)]
    pub business_purpose_id: Option<String>,
    #[serde(default)]
    pub receipt: Option<FilePayload>,
}

pub async fn create_expense(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateExpenseRequest>,
) -> Result<(StatusCode, Json<Expense>), ApiError> {
    let merchant = request.merchant_name.trim();
    if merchant.is_empty() {
        return Err(ApiError::BadRequest("merchant_name is required".to_string()));
    }
    let amount = normalize_amount(request.amount);
    if amount <= Decimal::ZERO {
        return Err(ApiError::BadRequest("amount must be greater than zero".to_string()));
    }

    if let Some(id) = request.business_purpose_id.as_deref() {
        if state.store.get_category(id)?.is_none() {
            return Err(ApiError::BadRequest(format!("Unknown business purpose: {}", id)));
        }
    }

    let receipt = request
        .receipt
        .map(FilePayload::into_attachment)
        .transpose()?
        .map(|attachment| attachment.to_stored_receipt());

    let expense = state
        .store
        .insert_expense(&NewExpense {
            owner_account_id: account.clone(),
            date: request.date,
            merchant_name: merchant.to_string(),
            amount,
            category_id: request.business_purpose_id,
            receipt,
        })
        .map_err(|e| match e.downcast::<DuplicateReceipt>() {
            Ok(DuplicateReceipt(existing)) => ApiError::Conflict(format!(
                "Receipt already uploaded for expense {}",
                existing.id
            )),
            Err(e) => ApiError::Internal(e),
        })?;
    info!("Created expense {} for {} via API", expense.id, account);

    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn get_receipt(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let expense = state
        .store
        .get_expense(&account, &id)?
        .ok_or_else(|| ApiError::NotFound("Expense not found".to_string()))?;
    let reference = expense
        .receipt_ref
        .as_deref()
        .ok_or_else(|| ApiError::NotFound("Expense has no receipt".to_string()))?;

    let attachment = state
        .receipts
        .fetch(reference, expense.receipt_filename.as_deref())
        .await?;
    Ok(file_response(attachment, "inline"))
}

pub async fn list_business_purposes(
    _account: AuthAccount,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let mut categories = state.store.list_categories()?;
    sort_categories_for_display(&mut categories);
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub business_purpose_id: Option<String>,
}

pub async fn export_expenses(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = ExportFormat::from_str(&query.format).map_err(ApiError::BadRequest)?;
    let filter = ExpenseListFilter {
        from: query.from,
        to: query.to,
        category_ids: split_ids(query.business_purpose_id.as_deref()),
        merchant: None,
    };

    let expenses = state.store.list_expenses(&account, &filter)?;
    let report = Report::from_expenses(&expenses, filter.from, filter.to, Utc::now());
    let attachment = export::render(format, &report)?;
    Ok(file_response(attachment, "attachment"))
}

fn file_response(attachment: Attachment, disposition: &str) -> Response {
    let filename = attachment.filename.replace('"', "");
    (
        [
            (header::CONTENT_TYPE, attachment.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("{}; filename=\"{}\"", disposition, filename),
            ),
        ],
        Body::from(attachment.bytes),
    )
        .into_response()
}
