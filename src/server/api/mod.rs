//! API Endpoints

pub mod assistants;
pub mod bot;
pub mod expenses;
pub mod health;
pub mod link;

use axum::{
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::receipts::Attachment;

/// A file carried inside a JSON body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePayload {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub data_base64: String,
}

impl FilePayload {
    pub fn into_attachment(self) -> Result<Attachment, ApiError> {
        Attachment::from_base64(&self.filename, self.content_type.as_deref(), &self.data_base64)
            .map_err(|e| ApiError::BadRequest(format!("{:#}", e)))
    }
}

impl From<Attachment> for FilePayload {
    fn from(attachment: Attachment) -> Self {
        Self {
            data_base64: STANDARD.encode(&attachment.bytes),
            filename: attachment.filename,
            content_type: Some(attachment.content_type),
        }
    }
}

/// Create the full API router with all endpoints
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/healthz", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .route("/bot/message", post(bot::handle_message))
        .route(
            "/expenses",
            get(expenses::list_expenses).post(expenses::create_expense),
        )
        .route("/expenses/{id}/receipt", get(expenses::get_receipt))
        .route("/business-purposes", get(expenses::list_business_purposes))
        .route("/export", get(expenses::export_expenses))
        .route("/link", post(link::consume_link))
        .route(
            "/assistants",
            get(assistants::list_assistants)
                .post(assistants::grant)
                .delete(assistants::revoke),
        )
        .with_state(state)
}

/// Split a comma-separated id list from a query string
pub(crate) fn split_ids(raw: Option<&str>) -> Vec<String> {
    raw.map(|ids| {
        ids.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
