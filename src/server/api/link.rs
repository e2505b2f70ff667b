//! Channel account linking

use axum::{extract::State, response::Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::models::ChannelLink;
use crate::server::{ApiError, AppState, AuthAccount};

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub token: String,
}

/// Bind the chat identity that requested `token` to the signed-in account
pub async fn consume_link(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Json(request): Json<LinkRequest>,
) -> Result<Json<ChannelLink>, ApiError> {
    let token = request.token.trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("token is required".to_string()));
    }

    let link = state.links.consume(token, &account)?;
    info!(
        "Linked channel user {} to account {}",
        link.channel_user_id, account
    );
    Ok(Json(link))
}
