//! Bot message endpoint
//!
//! Lets a channel adapter running elsewhere push messages through the same
//! pipeline the built-in Telegram adapter uses.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::FilePayload;
use crate::bot::InboundMessage;
use crate::server::{ApiError, AppState, BotCaller};

#[derive(Debug, Deserialize)]
pub struct BotMessageRequest {
    pub sender_id: i64,
    pub chat_id: i64,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<FilePayload>,
    #[serde(default)]
    pub replied_to_text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BotMessageResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<FilePayload>,
}

pub async fn handle_message(
    _caller: BotCaller,
    State(state): State<Arc<AppState>>,
    Json(request): Json<BotMessageRequest>,
) -> Result<Json<BotMessageResponse>, ApiError> {
    let image = request.image.map(FilePayload::into_attachment).transpose()?;

    let reply = state
        .bot
        .handle(InboundMessage {
            sender_id: request.sender_id,
            chat_id: request.chat_id,
            is_group: request.is_group,
            text: request.text,
            image,
            replied_to_text: request.replied_to_text,
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(Json(BotMessageResponse {
        reply: reply.text,
        attachment: reply.attachment.map(FilePayload::from),
    }))
}
