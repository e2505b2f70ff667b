//! Personal assistant grants

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::DelegatedAccess;
use crate::owner::{grant_assistant, revoke_assistant};
use crate::server::{ApiError, AppState, AuthAccount};

#[derive(Debug, Deserialize)]
pub struct AssistantTarget {
    pub delegate_channel_id: i64,
    pub group_chat_id: i64,
}

pub async fn list_assistants(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DelegatedAccess>>, ApiError> {
    Ok(Json(state.store.list_delegates(&account)?))
}

pub async fn grant(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Json(target): Json<AssistantTarget>,
) -> Result<(StatusCode, Json<DelegatedAccess>), ApiError> {
    let grant = grant_assistant(
        &state.store,
        &account,
        target.delegate_channel_id,
        target.group_chat_id,
    )?;
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn revoke(
    AuthAccount(account): AuthAccount,
    State(state): State<Arc<AppState>>,
    Query(target): Query<AssistantTarget>,
) -> Result<StatusCode, ApiError> {
    let revoked = revoke_assistant(
        &state.store,
        &account,
        target.delegate_channel_id,
        target.group_chat_id,
    )?;
    if revoked {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("No active assistant grant".to_string()))
    }
}
