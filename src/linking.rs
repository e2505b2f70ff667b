//! Account Linking
//!
//! A chat identity is bound to an account with a one-time token: the bot
//! issues it, the user opens the link while signed in to the web app, and the
//! API consumes it on behalf of that account.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::models::{ChannelLink, PendingAuth};
use crate::store::ExpenseStore;

/// Token lifetime
pub const LINK_TOKEN_TTL_MINUTES: i64 = 10;

const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid or already used link token")]
    InvalidToken,

    #[error("Link token expired")]
    Expired,

    #[error("Link store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

pub struct LinkService {
    store: Arc<ExpenseStore>,
}

impl LinkService {
    pub fn new(store: Arc<ExpenseStore>) -> Self {
        Self { store }
    }

    /// Issue a fresh token for a chat identity, replacing older ones
    pub fn issue_token(&self, channel_user_id: i64, username: Option<&str>) -> anyhow::Result<PendingAuth> {
        self.issue_token_at(channel_user_id, username, Utc::now())
    }

    pub fn issue_token_at(
        &self,
        channel_user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PendingAuth> {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let expires_at = now + Duration::minutes(LINK_TOKEN_TTL_MINUTES);

        self.store
            .insert_link_token(&token, channel_user_id, username, expires_at)?;
        info!("Issued link token for channel user {}", channel_user_id);

        Ok(PendingAuth {
            token,
            channel_user_id,
            username: username.map(str::to_string),
            expires_at,
        })
    }

    /// Consume a token for `account_id`; the token is gone afterwards either way
    pub fn consume(&self, token: &str, account_id: &str) -> Result<ChannelLink, LinkError> {
        self.consume_at(token, account_id, Utc::now())
    }

    pub fn consume_at(
        &self,
        token: &str,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ChannelLink, LinkError> {
        let pending = self
            .store
            .take_link_token(token.trim())?
            .ok_or(LinkError::InvalidToken)?;

        if pending.expires_at <= now {
            return Err(LinkError::Expired);
        }

        let link = self.store.upsert_channel_link(
            pending.channel_user_id,
            account_id,
            pending.username.as_deref(),
        )?;
        info!(
            "Linked channel user {} to account {}",
            link.channel_user_id, link.account_id
        );
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LinkService {
        LinkService::new(Arc::new(ExpenseStore::open_in_memory().unwrap()))
    }

    #[test]
    fn test_issue_and_consume() {
        let service = service();
        let pending = service.issue_token(42, Some("alice")).unwrap();
        assert_eq!(pending.token.len(), 32);
        assert!(pending.token.chars().all(|c| c.is_ascii_alphanumeric()));

        let link = service.consume(&pending.token, "acct-1").unwrap();
        assert_eq!(link.channel_user_id, 42);
        assert_eq!(link.username.as_deref(), Some("alice"));
        assert!(service.store.find_channel_link(42).unwrap().is_some());

        // Single use
        assert!(matches!(
            service.consume(&pending.token, "acct-1"),
            Err(LinkError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_token_is_removed() {
        let service = service();
        let issued_at = Utc::now() - Duration::minutes(11);
        let pending = service.issue_token_at(42, None, issued_at).unwrap();

        assert!(matches!(
            service.consume(&pending.token, "acct-1"),
            Err(LinkError::Expired)
        ));
        assert!(matches!(
            service.consume(&pending.token, "acct-1"),
            Err(LinkError::InvalidToken)
        ));
        assert!(service.store.find_channel_link(42).unwrap().is_none());
    }

    #[test]
    fn test_new_token_replaces_old() {
        let service = service();
        let first = service.issue_token(42, None).unwrap();
        let second = service.issue_token(42, None).unwrap();
        assert!(matches!(
            service.consume(&first.token, "acct-1"),
            Err(LinkError::InvalidToken)
        ));
        assert!(service.consume(&second.token, "acct-1").is_ok());
    }
}
