use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, now_millis, ExpenseStore};
use crate::models::{ChannelLink, DelegatedAccess, GroupChat, PendingAuth};

fn row_to_delegate(row: &Row<'_>) -> rusqlite::Result<DelegatedAccess> {
    Ok(DelegatedAccess {
        id: row.get(0)?,
        owner_account_id: row.get(1)?,
        delegate_channel_id: row.get(2)?,
        group_channel_id: row.get(3)?,
        is_active: row.get(4)?,
        created_at: from_millis(row.get(5)?),
    })
}

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<GroupChat> {
    Ok(GroupChat {
        chat_id: row.get(0)?,
        owner_account_id: row.get(1)?,
        title: row.get(2)?,
        registered_at: from_millis(row.get(3)?),
    })
}

impl ExpenseStore {
    // ============ Link tokens ============

    /// Store a link token; older tokens of the same identity are dropped
    pub fn insert_link_token(
        &self,
        token: &str,
        channel_user_id: i64,
        username: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM pending_auth WHERE channel_user_id = ?1",
            params![channel_user_id],
        )?;
        conn.execute(
            "INSERT INTO pending_auth (token, channel_user_id, username, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![token, channel_user_id, username, expires_at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Remove and return a link token (single use)
    pub fn take_link_token(&self, token: &str) -> Result<Option<PendingAuth>> {
        let conn = self.conn()?;
        let pending = conn
            .query_row(
                "SELECT token, channel_user_id, username, expires_at FROM pending_auth WHERE token = ?1",
                params![token],
                |row| {
                    Ok(PendingAuth {
                        token: row.get(0)?,
                        channel_user_id: row.get(1)?,
                        username: row.get(2)?,
                        expires_at: from_millis(row.get(3)?),
                    })
                },
            )
            .optional()?;

        if pending.is_some() {
            conn.execute("DELETE FROM pending_auth WHERE token = ?1", params![token])?;
        }
        Ok(pending)
    }

    // ============ Channel links ============

    /// Bind a channel identity to an account, replacing any previous binding
    pub fn upsert_channel_link(
        &self,
        channel_user_id: i64,
        account_id: &str,
        username: Option<&str>,
    ) -> Result<ChannelLink> {
        let conn = self.conn()?;
        let now = now_millis();
        conn.execute(
            "INSERT INTO telegram_users (channel_user_id, account_id, username, linked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(channel_user_id) DO UPDATE SET
                account_id = excluded.account_id,
                username = excluded.username,
                linked_at = excluded.linked_at",
            params![channel_user_id, account_id, username, now],
        )?;
        Ok(ChannelLink {
            channel_user_id,
            account_id: account_id.to_string(),
            username: username.map(str::to_string),
            linked_at: from_millis(now),
        })
    }

    pub fn find_channel_link(&self, channel_user_id: i64) -> Result<Option<ChannelLink>> {
        let conn = self.conn()?;
        let link = conn
            .query_row(
                "SELECT channel_user_id, account_id, username, linked_at
                 FROM telegram_users WHERE channel_user_id = ?1",
                params![channel_user_id],
                |row| {
                    Ok(ChannelLink {
                        channel_user_id: row.get(0)?,
                        account_id: row.get(1)?,
                        username: row.get(2)?,
                        linked_at: from_millis(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(link)
    }

    pub fn delete_channel_link(&self, channel_user_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM telegram_users WHERE channel_user_id = ?1",
            params![channel_user_id],
        )?;
        Ok(rows > 0)
    }

    // ============ Group chats ============

    /// Register a group to an account. An existing registration keeps its
    /// owner; only the title is refreshed. Returns the stored row.
    pub fn register_group(
        &self,
        chat_id: i64,
        owner_account_id: &str,
        title: Option<&str>,
    ) -> Result<GroupChat> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO group_chats (chat_id, owner_account_id, title, registered_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET title = excluded.title",
            params![chat_id, owner_account_id, title, now_millis()],
        )?;
        let group = conn.query_row(
            "SELECT chat_id, owner_account_id, title, registered_at FROM group_chats WHERE chat_id = ?1",
            params![chat_id],
            row_to_group,
        )?;
        Ok(group)
    }

    pub fn find_group(&self, chat_id: i64) -> Result<Option<GroupChat>> {
        let conn = self.conn()?;
        let group = conn
            .query_row(
                "SELECT chat_id, owner_account_id, title, registered_at FROM group_chats WHERE chat_id = ?1",
                params![chat_id],
                row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    // ============ Personal assistants ============

    /// Grant (or re-activate) a delegate inside a group
    pub fn grant_delegate(
        &self,
        owner_account_id: &str,
        delegate_channel_id: i64,
        group_channel_id: i64,
    ) -> Result<DelegatedAccess> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO personal_assistants
                (id, owner_account_id, delegate_channel_id, group_channel_id, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)
             ON CONFLICT(delegate_channel_id, group_channel_id) DO UPDATE SET
                owner_account_id = excluded.owner_account_id,
                is_active = 1",
            params![
                uuid::Uuid::new_v4().to_string(),
                owner_account_id,
                delegate_channel_id,
                group_channel_id,
                now_millis(),
            ],
        )?;

        let grant = conn.query_row(
            "SELECT id, owner_account_id, delegate_channel_id, group_channel_id, is_active, created_at
             FROM personal_assistants WHERE delegate_channel_id = ?1 AND group_channel_id = ?2",
            params![delegate_channel_id, group_channel_id],
            row_to_delegate,
        )?;
        Ok(grant)
    }

    /// Deactivate a delegate; only the owner's grants are touched
    pub fn revoke_delegate(
        &self,
        owner_account_id: &str,
        delegate_channel_id: i64,
        group_channel_id: i64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE personal_assistants SET is_active = 0
             WHERE owner_account_id = ?1 AND delegate_channel_id = ?2 AND group_channel_id = ?3
               AND is_active = 1",
            params![owner_account_id, delegate_channel_id, group_channel_id],
        )?;
        Ok(rows > 0)
    }

    /// Active grant for a delegate inside a group, if any
    pub fn find_active_delegate(
        &self,
        delegate_channel_id: i64,
        group_channel_id: i64,
    ) -> Result<Option<DelegatedAccess>> {
        let conn = self.conn()?;
        let grant = conn
            .query_row(
                "SELECT id, owner_account_id, delegate_channel_id, group_channel_id, is_active, created_at
                 FROM personal_assistants
                 WHERE delegate_channel_id = ?1 AND group_channel_id = ?2 AND is_active = 1",
                params![delegate_channel_id, group_channel_id],
                row_to_delegate,
            )
            .optional()?;
        Ok(grant)
    }

    pub fn list_delegates(&self, owner_account_id: &str) -> Result<Vec<DelegatedAccess>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_account_id, delegate_channel_id, group_channel_id, is_active, created_at
             FROM personal_assistants WHERE owner_account_id = ?1
             ORDER BY created_at",
        )?;
        let grants = stmt
            .query_map(params![owner_account_id], row_to_delegate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(grants)
    }
}
