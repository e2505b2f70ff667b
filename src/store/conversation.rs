//! Bot conversation log
//!
//! Append-only record of each exchange, read back as the most recent N turns
//! per (account, channel user) in chronological order.

use anyhow::Result;
use rusqlite::params;
use tracing::debug;

use super::{from_millis, now_millis, parse_column, ExpenseStore};
use crate::models::{ConversationTurn, NewTurn, TurnKind};

impl ExpenseStore {
    /// Append one exchange to the log
    pub fn append_turn(&self, turn: &NewTurn) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO telegram_messages
                (channel_user_id, account_id, content, kind, original_content, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                turn.channel_user_id,
                turn.account_id,
                turn.content,
                turn.kind.as_str(),
                turn.original_content,
                turn.response,
                now_millis(),
            ],
        )?;

        debug!(
            "Stored {} turn for user {} (account {})",
            turn.kind, turn.channel_user_id, turn.account_id
        );
        Ok(())
    }

    /// Most recent `limit` turns, oldest first
    pub fn recent_turns(
        &self,
        account_id: &str,
        channel_user_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, channel_user_id, account_id, content, kind, original_content, response, created_at
             FROM telegram_messages
             WHERE account_id = ?1 AND channel_user_id = ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;

        let mut turns = stmt
            .query_map(params![account_id, channel_user_id, limit as i64], |row| {
                let kind: String = row.get(4)?;
                Ok(ConversationTurn {
                    id: row.get(0)?,
                    channel_user_id: row.get(1)?,
                    account_id: row.get(2)?,
                    content: row.get(3)?,
                    kind: parse_column::<TurnKind>(4, &kind)?,
                    original_content: row.get(5)?,
                    response: row.get(6)?,
                    created_at: from_millis(row.get(7)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Reverse to get chronological order
        turns.reverse();
        Ok(turns)
    }
}
