use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension, Row};

use super::{from_millis, now_millis, parse_column, ExpenseStore};
use crate::models::{Category, PendingCategoryRequest, RequestStatus};

const CATEGORY_COLUMNS: &str = "id, name, is_default, created_by, created_at, updated_at";

fn row_to_category(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        is_default: row.get(2)?,
        created_by: row.get(3)?,
        created_at: from_millis(row.get(4)?),
        updated_at: from_millis(row.get(5)?),
    })
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<PendingCategoryRequest> {
    let status: String = row.get(5)?;
    Ok(PendingCategoryRequest {
        id: row.get(0)?,
        account_id: row.get(1)?,
        channel_user_id: row.get(2)?,
        proposed_name: row.get(3)?,
        requested_at: from_millis(row.get(4)?),
        status: parse_column::<RequestStatus>(5, &status)?,
    })
}

impl ExpenseStore {
    /// All categories in insertion order
    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM business_purposes ORDER BY created_at, rowid",
            CATEGORY_COLUMNS
        ))?;
        let categories = stmt
            .query_map([], row_to_category)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(categories)
    }

    /// Case-insensitive exact name lookup
    pub fn find_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!(
                    "SELECT {} FROM business_purposes WHERE name = ?1 COLLATE NOCASE",
                    CATEGORY_COLUMNS
                ),
                params![name.trim()],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    pub fn get_category(&self, id: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM business_purposes WHERE id = ?1", CATEGORY_COLUMNS),
                params![id],
                row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Create a custom category owned by `created_by`
    pub fn insert_category(&self, name: &str, created_by: &str) -> Result<Category> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        conn.execute(
            "INSERT INTO business_purposes (id, name, is_default, created_by, created_at, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4, ?4)",
            params![id, name.trim(), created_by, now],
        )
        .with_context(|| format!("Failed to insert business purpose {:?}", name))?;

        Ok(Category {
            id,
            name: name.trim().to_string(),
            is_default: false,
            created_by: Some(created_by.to_string()),
            created_at: from_millis(now),
            updated_at: from_millis(now),
        })
    }

    /// Delete a custom category; defaults are never deleted
    pub fn delete_category(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM business_purposes WHERE id = ?1 AND is_default = 0",
            params![id],
        )?;
        Ok(rows > 0)
    }

    /// Record a request to add a category, awaiting confirmation
    pub fn create_pending_request(
        &self,
        account_id: &str,
        channel_user_id: i64,
        proposed_name: &str,
    ) -> Result<PendingCategoryRequest> {
        let conn = self.conn()?;
        let request = PendingCategoryRequest {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            channel_user_id,
            proposed_name: proposed_name.trim().to_string(),
            requested_at: from_millis(now_millis()),
            status: RequestStatus::Pending,
        };
        conn.execute(
            "INSERT INTO pending_business_purposes
                (id, account_id, channel_user_id, proposed_name, requested_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id,
                request.account_id,
                request.channel_user_id,
                request.proposed_name,
                request.requested_at.timestamp_millis(),
                request.status.as_str(),
            ],
        )?;
        Ok(request)
    }

    /// The authoritative pending request: newest `pending` row for the pair
    pub fn latest_pending_request(
        &self,
        account_id: &str,
        channel_user_id: i64,
    ) -> Result<Option<PendingCategoryRequest>> {
        let conn = self.conn()?;
        let request = conn
            .query_row(
                "SELECT id, account_id, channel_user_id, proposed_name, requested_at, status
                 FROM pending_business_purposes
                 WHERE account_id = ?1 AND channel_user_id = ?2 AND status = 'pending'
                 ORDER BY requested_at DESC, rowid DESC
                 LIMIT 1",
                params![account_id, channel_user_id],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    pub fn set_request_status(&self, request_id: &str, status: RequestStatus) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE pending_business_purposes SET status = ?2 WHERE id = ?1",
            params![request_id, status.as_str()],
        )?;
        Ok(())
    }
}
