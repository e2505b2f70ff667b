use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use thiserror::Error;

use super::{from_millis, now_millis, parse_column, ExpenseStore};
use crate::models::{format_amount, Expense, ExpenseListFilter, ExpenseUpdate, NewExpense};

const EXPENSE_COLUMNS: &str = "e.id, e.owner_account_id, e.date, e.merchant_name, e.total_amount,
    e.business_purpose_id, bp.name, e.receipt_ref, e.receipt_filename, e.receipt_hash,
    e.created_at, e.updated_at
    FROM expenses e
    LEFT JOIN business_purposes bp ON bp.id = e.business_purpose_id";

fn row_to_expense(row: &Row<'_>) -> rusqlite::Result<Expense> {
    let date: String = row.get(2)?;
    let amount: String = row.get(4)?;
    Ok(Expense {
        id: row.get(0)?,
        owner_account_id: row.get(1)?,
        date: parse_column::<NaiveDate>(2, &date)?,
        merchant_name: row.get(3)?,
        amount: parse_column::<Decimal>(4, &amount)?,
        category_id: row.get(5)?,
        category_label: row.get(6)?,
        receipt_ref: row.get(7)?,
        receipt_filename: row.get(8)?,
        receipt_hash: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

fn fetch_expense(conn: &Connection, owner: &str, id: &str) -> Result<Option<Expense>> {
    let sql = format!(
        "SELECT {} WHERE e.owner_account_id = ?1 AND e.id = ?2",
        EXPENSE_COLUMNS
    );
    let expense = conn
        .query_row(&sql, params![owner, id], row_to_expense)
        .optional()?;
    Ok(expense)
}

fn fetch_by_receipt_hash(conn: &Connection, owner: &str, hash: &str) -> Result<Option<Expense>> {
    let sql = format!(
        "SELECT {} WHERE e.owner_account_id = ?1 AND e.receipt_hash = ?2 LIMIT 1",
        EXPENSE_COLUMNS
    );
    let expense = conn
        .query_row(&sql, params![owner, hash], row_to_expense)
        .optional()?;
    Ok(expense)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// The owner already has an expense with this receipt's content hash
#[derive(Debug, Error)]
#[error("receipt already recorded for expense {}", .0.id)]
pub struct DuplicateReceipt(pub Box<Expense>);

fn query_expenses(conn: &Connection, sql: &str, args: Vec<Value>) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), row_to_expense)?;
    let mut expenses = Vec::new();
    for row in rows {
        expenses.push(row?);
    }
    Ok(expenses)
}

impl ExpenseStore {
    /// Insert a new expense and return the stored row
    pub fn insert_expense(&self, new: &NewExpense) -> Result<Expense> {
        let conn = self.conn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();
        let (receipt_ref, receipt_filename, receipt_hash) = match &new.receipt {
            Some(r) => (Some(r.reference.as_str()), r.filename.as_deref(), Some(r.hash.as_str())),
            None => (None, None, None),
        };

        let inserted = conn.execute(
            "INSERT INTO expenses (id, owner_account_id, date, merchant_name, total_amount,
                business_purpose_id, receipt_ref, receipt_filename, receipt_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id,
                new.owner_account_id,
                new.date.format("%Y-%m-%d").to_string(),
                new.merchant_name,
                format_amount(new.amount),
                new.category_id,
                receipt_ref,
                receipt_filename,
                receipt_hash,
                now,
            ],
        );
        if let Err(e) = inserted {
            if let (true, Some(hash)) = (is_constraint_violation(&e), receipt_hash) {
                if let Some(existing) = fetch_by_receipt_hash(&conn, &new.owner_account_id, hash)? {
                    return Err(DuplicateReceipt(Box::new(existing)).into());
                }
            }
            return Err(anyhow::Error::new(e).context("Failed to insert expense"));
        }

        fetch_expense(&conn, &new.owner_account_id, &id)?
            .ok_or_else(|| anyhow::anyhow!("Inserted expense {} not readable", id))
    }

    /// Get one expense of an owner
    pub fn get_expense(&self, owner: &str, id: &str) -> Result<Option<Expense>> {
        let conn = self.conn()?;
        fetch_expense(&conn, owner, id)
    }

    /// Expense of this owner carrying the given receipt hash, if any
    pub fn find_by_receipt_hash(&self, owner: &str, hash: &str) -> Result<Option<Expense>> {
        let conn = self.conn()?;
        fetch_by_receipt_hash(&conn, owner, hash)
    }

    /// Most recent expenses, newest first, optionally bounded below by a date
    pub fn recent_expenses(
        &self,
        owner: &str,
        since: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<Expense>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} WHERE e.owner_account_id = ?", EXPENSE_COLUMNS);
        let mut args = vec![Value::Text(owner.to_string())];
        if let Some(since) = since {
            sql.push_str(" AND e.date >= ?");
            args.push(Value::Text(since.format("%Y-%m-%d").to_string()));
        }
        sql.push_str(" ORDER BY e.date DESC, e.created_at DESC LIMIT ?");
        args.push(Value::Integer(limit as i64));
        query_expenses(&conn, &sql, args)
    }

    /// Candidates for an edit/send filter: exact date and amount matching only
    pub fn find_candidates(
        &self,
        owner: &str,
        date: Option<NaiveDate>,
        amount: Option<Decimal>,
    ) -> Result<Vec<Expense>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} WHERE e.owner_account_id = ?", EXPENSE_COLUMNS);
        let mut args = vec![Value::Text(owner.to_string())];
        if let Some(date) = date {
            sql.push_str(" AND e.date = ?");
            args.push(Value::Text(date.format("%Y-%m-%d").to_string()));
        }
        if let Some(amount) = amount {
            sql.push_str(" AND e.total_amount = ?");
            args.push(Value::Text(format_amount(amount)));
        }
        sql.push_str(" ORDER BY e.date DESC, e.created_at DESC");
        query_expenses(&conn, &sql, args)
    }

    /// Filtered listing for the web API and exports, newest first
    pub fn list_expenses(&self, owner: &str, filter: &ExpenseListFilter) -> Result<Vec<Expense>> {
        let conn = self.conn()?;
        let mut sql = format!("SELECT {} WHERE e.owner_account_id = ?", EXPENSE_COLUMNS);
        let mut args = vec![Value::Text(owner.to_string())];

        if let Some(from) = filter.from {
            sql.push_str(" AND e.date >= ?");
            args.push(Value::Text(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND e.date <= ?");
            args.push(Value::Text(to.format("%Y-%m-%d").to_string()));
        }
        if !filter.category_ids.is_empty() {
            let placeholders = vec!["?"; filter.category_ids.len()].join(", ");
            sql.push_str(&format!(" AND e.business_purpose_id IN ({})", placeholders));
            args.extend(filter.category_ids.iter().cloned().map(Value::Text));
        }
        if let Some(merchant) = filter.merchant.as_deref().filter(|m| !m.trim().is_empty()) {
            sql.push_str(" AND e.merchant_name LIKE ?");
            args.push(Value::Text(format!("%{}%", merchant.trim())));
        }

        sql.push_str(" ORDER BY e.date DESC, e.created_at DESC");
        query_expenses(&conn, &sql, args)
    }

    /// Apply a partial update; returns the updated row, or `None` if not found
    pub fn update_expense(
        &self,
        owner: &str,
        id: &str,
        update: &ExpenseUpdate,
    ) -> Result<Option<Expense>> {
        let conn = self.conn()?;
        let rows = conn
            .execute(
                "UPDATE expenses SET
                    date = COALESCE(?3, date),
                    merchant_name = COALESCE(?4, merchant_name),
                    total_amount = COALESCE(?5, total_amount),
                    business_purpose_id = COALESCE(?6, business_purpose_id),
                    updated_at = ?7
                 WHERE owner_account_id = ?1 AND id = ?2",
                params![
                    owner,
                    id,
                    update.date.map(|d| d.format("%Y-%m-%d").to_string()),
                    update.merchant_name,
                    update.amount.map(format_amount),
                    update.category_id,
                    now_millis(),
                ],
            )
            .context("Failed to update expense")?;

        if rows == 0 {
            return Ok(None);
        }
        fetch_expense(&conn, owner, id)
    }

    /// Number of expenses (any owner) referencing a category
    pub fn count_expenses_for_category(&self, category_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE business_purpose_id = ?1",
            params![category_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
