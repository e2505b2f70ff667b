//! Domain Models
//!
//! Rows of the expense store plus the small value types shared between the
//! dispatcher, the context assembler and the channel adapters.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Round an amount to cents the same way everywhere it is stored or compared.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Fixed 2-decimal rendering, e.g. `25.30`.
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", normalize_amount(amount))
}

/// A recorded expense owned by exactly one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    pub owner_account_id: String,
    pub date: NaiveDate,
    pub merchant_name: String,
    pub amount: Decimal,
    pub category_id: Option<String>,
    /// Joined from the category row, not stored on the expense
    pub category_label: Option<String>,
    /// Inline `data:` URL or external URL
    #[serde(skip_serializing)]
    pub receipt_ref: Option<String>,
    pub receipt_filename: Option<String>,
    pub receipt_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    /// One-line rendering used in bot replies and context summaries.
    pub fn describe(&self) -> String {
        let mut line = format!(
            "Amount: ${}, Merchant: {}, Date: {}",
            format_amount(self.amount),
            self.merchant_name,
            self.date.format("%Y-%m-%d")
        );
        if let Some(label) = &self.category_label {
            line.push_str(&format!(", Business purpose: {}", label));
        }
        line
    }
}

/// Receipt fields for a new expense, already hashed and encoded
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReceipt {
    pub reference: String,
    pub filename: Option<String>,
    pub hash: String,
}

/// Insert payload for an expense
#[derive(Debug, Clone)]
pub struct NewExpense {
    pub owner_account_id: String,
    pub date: NaiveDate,
    pub merchant_name: String,
    pub amount: Decimal,
    pub category_id: Option<String>,
    pub receipt: Option<StoredReceipt>,
}

/// Partial update of an expense; `None` leaves the column untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseUpdate {
    pub date: Option<NaiveDate>,
    pub merchant_name: Option<String>,
    pub amount: Option<Decimal>,
    pub category_id: Option<String>,
}

impl ExpenseUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.merchant_name.is_none()
            && self.amount.is_none()
            && self.category_id.is_none()
    }
}

/// Listing filter used by the web API and exports
#[derive(Debug, Clone, Default)]
pub struct ExpenseListFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub category_ids: Vec<String>,
    pub merchant: Option<String>,
}

/// Expense category ("business purpose")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Defaults first, then custom; alphabetical (case-insensitive) within each group
pub fn sort_categories_for_display(categories: &mut [Category]) {
    categories.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Lifecycle of a pending category request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown request status: {}", other)),
        }
    }
}

/// A user asked to add a category and has not answered yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCategoryRequest {
    pub id: String,
    pub account_id: String,
    pub channel_user_id: i64,
    pub proposed_name: String,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
}

/// Binding of a chat identity to an account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelLink {
    pub channel_user_id: i64,
    pub account_id: String,
    pub username: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// Outstanding link token
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAuth {
    pub token: String,
    pub channel_user_id: i64,
    pub username: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Group chat registered to an owner account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupChat {
    pub chat_id: i64,
    pub owner_account_id: String,
    pub title: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Personal assistant grant inside one group chat
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegatedAccess {
    pub id: String,
    pub owner_account_id: String,
    pub delegate_channel_id: i64,
    pub group_channel_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Kind of inbound message a turn records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Text,
    Image,
}

impl TurnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for TurnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            other => Err(format!("unknown turn kind: {}", other)),
        }
    }
}

/// One bot exchange: what the user sent and what we answered
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub id: i64,
    pub channel_user_id: i64,
    pub account_id: String,
    pub content: String,
    pub kind: TurnKind,
    pub original_content: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Append payload for the conversation log
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub channel_user_id: i64,
    pub account_id: String,
    pub content: String,
    pub kind: TurnKind,
    pub original_content: String,
    pub response: String,
}
