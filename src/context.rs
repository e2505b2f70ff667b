//! Context Assembler
//!
//! Builds the text block handed to the classifier alongside a new message:
//! recent conversation, an expense summary scoped by a time-window heuristic,
//! any pending business purpose request, the replied-to message and the
//! category catalog.
//!
//! Read failures never abort assembly; the affected section is left out.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

use crate::models::{format_amount, ConversationTurn, Expense};
use crate::store::ExpenseStore;

/// Turns of history included in the context
pub const HISTORY_TURNS: usize = 10;

/// Per-message truncation for history lines
pub const HISTORY_MESSAGE_CHARS: usize = 200;

/// Rows listed in the summary unless the scope is "all"
const SUMMARY_RECENT_ROWS: usize = 5;

/// Time window inferred from the wording of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    All,
    Month,
    Week,
    Year,
    Recent,
}

impl TimeWindow {
    /// Keyword heuristic over the lowercased message, first match wins
    pub fn detect(message: &str) -> Self {
        let text = message.to_lowercase();
        if ["all", "total", "complete"].iter().any(|kw| text.contains(kw)) {
            Self::All
        } else if text.contains("month") {
            Self::Month
        } else if text.contains("week") {
            Self::Week
        } else if text.contains("year") || text.contains("annual") {
            Self::Year
        } else {
            Self::Recent
        }
    }

    /// Earliest date included, if bounded
    pub fn floor(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::All | Self::Recent => None,
            Self::Month => today.with_day(1),
            Self::Week => Some(today - Duration::days(7)),
            Self::Year => NaiveDate::from_ymd_opt(today.year(), 1, 1),
        }
    }

    /// Maximum rows read from the store
    pub fn limit(&self) -> usize {
        match self {
            Self::All => 100,
            _ => 10,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "all time",
            Self::Month => "this month",
            Self::Week => "the last 7 days",
            Self::Year => "this year",
            Self::Recent => "most recent",
        }
    }
}

/// Inputs for one assembly
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub account_id: &'a str,
    pub channel_user_id: i64,
    pub message: &'a str,
    pub replied_to: Option<&'a str>,
}

/// Reads the store and renders the classifier context
pub struct ContextAssembler<'a> {
    store: &'a ExpenseStore,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(store: &'a ExpenseStore) -> Self {
        Self { store }
    }

    pub fn assemble(&self, request: &ContextRequest<'_>, now: DateTime<Utc>) -> String {
        let mut sections = Vec::new();

        match self
            .store
            .recent_turns(request.account_id, request.channel_user_id, HISTORY_TURNS)
        {
            Ok(turns) if !turns.is_empty() => sections.push(render_history(&turns)),
            Ok(_) => {}
            Err(e) => warn!("Skipping conversation history in context: {}", e),
        }

        let window = TimeWindow::detect(request.message);
        let floor = window.floor(now.date_naive());
        match self
            .store
            .recent_expenses(request.account_id, floor, window.limit())
        {
            Ok(expenses) => sections.push(summarize_expenses(&expenses, window)),
            Err(e) => warn!("Skipping expense summary in context: {}", e),
        }

        match self
            .store
            .latest_pending_request(request.account_id, request.channel_user_id)
        {
            Ok(Some(pending)) => sections.push(format!(
                "Pending business purpose request awaiting confirmation: \"{}\" (requested {})",
                pending.proposed_name,
                pending.requested_at.format("%b %d, %Y %H:%M UTC")
            )),
            Ok(None) => {}
            Err(e) => warn!("Skipping pending request in context: {}", e),
        }

        if let Some(replied) = request.replied_to.filter(|t| !t.trim().is_empty()) {
            sections.push(format!("The user is replying to this message:\n{}", replied));
        }

        match self.store.list_categories() {
            Ok(categories) if !categories.is_empty() => {
                let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
                sections.push(format!("Available business purposes: {}", names.join(", ")));
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping category catalog in context: {}", e),
        }

        sections.join("\n\n")
    }
}

fn render_history(turns: &[ConversationTurn]) -> String {
    let mut out = String::from("[Previous conversation:]");
    for turn in turns {
        let at = turn.created_at.format("%b %d, %Y %H:%M UTC");
        out.push_str(&format!(
            "\nUser ({}): {}",
            at,
            truncate_chars(&turn.content, HISTORY_MESSAGE_CHARS)
        ));
        out.push_str(&format!(
            "\nAssistant ({}): {}",
            at,
            truncate_chars(&turn.response, HISTORY_MESSAGE_CHARS)
        ));
    }
    out
}

/// Natural-language summary of the expenses in scope
pub fn summarize_expenses(expenses: &[Expense], window: TimeWindow) -> String {
    if expenses.is_empty() {
        return "No expenses found for this period.".to_string();
    }

    let total: Decimal = expenses.iter().map(|e| e.amount).sum();
    let average = total / Decimal::from(expenses.len() as i64);

    let mut out = format!(
        "Expenses ({}): {} transactions, total ${}, average ${}",
        window.label(),
        expenses.len(),
        format_amount(total),
        format_amount(average)
    );

    let listed = if window == TimeWindow::All {
        out.push_str("\nAll transactions:");
        expenses
    } else {
        out.push_str("\nMost recent transactions:");
        &expenses[..expenses.len().min(SUMMARY_RECENT_ROWS)]
    };
    for expense in listed {
        out.push_str(&format!(
            "\n- {} | {} | ${} | {} [id: {}]",
            expense.date.format("%Y-%m-%d"),
            expense.merchant_name,
            format_amount(expense.amount),
            expense.category_label.as_deref().unwrap_or("Uncategorized"),
            expense.id
        ));
    }

    let mut by_category: BTreeMap<&str, Decimal> = BTreeMap::new();
    for expense in expenses {
        let label = expense.category_label.as_deref().unwrap_or("Uncategorized");
        *by_category.entry(label).or_default() += expense.amount;
    }
    if by_category.len() > 1 {
        out.push_str("\nBy business purpose:");
        for (label, subtotal) in by_category {
            out.push_str(&format!("\n- {}: ${}", label, format_amount(subtotal)));
        }
    }

    out
}

/// Truncate to `max` characters (UTF-8 safe), marking the cut with `...`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
