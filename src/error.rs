//! Error Types
//!
//! `DispatchError` is the taxonomy of everything an action can fail with.
//! Each variant maps to the text shown to the user; collaborator failures
//! hide their cause behind a generic message and are logged instead.

use thiserror::Error;

/// Generic reply for failures the user cannot act on
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Sorry, something went wrong on our side. Please try again in a moment.";

/// Action failures
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Missing or malformed action fields; the message is user guidance
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no expense matched the filter")]
    NotFound,

    #[error("filter matched {0} expenses")]
    Ambiguous(usize),

    #[error("business purpose not found: {0}")]
    UnknownCategory(String),

    /// Denied by ownership rules; the message is user guidance
    #[error("permission denied: {0}")]
    Permission(String),

    #[error("business purpose {name} is referenced by {count} expenses")]
    InUse { name: String, count: i64 },

    #[error("receipt already recorded for expense {existing_id}")]
    Duplicate {
        existing_id: String,
        existing: String,
    },

    #[error("no pending business purpose request")]
    NothingToConfirm,

    #[error("expense has no stored receipt")]
    NoReceipt(String),

    #[error("collaborator failure: {0:#}")]
    Collaborator(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether this is a failure on our side rather than a user mistake
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }

    /// Text shown to the end user
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(guidance) | Self::Permission(guidance) => guidance.clone(),
            Self::NotFound => "I couldn't find an expense matching that description. \
                Check the date, amount or merchant and try again."
                .to_string(),
            Self::Ambiguous(count) => format!(
                "I found {} expenses matching that description. Please be more specific, \
                 for example by adding the date, amount or merchant.",
                count
            ),
            Self::UnknownCategory(name) => {
                format!("There is no business purpose named \"{}\".", name)
            }
            Self::InUse { name, count } => format!(
                "The business purpose \"{}\" is still in use by {} expense{} and cannot be removed.",
                name,
                count,
                if *count == 1 { "" } else { "s" }
            ),
            Self::Duplicate { existing, .. } => format!(
                "This receipt has already been uploaded, so I did not record it again.\n\
                 Existing expense: {}",
                existing
            ),
            Self::NothingToConfirm => {
                "There is no pending business purpose to confirm.".to_string()
            }
            Self::NoReceipt(expense) => {
                format!("That expense has no receipt attached.\n{}", expense)
            }
            Self::Collaborator(_) => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }
}

/// Terminal failures of one bot invocation
#[derive(Debug, Error)]
pub enum BotError {
    #[error("failed to persist conversation turn: {0:#}")]
    Persist(#[source] anyhow::Error),
}
