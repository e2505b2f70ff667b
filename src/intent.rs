//! Classifier Reply Parsing
//!
//! The classifier answers in free text that should embed one JSON object.
//! We locate the first balanced `{...}` span, parse it strictly and map it
//! onto a closed [`Action`] type. Anything else is a conversational reply.
//!
//! Parameter fields are deliberately lenient: a field of the wrong type reads
//! as missing, so the dispatcher can answer with a validation message instead
//! of silently falling back to free text.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Parsed classifier output
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifierReply {
    Structured(Action),
    Freeform(String),
}

impl ClassifierReply {
    /// Parse raw classifier text
    pub fn parse(raw: &str) -> Self {
        let Some(span) = extract_json_object(raw) else {
            return Self::Freeform(raw.to_string());
        };

        match serde_json::from_str::<Action>(span) {
            Ok(action) => Self::Structured(action),
            Err(e) => {
                tracing::debug!("Classifier JSON not an action ({}), treating as reply", e);
                Self::Freeform(raw.to_string())
            }
        }
    }
}

/// One variant per supported intent
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create(CreateParams),
    Edit(EditParams),
    AddBusinessPurpose(PurposeParams),
    ConfirmBusinessPurpose,
    CancelBusinessPurpose,
    ListBusinessPurposes,
    RemoveBusinessPurpose(PurposeParams),
    SendReceipt(SendReceiptParams),
    Export(ExportParams),
    Summary(TextParams),
    Reply(TextParams),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Edit(_) => "edit",
            Self::AddBusinessPurpose(_) => "add_business_purpose",
            Self::ConfirmBusinessPurpose => "confirm_business_purpose",
            Self::CancelBusinessPurpose => "cancel_business_purpose",
            Self::ListBusinessPurposes => "list_business_purposes",
            Self::RemoveBusinessPurpose(_) => "remove_business_purpose",
            Self::SendReceipt(_) => "send_receipt",
            Self::Export(_) => "export",
            Self::Summary(_) => "summary",
            Self::Reply(_) => "reply",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CreateParams {
    #[serde(default, deserialize_with = "lenient")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub merchant: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub business_purpose: Option<String>,
}

/// Which expense an edit or receipt request is about
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExpenseSelector {
    #[serde(default, deserialize_with = "lenient")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub merchant: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient")]
    pub business_purpose: Option<String>,
}

impl ExpenseSelector {
    pub fn is_empty(&self) -> bool {
        self.date.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.merchant.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.amount.is_none()
            && self.business_purpose.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FieldsToUpdate {
    #[serde(default, deserialize_with = "lenient")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub merchant_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient")]
    pub business_purpose: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub business_purpose_id: Option<String>,
}

impl FieldsToUpdate {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.merchant_name.is_none()
            && self.total_amount.is_none()
            && self.business_purpose.is_none()
            && self.business_purpose_id.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EditParams {
    #[serde(default, deserialize_with = "lenient")]
    pub filter: Option<ExpenseSelector>,
    #[serde(default, deserialize_with = "lenient")]
    pub fields_to_update: Option<FieldsToUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PurposeParams {
    #[serde(default, deserialize_with = "lenient")]
    pub purpose_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SendReceiptParams {
    #[serde(default, deserialize_with = "lenient")]
    pub filter: Option<ExpenseSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExportParams {
    #[serde(default, deserialize_with = "lenient")]
    pub format: Option<String>,
    #[serde(default, rename = "dateFrom", deserialize_with = "lenient")]
    pub date_from: Option<String>,
    #[serde(default, rename = "dateTo", deserialize_with = "lenient")]
    pub date_to: Option<String>,
    #[serde(default, rename = "businessPurposeIds", deserialize_with = "lenient")]
    pub business_purpose_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TextParams {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

/// Deserialize a field, reading a value of the wrong shape as absent
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Locate the first balanced `{...}` span, ignoring braces inside strings.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[A-Za-z]*").expect("valid code fence regex"));

static ID_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[id:\s*[^\]]*\]").expect("valid id token regex"));

static BLANK_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank line regex"));

/// Strip code fences, embedded JSON objects and `[id: ...]` tokens from text
/// meant for display.
pub fn clean_display_text(text: &str) -> String {
    let mut cleaned = CODE_FENCE.replace_all(text, "").into_owned();

    while let Some(span) = extract_json_object(&cleaned) {
        if serde_json::from_str::<serde_json::Value>(span).is_err() {
            break;
        }
        cleaned = cleaned.replacen(span, "", 1);
    }

    let cleaned = ID_TOKEN.replace_all(&cleaned, "");
    BLANK_RUNS.replace_all(cleaned.trim(), "\n\n").into_owned()
}
