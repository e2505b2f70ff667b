//! Intent Dispatcher
//!
//! Maps one parsed [`Action`] to exactly one state transition against the
//! store, on behalf of an owner resolved before dispatch. Every outcome,
//! including failures, ends up as text for the user; the pipeline records
//! it in the conversation log.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::DispatchError;
use crate::export::{self, ExportFormat, Report};
use crate::intent::{
    clean_display_text, Action, ClassifierReply, CreateParams, EditParams, ExpenseSelector,
    ExportParams, FieldsToUpdate, PurposeParams, SendReceiptParams, TextParams,
};
use crate::models::{
    format_amount, normalize_amount, sort_categories_for_display, Expense, ExpenseListFilter,
    ExpenseUpdate, NewExpense, RequestStatus,
};
use crate::owner::ResolvedOwner;
use crate::receipts::{Attachment, ReceiptFetcher};
use crate::store::{DuplicateReceipt, ExpenseStore};

/// Per-message inputs every action may need
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest<'a> {
    pub owner: &'a ResolvedOwner,
    pub channel_user_id: i64,
    /// File sent with the message, recorded as the receipt on `create`
    pub attachment: Option<&'a Attachment>,
    /// Unparsed classifier output, the fallback reply
    pub raw_reply: &'a str,
    pub now: DateTime<Utc>,
}

/// What goes back to the user
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl DispatchOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    fn with_attachment(text: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            text: text.into(),
            attachment: Some(attachment),
        }
    }
}

type DispatchResult = Result<DispatchOutcome, DispatchError>;

pub struct IntentDispatcher {
    store: Arc<ExpenseStore>,
    receipts: ReceiptFetcher,
}

impl IntentDispatcher {
    pub fn new(store: Arc<ExpenseStore>, receipts: ReceiptFetcher) -> Self {
        Self { store, receipts }
    }

    /// Run one classifier reply; never fails, errors become user-facing text
    pub async fn dispatch(
        &self,
        reply: ClassifierReply,
        request: &DispatchRequest<'_>,
    ) -> DispatchOutcome {
        let action = match reply {
            ClassifierReply::Structured(action) => action,
            ClassifierReply::Freeform(text) => return DispatchOutcome::text(text),
        };

        let name = action.name();
        info!(
            "Dispatching action={} account={} actor={:?}",
            name, request.owner.account_id, request.owner.actor
        );

        match self.apply(action, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_internal() {
                    error!("Action {} failed: {}", name, e);
                } else {
                    info!("Action {} rejected: {}", name, e);
                }
                DispatchOutcome::text(e.user_message())
            }
        }
    }

    async fn apply(&self, action: Action, request: &DispatchRequest<'_>) -> DispatchResult {
        match action {
            Action::Create(params) => self.create(params, request),
            Action::Edit(params) => self.edit(params, request),
            Action::AddBusinessPurpose(params) => self.add_business_purpose(params, request),
            Action::ConfirmBusinessPurpose => self.confirm_business_purpose(request),
            Action::CancelBusinessPurpose => self.cancel_business_purpose(request),
            Action::ListBusinessPurposes => self.list_business_purposes(),
            Action::RemoveBusinessPurpose(params) => self.remove_business_purpose(params, request),
            Action::SendReceipt(params) => self.send_receipt(params, request).await,
            Action::Export(params) => self.export(params, request),
            Action::Summary(params) | Action::Reply(params) => {
                Ok(passthrough(params, request.raw_reply))
            }
        }
    }

    // ============ Expenses ============

    fn create(&self, params: CreateParams, request: &DispatchRequest<'_>) -> DispatchResult {
        let owner = &request.owner.account_id;

        let date = non_blank(params.date.as_deref());
        let merchant = non_blank(params.merchant.as_deref());
        let mut missing = Vec::new();
        if params.amount.is_none() {
            missing.push("amount");
        }
        if date.is_none() {
            missing.push("date");
        }
        if merchant.is_none() {
            missing.push("merchant");
        }
        let (Some(amount), Some(date), Some(merchant)) = (params.amount, date, merchant) else {
            return Err(DispatchError::Validation(format!(
                "I couldn't record this expense because the {} {} missing. \
                 Please send the amount, date and merchant.",
                missing.join(", "),
                if missing.len() == 1 { "is" } else { "are" }
            )));
        };
        let date = parse_date(date)?;
        let amount = positive_amount(amount)?;

        let mut notes = Vec::new();
        let category_id = match non_blank(params.business_purpose.as_deref()) {
            Some(label) => match self.store.find_category_by_name(label)? {
                Some(category) => Some(category.id),
                None => {
                    notes.push(format!(
                        "Business purpose \"{}\" doesn't exist, so the expense was saved without one.",
                        label
                    ));
                    None
                }
            },
            None => None,
        };

        let receipt = request.attachment.map(Attachment::to_stored_receipt);
        let with_receipt = receipt.is_some();

        // The receipt hash is unique per owner; the store reports the clash
        let expense = self
            .store
            .insert_expense(&NewExpense {
                owner_account_id: owner.clone(),
                date,
                merchant_name: merchant.to_string(),
                amount,
                category_id,
                receipt,
            })
            .map_err(|e| match e.downcast::<DuplicateReceipt>() {
                Ok(DuplicateReceipt(existing)) => DispatchError::Duplicate {
                    existing_id: existing.id.clone(),
                    existing: existing.describe(),
                },
                Err(e) => DispatchError::Collaborator(e),
            })?;
        info!("Created expense {} for {}", expense.id, owner);

        let mut text = format!("Expense recorded.\n{}", expense.describe());
        if with_receipt {
            text.push_str("\nReceipt attached.");
        }
        for note in notes {
            text.push('\n');
            text.push_str(&note);
        }
        Ok(DispatchOutcome::text(text))
    }

    fn edit(&self, params: EditParams, request: &DispatchRequest<'_>) -> DispatchResult {
        let owner = &request.owner.account_id;

        let filter = params.filter.filter(|f| !f.is_empty()).ok_or_else(|| {
            DispatchError::Validation(
                "Which expense should I change? Tell me its date, merchant, amount or business purpose."
                    .to_string(),
            )
        })?;
        let fields = params
            .fields_to_update
            .filter(|f| !f.is_empty())
            .ok_or_else(|| {
                DispatchError::Validation(
                    "What should I change? You can update the date, merchant, amount or business purpose."
                        .to_string(),
                )
            })?;

        let target = self.resolve_single(owner, &filter)?;
        let (update, warnings) = self.build_update(&fields)?;

        if update.is_empty() {
            let mut text = warnings.join("\n");
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("No changes were made.");
            return Ok(DispatchOutcome::text(text));
        }

        let updated = self
            .store
            .update_expense(owner, &target.id, &update)?
            .ok_or(DispatchError::NotFound)?;
        info!("Updated expense {} for {}", updated.id, owner);

        let mut text = format!("Expense updated.\n{}", updated.describe());
        for warning in warnings {
            text.push('\n');
            text.push_str(&warning);
        }
        Ok(DispatchOutcome::text(text))
    }

    /// Requested changes that can be applied, plus warnings for dropped ones
    fn build_update(&self, fields: &FieldsToUpdate) -> Result<(ExpenseUpdate, Vec<String>), DispatchError> {
        let mut update = ExpenseUpdate {
            date: fields.date.as_deref().map(parse_date).transpose()?,
            merchant_name: non_blank(fields.merchant_name.as_deref()).map(str::to_string),
            amount: fields.total_amount.map(positive_amount).transpose()?,
            category_id: None,
        };
        let mut warnings = Vec::new();

        if let Some(id) = fields.business_purpose_id.as_deref() {
            match self.store.get_category(id)? {
                Some(category) => update.category_id = Some(category.id),
                None => warnings.push(format!(
                    "Business purpose id {} doesn't exist, so it was not changed.",
                    id
                )),
            }
        } else if let Some(label) = non_blank(fields.business_purpose.as_deref()) {
            match self.store.find_category_by_name(label)? {
                Some(category) => update.category_id = Some(category.id),
                None => {
                    let mut categories = self.store.list_categories()?;
                    sort_categories_for_display(&mut categories);
                    let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
                    warn!("Dropping unknown business purpose {:?} from edit", label);
                    warnings.push(format!(
                        "Business purpose \"{}\" doesn't exist, so it was not changed. \
                         Valid business purposes: {}.",
                        label,
                        names.join(", ")
                    ));
                }
            }
        }

        Ok((update, warnings))
    }

    /// Exactly one expense matching a selector
    ///
    /// Date and amount match exactly in the store; merchant and category
    /// then narrow the candidates by case-insensitive substring.
    fn resolve_single(&self, owner: &str, selector: &ExpenseSelector) -> Result<Expense, DispatchError> {
        let date = selector
            .date
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(parse_date)
            .transpose()?;
        let amount = selector.amount.map(normalize_amount);

        let candidates = self.store.find_candidates(owner, date, amount)?;
        let mut matches = narrow_candidates(candidates, selector);

        match matches.len() {
            0 => Err(DispatchError::NotFound),
            1 => Ok(matches.remove(0)),
            n => Err(DispatchError::Ambiguous(n)),
        }
    }

    async fn send_receipt(
        &self,
        params: SendReceiptParams,
        request: &DispatchRequest<'_>,
    ) -> DispatchResult {
        let filter = params.filter.filter(|f| !f.is_empty()).ok_or_else(|| {
            DispatchError::Validation(
                "Which receipt do you need? Tell me the expense's date, merchant or amount."
                    .to_string(),
            )
        })?;
        let expense = self.resolve_single(&request.owner.account_id, &filter)?;

        let Some(reference) = expense.receipt_ref.as_deref() else {
            return Err(DispatchError::NoReceipt(expense.describe()));
        };
        let attachment = self
            .receipts
            .fetch(reference, expense.receipt_filename.as_deref())
            .await?;

        Ok(DispatchOutcome::with_attachment(
            format!("Here is the receipt.\n{}", expense.describe()),
            attachment,
        ))
    }

    fn export(&self, params: ExportParams, request: &DispatchRequest<'_>) -> DispatchResult {
        let format = params
            .format
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| {
                DispatchError::Validation(
                    "Which format would you like the export in: pdf, csv or excel?".to_string(),
                )
            })?;
        let format = ExportFormat::from_str(format).map_err(|_| {
            DispatchError::Validation(format!(
                "I can't export to \"{}\". Choose pdf, csv or excel.",
                format
            ))
        })?;

        let filter = ExpenseListFilter {
            from: optional_date(params.date_from.as_deref())?,
            to: optional_date(params.date_to.as_deref())?,
            category_ids: self.resolve_export_categories(
                params.business_purpose_ids.as_deref().unwrap_or_default(),
            )?,
            merchant: None,
        };
        let expenses = self
            .store
            .list_expenses(&request.owner.account_id, &filter)?;
        let report = Report::from_expenses(&expenses, filter.from, filter.to, request.now);
        let attachment = export::render(format, &report)?;

        info!(
            "Exported {} expenses as {} for {}",
            expenses.len(),
            format,
            request.owner.account_id
        );
        Ok(DispatchOutcome::with_attachment(
            format!(
                "Here is your {} export: {} expense{}, total ${}.",
                format.as_str().to_uppercase(),
                expenses.len(),
                if expenses.len() == 1 { "" } else { "s" },
                format_amount(report.total)
            ),
            attachment,
        ))
    }

    /// Entries may be category ids or names (case-insensitive exact)
    fn resolve_export_categories(&self, entries: &[String]) -> Result<Vec<String>, DispatchError> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut unknown = Vec::new();
        for entry in entries.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            let category = match self.store.get_category(entry)? {
                Some(category) => Some(category),
                None => self.store.find_category_by_name(entry)?,
            };
            match category {
                Some(category) => ids.push(category.id),
                None => unknown.push(format!("\"{}\"", entry)),
            }
        }
        if unknown.is_empty() {
            return Ok(ids);
        }

        let mut categories = self.store.list_categories()?;
        sort_categories_for_display(&mut categories);
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        Err(DispatchError::Validation(format!(
            "I don't know the business purpose {}. Choose from: {}.",
            unknown.join(", "),
            names.join(", ")
        )))
    }

    // ============ Business purposes ============

    fn add_business_purpose(
        &self,
        params: PurposeParams,
        request: &DispatchRequest<'_>,
    ) -> DispatchResult {
        let name = required_purpose_name(&params)?;
        let pending = self.store.create_pending_request(
            &request.owner.account_id,
            request.channel_user_id,
            name,
        )?;
        Ok(DispatchOutcome::text(format!(
            "Add \"{}\" as a new business purpose? Reply yes to confirm or no to cancel.",
            pending.proposed_name
        )))
    }

    fn confirm_business_purpose(&self, request: &DispatchRequest<'_>) -> DispatchResult {
        let owner = &request.owner.account_id;
        let pending = self
            .store
            .latest_pending_request(owner, request.channel_user_id)?
            .ok_or(DispatchError::NothingToConfirm)?;

        if let Some(existing) = self.store.find_category_by_name(&pending.proposed_name)? {
            self.store
                .set_request_status(&pending.id, RequestStatus::Cancelled)?;
            return Ok(DispatchOutcome::text(format!(
                "A business purpose named \"{}\" already exists, so nothing was added.",
                existing.name
            )));
        }

        let category = self.store.insert_category(&pending.proposed_name, owner)?;
        self.store
            .set_request_status(&pending.id, RequestStatus::Confirmed)?;
        info!("Business purpose {:?} created by {}", category.name, owner);

        Ok(DispatchOutcome::text(format!(
            "Business purpose \"{}\" added.",
            category.name
        )))
    }

    fn cancel_business_purpose(&self, request: &DispatchRequest<'_>) -> DispatchResult {
        match self
            .store
            .latest_pending_request(&request.owner.account_id, request.channel_user_id)?
        {
            Some(pending) => {
                self.store
                    .set_request_status(&pending.id, RequestStatus::Cancelled)?;
                Ok(DispatchOutcome::text(format!(
                    "Okay, I won't add \"{}\".",
                    pending.proposed_name
                )))
            }
            None => Ok(DispatchOutcome::text(
                "There is no pending business purpose request to cancel.",
            )),
        }
    }

    fn list_business_purposes(&self) -> DispatchResult {
        let mut categories = self.store.list_categories()?;
        sort_categories_for_display(&mut categories);

        let (defaults, custom): (Vec<_>, Vec<_>) =
            categories.iter().partition(|c| c.is_default);

        let mut text = String::from("Default business purposes:");
        for category in &defaults {
            text.push_str(&format!("\n- {}", category.name));
        }
        if !custom.is_empty() {
            text.push_str("\n\nCustom business purposes:");
            for category in &custom {
                text.push_str(&format!("\n- {}", category.name));
            }
        }
        Ok(DispatchOutcome::text(text))
    }

    fn remove_business_purpose(
        &self,
        params: PurposeParams,
        request: &DispatchRequest<'_>,
    ) -> DispatchResult {
        let name = required_purpose_name(&params)?;
        let category = self
            .store
            .find_category_by_name(name)?
            .ok_or_else(|| DispatchError::UnknownCategory(name.to_string()))?;

        if category.is_default {
            return Err(DispatchError::Permission(format!(
                "\"{}\" is a default business purpose and cannot be removed.",
                category.name
            )));
        }
        if category.created_by.as_deref() != Some(request.owner.account_id.as_str()) {
            return Err(DispatchError::Permission(format!(
                "You can only remove business purposes you created, and \"{}\" was added by someone else.",
                category.name
            )));
        }
        let count = self.store.count_expenses_for_category(&category.id)?;
        if count > 0 {
            return Err(DispatchError::InUse {
                name: category.name,
                count,
            });
        }

        self.store.delete_category(&category.id)?;
        info!(
            "Business purpose {:?} removed by {}",
            category.name, request.owner.account_id
        );
        Ok(DispatchOutcome::text(format!(
            "Business purpose \"{}\" removed.",
            category.name
        )))
    }
}

fn passthrough(params: TextParams, raw_reply: &str) -> DispatchOutcome {
    match params.text.as_deref().map(clean_display_text) {
        Some(text) if !text.is_empty() => DispatchOutcome::text(text),
        _ => DispatchOutcome::text(raw_reply),
    }
}

/// In-process narrowing: case-insensitive substring on merchant and category
fn narrow_candidates(candidates: Vec<Expense>, selector: &ExpenseSelector) -> Vec<Expense> {
    let merchant = selector
        .merchant
        .as_deref()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty());
    let category = selector
        .business_purpose
        .as_deref()
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty());

    candidates
        .into_iter()
        .filter(|e| {
            merchant
                .as_deref()
                .map_or(true, |m| e.merchant_name.to_lowercase().contains(m))
        })
        .filter(|e| {
            category.as_deref().map_or(true, |c| {
                e.category_label
                    .as_deref()
                    .is_some_and(|label| label.to_lowercase().contains(c))
            })
        })
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required_purpose_name(params: &PurposeParams) -> Result<&str, DispatchError> {
    non_blank(params.purpose_name.as_deref()).ok_or_else(|| {
        DispatchError::Validation("Please tell me the name of the business purpose.".to_string())
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, DispatchError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        DispatchError::Validation(format!(
            "\"{}\" is not a valid date. Please use the format YYYY-MM-DD.",
            raw
        ))
    })
}

fn optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>, DispatchError> {
    non_blank(raw).map(parse_date).transpose()
}

fn positive_amount(amount: Decimal) -> Result<Decimal, DispatchError> {
    let amount = normalize_amount(amount);
    if amount <= Decimal::ZERO {
        return Err(DispatchError::Validation(format!(
            "The amount must be greater than zero, got {}.",
            amount
        )));
    }
    Ok(amount)
}
