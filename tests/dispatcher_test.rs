//! Intent Dispatcher Integration Tests
//!
//! Drives classifier replies through the dispatcher against an in-memory store.

use chrono::{NaiveDate, TimeZone, Utc};
use expensebot::dispatcher::{DispatchOutcome, DispatchRequest, IntentDispatcher};
use expensebot::intent::ClassifierReply;
use expensebot::models::{ExpenseListFilter, NewExpense};
use expensebot::owner::{Actor, ResolvedOwner};
use expensebot::receipts::{Attachment, ReceiptFetcher};
use expensebot::store::ExpenseStore;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

const ACCOUNT: &str = "acct-1";
const SENDER: i64 = 42;

struct Harness {
    store: Arc<ExpenseStore>,
    dispatcher: IntentDispatcher,
    owner: ResolvedOwner,
}

impl Harness {
    fn new() -> Self {
        Self::for_account(Arc::new(ExpenseStore::open_in_memory().unwrap()), ACCOUNT)
    }

    fn for_account(store: Arc<ExpenseStore>, account: &str) -> Self {
        Self {
            dispatcher: IntentDispatcher::new(store.clone(), ReceiptFetcher::default()),
            store,
            owner: ResolvedOwner {
                account_id: account.to_string(),
                actor: Actor::Owner,
            },
        }
    }

    async fn send(&self, raw: &str) -> DispatchOutcome {
        self.send_with(raw, None).await
    }

    async fn send_with(&self, raw: &str, attachment: Option<&Attachment>) -> DispatchOutcome {
        let request = DispatchRequest {
            owner: &self.owner,
            channel_user_id: SENDER,
            attachment,
            raw_reply: raw,
            now: Utc.with_ymd_and_hms(2024, 7, 20, 12, 0, 0).unwrap(),
        };
        self.dispatcher
            .dispatch(ClassifierReply::parse(raw), &request)
            .await
    }

    fn seed(&self, date: &str, merchant: &str, amount: &str, category: Option<&str>) -> String {
        let category_id = category.map(|name| {
            self.store
                .find_category_by_name(name)
                .unwrap()
                .expect("category exists")
                .id
        });
        self.store
            .insert_expense(&NewExpense {
                owner_account_id: self.owner.account_id.clone(),
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                merchant_name: merchant.to_string(),
                amount: Decimal::from_str(amount).unwrap(),
                category_id,
                receipt: None,
            })
            .unwrap()
            .id
    }

    fn expenses(&self) -> Vec<expensebot::models::Expense> {
        self.store
            .list_expenses(&self.owner.account_id, &ExpenseListFilter::default())
            .unwrap()
    }
}

fn receipt_photo() -> Attachment {
    Attachment {
        filename: "receipt.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: b"fake jpeg bytes".to_vec(),
    }
}

#[tokio::test]
async fn test_create_with_category_label() {
    let h = Harness::new();
    let outcome = h
        .send(
            r#"Sure! {"action":"create","amount":25.30,"date":"2024-07-19","merchant":"Joe's Diner","business_purpose":"food"}"#,
        )
        .await;

    assert!(outcome.text.starts_with("Expense recorded."), "{}", outcome.text);
    assert!(outcome.text.contains("Amount: $25.30"));
    assert!(outcome.text.contains("Business purpose: Food"));

    let expenses = h.expenses();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].merchant_name, "Joe's Diner");
    assert_eq!(expenses[0].amount, Decimal::from_str("25.30").unwrap());
    assert_eq!(expenses[0].category_label.as_deref(), Some("Food"));
}

#[tokio::test]
async fn test_create_missing_fields_writes_nothing() {
    let h = Harness::new();
    let outcome = h
        .send(r#"{"action":"create","amount":12,"merchant":"Cafe"}"#)
        .await;
    assert!(outcome.text.contains("date is missing"), "{}", outcome.text);
    assert!(h.expenses().is_empty());
}

#[tokio::test]
async fn test_create_unknown_category_saves_uncategorized() {
    let h = Harness::new();
    let outcome = h
        .send(r#"{"action":"create","amount":"8.00","date":"2024-07-19","merchant":"Kiosk","business_purpose":"Snacks"}"#)
        .await;
    assert!(outcome.text.contains("\"Snacks\" doesn't exist"));
    let expenses = h.expenses();
    assert_eq!(expenses.len(), 1);
    assert!(expenses[0].category_id.is_none());
}

#[tokio::test]
async fn test_duplicate_receipt_is_rejected() {
    let h = Harness::new();
    let photo = receipt_photo();
    let create = r#"{"action":"create","amount":25.30,"date":"2024-07-19","merchant":"Joe's Diner"}"#;

    let first = h.send_with(create, Some(&photo)).await;
    assert!(first.text.contains("Receipt attached."));

    let second = h.send_with(create, Some(&photo)).await;
    assert!(second.text.contains("already been uploaded"), "{}", second.text);
    assert!(second.text.contains("Joe's Diner"));
    assert_eq!(h.expenses().len(), 1);
}

#[tokio::test]
async fn test_edit_single_match() {
    let h = Harness::new();
    let id = h.seed("2024-07-19", "Joe's Diner", "25.30", Some("Food"));
    h.seed("2024-07-19", "Gas Station", "40.00", Some("Transportation"));

    let outcome = h
        .send(r#"{"action":"edit","filter":{"date":"2024-07-19","merchant":"joe"},"fields_to_update":{"total_amount":27.5}}"#)
        .await;
    assert!(outcome.text.starts_with("Expense updated."), "{}", outcome.text);

    let updated = h.store.get_expense(ACCOUNT, &id).unwrap().unwrap();
    assert_eq!(updated.amount, Decimal::from_str("27.50").unwrap());
    assert_eq!(updated.merchant_name, "Joe's Diner");
    assert_eq!(updated.category_label.as_deref(), Some("Food"));
}

#[tokio::test]
async fn test_edit_zero_and_multiple_matches_change_nothing() {
    let h = Harness::new();
    h.seed("2024-07-19", "Coffee Shop", "4.50", None);
    h.seed("2024-07-19", "Coffee Cart", "4.50", None);

    let none = h
        .send(r#"{"action":"edit","filter":{"merchant":"bakery"},"fields_to_update":{"merchant_name":"Bakery"}}"#)
        .await;
    assert!(none.text.contains("couldn't find an expense"), "{}", none.text);

    let many = h
        .send(r#"{"action":"edit","filter":{"amount":4.5,"merchant":"coffee"},"fields_to_update":{"merchant_name":"Cafe"}}"#)
        .await;
    assert!(many.text.contains("found 2 expenses"), "{}", many.text);

    assert!(h.expenses().iter().all(|e| e.merchant_name.starts_with("Coffee")));
}

#[tokio::test]
async fn test_edit_unknown_category_only_is_a_no_op() {
    let h = Harness::new();
    let id = h.seed("2024-07-19", "Joe's Diner", "25.30", Some("Food"));

    let outcome = h
        .send(r#"{"action":"edit","filter":{"merchant":"Joe"},"fields_to_update":{"business_purpose":"Entertainment"}}"#)
        .await;
    assert!(outcome.text.contains("Valid business purposes: Food"));
    assert!(outcome.text.ends_with("No changes were made."));

    let unchanged = h.store.get_expense(ACCOUNT, &id).unwrap().unwrap();
    assert_eq!(unchanged.category_label.as_deref(), Some("Food"));
}

#[tokio::test]
async fn test_edit_does_not_touch_other_accounts() {
    let store = Arc::new(ExpenseStore::open_in_memory().unwrap());
    let mine = Harness::for_account(store.clone(), ACCOUNT);
    let theirs = Harness::for_account(store, "acct-2");
    theirs.seed("2024-07-19", "Joe's Diner", "25.30", None);

    let outcome = mine
        .send(r#"{"action":"edit","filter":{"merchant":"Joe"},"fields_to_update":{"total_amount":1}}"#)
        .await;
    assert!(outcome.text.contains("couldn't find an expense"));
    assert_eq!(
        theirs.expenses()[0].amount,
        Decimal::from_str("25.30").unwrap()
    );
}

#[tokio::test]
async fn test_add_then_confirm_creates_category() {
    let h = Harness::new();

    let asked = h
        .send(r#"{"action":"add_business_purpose","purpose_name":"Client Gifts"}"#)
        .await;
    assert!(asked.text.contains("Add \"Client Gifts\""));
    assert!(h.store.find_category_by_name("client gifts").unwrap().is_none());

    let confirmed = h.send(r#"{"action":"confirm_business_purpose"}"#).await;
    assert_eq!(confirmed.text, "Business purpose \"Client Gifts\" added.");

    let category = h.store.find_category_by_name("CLIENT GIFTS").unwrap().unwrap();
    assert!(!category.is_default);
    assert_eq!(category.created_by.as_deref(), Some(ACCOUNT));

    // The request is consumed
    let again = h.send(r#"{"action":"confirm_business_purpose"}"#).await;
    assert!(again.text.contains("no pending business purpose"));
}

#[tokio::test]
async fn test_confirm_and_cancel_with_nothing_pending() {
    let h = Harness::new();
    let before = h.store.list_categories().unwrap().len();

    let confirm = h.send(r#"{"action":"confirm_business_purpose"}"#).await;
    assert!(confirm.text.contains("no pending business purpose to confirm"));
    let cancel = h.send(r#"{"action":"cancel_business_purpose"}"#).await;
    assert!(cancel.text.contains("no pending business purpose request to cancel"));

    assert_eq!(h.store.list_categories().unwrap().len(), before);
}

#[tokio::test]
async fn test_cancel_pending_request() {
    let h = Harness::new();
    h.send(r#"{"action":"add_business_purpose","purpose_name":"Parking"}"#)
        .await;
    let cancelled = h.send(r#"{"action":"cancel_business_purpose"}"#).await;
    assert_eq!(cancelled.text, "Okay, I won't add \"Parking\".");

    let confirm = h.send(r#"{"action":"confirm_business_purpose"}"#).await;
    assert!(confirm.text.contains("no pending"));
    assert!(h.store.find_category_by_name("Parking").unwrap().is_none());
}

#[tokio::test]
async fn test_list_defaults_before_custom() {
    let h = Harness::new();
    h.store.insert_category("Advertising", ACCOUNT).unwrap();

    let outcome = h.send(r#"{"action":"list_business_purposes"}"#).await;
    let defaults_at = outcome.text.find("Default business purposes:").unwrap();
    let custom_at = outcome.text.find("Custom business purposes:").unwrap();
    let food_at = outcome.text.find("- Food").unwrap();
    let advertising_at = outcome.text.find("- Advertising").unwrap();

    assert!(defaults_at < food_at);
    assert!(food_at < custom_at);
    assert!(custom_at < advertising_at);
}

#[tokio::test]
async fn test_remove_default_is_refused() {
    let h = Harness::new();
    let outcome = h
        .send(r#"{"action":"remove_business_purpose","purpose_name":"food"}"#)
        .await;
    assert!(outcome.text.contains("default business purpose"));
    assert!(h.store.find_category_by_name("Food").unwrap().is_some());
}

#[tokio::test]
async fn test_remove_in_use_then_unused() {
    let h = Harness::new();
    h.store.insert_category("Client Gifts", ACCOUNT).unwrap();
    let id = h.seed("2024-07-19", "Florist", "60.00", Some("Client Gifts"));

    let refused = h
        .send(r#"{"action":"remove_business_purpose","purpose_name":"Client Gifts"}"#)
        .await;
    assert!(refused.text.contains("in use by 1 expense"), "{}", refused.text);

    h.send(r#"{"action":"edit","filter":{"merchant":"Florist"},"fields_to_update":{"business_purpose":"Other"}}"#)
        .await;
    let expense = h.store.get_expense(ACCOUNT, &id).unwrap().unwrap();
    assert_eq!(expense.category_label.as_deref(), Some("Other"));

    let removed = h
        .send(r#"{"action":"remove_business_purpose","purpose_name":"client gifts"}"#)
        .await;
    assert_eq!(removed.text, "Business purpose \"Client Gifts\" removed.");
}

#[tokio::test]
async fn test_remove_someone_elses_category_is_refused() {
    let h = Harness::new();
    h.store.insert_category("Advertising", "acct-2").unwrap();
    let outcome = h
        .send(r#"{"action":"remove_business_purpose","purpose_name":"Advertising"}"#)
        .await;
    assert!(outcome.text.contains("only remove business purposes you created"));
    assert!(h.store.find_category_by_name("Advertising").unwrap().is_some());
}

#[tokio::test]
async fn test_send_receipt_returns_stored_file() {
    let h = Harness::new();
    let photo = receipt_photo();
    h.send_with(
        r#"{"action":"create","amount":9.99,"date":"2024-07-18","merchant":"Hardware Store"}"#,
        Some(&photo),
    )
    .await;

    let outcome = h
        .send(r#"{"action":"send_receipt","filter":{"merchant":"hardware"}}"#)
        .await;
    let attachment = outcome.attachment.expect("receipt attached");
    assert_eq!(attachment.bytes, photo.bytes);
    assert_eq!(attachment.content_type, "image/jpeg");

    h.seed("2024-07-18", "Bookshop", "15.00", None);
    let missing = h
        .send(r#"{"action":"send_receipt","filter":{"merchant":"bookshop"}}"#)
        .await;
    assert!(missing.text.contains("no receipt attached"));
    assert!(missing.attachment.is_none());
}

#[tokio::test]
async fn test_export_csv_respects_range() {
    let h = Harness::new();
    h.seed("2024-06-30", "Old Diner", "5.00", Some("Food"));
    h.seed("2024-07-02", "Joe's Diner", "25.30", Some("Food"));
    h.seed("2024-07-15", "Gas Station", "40.00", Some("Transportation"));

    let outcome = h
        .send(r#"{"action":"export","format":"csv","dateFrom":"2024-07-01","dateTo":"2024-07-31"}"#)
        .await;
    assert!(outcome.text.contains("2 expenses, total $65.30"), "{}", outcome.text);

    let attachment = outcome.attachment.expect("export attached");
    assert!(attachment.filename.ends_with(".csv"));
    let body = String::from_utf8(attachment.bytes).unwrap();
    assert!(body.contains("Joe's Diner"));
    assert!(body.contains("Gas Station"));
    assert!(!body.contains("Old Diner"));
}

#[tokio::test]
async fn test_export_filters_by_business_purpose_name() {
    let h = Harness::new();
    h.seed("2024-07-02", "Joe's Diner", "12.34", Some("Food"));
    h.seed("2024-07-15", "Gas Station", "40.00", Some("Transportation"));

    let outcome = h
        .send(r#"{"action":"export","format":"csv","businessPurposeIds":["food"]}"#)
        .await;
    assert!(outcome.text.contains("1 expense, total $12.34"), "{}", outcome.text);
    let body = String::from_utf8(outcome.attachment.expect("export attached").bytes).unwrap();
    assert!(body.contains("Joe's Diner"));
    assert!(!body.contains("Gas Station"));

    // Ids still work
    let transport = h
        .store
        .find_category_by_name("Transportation")
        .unwrap()
        .unwrap();
    let raw = format!(
        r#"{{"action":"export","format":"csv","businessPurposeIds":["{}"]}}"#,
        transport.id
    );
    let outcome = h.send(&raw).await;
    assert!(outcome.text.contains("1 expense, total $40.00"), "{}", outcome.text);
}

#[tokio::test]
async fn test_export_unknown_business_purpose_lists_valid_names() {
    let h = Harness::new();
    h.seed("2024-07-02", "Joe's Diner", "12.34", Some("Food"));

    let outcome = h
        .send(r#"{"action":"export","format":"csv","businessPurposeIds":["Yachts"]}"#)
        .await;
    assert!(outcome.attachment.is_none());
    assert!(outcome.text.contains("\"Yachts\""), "{}", outcome.text);
    assert!(outcome.text.contains("Food"));
    assert!(outcome.text.contains("Transportation"));
}

#[tokio::test]
async fn test_export_rejects_unknown_format() {
    let h = Harness::new();
    let outcome = h.send(r#"{"action":"export","format":"docx"}"#).await;
    assert!(outcome.text.contains("Choose pdf, csv or excel"));
    assert!(outcome.attachment.is_none());
}

#[tokio::test]
async fn test_summary_strips_ids() {
    let h = Harness::new();
    let outcome = h
        .send(r#"{"action":"summary","text":"You spent $25.30 at Joe's Diner [id: 1234]"}"#)
        .await;
    assert_eq!(outcome.text, "You spent $25.30 at Joe's Diner");
}

#[tokio::test]
async fn test_reply_correction_changes_only_amount() {
    let h = Harness::new();
    let target = h.seed("2025-07-25", "Grab", "25.3", Some("Transportation"));
    let other = h.seed("2025-07-25", "Grab", "8.00", Some("Transportation"));

    let outcome = h
        .send(r#"{"action":"edit","filter":{"amount":25.3,"merchant":"Grab","date":"2025-07-25"},"fields_to_update":{"total_amount":15}}"#)
        .await;
    assert!(outcome.text.contains("Amount: $15.00"), "{}", outcome.text);

    let updated = h.store.get_expense(ACCOUNT, &target).unwrap().unwrap();
    assert_eq!(updated.amount, Decimal::from(15));
    assert_eq!(updated.merchant_name, "Grab");
    assert_eq!(updated.date, NaiveDate::from_ymd_opt(2025, 7, 25).unwrap());
    assert_eq!(updated.category_label.as_deref(), Some("Transportation"));

    let untouched = h.store.get_expense(ACCOUNT, &other).unwrap().unwrap();
    assert_eq!(untouched.amount, Decimal::from(8));
}
