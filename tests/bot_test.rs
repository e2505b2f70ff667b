//! Bot Pipeline Integration Tests
//!
//! Runs whole messages through owner resolution, context assembly, a scripted
//! classifier, dispatch and the conversation log.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use expensebot::bot::{ExpenseBot, InboundMessage};
use expensebot::error::INTERNAL_ERROR_MESSAGE;
use expensebot::llm::{ClassifierRequest, IntentClassifier};
use expensebot::models::ExpenseListFilter;
use expensebot::owner::{grant_assistant, register_group, DelegationError};
use expensebot::receipts::ReceiptFetcher;
use expensebot::store::ExpenseStore;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const OWNER: i64 = 100;
const ASSISTANT: i64 = 200;
const GROUP: i64 = -5000;

/// Answers with queued replies, remembering the context it was given
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<String, String>>>,
    contexts: Mutex<Vec<String>>,
}

impl Scripted {
    fn push(&self, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
    }

    fn fail(&self, error: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(error.to_string()));
    }

    fn last_context(&self) -> String {
        self.contexts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl IntentClassifier for Scripted {
    async fn classify(&self, request: ClassifierRequest<'_>) -> anyhow::Result<String> {
        self.contexts.lock().unwrap().push(request.context.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => anyhow::bail!("no scripted reply"),
        }
    }
}

fn setup() -> (ExpenseBot, Arc<Scripted>) {
    let store = Arc::new(ExpenseStore::open_in_memory().unwrap());
    store.upsert_channel_link(OWNER, "acct-owner", Some("owner")).unwrap();
    let classifier = Arc::new(Scripted::default());
    let bot = ExpenseBot::new(store, classifier.clone(), ReceiptFetcher::default());
    (bot, classifier)
}

fn private(sender: i64, text: &str) -> InboundMessage {
    InboundMessage {
        sender_id: sender,
        chat_id: sender,
        text: Some(text.to_string()),
        ..Default::default()
    }
}

fn in_group(sender: i64, text: &str) -> InboundMessage {
    InboundMessage {
        sender_id: sender,
        chat_id: GROUP,
        is_group: true,
        text: Some(text.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_then_reply_to_edit() {
    let (bot, classifier) = setup();
    let now = Utc.with_ymd_and_hms(2024, 7, 20, 9, 0, 0).unwrap();

    classifier.push(
        r#"{"action":"create","amount":12.34,"date":"2024-07-19","merchant":"Joe's Diner","business_purpose":"Food"}"#,
    );
    let created = bot
        .handle_at(private(OWNER, "$12.34 at Joe's Diner yesterday"), now)
        .await
        .unwrap();
    assert!(created.text.starts_with("Expense recorded."));

    classifier.push(
        r#"{"action":"edit","filter":{"date":"2024-07-19","merchant":"Joe's Diner","amount":12.34},"fields_to_update":{"total_amount":14.34}}"#,
    );
    let mut correction = private(OWNER, "actually it was 14.34");
    correction.replied_to_text = Some(created.text.clone());
    let edited = bot.handle_at(correction, now).await.unwrap();
    assert!(edited.text.starts_with("Expense updated."), "{}", edited.text);

    let context = classifier.last_context();
    assert!(context.contains("The user is replying to this message:"));
    assert!(context.contains("Amount: $12.34, Merchant: Joe's Diner"));
    assert!(context.contains("[Previous conversation:]"));

    let expenses = bot
        .store()
        .list_expenses("acct-owner", &ExpenseListFilter::default())
        .unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].amount, Decimal::from_str("14.34").unwrap());

    let turns = bot.store().recent_turns("acct-owner", OWNER, 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].content, "actually it was 14.34");
    assert_eq!(turns[1].response, edited.text);
}

#[tokio::test]
async fn test_classifier_failure_is_hidden_and_recorded() {
    let (bot, classifier) = setup();
    classifier.fail("connection reset by peer");

    let reply = bot.handle(private(OWNER, "lunch $9")).await.unwrap();
    assert_eq!(reply.text, INTERNAL_ERROR_MESSAGE);

    let turns = bot.store().recent_turns("acct-owner", OWNER, 10).unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].response, INTERNAL_ERROR_MESSAGE);
}

#[tokio::test]
async fn test_pending_request_survives_between_messages() {
    let (bot, classifier) = setup();

    classifier.push(r#"{"action":"add_business_purpose","purpose_name":"Client Gifts"}"#);
    bot.handle(private(OWNER, "add a business purpose called Client Gifts"))
        .await
        .unwrap();

    classifier.push(r#"{"action":"confirm_business_purpose"}"#);
    let reply = bot.handle(private(OWNER, "yes")).await.unwrap();
    assert_eq!(reply.text, "Business purpose \"Client Gifts\" added.");
    assert!(classifier
        .last_context()
        .contains("Pending business purpose request awaiting confirmation: \"Client Gifts\""));
}

#[tokio::test]
async fn test_group_messages_need_registration_and_delegation() {
    let (bot, classifier) = setup();
    let store = bot.store().clone();

    let unregistered = bot.handle(in_group(OWNER, "lunch $9")).await.unwrap();
    assert!(unregistered.text.contains("/register"));

    store
        .register_group(GROUP, "acct-owner", Some("Team"))
        .unwrap();
    let stranger = bot.handle(in_group(ASSISTANT, "lunch $9")).await.unwrap();
    assert!(stranger.text.contains("not a personal assistant"));
    assert!(classifier.contexts.lock().unwrap().is_empty());

    tokio_test::assert_ok!(grant_assistant(&store, "acct-owner", ASSISTANT, GROUP));
    classifier.push(
        r#"{"action":"create","amount":9,"date":"2024-07-19","merchant":"Sandwich Bar"}"#,
    );
    let recorded = bot.handle(in_group(ASSISTANT, "lunch $9")).await.unwrap();
    assert!(recorded.text.starts_with("Expense recorded."), "{}", recorded.text);

    // Recorded on the group owner's account
    let expenses = store
        .list_expenses("acct-owner", &ExpenseListFilter::default())
        .unwrap();
    assert_eq!(expenses.len(), 1);
    assert_eq!(expenses[0].merchant_name, "Sandwich Bar");
}

#[tokio::test]
async fn test_group_stays_with_first_owner() {
    let (bot, classifier) = setup();
    let store = bot.store().clone();
    store.upsert_channel_link(ASSISTANT, "acct-other", None).unwrap();

    register_group(&store, "acct-owner", GROUP, Some("Team")).unwrap();
    tokio_test::assert_ok!(grant_assistant(&store, "acct-owner", 300, GROUP));
    assert!(matches!(
        register_group(&store, "acct-other", GROUP, Some("Team")),
        Err(DelegationError::NotGroupOwner { .. })
    ));

    // The other linked member still cannot act here
    let refused = bot.handle(in_group(ASSISTANT, "lunch $9")).await.unwrap();
    assert!(refused.text.contains("not a personal assistant"));

    // The existing grant keeps working for the real owner
    classifier.push(
        r#"{"action":"create","amount":9,"date":"2024-07-19","merchant":"Sandwich Bar"}"#,
    );
    let recorded = bot.handle(in_group(300, "lunch $9")).await.unwrap();
    assert!(recorded.text.starts_with("Expense recorded."), "{}", recorded.text);
    assert_eq!(
        store
            .list_expenses("acct-owner", &ExpenseListFilter::default())
            .unwrap()
            .len(),
        1
    );
    assert!(store
        .list_expenses("acct-other", &ExpenseListFilter::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_plain_text_reply_passes_through() {
    let (bot, classifier) = setup();
    classifier.push("You haven't recorded anything this week yet.");
    let reply = bot
        .handle(private(OWNER, "how much did I spend this week?"))
        .await
        .unwrap();
    assert_eq!(reply.text, "You haven't recorded anything this week yet.");
    assert!(reply.attachment.is_none());
}
