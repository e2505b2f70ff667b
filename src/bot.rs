//! Bot Pipeline
//!
//! One inbound chat message runs sequentially through owner resolution,
//! context assembly, classification, dispatch and the conversation log.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::context::{ContextAssembler, ContextRequest};
use crate::dispatcher::{DispatchOutcome, DispatchRequest, IntentDispatcher};
use crate::error::{BotError, INTERNAL_ERROR_MESSAGE};
use crate::intent::ClassifierReply;
use crate::llm::{ClassifierRequest, IntentClassifier};
use crate::models::{NewTurn, TurnKind};
use crate::owner::{resolve_owner, ChannelContext};
use crate::prompt;
use crate::receipts::{Attachment, ReceiptFetcher};
use crate::store::ExpenseStore;

const EMPTY_MESSAGE_HINT: &str = "Send me an expense like \"$12.34 at Joe's Diner yesterday\", \
     a photo of a receipt, or a question about your spending.";

/// A message from any chat channel
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub sender_id: i64,
    pub chat_id: i64,
    pub is_group: bool,
    /// Message text or photo caption
    pub text: Option<String>,
    pub image: Option<Attachment>,
    /// Text of the message this one replies to
    pub replied_to_text: Option<String>,
}

impl InboundMessage {
    fn text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or_default()
    }
}

/// Answer for the channel adapter
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl BotReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }
}

impl From<DispatchOutcome> for BotReply {
    fn from(outcome: DispatchOutcome) -> Self {
        Self {
            text: outcome.text,
            attachment: outcome.attachment,
        }
    }
}

pub struct ExpenseBot {
    store: Arc<ExpenseStore>,
    classifier: Arc<dyn IntentClassifier>,
    dispatcher: IntentDispatcher,
}

impl ExpenseBot {
    pub fn new(
        store: Arc<ExpenseStore>,
        classifier: Arc<dyn IntentClassifier>,
        receipts: ReceiptFetcher,
    ) -> Self {
        Self {
            dispatcher: IntentDispatcher::new(store.clone(), receipts),
            store,
            classifier,
        }
    }

    pub fn store(&self) -> &Arc<ExpenseStore> {
        &self.store
    }

    pub async fn handle(&self, message: InboundMessage) -> Result<BotReply, BotError> {
        self.handle_at(message, Utc::now()).await
    }

    /// Process one message as of `now`
    pub async fn handle_at(
        &self,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<BotReply, BotError> {
        let channel = match ChannelContext::load(
            &self.store,
            message.sender_id,
            message.chat_id,
            message.is_group,
        ) {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to load channel context for {}: {:#}", message.sender_id, e);
                return Ok(BotReply::text(INTERNAL_ERROR_MESSAGE));
            }
        };

        let owner = match resolve_owner(&channel) {
            Ok(owner) => owner,
            Err(e) => {
                info!("Message from {} not accepted: {}", message.sender_id, e);
                return Ok(BotReply::text(e.user_message()));
            }
        };

        let text = message.text();
        if text.is_empty() && message.image.is_none() {
            return Ok(BotReply::text(EMPTY_MESSAGE_HINT));
        }

        let (content, kind) = match &message.image {
            Some(_) if text.is_empty() => ("[image]".to_string(), TurnKind::Image),
            Some(_) => (format!("[image] {}", text), TurnKind::Image),
            None => (text.to_string(), TurnKind::Text),
        };

        let context = ContextAssembler::new(&self.store).assemble(
            &ContextRequest {
                account_id: &owner.account_id,
                channel_user_id: message.sender_id,
                message: text,
                replied_to: message.replied_to_text.as_deref(),
            },
            now,
        );
        debug!("Assembled context: {} chars", context.len());

        let instructions = prompt::system_prompt(now.date_naive());
        let classified = self
            .classifier
            .classify(ClassifierRequest {
                instructions: &instructions,
                context: &context,
                message: text,
                image: message.image.as_ref(),
            })
            .await;

        let outcome = match classified {
            Ok(raw) => {
                let reply = ClassifierReply::parse(&raw);
                self.dispatcher
                    .dispatch(
                        reply,
                        &DispatchRequest {
                            owner: &owner,
                            channel_user_id: message.sender_id,
                            attachment: message.image.as_ref(),
                            raw_reply: &raw,
                            now,
                        },
                    )
                    .await
            }
            Err(e) => {
                error!("Classifier call failed: {:#}", e);
                DispatchOutcome::text(INTERNAL_ERROR_MESSAGE)
            }
        };

        self.store
            .append_turn(&NewTurn {
                channel_user_id: message.sender_id,
                account_id: owner.account_id.clone(),
                content,
                kind,
                original_content: message.text.clone().unwrap_or_default(),
                response: outcome.text.clone(),
            })
            .map_err(BotError::Persist)?;

        Ok(outcome.into())
    }
}
