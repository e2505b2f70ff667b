//! Telegram channel adapter
//!
//! Long-polls Telegram and feeds every non-command message through the
//! shared [`ExpenseBot`] pipeline. Account management lives in commands:
//!
//! - `/link` issues a one-time token and a URL to finish linking on the web
//! - `/unlink` drops the chat identity's link
//! - `/register` makes a group chat belong to the sender's account
//! - `/assistant add|remove <user id>` manages personal assistants in a group
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::{Context, Result};
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    net::Download,
    prelude::*,
    types::{ChatAction, InputFile, Update},
};
use tracing::{debug, error, info, warn};

use crate::bot::{BotReply, InboundMessage};
use crate::config::Config;
use crate::linking::LINK_TOKEN_TTL_MINUTES;
use crate::owner::{grant_assistant, register_group, revoke_assistant, DelegationError};
use crate::receipts::{guess_content_type, Attachment};
use crate::server::AppState;

/// Telegram rejects messages longer than 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;

const HELP_TEXT: &str = "I keep track of your business expenses.\n\n\
    Just tell me about a purchase (\"$12.34 at Joe's Diner yesterday, client lunch\") \
    or send a photo of the receipt. You can also ask me to edit or remove an expense, \
    list or add business purposes, summarize your spending, or export a report.\n\n\
    Commands:\n\
    /link - Link this chat to your account\n\
    /unlink - Remove the link\n\
    /register - (groups) Track this group's expenses on your account\n\
    /assistant add <user id> - (groups) Let someone record expenses for you\n\
    /assistant remove <user id> - (groups) Revoke that permission\n\
    /help - Show this help";

struct TelegramData {
    state: Arc<AppState>,
    config: Config,
}

/// Run the Telegram adapter until Ctrl+C
pub async fn run_telegram_bot(config: Config, state: Arc<AppState>) -> Result<()> {
    let token = config
        .telegram_bot_token
        .clone()
        .context("TELEGRAM_BOT_TOKEN must be set for Telegram mode")?;

    let bot = Bot::new(token);

    info!("Verifying bot token...");
    let me = bot
        .get_me()
        .await
        .context("Telegram bot authentication failed")?;
    info!(
        "Bot authenticated: @{} (ID: {})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let data = Arc::new(TelegramData { state, config });
    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    info!("Starting dispatcher with long polling...");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![data])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    warn!("Dispatcher stopped");
    Ok(())
}

async fn message_handler(bot: Bot, msg: Message, data: Arc<TelegramData>) -> ResponseResult<()> {
    let chat_id = msg.chat.id;
    if let Err(e) = handle_message(&bot, &msg, &data).await {
        error!("Error handling message in chat {}: {:#}", chat_id, e);
        if let Err(e) = bot.send_message(chat_id, crate::error::INTERNAL_ERROR_MESSAGE).await {
            warn!("Failed to send error notice: {}", e);
        }
    }
    Ok(())
}

async fn handle_message(bot: &Bot, msg: &Message, data: &TelegramData) -> Result<()> {
    let Some(sender) = msg.from.as_ref() else {
        return Ok(());
    };
    if sender.is_bot {
        return Ok(());
    }
    let sender_id = sender.id.0 as i64;
    let is_group = msg.chat.is_group() || msg.chat.is_supergroup();

    let text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    if let Some(command) = text.as_deref().and_then(parse_command) {
        return handle_command(bot, msg, data, sender, is_group, command).await;
    }

    info!(
        "Message from user={} chat={} group={}",
        sender_id, msg.chat.id, is_group
    );

    let image = download_attachment(bot, msg).await?;
    if text.is_none() && image.is_none() {
        return Ok(());
    }

    bot.send_chat_action(msg.chat.id, ChatAction::Typing).await?;

    let replied_to_text = msg
        .reply_to_message()
        .and_then(|m| m.text().or_else(|| m.caption()))
        .map(str::to_string);

    let reply = data
        .state
        .bot
        .handle(InboundMessage {
            sender_id,
            chat_id: msg.chat.id.0,
            is_group,
            text,
            image,
            replied_to_text,
        })
        .await?;

    send_reply(bot, msg.chat.id, reply).await
}

/// A parsed `/command args` message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Command<'a> {
    name: &'a str,
    args: &'a str,
}

/// Split `/name@botname args`; anything not starting with `/` is not a command
fn parse_command(text: &str) -> Option<Command<'_>> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty() {
        return None;
    }
    Some(Command {
        name,
        args: args.trim(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssistantAction {
    Add,
    Remove,
}

/// `add 12345` / `remove 12345`; the id may come from a replied-to message instead
fn parse_assistant_args(args: &str) -> Option<(AssistantAction, Option<i64>)> {
    let mut parts = args.split_whitespace();
    let action = match parts.next()?.to_lowercase().as_str() {
        "add" | "grant" => AssistantAction::Add,
        "remove" | "revoke" => AssistantAction::Remove,
        _ => return None,
    };
    let target = match parts.next() {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    Some((action, target))
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    data: &TelegramData,
    sender: &teloxide::types::User,
    is_group: bool,
    command: Command<'_>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    let sender_id = sender.id.0 as i64;
    let store = &data.state.store;

    let response = match command.name {
        "start" | "help" => HELP_TEXT.to_string(),

        "link" => {
            if is_group {
                "Send /link to me in a private chat.".to_string()
            } else {
                let pending = data
                    .state
                    .links
                    .issue_token(sender_id, sender.username.as_deref())?;
                format!(
                    "Open this link within {} minutes to connect this chat to your account:\n{}",
                    LINK_TOKEN_TTL_MINUTES,
                    data.config.link_url(&pending.token)
                )
            }
        }

        "unlink" => {
            if store.delete_channel_link(sender_id)? {
                info!("Unlinked user {}", sender_id);
                "This chat is no longer linked to your account.".to_string()
            } else {
                "This chat isn't linked to an account.".to_string()
            }
        }

        "register" => {
            if !is_group {
                "Use /register inside the group chat you want to track.".to_string()
            } else {
                match store.find_channel_link(sender_id)? {
                    None => "Link your account first: send /link to me in a private chat."
                        .to_string(),
                    Some(link) => {
                        match register_group(store, &link.account_id, chat_id.0, msg.chat.title()) {
                            Ok(_) => {
                                info!("Registered group {} to {}", chat_id, link.account_id);
                                "This group's expenses will now be recorded on your account."
                                    .to_string()
                            }
                            Err(DelegationError::NotGroupOwner { .. }) => {
                                warn!(
                                    "User {} tried to register group {} owned by another account",
                                    sender_id, chat_id
                                );
                                "This group is already registered to another account.".to_string()
                            }
                            Err(DelegationError::GroupNotRegistered(_)) => {
                                "This group could not be registered.".to_string()
                            }
                            Err(DelegationError::Store(e)) => return Err(e),
                        }
                    }
                }
            }
        }

        "assistant" => assistant_command(msg, data, sender_id, is_group, command.args)?,

        _ => "Unknown command. Send /help for what I can do.".to_string(),
    };

    bot.send_message(chat_id, response).await?;
    Ok(())
}

fn assistant_command(
    msg: &Message,
    data: &TelegramData,
    sender_id: i64,
    is_group: bool,
    args: &str,
) -> Result<String> {
    const USAGE: &str = "Usage: /assistant add <user id> or /assistant remove <user id> \
        (or reply to their message with /assistant add).";

    if !is_group {
        return Ok("Personal assistants are managed inside a registered group chat.".to_string());
    }
    let Some((action, explicit)) = parse_assistant_args(args) else {
        return Ok(USAGE.to_string());
    };
    let replied = msg
        .reply_to_message()
        .and_then(|m| m.from.as_ref())
        .map(|u| u.id.0 as i64);
    let Some(delegate) = explicit.or(replied) else {
        return Ok(USAGE.to_string());
    };

    let store = &data.state.store;
    let Some(link) = store.find_channel_link(sender_id)? else {
        return Ok("Link your account first: send /link to me in a private chat.".to_string());
    };

    let chat = msg.chat.id.0;
    let outcome = match action {
        AssistantAction::Add => grant_assistant(store, &link.account_id, delegate, chat)
            .map(|_| format!("User {} can now record expenses for you in this group.", delegate)),
        AssistantAction::Remove => {
            revoke_assistant(store, &link.account_id, delegate, chat).map(|revoked| {
                if revoked {
                    format!("User {} is no longer your assistant here.", delegate)
                } else {
                    format!("User {} wasn't your assistant here.", delegate)
                }
            })
        }
    };

    match outcome {
        Ok(text) => Ok(text),
        Err(DelegationError::GroupNotRegistered(_)) => {
            Ok("Register this group first with /register.".to_string())
        }
        Err(DelegationError::NotGroupOwner { .. }) => {
            Ok("Only the account that registered this group can manage assistants.".to_string())
        }
        Err(DelegationError::Store(e)) => Err(e),
    }
}

/// Download the largest photo size or an attached document into memory
async fn download_attachment(bot: &Bot, msg: &Message) -> Result<Option<Attachment>> {
    let (file_id, filename, content_type) = if let Some(photo) = msg.photo().and_then(|p| p.last())
    {
        (
            photo.file.id.clone(),
            format!("receipt_{}.jpg", msg.id.0),
            "image/jpeg".to_string(),
        )
    } else if let Some(doc) = msg.document() {
        let filename = doc
            .file_name
            .clone()
            .unwrap_or_else(|| format!("receipt_{}", msg.id.0));
        let content_type = doc
            .mime_type
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| guess_content_type(&filename));
        (doc.file.id.clone(), filename, content_type)
    } else {
        return Ok(None);
    };

    let file = bot.get_file(file_id).await?;
    let mut bytes = Vec::with_capacity(file.size as usize);
    bot.download_file(&file.path, &mut bytes).await?;
    debug!("Downloaded {} ({} bytes)", filename, bytes.len());

    Ok(Some(Attachment {
        filename,
        content_type,
        bytes,
    }))
}

async fn send_reply(bot: &Bot, chat_id: ChatId, reply: BotReply) -> Result<()> {
    for chunk in split_message(&reply.text, MAX_MESSAGE_CHARS) {
        bot.send_message(chat_id, chunk).await?;
    }
    if let Some(attachment) = reply.attachment {
        bot.send_document(
            chat_id,
            InputFile::memory(attachment.bytes).file_name(attachment.filename),
        )
        .await?;
    }
    Ok(())
}

/// Split on line boundaries where possible, never inside a character
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
