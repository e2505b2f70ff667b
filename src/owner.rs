//! Owner Resolution
//!
//! Decides which account a bot message acts on. In a private chat that is the
//! sender's linked account; in a group chat it is the group's registered
//! owner, provided the sender is that owner or one of their active personal
//! assistants for the group.
//!
//! [`resolve_owner`] is pure: everything it needs is loaded into a
//! [`ChannelContext`] up front and the result is threaded explicitly through
//! the rest of the request.

use anyhow::Result;
use thiserror::Error;

use crate::models::{ChannelLink, DelegatedAccess, GroupChat};
use crate::store::ExpenseStore;

/// Facts about the sender and chat of one inbound message
#[derive(Debug, Clone, Default)]
pub struct ChannelContext {
    pub sender_id: i64,
    pub chat_id: i64,
    pub is_group: bool,
    pub sender_link: Option<ChannelLink>,
    pub group: Option<GroupChat>,
    pub delegation: Option<DelegatedAccess>,
}

impl ChannelContext {
    /// Load the facts for a message from the store
    pub fn load(store: &ExpenseStore, sender_id: i64, chat_id: i64, is_group: bool) -> Result<Self> {
        let sender_link = store.find_channel_link(sender_id)?;
        let (group, delegation) = if is_group {
            (
                store.find_group(chat_id)?,
                store.find_active_delegate(sender_id, chat_id)?,
            )
        } else {
            (None, None)
        };

        Ok(Self {
            sender_id,
            chat_id,
            is_group,
            sender_link,
            group,
            delegation,
        })
    }
}

/// Who is acting on the owner's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Owner,
    Delegate,
}

/// Account every action of this request operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOwner {
    pub account_id: String,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("channel identity {0} is not linked to an account")]
    NotLinked(i64),

    #[error("group chat {0} is not registered")]
    GroupNotRegistered(i64),

    #[error("user {sender} may not act in group {chat}")]
    NotAuthorized { sender: i64, chat: i64 },
}

impl ResolveError {
    /// Guidance shown to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::NotLinked(_) => "Your Telegram account is not linked yet. Send /link to connect it \
                to your expense account."
                .to_string(),
            Self::GroupNotRegistered(_) => "This group is not registered yet. The account owner can \
                send /register here to start tracking expenses."
                .to_string(),
            Self::NotAuthorized { .. } => "You are not a personal assistant for this group. Ask the \
                account owner to add you with /assistant add."
                .to_string(),
        }
    }
}

/// Resolve the owning account for a message
pub fn resolve_owner(ctx: &ChannelContext) -> Result<ResolvedOwner, ResolveError> {
    if !ctx.is_group {
        return ctx
            .sender_link
            .as_ref()
            .map(|link| ResolvedOwner {
                account_id: link.account_id.clone(),
                actor: Actor::Owner,
            })
            .ok_or(ResolveError::NotLinked(ctx.sender_id));
    }

    let group = ctx
        .group
        .as_ref()
        .ok_or(ResolveError::GroupNotRegistered(ctx.chat_id))?;

    let is_owner = ctx
        .sender_link
        .as_ref()
        .is_some_and(|link| link.account_id == group.owner_account_id);
    if is_owner {
        return Ok(ResolvedOwner {
            account_id: group.owner_account_id.clone(),
            actor: Actor::Owner,
        });
    }

    let delegated = ctx.delegation.as_ref().is_some_and(|grant| {
        grant.is_active
            && grant.delegate_channel_id == ctx.sender_id
            && grant.group_channel_id == ctx.chat_id
            && grant.owner_account_id == group.owner_account_id
    });
    if delegated {
        return Ok(ResolvedOwner {
            account_id: group.owner_account_id.clone(),
            actor: Actor::Delegate,
        });
    }

    Err(ResolveError::NotAuthorized {
        sender: ctx.sender_id,
        chat: ctx.chat_id,
    })
}

/// Why a personal assistant change was refused
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("group chat {0} is not registered")]
    GroupNotRegistered(i64),

    #[error("account {account} does not own group {chat}")]
    NotGroupOwner { account: String, chat: i64 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Make a group chat belong to `owner_account_id`. Re-registering by the
/// same account is allowed; a group owned by another account is refused.
pub fn register_group(
    store: &ExpenseStore,
    owner_account_id: &str,
    group_chat_id: i64,
    title: Option<&str>,
) -> Result<GroupChat, DelegationError> {
    let refused = || DelegationError::NotGroupOwner {
        account: owner_account_id.to_string(),
        chat: group_chat_id,
    };
    let taken = store
        .find_group(group_chat_id)?
        .is_some_and(|existing| existing.owner_account_id != owner_account_id);
    if taken {
        return Err(refused());
    }
    // The store never reassigns an owner, so a concurrent registration shows up here
    let group = store.register_group(group_chat_id, owner_account_id, title)?;
    if group.owner_account_id != owner_account_id {
        return Err(refused());
    }
    Ok(group)
}

/// Let `delegate_channel_id` act for `owner_account_id` inside one of their groups
pub fn grant_assistant(
    store: &ExpenseStore,
    owner_account_id: &str,
    delegate_channel_id: i64,
    group_chat_id: i64,
) -> Result<DelegatedAccess, DelegationError> {
    require_group_owner(store, owner_account_id, group_chat_id)?;
    Ok(store.grant_delegate(owner_account_id, delegate_channel_id, group_chat_id)?)
}

/// Deactivate a grant; `Ok(false)` when there was no active grant
pub fn revoke_assistant(
    store: &ExpenseStore,
    owner_account_id: &str,
    delegate_channel_id: i64,
    group_chat_id: i64,
) -> Result<bool, DelegationError> {
    require_group_owner(store, owner_account_id, group_chat_id)?;
    Ok(store.revoke_delegate(owner_account_id, delegate_channel_id, group_chat_id)?)
}

fn require_group_owner(
    store: &ExpenseStore,
    owner_account_id: &str,
    group_chat_id: i64,
) -> Result<GroupChat, DelegationError> {
    let group = store
        .find_group(group_chat_id)?
        .ok_or(DelegationError::GroupNotRegistered(group_chat_id))?;
    if group.owner_account_id != owner_account_id {
        return Err(DelegationError::NotGroupOwner {
            account: owner_account_id.to_string(),
            chat: group_chat_id,
        });
    }
    Ok(group)
}
