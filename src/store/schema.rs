//! Expense store schema

pub(crate) const CURRENT_VERSION: i32 = 1;

pub(crate) const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS business_purposes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_by TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS expenses (
    id TEXT PRIMARY KEY,
    owner_account_id TEXT NOT NULL,
    date TEXT NOT NULL,
    merchant_name TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    business_purpose_id TEXT REFERENCES business_purposes(id),
    receipt_ref TEXT,
    receipt_filename TEXT,
    receipt_hash TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_expenses_owner_date
    ON expenses(owner_account_id, date DESC);
CREATE UNIQUE INDEX IF NOT EXISTS idx_expenses_owner_receipt_hash
    ON expenses(owner_account_id, receipt_hash) WHERE receipt_hash IS NOT NULL;

CREATE TABLE IF NOT EXISTS pending_business_purposes (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    channel_user_id INTEGER NOT NULL,
    proposed_name TEXT NOT NULL,
    requested_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending', 'confirmed', 'cancelled'))
);

CREATE INDEX IF NOT EXISTS idx_pending_purposes_lookup
    ON pending_business_purposes(account_id, channel_user_id, status, requested_at DESC);

CREATE TABLE IF NOT EXISTS telegram_users (
    channel_user_id INTEGER PRIMARY KEY,
    account_id TEXT NOT NULL,
    username TEXT,
    linked_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_auth (
    token TEXT PRIMARY KEY,
    channel_user_id INTEGER NOT NULL,
    username TEXT,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_chats (
    chat_id INTEGER PRIMARY KEY,
    owner_account_id TEXT NOT NULL,
    title TEXT,
    registered_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS personal_assistants (
    id TEXT PRIMARY KEY,
    owner_account_id TEXT NOT NULL,
    delegate_channel_id INTEGER NOT NULL,
    group_channel_id INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    UNIQUE(delegate_channel_id, group_channel_id)
);

CREATE TABLE IF NOT EXISTS telegram_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_user_id INTEGER NOT NULL,
    account_id TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('text', 'image')),
    original_content TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_telegram_messages_lookup
    ON telegram_messages(account_id, channel_user_id, created_at DESC);
"#;

/// `(applies when version <= from, sql)`
pub(crate) const MIGRATIONS: &[(i32, &str)] = &[];
