//! Expense Bot
//!
//! Expense tracking for small businesses, with a chat companion that turns
//! free-form messages and receipt photos into expense records.
//!
//! # Architecture
//!
//! ```text
//! Telegram / Web ──► ExpenseBot ──► IntentClassifier ──► Claude API
//!                        │
//!                        ├── Owner resolution (links, groups, assistants)
//!                        ├── Context assembly (history, categories, expenses)
//!                        ├── IntentDispatcher (create/edit/export/...)
//!                        └── ExpenseStore (SQLite)
//! ```

pub mod bot;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod export;
pub mod intent;
pub mod linking;
pub mod llm;
pub mod models;
pub mod owner;
pub mod prompt;
pub mod receipts;
pub mod server;
pub mod store;
pub mod telegram;

pub use bot::{BotReply, ExpenseBot, InboundMessage};
pub use config::Config;
pub use dispatcher::{DispatchOutcome, IntentDispatcher};
pub use error::{BotError, DispatchError};
pub use export::{ExportFormat, Report};
pub use intent::{Action, ClassifierReply};
pub use linking::{LinkError, LinkService};
pub use llm::{ClassifierRequest, IntentClassifier, LlmClient};
pub use models::{Category, Expense};
pub use server::{build_router, ApiServer, AppState};
pub use store::ExpenseStore;
