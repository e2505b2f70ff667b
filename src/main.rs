//! Expense bot - Entry Point
//!
//! Modes:
//! - Default: HTTP API server
//! - --telegram / -t: Telegram bot (long polling)

use expensebot::{ApiServer, AppState, Config, ExpenseStore, LlmClient};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let telegram_mode = args.iter().any(|a| a == "--telegram" || a == "-t");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Expense bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: expensebot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --telegram, -t     Run the Telegram bot");
        println!("  --help, -h         Show this help");
        println!();
        println!("Default: Run the HTTP API server");
        println!();
        println!("Environment variables:");
        println!("  EXPENSEBOT_DB_PATH   SQLite database (default: expensebot.db)");
        println!("  ANTHROPIC_API_KEY    Classifier API key");
        println!("  EXPENSEBOT_MODEL     Classifier model");
        println!("  EXPENSEBOT_PORT      HTTP port (default: 8080)");
        println!("  AUTH_JWT_SECRET      Secret for account access tokens");
        println!("  BOT_API_SECRET       Secret for the bot message endpoint");
        println!("  TELEGRAM_BOT_TOKEN   Telegram bot token");
        println!("  PUBLIC_BASE_URL      Web app URL used in link messages");
        println!("  LOG_FORMAT           'json' for structured logs");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if telegram_mode { "debug" } else { "info" }));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;
    let store = Arc::new(ExpenseStore::open(&config.db_path)?);
    info!("Expense store: {:?}", config.db_path);

    let classifier = LlmClient::from_config(&config);
    if !classifier.is_available() {
        warn!("ANTHROPIC_API_KEY not set - chat messages will fail to classify");
    }
    let state = Arc::new(AppState::new(&config, store, Arc::new(classifier)));

    if telegram_mode {
        info!("Expense bot Telegram v{}", env!("CARGO_PKG_VERSION"));
        expensebot::telegram::run_telegram_bot(config, state).await?;
    } else {
        info!("Expense bot API server v{}", env!("CARGO_PKG_VERSION"));
        ApiServer::new(config, state).run().await?;
    }

    Ok(())
}
