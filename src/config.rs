//! Configuration management

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Default classifier model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path for the expense store
    pub db_path: PathBuf,

    /// Anthropic API key (the bot answers with an error without it)
    pub anthropic_api_key: Option<String>,

    /// Classifier model id
    pub model: String,

    /// Max tokens per classifier reply
    pub llm_max_tokens: usize,

    /// Transport timeout for classifier calls and receipt downloads
    pub llm_timeout_secs: u64,

    /// HTTP bind address (default: 127.0.0.1)
    pub bind_addr: IpAddr,

    /// HTTP port (default: 8080)
    pub port: u16,

    /// HS256 secret for provider-issued access tokens
    pub jwt_secret: Option<String>,

    /// Shared secret for the bot message endpoint
    pub bot_api_secret: Option<String>,

    /// Base URL of the web app, used in link messages
    pub public_base_url: String,

    /// Telegram bot token (required for --telegram)
    pub telegram_bot_token: Option<String>,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("expensebot.db"),
            anthropic_api_key: None,
            model: DEFAULT_MODEL.to_string(),
            llm_max_tokens: 1024,
            llm_timeout_secs: 60,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            jwt_secret: None,
            bot_api_secret: None,
            public_base_url: "http://localhost:8080".to_string(),
            telegram_bot_token: None,
            cors_origins: vec![
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("EXPENSEBOT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        config.anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");

        if let Some(model) = non_empty_var("EXPENSEBOT_MODEL") {
            config.model = model;
        }

        if let Some(v) = non_empty_var("LLM_MAX_TOKENS") {
            config.llm_max_tokens = v.parse().context("LLM_MAX_TOKENS must be a number")?;
        }

        if let Some(v) = non_empty_var("LLM_TIMEOUT_SECS") {
            config.llm_timeout_secs = v.parse().context("LLM_TIMEOUT_SECS must be a number")?;
        }

        if let Some(addr) = non_empty_var("EXPENSEBOT_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid EXPENSEBOT_BIND_ADDR: {}", addr))?;
        }

        if let Some(port) = non_empty_var("EXPENSEBOT_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("Invalid EXPENSEBOT_PORT: {}", port))?;
        }

        config.jwt_secret = non_empty_var("AUTH_JWT_SECRET");
        config.bot_api_secret = non_empty_var("BOT_API_SECRET");
        config.telegram_bot_token = non_empty_var("TELEGRAM_BOT_TOKEN");

        if let Some(url) = non_empty_var("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(origins) = non_empty_var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        if !config.is_localhost() && config.jwt_secret.is_none() {
            tracing::warn!(
                "Binding to {} without AUTH_JWT_SECRET - account endpoints will reject every request",
                config.bind_addr
            );
        }

        Ok(config)
    }

    /// Check if bound to localhost only
    pub fn is_localhost(&self) -> bool {
        self.bind_addr.is_loopback()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Link the user opens to connect their chat identity
    pub fn link_url(&self, token: &str) -> String {
        format!("{}/link?token={}", self.public_base_url, token)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
