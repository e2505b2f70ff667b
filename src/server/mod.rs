//! HTTP API Server
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      API Server                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  GET    /api/health               → Health check         │
//! │  GET    /api/healthz, /api/readyz → Probes               │
//! │  POST   /api/bot/message          → Bot pipeline         │
//! │  GET    /api/expenses             → List expenses        │
//! │  POST   /api/expenses             → Create expense       │
//! │  GET    /api/expenses/{id}/receipt→ Receipt bytes        │
//! │  GET    /api/business-purposes    → Categories           │
//! │  GET    /api/export               → Export download      │
//! │  POST   /api/link                 → Consume link token   │
//! │  GET/POST/DELETE /api/assistants  → Personal assistants  │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod error;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::bot::ExpenseBot;
use crate::config::Config;
use crate::linking::LinkService;
use crate::llm::IntentClassifier;
use crate::receipts::ReceiptFetcher;
use crate::store::ExpenseStore;

pub use auth::{AuthAccount, AuthKeys, BotCaller, Claims};
pub use error::{ApiError, ErrorResponse};

/// Largest accepted request body (base64 receipts)
const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<ExpenseStore>,
    pub bot: ExpenseBot,
    pub links: LinkService,
    pub receipts: ReceiptFetcher,
    pub auth: AuthKeys,
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<ExpenseStore>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        let receipts = ReceiptFetcher::new(Duration::from_secs(config.llm_timeout_secs));
        Self {
            bot: ExpenseBot::new(store.clone(), classifier, receipts.clone()),
            links: LinkService::new(store.clone()),
            receipts,
            auth: AuthKeys::new(config.jwt_secret.as_deref(), config.bot_api_secret.as_deref()),
            store,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Full router with middleware
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    config: Config,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.socket_addr();
        let router = build_router(self.state.clone(), &self.config.cors_origins);

        info!("Starting API server on {}", addr);
        if !self.config.is_localhost() {
            warn!("API bound to {} - serve it behind TLS", addr);
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server shut down gracefully");
        Ok(())
    }
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
