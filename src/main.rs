//! Contract Copilot - LLM assistant for Solidity contract development
//!
//! A WebSocket backend that turns model replies into an ordered stream of
//! chat messages and versioned contract file operations.

mod api;
mod error;
mod extract;
mod llm;
mod runtime;
mod session;
mod state_machine;
mod store;
mod system_prompt;

use api::{create_router, AppState};
use llm::{LlmConfig, ModelRegistry};
use runtime::RuntimeConfig;
use session::{ChatStorage, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contract_copilot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let chats_dir = std::env::var("COPILOT_CHATS_DIR").unwrap_or_else(|_| "./chats".to_string());

    let port: u16 = std::env::var("COPILOT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Load chat sessions
    std::fs::create_dir_all(&chats_dir)?;
    tracing::info!(path = %chats_dir, "Loading chats");
    let sessions = Arc::new(SessionRegistry::load(ChatStorage::new(&chats_dir))?);

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.");
    }

    let runtime_config = RuntimeConfig::from_env();
    tracing::info!(
        llm_timeout_secs = runtime_config.llm_timeout.as_secs(),
        emit_delay_ms = %runtime_config.emit_delay.as_millis(),
        "Runtime configured"
    );

    // Create application state
    let state = AppState::new(sessions, llm_registry, runtime_config);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Contract Copilot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
