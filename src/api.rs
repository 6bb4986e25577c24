//! HTTP and WebSocket API
//!
//! `/ws/agent?wallet_address=0x...` carries the chat protocol; a small REST
//! surface manages a wallet's chats.

mod handlers;
mod types;
mod ws;

pub use handlers::create_router;

use crate::llm::ModelRegistry;
use crate::runtime::{LlmClient, RegistryLlmClient, RuntimeConfig, RuntimeManager};
use crate::session::SessionRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeManager>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionRegistry>, llm_registry: Arc<ModelRegistry>, config: RuntimeConfig) -> Self {
        let model_id = llm_registry.default_model_id().to_string();
        let llm: Arc<dyn LlmClient> = Arc::new(RegistryLlmClient::new(llm_registry, model_id));
        Self {
            runtime: Arc::new(RuntimeManager::new(sessions, llm, config)),
        }
    }
}
