//! Model definitions
//!
//! All models the service can talk to, in one table.

use super::anthropic::AnthropicModel;
use super::{AnthropicService, LlmService};
use std::sync::Arc;

/// Model definition with metadata
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// User-facing model ID (e.g., "claude-3.5-sonnet")
    pub id: &'static str,
    /// Factory function to create the service
    pub factory: fn(&str, Option<&str>) -> Result<Arc<dyn LlmService>, String>,
}

fn anthropic(
    model: AnthropicModel,
    api_key: &str,
    gateway: Option<&str>,
) -> Result<Arc<dyn LlmService>, String> {
    // "implicit" is accepted for gateway mode
    if api_key.is_empty() {
        return Err(format!("{} requires ANTHROPIC_API_KEY or gateway", model.model_id()));
    }
    let service = AnthropicService::new(api_key.to_string(), model, gateway).map_err(|e| e.message)?;
    Ok(Arc::new(service))
}

/// Get all available model definitions
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "claude-4-sonnet",
            factory: |api_key, gateway| anthropic(AnthropicModel::Claude4Sonnet, api_key, gateway),
        },
        ModelDef {
            id: "claude-3.5-sonnet",
            factory: |api_key, gateway| anthropic(AnthropicModel::Claude35Sonnet, api_key, gateway),
        },
        ModelDef {
            id: "claude-3.5-haiku",
            factory: |api_key, gateway| anthropic(AnthropicModel::Claude35Haiku, api_key, gateway),
        },
        ModelDef {
            id: "claude-3-sonnet",
            factory: |api_key, gateway| anthropic(AnthropicModel::Claude3Sonnet, api_key, gateway),
        },
    ]
}
