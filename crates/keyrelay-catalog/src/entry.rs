use serde_json::{Value, json};

use crate::provider::ProviderTag;

/// Token budget range for a model. `min`/`max` bound reasoning budgets,
/// `default` is the output cap applied when the client sends none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLimits {
    pub min_tokens: u32,
    pub max_tokens: u32,
    pub default_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub thinking: bool,
    pub vision: bool,
    pub tools: bool,
    pub streaming: bool,
    pub json_mode: bool,
    pub web_search: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelEntry {
    /// Canonical, provider-prefixed id (`anthropic/claude-sonnet-4-20250514`).
    pub id: &'static str,
    pub provider: ProviderTag,
    pub limits: TokenLimits,
    pub context_window: u32,
    pub capabilities: ModelCapabilities,
}

impl ModelEntry {
    /// Render in the OpenAI `/v1/models` object shape.
    pub fn to_openai_value(&self) -> Value {
        json!({
            "id": self.id,
            "object": "model",
            "created": 1_700_000_000,
            "owned_by": self.provider.as_str(),
            "root": self.id,
            "parent": null,
            "_extra": {
                "context_window": self.context_window,
                "capabilities": {
                    "thinking": self.capabilities.thinking,
                    "vision": self.capabilities.vision,
                    "tools": self.capabilities.tools,
                    "streaming": self.capabilities.streaming,
                    "json_mode": self.capabilities.json_mode,
                    "web_search": self.capabilities.web_search,
                },
                "token_limit": {
                    "min": self.limits.min_tokens,
                    "max": self.limits.max_tokens,
                    "default": self.limits.default_tokens,
                },
            },
        })
    }
}
