use crate::entry::{ModelCapabilities, ModelEntry, TokenLimits};
use crate::provider::{ProviderTag, infer_from_name};

const fn caps(
    thinking: bool,
    vision: bool,
    json_mode: bool,
    web_search: bool,
) -> ModelCapabilities {
    ModelCapabilities {
        thinking,
        vision,
        tools: true,
        streaming: true,
        json_mode,
        web_search,
    }
}

const fn limits(min_tokens: u32, max_tokens: u32, default_tokens: u32) -> TokenLimits {
    TokenLimits {
        min_tokens,
        max_tokens,
        default_tokens,
    }
}

const fn entry(
    id: &'static str,
    provider: ProviderTag,
    limits: TokenLimits,
    context_window: u32,
    capabilities: ModelCapabilities,
) -> ModelEntry {
    ModelEntry {
        id,
        provider,
        limits,
        context_window,
        capabilities,
    }
}

/// Canonical model table for the upstream gateway. Immutable at runtime;
/// `/v1/models?refresh=true` serves the live upstream list instead, this
/// table backs normalization and the offline fallback.
pub const MODELS: &[ModelEntry] = &[
    // Anthropic
    entry(
        "anthropic/claude-opus-4-20250514",
        ProviderTag::Anthropic,
        limits(1024, 32768, 8192),
        200_000,
        caps(true, true, false, false),
    ),
    entry(
        "anthropic/claude-sonnet-4-20250514",
        ProviderTag::Anthropic,
        limits(1024, 32768, 8192),
        200_000,
        caps(true, true, false, false),
    ),
    entry(
        "anthropic/claude-3-7-sonnet-20250219",
        ProviderTag::Anthropic,
        limits(1024, 32768, 8192),
        200_000,
        caps(true, true, false, false),
    ),
    entry(
        "anthropic/claude-3-5-sonnet-20241022",
        ProviderTag::Anthropic,
        limits(1024, 16384, 4096),
        200_000,
        caps(false, true, false, false),
    ),
    entry(
        "anthropic/claude-3-5-haiku-20241022",
        ProviderTag::Anthropic,
        limits(1024, 16384, 4096),
        200_000,
        caps(false, false, false, false),
    ),
    entry(
        "anthropic/claude-3-haiku",
        ProviderTag::Anthropic,
        limits(1024, 4096, 2048),
        200_000,
        caps(false, false, false, false),
    ),
    // OpenAI
    entry(
        "openai/gpt-4o",
        ProviderTag::OpenAi,
        limits(1024, 16384, 4096),
        128_000,
        caps(false, true, true, false),
    ),
    entry(
        "openai/gpt-4o-mini",
        ProviderTag::OpenAi,
        limits(1024, 16384, 4096),
        128_000,
        caps(false, true, true, false),
    ),
    entry(
        "openai/gpt-4.1",
        ProviderTag::OpenAi,
        limits(1024, 32768, 8192),
        1_047_576,
        caps(false, true, true, false),
    ),
    entry(
        "openai/o1",
        ProviderTag::OpenAi,
        limits(1024, 65536, 8192),
        200_000,
        caps(true, true, true, false),
    ),
    entry(
        "openai/o3",
        ProviderTag::OpenAi,
        limits(1024, 65536, 8192),
        200_000,
        caps(true, true, true, false),
    ),
    entry(
        "openai/o4-mini",
        ProviderTag::OpenAi,
        limits(1024, 65536, 8192),
        200_000,
        caps(true, true, true, false),
    ),
    // Google
    entry(
        "google/gemini-2.5-pro",
        ProviderTag::Google,
        limits(1024, 65536, 8192),
        1_048_576,
        caps(true, true, true, true),
    ),
    entry(
        "google/gemini-2.5-flash",
        ProviderTag::Google,
        limits(1024, 65536, 8192),
        1_048_576,
        caps(true, true, true, false),
    ),
    entry(
        "google/gemini-2.0-flash",
        ProviderTag::Google,
        limits(1024, 8192, 4096),
        1_048_576,
        caps(false, true, true, false),
    ),
    // xAI
    entry(
        "xai/grok-4",
        ProviderTag::Xai,
        limits(1024, 32768, 8192),
        256_000,
        caps(true, false, true, true),
    ),
    entry(
        "xai/grok-3",
        ProviderTag::Xai,
        limits(1024, 16384, 4096),
        131_072,
        caps(false, false, true, false),
    ),
    entry(
        "xai/grok-3-mini",
        ProviderTag::Xai,
        limits(1024, 16384, 4096),
        131_072,
        caps(true, false, true, false),
    ),
    // DeepSeek
    entry(
        "deepseek/deepseek-r1",
        ProviderTag::Deepseek,
        limits(1024, 32768, 8192),
        65_536,
        caps(true, false, true, false),
    ),
    entry(
        "deepseek/deepseek-v3",
        ProviderTag::Deepseek,
        limits(1024, 8192, 4096),
        65_536,
        caps(false, false, true, false),
    ),
    entry(
        "deepseek/deepseek-chat",
        ProviderTag::Deepseek,
        limits(1024, 8192, 4096),
        65_536,
        caps(false, false, true, false),
    ),
    // Qwen
    entry(
        "qwen/qwen-max",
        ProviderTag::Qwen,
        limits(1024, 32768, 8192),
        131_072,
        caps(false, false, true, false),
    ),
    entry(
        "qwen/qwen3-32b",
        ProviderTag::Qwen,
        limits(1024, 32768, 8192),
        131_072,
        caps(true, false, true, false),
    ),
];

/// Unqualified or short spellings clients are known to send.
pub const ALIASES: &[(&str, &str)] = &[
    ("claude-opus-4", "anthropic/claude-opus-4-20250514"),
    ("claude-sonnet-4", "anthropic/claude-sonnet-4-20250514"),
    ("claude-3-7-sonnet", "anthropic/claude-3-7-sonnet-20250219"),
    ("claude-3-5-sonnet", "anthropic/claude-3-5-sonnet-20241022"),
    ("claude-3-5-haiku", "anthropic/claude-3-5-haiku-20241022"),
    (
        "anthropic/claude-3-5-sonnet",
        "anthropic/claude-3-5-sonnet-20241022",
    ),
    ("anthropic/claude-sonnet-4", "anthropic/claude-sonnet-4-20250514"),
    ("gemini-pro", "google/gemini-2.5-pro"),
    ("grok-4-latest", "xai/grok-4"),
    ("deepseek-reasoner", "deepseek/deepseek-r1"),
];

pub fn lookup(id: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|entry| entry.id == id)
}

/// Resolve whatever the client called the model to a canonical id.
/// Unknown ids pass through unchanged so the upstream gets to reject them.
pub fn normalize(id: &str) -> String {
    if id.is_empty() {
        return String::new();
    }

    if let Some((_, target)) = ALIASES.iter().find(|(alias, _)| *alias == id) {
        return (*target).to_string();
    }

    if lookup(id).is_some() {
        return id.to_string();
    }

    if !id.contains('/') {
        let inferred = infer_from_name(id);
        if inferred != ProviderTag::Unknown {
            let qualified = format!("{}/{id}", inferred.as_str());
            if lookup(&qualified).is_some() {
                return qualified;
            }
        }
    }

    let suffix = format!("/{id}");
    if let Some(entry) = MODELS
        .iter()
        .find(|entry| entry.id.ends_with(&suffix) || entry.id.contains(id))
    {
        return entry.id.to_string();
    }

    id.to_string()
}

pub fn detect_provider(id: &str) -> ProviderTag {
    if let Some((prefix, _)) = id.split_once('/') {
        return ProviderTag::parse(prefix).unwrap_or(ProviderTag::Unknown);
    }
    infer_from_name(id)
}

pub fn list(filter: Option<ProviderTag>) -> Vec<&'static ModelEntry> {
    MODELS
        .iter()
        .filter(|entry| filter.is_none_or(|tag| entry.provider == tag))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_closure() {
        for (alias, target) in ALIASES {
            assert_eq!(normalize(alias), *target, "alias {alias}");
            assert!(lookup(target).is_some(), "alias target {target} must exist");
        }
    }

    #[test]
    fn canonical_ids_are_fixpoints() {
        for entry in MODELS {
            assert_eq!(normalize(entry.id), entry.id);
        }
    }

    #[test]
    fn unqualified_names_gain_provider_prefix() {
        assert_eq!(normalize("gpt-4o"), "openai/gpt-4o");
        assert_eq!(normalize("gemini-2.5-pro"), "google/gemini-2.5-pro");
        assert_eq!(normalize("grok-4"), "xai/grok-4");
    }

    #[test]
    fn suffix_match_resolves_dated_ids() {
        assert_eq!(
            normalize("claude-opus-4-20250514"),
            "anthropic/claude-opus-4-20250514"
        );
    }

    #[test]
    fn unknown_ids_pass_through() {
        assert_eq!(normalize("mistral-large"), "mistral-large");
        assert_eq!(normalize("acme/unlisted"), "acme/unlisted");
    }

    #[test]
    fn provider_detection_prefers_explicit_prefix() {
        assert_eq!(detect_provider("openai/gpt-4o"), ProviderTag::OpenAi);
        assert_eq!(detect_provider("claude-sonnet-4"), ProviderTag::Anthropic);
        assert_eq!(detect_provider("acme/unlisted"), ProviderTag::Unknown);
        assert_eq!(detect_provider("weird-model"), ProviderTag::Unknown);
    }

    #[test]
    fn list_filters_by_provider() {
        let google = list(Some(ProviderTag::Google));
        assert!(!google.is_empty());
        assert!(google.iter().all(|m| m.provider == ProviderTag::Google));
        assert_eq!(list(None).len(), MODELS.len());
    }
}
