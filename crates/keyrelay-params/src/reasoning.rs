use serde_json::{Map, Value, json};

use keyrelay_catalog::{ProviderTag, lookup};

/// How hard the model should think. `Auto` defers to the provider default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
    Auto,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Option<ReasoningEffort> {
        match value {
            "minimal" => Some(ReasoningEffort::Minimal),
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            "xhigh" => Some(ReasoningEffort::Xhigh),
            "auto" => Some(ReasoningEffort::Auto),
            _ => None,
        }
    }

    pub fn ratio(self) -> f64 {
        match self {
            ReasoningEffort::Minimal => 0.1,
            ReasoningEffort::Low => 0.25,
            ReasoningEffort::Medium | ReasoningEffort::Auto => 0.5,
            ReasoningEffort::High => 0.75,
            ReasoningEffort::Xhigh => 1.0,
        }
    }

    /// Collapse onto the three levels OpenAI-style providers accept.
    fn as_openai_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal | ReasoningEffort::Low => "low",
            ReasoningEffort::Medium | ReasoningEffort::Auto => "medium",
            ReasoningEffort::High | ReasoningEffort::Xhigh => "high",
        }
    }
}

/// Provider-agnostic reasoning request, distilled from whichever dialect the
/// client spoke. Translated back out per provider by [`translate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningIntent {
    pub enabled: bool,
    pub effort: ReasoningEffort,
    pub budget_tokens: Option<u32>,
    pub include_thoughts: bool,
}

impl Default for ReasoningIntent {
    fn default() -> Self {
        Self {
            enabled: false,
            effort: ReasoningEffort::Medium,
            budget_tokens: None,
            include_thoughts: true,
        }
    }
}

const BUDGET_FLOOR: u32 = 1024;

/// Effort level to token budget, interpolated over the model's range.
/// `output_cap` scales the budget down when an explicit output limit exists.
pub fn compute_budget(
    effort: ReasoningEffort,
    min_tokens: u32,
    max_tokens: u32,
    output_cap: Option<u32>,
) -> u32 {
    let ratio = effort.ratio();
    let span = max_tokens.saturating_sub(min_tokens) as f64;
    let mut budget = (span * ratio + min_tokens as f64).round() as u32;
    budget = budget.max(BUDGET_FLOOR);
    if let Some(cap) = output_cap {
        budget = budget.min((cap as f64 * ratio).round() as u32);
        budget = budget.max(BUDGET_FLOOR);
    }
    budget
}

fn model_budget_range(model_id: &str, fallback_max: u32) -> (u32, u32) {
    match lookup(model_id) {
        Some(entry) => (entry.limits.min_tokens, entry.limits.max_tokens),
        None => (BUDGET_FLOOR, fallback_max),
    }
}

/// Emit the provider-specific parameter fragment for a reasoning intent.
/// Empty when reasoning is off; callers merge the result into
/// `providerOptions.<tag>`.
pub fn translate(
    provider: ProviderTag,
    intent: &ReasoningIntent,
    model_id: &str,
) -> Map<String, Value> {
    let mut out = Map::new();
    if !intent.enabled {
        return out;
    }

    match provider {
        ProviderTag::Anthropic => {
            let (min, max) = model_budget_range(model_id, 16384);
            let budget = intent
                .budget_tokens
                .unwrap_or_else(|| compute_budget(intent.effort, min, max, None));
            out.insert(
                "thinking".to_string(),
                json!({ "type": "enabled", "budget_tokens": budget }),
            );
        }
        ProviderTag::Google => {
            let (min, max) = model_budget_range(model_id, 65536);
            let budget = if intent.effort == ReasoningEffort::Auto {
                // -1 asks Gemini to size the budget itself.
                Value::from(-1)
            } else {
                Value::from(
                    intent
                        .budget_tokens
                        .unwrap_or_else(|| compute_budget(intent.effort, min, max, None)),
                )
            };
            out.insert(
                "thinkingConfig".to_string(),
                json!({
                    "thinkingBudget": budget,
                    "includeThoughts": intent.include_thoughts,
                }),
            );
        }
        ProviderTag::Xai => {
            let effort = match intent.effort {
                ReasoningEffort::High | ReasoningEffort::Xhigh => "high",
                _ => "low",
            };
            out.insert("reasoningEffort".to_string(), Value::from(effort));
        }
        ProviderTag::Deepseek => {
            if model_id.to_lowercase().contains("r1") {
                out.insert("thinking".to_string(), json!({ "type": "enabled" }));
            } else {
                out.insert("enable_thinking".to_string(), Value::Bool(true));
                if let Some(budget) = intent.budget_tokens {
                    out.insert("thinking_budget".to_string(), Value::from(budget));
                }
            }
        }
        ProviderTag::Qwen => {
            let budget = intent
                .budget_tokens
                .unwrap_or_else(|| compute_budget(intent.effort, BUDGET_FLOOR, 32768, None));
            out.insert("enable_thinking".to_string(), Value::Bool(true));
            out.insert("thinking_budget".to_string(), Value::from(budget));
        }
        ProviderTag::Openrouter => {
            out.insert(
                "reasoning".to_string(),
                json!({ "effort": intent.effort.as_openai_str() }),
            );
        }
        // OpenAI proper plus everything without a native dialect.
        _ => {
            out.insert(
                "reasoningEffort".to_string(),
                Value::from(intent.effort.as_openai_str()),
            );
            if intent.include_thoughts {
                out.insert("reasoningSummary".to_string(), Value::from("auto"));
            }
        }
    }

    out
}

/// Collect the reasoning intent from every dialect clients are known to
/// speak: `providerOptions.{anthropic,openai,google}` plus the top-level
/// `reasoning_effort` / `enable_thinking` / `thinking` / `thinking_budget`
/// spellings. Later sources override earlier ones.
pub fn parse_intent(body: &Value) -> ReasoningIntent {
    let mut intent = ReasoningIntent::default();

    let provider_options = body.get("providerOptions");

    if let Some(thinking) = provider_options
        .and_then(|o| o.get("anthropic"))
        .and_then(|o| o.get("thinking"))
        .and_then(Value::as_object)
    {
        intent.enabled = thinking.get("type").and_then(Value::as_str) == Some("enabled");
        intent.budget_tokens = budget_from(thinking);
    }

    if let Some(effort) = provider_options
        .and_then(|o| o.get("openai"))
        .and_then(|o| o.get("reasoningEffort"))
        .and_then(Value::as_str)
    {
        intent.enabled = true;
        if let Some(parsed) = ReasoningEffort::parse(effort) {
            intent.effort = parsed;
        }
    }

    if let Some(config) = provider_options
        .and_then(|o| o.get("google"))
        .and_then(|o| o.get("thinkingConfig"))
        .and_then(Value::as_object)
    {
        intent.enabled = true;
        match config.get("thinkingBudget") {
            Some(v) if v.as_i64() == Some(-1) => intent.effort = ReasoningEffort::Auto,
            Some(v) => intent.budget_tokens = v.as_u64().map(|b| b as u32),
            None => {}
        }
        if let Some(include) = config.get("includeThoughts").and_then(Value::as_bool) {
            intent.include_thoughts = include;
        }
    }

    if let Some(effort) = body.get("reasoning_effort").and_then(Value::as_str) {
        intent.enabled = true;
        if let Some(parsed) = ReasoningEffort::parse(effort) {
            intent.effort = parsed;
        }
    }

    if let Some(enabled) = body.get("enable_thinking").and_then(Value::as_bool) {
        intent.enabled = enabled;
    }

    match body.get("thinking") {
        Some(Value::Object(thinking)) => {
            intent.enabled = thinking.get("type").and_then(Value::as_str) == Some("enabled")
                || thinking.get("enabled").and_then(Value::as_bool) == Some(true);
            if let Some(budget) = budget_from(thinking) {
                intent.budget_tokens = Some(budget);
            }
        }
        Some(Value::Bool(enabled)) => intent.enabled = *enabled,
        _ => {}
    }

    if let Some(budget) = body.get("thinking_budget").and_then(Value::as_u64) {
        intent.budget_tokens = Some(budget as u32);
    }

    intent
}

fn budget_from(thinking: &Map<String, Value>) -> Option<u32> {
    thinking
        .get("budget_tokens")
        .or_else(|| thinking.get("budgetTokens"))
        .and_then(Value::as_u64)
        .map(|b| b as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_interpolates_over_model_range() {
        // (65536 - 1024) * 0.75 + 1024
        assert_eq!(
            compute_budget(ReasoningEffort::High, 1024, 65536, None),
            49408
        );
        assert_eq!(
            compute_budget(ReasoningEffort::Xhigh, 1024, 16384, None),
            16384
        );
        assert_eq!(
            compute_budget(ReasoningEffort::Minimal, 1024, 4096, None),
            1331
        );
    }

    #[test]
    fn budget_never_drops_below_floor() {
        assert_eq!(compute_budget(ReasoningEffort::Minimal, 0, 512, None), 1024);
        assert_eq!(
            compute_budget(ReasoningEffort::Low, 1024, 65536, Some(1000)),
            1024
        );
    }

    #[test]
    fn disabled_intent_translates_to_nothing() {
        let intent = ReasoningIntent::default();
        assert!(translate(ProviderTag::Anthropic, &intent, "anthropic/claude-sonnet-4-20250514").is_empty());
    }

    #[test]
    fn anthropic_shape_carries_budget() {
        let intent = ReasoningIntent {
            enabled: true,
            budget_tokens: Some(4096),
            ..Default::default()
        };
        let out = translate(
            ProviderTag::Anthropic,
            &intent,
            "anthropic/claude-sonnet-4-20250514",
        );
        assert_eq!(out["thinking"]["type"], "enabled");
        assert_eq!(out["thinking"]["budget_tokens"], 4096);
    }

    #[test]
    fn google_auto_requests_dynamic_budget() {
        let intent = ReasoningIntent {
            enabled: true,
            effort: ReasoningEffort::Auto,
            budget_tokens: Some(2048),
            ..Default::default()
        };
        let out = translate(ProviderTag::Google, &intent, "google/gemini-2.5-flash");
        assert_eq!(out["thinkingConfig"]["thinkingBudget"], -1);
        assert_eq!(out["thinkingConfig"]["includeThoughts"], true);
    }

    #[test]
    fn xai_collapses_to_two_levels() {
        let mut intent = ReasoningIntent {
            enabled: true,
            effort: ReasoningEffort::Xhigh,
            ..Default::default()
        };
        assert_eq!(
            translate(ProviderTag::Xai, &intent, "xai/grok-4")["reasoningEffort"],
            "high"
        );
        intent.effort = ReasoningEffort::Medium;
        assert_eq!(
            translate(ProviderTag::Xai, &intent, "xai/grok-4")["reasoningEffort"],
            "low"
        );
    }

    #[test]
    fn deepseek_r1_uses_thinking_block() {
        let intent = ReasoningIntent {
            enabled: true,
            budget_tokens: Some(2048),
            ..Default::default()
        };
        let r1 = translate(ProviderTag::Deepseek, &intent, "deepseek/deepseek-r1");
        assert_eq!(r1["thinking"]["type"], "enabled");
        assert!(!r1.contains_key("enable_thinking"));

        let v3 = translate(ProviderTag::Deepseek, &intent, "deepseek/deepseek-v3");
        assert_eq!(v3["enable_thinking"], true);
        assert_eq!(v3["thinking_budget"], 2048);
    }

    #[test]
    fn unknown_provider_falls_back_to_openai_shape() {
        let intent = ReasoningIntent {
            enabled: true,
            effort: ReasoningEffort::Xhigh,
            ..Default::default()
        };
        let out = translate(ProviderTag::Unknown, &intent, "acme/unlisted");
        assert_eq!(out["reasoningEffort"], "high");
        assert_eq!(out["reasoningSummary"], "auto");
    }

    #[test]
    fn intent_parses_anthropic_provider_options() {
        let body = serde_json::json!({
            "providerOptions": {
                "anthropic": { "thinking": { "type": "enabled", "budget_tokens": 4096 } }
            }
        });
        let intent = parse_intent(&body);
        assert!(intent.enabled);
        assert_eq!(intent.budget_tokens, Some(4096));
    }

    #[test]
    fn intent_parses_google_dynamic_budget_back_to_auto() {
        let body = serde_json::json!({
            "providerOptions": {
                "google": { "thinkingConfig": { "thinkingBudget": -1, "includeThoughts": true } }
            }
        });
        let intent = parse_intent(&body);
        assert!(intent.enabled);
        assert_eq!(intent.effort, ReasoningEffort::Auto);
        assert_eq!(intent.budget_tokens, None);
    }

    #[test]
    fn top_level_thinking_bool_toggles() {
        let intent = parse_intent(&serde_json::json!({ "thinking": true }));
        assert!(intent.enabled);
        let intent = parse_intent(&serde_json::json!({ "thinking": false }));
        assert!(!intent.enabled);
    }
}
