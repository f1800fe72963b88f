use serde_json::{Map, Value};

use keyrelay_catalog::{ProviderTag, detect_provider, lookup, normalize as normalize_model};

use crate::reasoning::{ReasoningIntent, parse_intent, translate};

/// Snake/camel spellings accepted for each scalar we forward. The canonical
/// spelling is written, the aliases are consumed.
const SCALAR_ALIASES: &[(&str, &[&str], Coerce)] = &[
    ("top_p", &["top_p", "topP"], Coerce::Float),
    ("top_k", &["top_k", "topK"], Coerce::Int),
    (
        "frequency_penalty",
        &["frequency_penalty", "frequencyPenalty"],
        Coerce::Float,
    ),
    (
        "presence_penalty",
        &["presence_penalty", "presencePenalty"],
        Coerce::Float,
    ),
    ("stop", &["stop", "stopSequences"], Coerce::StringList),
    ("seed", &["seed"], Coerce::Int),
];

const MAX_TOKENS_ALIASES: &[&str] = &[
    "max_tokens",
    "maxTokens",
    "max_output_tokens",
    "maxOutputTokens",
];

/// Top-level keys the reasoning parser consumes; their content re-emerges
/// under `providerOptions.<tag>` in the provider's own dialect.
const REASONING_KEYS: &[&str] = &[
    "reasoning_effort",
    "enable_thinking",
    "thinking",
    "thinking_budget",
];

#[derive(Debug, Clone, Copy)]
enum Coerce {
    Float,
    Int,
    StringList,
}

/// Rewrite a client chat request into the upstream gateway dialect.
///
/// Starts from a clone of the input so parameters this proxy does not
/// understand (tools, response_format, ...) pass through untouched. The
/// result always carries `model`, `messages` and `stream`, and never
/// `customParameters`. Idempotent on its own output.
pub fn normalize(body: &Value) -> (Value, ProviderTag) {
    let Some(input) = body.as_object() else {
        return (body.clone(), ProviderTag::Unknown);
    };
    let mut out = input.clone();

    let model = input
        .get("model")
        .and_then(Value::as_str)
        .map(normalize_model)
        .unwrap_or_default();
    let provider = detect_provider(&model);
    out.insert("model".to_string(), Value::from(model.clone()));

    if !out.contains_key("messages") {
        out.insert("messages".to_string(), Value::Array(Vec::new()));
    }
    let stream = input.get("stream").and_then(Value::as_bool).unwrap_or(false);
    out.insert("stream".to_string(), Value::Bool(stream));

    if let Some(temp) = input.get("temperature").and_then(Value::as_f64) {
        let temp = if provider == ProviderTag::Anthropic {
            temp.min(1.0)
        } else {
            temp
        };
        out.insert("temperature".to_string(), Value::from(temp));
    }

    convert_max_tokens(input, &model, &mut out);
    convert_scalars(input, &mut out);
    flatten_custom_parameters(input, &mut out);
    let intent = parse_intent(body);
    apply_reasoning(input, &intent, &model, provider, &mut out);

    out.remove("customParameters");
    for key in REASONING_KEYS {
        out.remove(*key);
    }

    (Value::Object(out), provider)
}

fn convert_max_tokens(input: &Map<String, Value>, model: &str, out: &mut Map<String, Value>) {
    let requested = MAX_TOKENS_ALIASES
        .iter()
        .find_map(|key| input.get(*key).and_then(as_integer));
    let max_tokens = requested.or_else(|| lookup(model).map(|m| m.limits.default_tokens as i64));
    for key in &MAX_TOKENS_ALIASES[1..] {
        out.remove(*key);
    }
    if let Some(max_tokens) = max_tokens {
        out.insert("max_tokens".to_string(), Value::from(max_tokens));
    }
}

fn convert_scalars(input: &Map<String, Value>, out: &mut Map<String, Value>) {
    for (canonical, aliases, coerce) in SCALAR_ALIASES {
        let value = aliases.iter().find_map(|key| {
            let v = input.get(*key)?;
            if v.is_null() { None } else { Some(v) }
        });
        for alias in aliases.iter().filter(|a| *a != canonical) {
            out.remove(*alias);
        }
        let Some(value) = value else { continue };
        let coerced = match coerce {
            Coerce::Float => value.as_f64().map(Value::from),
            Coerce::Int => as_integer(value).map(Value::from),
            Coerce::StringList => Some(match value {
                Value::Array(_) => value.clone(),
                scalar => Value::Array(vec![scalar.clone()]),
            }),
        };
        if let Some(coerced) = coerced {
            out.insert((*canonical).to_string(), coerced);
        }
    }
}

/// Flatten the `customParameters` array of `{name, value, type}` entries
/// onto the top-level body, coercing by the declared type.
fn flatten_custom_parameters(input: &Map<String, Value>, out: &mut Map<String, Value>) {
    let Some(params) = input.get("customParameters").and_then(Value::as_array) else {
        return;
    };

    for param in params {
        let name = param
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let Some(value) = param.get("value") else {
            continue;
        };
        let kind = param.get("type").and_then(Value::as_str).unwrap_or("string");

        let coerced = match kind {
            "number" => Some(coerce_number(value)),
            "boolean" => Some(Value::Bool(truthy(value))),
            "json" => match value.as_str() {
                Some("undefined") => None,
                Some(raw) => serde_json::from_str::<Value>(raw).ok(),
                None => Some(value.clone()),
            },
            _ => Some(value.clone()),
        };
        if let Some(coerced) = coerced {
            out.insert(name.to_string(), coerced);
        }
    }
}

fn apply_reasoning(
    input: &Map<String, Value>,
    intent: &ReasoningIntent,
    model: &str,
    provider: ProviderTag,
    out: &mut Map<String, Value>,
) {
    // Whatever the client already put under this provider's namespace (any
    // accepted spelling) survives, with translated reasoning merged on top.
    let mut merged = Map::new();
    if let Some(options) = input.get("providerOptions").and_then(Value::as_object) {
        for key in provider.option_keys() {
            if let Some(existing) = options.get(*key).and_then(Value::as_object) {
                merged.extend(existing.clone());
                break;
            }
        }
    }
    merged.extend(translate(provider, intent, model));

    if let Some(options) = out.get_mut("providerOptions").and_then(Value::as_object_mut) {
        for key in provider.option_keys().iter().skip(1) {
            options.remove(*key);
        }
        if options.is_empty() && merged.is_empty() {
            out.remove("providerOptions");
            return;
        }
    }
    if merged.is_empty() {
        return;
    }

    let options = out
        .entry("providerOptions".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(options) = options.as_object_mut() {
        options.insert(provider.as_str().to_string(), Value::Object(merged));
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    if let Some(f) = value.as_f64() {
        return Some(f.trunc() as i64);
    }
    value.as_str().and_then(|s| s.trim().parse::<i64>().ok())
}

fn coerce_number(value: &Value) -> Value {
    let parsed = match value {
        Value::Number(_) => value.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.fract() == 0.0 => Value::from(f as i64),
        Some(f) => Value::from(f),
        None => value.clone(),
    }
}

fn truthy(value: &Value) -> bool {
    let rendered = match value {
        Value::String(s) => s.to_lowercase(),
        other => other.to_string().to_lowercase(),
    };
    matches!(rendered.as_str(), "true" | "1" | "yes")
}
