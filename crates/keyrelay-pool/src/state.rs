use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Per-credential health. Entries are created on first touch and only ever
/// reset, never removed.
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    pub disabled: bool,
    pub disabled_until: Option<OffsetDateTime>,
    pub error_count: u64,
    pub success_count: u64,
    pub last_used: Option<OffsetDateTime>,
}

impl KeyState {
    /// Usable right now, counting an expired cooldown as usable even before
    /// the lazy re-enable has run.
    pub fn is_available(&self, now: OffsetDateTime) -> bool {
        !self.disabled || self.disabled_until.is_some_and(|until| now >= until)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub current_index: usize,
    pub keys: Vec<KeySlotStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeySlotStatus {
    pub index: usize,
    pub key: String,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_until: Option<String>,
    pub error_count: u64,
    pub success_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
}

/// First 8 + ellipsis + last 4; anything short enough to leak is fully
/// elided. Log lines and status payloads never carry a raw credential.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "…".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

pub fn format_timestamp(ts: OffsetDateTime) -> Option<String> {
    ts.format(&Rfc3339).ok()
}
