use std::sync::OnceLock;

use regex::Regex;

const QUOTA_STATUS: &[u16] = &[402, 403, 429];

const QUOTA_PATTERN: &str =
    "insufficient|quota|exceeded|credits|balance|billing|limit.*reached|rate.*limit|overloaded|capacity";

fn quota_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(QUOTA_PATTERN).expect("quota pattern is valid"))
}

/// Does this upstream failure mean the credential (not the request) is at
/// fault? Only these trigger a cooldown; every other error is transient or
/// the client's problem and is relayed as-is.
pub fn is_quota_error(status: u16, body: &str) -> bool {
    if !QUOTA_STATUS.contains(&status) {
        return false;
    }
    quota_regex().is_match(&body.to_lowercase())
}
