use std::collections::HashMap;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::files::keys_dir;
use crate::state::mask_key;

/// Persists active cooldowns across restarts as a flat JSON map of
/// credential to RFC3339 `disabled_until`. Best-effort: a broken or missing
/// file is an empty one, and write failures only warn.
#[derive(Debug, Clone)]
pub struct CooldownStore {
    path: PathBuf,
}

impl CooldownStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: keys_dir(data_dir).join("cooldown_keys.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted cooldowns, dropping entries that already expired.
    pub fn load(&self) -> HashMap<String, OffsetDateTime> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return HashMap::new();
        };
        let Ok(raw) = serde_json::from_str::<HashMap<String, String>>(&content) else {
            warn!(path = %self.path.display(), "cooldown file is not a string map, ignoring");
            return HashMap::new();
        };

        let now = OffsetDateTime::now_utc();
        let mut out = HashMap::new();
        for (key, stamp) in raw {
            match OffsetDateTime::parse(&stamp, &Rfc3339) {
                Ok(until) if until > now => {
                    out.insert(key, until);
                }
                Ok(_) => {}
                Err(_) => {
                    warn!(key = %mask_key(&key), stamp = %stamp, "unparsable cooldown entry dropped");
                }
            }
        }
        out
    }

    /// Rewrite the file with the given active cooldowns.
    pub fn save(&self, entries: &[(String, OffsetDateTime)]) {
        let mut map = serde_json::Map::new();
        for (key, until) in entries {
            if let Ok(stamp) = until.format(&Rfc3339) {
                map.insert(key.clone(), serde_json::Value::String(stamp));
            }
        }
        let payload = match serde_json::to_string_pretty(&serde_json::Value::Object(map)) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "serialize cooldown file failed");
                return;
            }
        };
        if let Some(parent) = self.path.parent()
            && let Err(err) = std::fs::create_dir_all(parent)
        {
            warn!(path = %parent.display(), error = %err, "create cooldown dir failed");
            return;
        }
        if let Err(err) = std::fs::write(&self.path, payload) {
            warn!(path = %self.path.display(), error = %err, "write cooldown file failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_active_cooldowns_and_drops_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path());
        let now = OffsetDateTime::now_utc();

        store.save(&[
            ("vck_live".to_string(), now + time::Duration::hours(1)),
            ("vck_dead".to_string(), now - time::Duration::hours(1)),
        ]);

        let loaded = store.load();
        assert!(loaded.contains_key("vck_live"));
        assert!(!loaded.contains_key("vck_dead"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path());
        assert!(store.load().is_empty());
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CooldownStore::new(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.load().is_empty());
    }
}
