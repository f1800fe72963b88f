use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cooldown::CooldownStore;
use crate::files::{PoolError, load_keys};
use crate::state::{KeySlotStatus, KeyState, PoolStatus, format_timestamp, mask_key};

struct PoolInner {
    keys: Vec<String>,
    current_index: usize,
    states: HashMap<String, KeyState>,
}

/// Round-robin credential pool with cooldown-aware fallback.
///
/// All mutation happens under one mutex, held only for the duration of a
/// single call; network and file I/O never run under it.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
    cooldown: Duration,
    data_dir: Option<PathBuf>,
    store: Option<CooldownStore>,
}

impl KeyPool {
    /// Pool over an explicit key list, without file backing.
    pub fn from_keys(keys: Vec<String>, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                keys,
                current_index: 0,
                states: HashMap::new(),
            }),
            cooldown,
            data_dir: None,
            store: None,
        }
    }

    /// Load from the priority key files under `data_dir`, seeding states
    /// from the persisted cooldown file.
    pub fn load(data_dir: &Path, cooldown: Duration) -> Result<Self, PoolError> {
        let (path, keys) = load_keys(data_dir)?;
        info!(
            event = "pool_loaded",
            file = %path.display(),
            keys = keys.len()
        );

        let store = CooldownStore::new(data_dir);
        let mut states = HashMap::new();
        for (key, until) in store.load() {
            info!(event = "cooldown_restored", key = %mask_key(&key));
            states.insert(
                key,
                KeyState {
                    disabled: true,
                    disabled_until: Some(until),
                    ..Default::default()
                },
            );
        }

        Ok(Self {
            inner: Mutex::new(PoolInner {
                keys,
                current_index: 0,
                states,
            }),
            cooldown,
            data_dir: Some(data_dir.to_path_buf()),
            store: Some(store),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Pick the next usable credential, round-robin from the cursor.
    ///
    /// A key whose cooldown has lapsed is re-enabled here, at selection time.
    /// When every key is cooling down, the one closest to recovery is
    /// returned anyway so the caller can still attempt.
    pub fn select(&self) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.keys.is_empty() {
            return None;
        }

        let len = inner.keys.len();
        for offset in 0..len {
            let idx = (inner.current_index + offset) % len;
            let key = &inner.keys[idx];
            let state = inner.states.entry(key.clone()).or_default();
            if state.disabled && state.disabled_until.is_some_and(|until| now >= until) {
                state.disabled = false;
                state.disabled_until = None;
                info!(event = "key_reenabled", key = %mask_key(key));
            }
            if !state.disabled {
                state.last_used = Some(now);
                let chosen = key.clone();
                inner.current_index = (idx + 1) % len;
                return Some(chosen);
            }
        }

        // Degraded mode: everything is cooling down.
        let (key, until) = inner
            .keys
            .iter()
            .map(|key| {
                let until = inner
                    .states
                    .get(key)
                    .and_then(|state| state.disabled_until)
                    .unwrap_or(now);
                (key.clone(), until)
            })
            .min_by_key(|(_, until)| *until)?;
        warn!(
            event = "pool_degraded",
            key = %mask_key(&key),
            until = %format_timestamp(until).unwrap_or_default()
        );
        Some(key)
    }

    pub fn mark_success(&self, key: &str) {
        let mut guard = self.lock();
        let state = guard.states.entry(key.to_string()).or_default();
        state.success_count += 1;
    }

    /// Disable the key for one cooldown window. Re-exhausting extends the
    /// window, never shortens it.
    pub fn mark_exhausted(&self, key: &str) {
        let until = OffsetDateTime::now_utc() + self.cooldown;
        let snapshot = {
            let mut guard = self.lock();
            let state = guard.states.entry(key.to_string()).or_default();
            state.disabled = true;
            state.error_count += 1;
            state.disabled_until = match state.disabled_until {
                Some(current) if current > until => Some(current),
                _ => Some(until),
            };
            info!(
                event = "key_disabled",
                key = %mask_key(key),
                until = %format_timestamp(state.disabled_until.unwrap_or(until)).unwrap_or_default(),
                errors = state.error_count
            );
            self.store.as_ref().map(|_| disabled_snapshot(&guard))
        };
        if let (Some(store), Some(snapshot)) = (self.store.as_ref(), snapshot) {
            store.save(&snapshot);
        }
    }

    /// Re-read the key files. Surviving credentials keep their state.
    pub fn reload(&self) -> Result<usize, PoolError> {
        let Some(data_dir) = self.data_dir.as_deref() else {
            return Err(PoolError::NotFileBacked);
        };
        let (path, keys) = load_keys(data_dir)?;
        let count = keys.len();
        self.replace_keys(keys);
        info!(event = "pool_reloaded", file = %path.display(), keys = count);
        Ok(count)
    }

    /// Swap in a new key list atomically. States are keyed by credential,
    /// so counters and active cooldowns survive for keys still present.
    pub fn replace_keys(&self, keys: Vec<String>) {
        let mut guard = self.lock();
        guard.keys = keys;
        if guard.current_index >= guard.keys.len() {
            guard.current_index = 0;
        }
    }

    pub fn reset_all(&self) {
        {
            let mut guard = self.lock();
            guard.states.clear();
            guard.current_index = 0;
        }
        if let Some(store) = self.store.as_ref() {
            store.save(&[]);
        }
        info!(event = "pool_reset");
    }

    pub fn reset(&self, index: usize) -> bool {
        let snapshot = {
            let mut guard = self.lock();
            let Some(key) = guard.keys.get(index).cloned() else {
                return false;
            };
            guard.states.insert(key.clone(), KeyState::default());
            info!(event = "key_reset", index, key = %mask_key(&key));
            self.store.as_ref().map(|_| disabled_snapshot(&guard))
        };
        if let (Some(store), Some(snapshot)) = (self.store.as_ref(), snapshot) {
            store.save(&snapshot);
        }
        true
    }

    /// Current state of one credential, if it has ever been touched.
    pub fn state(&self, key: &str) -> Option<KeyState> {
        self.lock().states.get(key).cloned()
    }

    pub fn available(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let guard = self.lock();
        guard
            .keys
            .iter()
            .filter(|key| {
                guard
                    .states
                    .get(*key)
                    .is_none_or(|state| state.is_available(now))
            })
            .count()
    }

    pub fn status(&self) -> PoolStatus {
        let now = OffsetDateTime::now_utc();
        let guard = self.lock();
        let keys: Vec<KeySlotStatus> = guard
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let state = guard.states.get(key).cloned().unwrap_or_default();
                KeySlotStatus {
                    index,
                    key: mask_key(key),
                    disabled: state.disabled,
                    disabled_until: state.disabled_until.and_then(format_timestamp),
                    error_count: state.error_count,
                    success_count: state.success_count,
                    last_used: state.last_used.and_then(format_timestamp),
                }
            })
            .collect();
        let available = guard
            .keys
            .iter()
            .filter(|key| {
                guard
                    .states
                    .get(*key)
                    .is_none_or(|state| state.is_available(now))
            })
            .count();
        PoolStatus {
            total: guard.keys.len(),
            available,
            current_index: guard.current_index,
            keys,
        }
    }
}

fn disabled_snapshot(inner: &PoolInner) -> Vec<(String, OffsetDateTime)> {
    let now = OffsetDateTime::now_utc();
    inner
        .states
        .iter()
        .filter_map(|(key, state)| {
            let until = state.disabled_until?;
            (state.disabled && until > now).then(|| (key.clone(), until))
        })
        .collect()
}
