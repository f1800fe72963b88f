use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const SERVICE_NAME: &str = "keyrelay";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV (clap applies both) > built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Bearer accepted from clients. Distinct from any pool credential.
    pub auth_key: String,
    /// Upstream gateway host; all unrecognized paths forward here over https.
    pub upstream_host: String,
    /// Base directory holding `keys/` (key files + cooldown persistence).
    pub data_dir: PathBuf,
    pub cooldown: Duration,
    pub enable_params_conversion: bool,
    pub models_cache_ttl: Duration,
}

/// Optional layer used while merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_key: Option<String>,
    pub upstream_host: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub cooldown_hours: Option<u64>,
    pub enable_params_conversion: Option<bool>,
    pub models_cache_ttl_secs: Option<u64>,
}

impl ProxyConfigPatch {
    pub fn overlay(&mut self, other: ProxyConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.auth_key.is_some() {
            self.auth_key = other.auth_key;
        }
        if other.upstream_host.is_some() {
            self.upstream_host = other.upstream_host;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        if other.cooldown_hours.is_some() {
            self.cooldown_hours = other.cooldown_hours;
        }
        if other.enable_params_conversion.is_some() {
            self.enable_params_conversion = other.enable_params_conversion;
        }
        if other.models_cache_ttl_secs.is_some() {
            self.models_cache_ttl_secs = other.models_cache_ttl_secs;
        }
    }

    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        Ok(ProxyConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(3001),
            auth_key: self.auth_key.ok_or(ConfigError::MissingField("AUTH_KEY"))?,
            upstream_host: self
                .upstream_host
                .unwrap_or_else(|| "ai-gateway.vercel.sh".to_string()),
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("data")),
            cooldown: Duration::from_secs(self.cooldown_hours.unwrap_or(24) * 3600),
            enable_params_conversion: self.enable_params_conversion.unwrap_or(true),
            models_cache_ttl: Duration::from_secs(self.models_cache_ttl_secs.unwrap_or(3600)),
        })
    }
}

impl From<ProxyConfig> for ProxyConfigPatch {
    fn from(value: ProxyConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            auth_key: Some(value.auth_key),
            upstream_host: Some(value.upstream_host),
            data_dir: Some(value.data_dir),
            cooldown_hours: Some(value.cooldown.as_secs() / 3600),
            enable_params_conversion: Some(value.enable_params_conversion),
            models_cache_ttl_secs: Some(value.models_cache_ttl.as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_everything_but_auth_key() {
        let patch = ProxyConfigPatch {
            auth_key: Some("sk-proxy".to_string()),
            ..Default::default()
        };
        let config = patch.into_config().unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.upstream_host, "ai-gateway.vercel.sh");
        assert_eq!(config.cooldown, Duration::from_secs(24 * 3600));
        assert!(config.enable_params_conversion);
    }

    #[test]
    fn missing_auth_key_is_rejected() {
        let err = ProxyConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("AUTH_KEY")));
    }

    #[test]
    fn overlay_prefers_later_values() {
        let mut base = ProxyConfigPatch {
            port: Some(8080),
            auth_key: Some("a".to_string()),
            ..Default::default()
        };
        base.overlay(ProxyConfigPatch {
            port: Some(9090),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_key, "a");
    }
}
