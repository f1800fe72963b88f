use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use keyrelay_common::{ProxyConfig, ProxyConfigPatch};
use keyrelay_pool::KeyPool;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "keyrelay",
    version,
    about = "Key-pool reverse proxy for OpenAI-compatible AI gateways"
)]
pub struct CliArgs {
    /// Bind host.
    #[arg(long, env = "PROXY_HOST")]
    pub host: Option<String>,

    /// Listen port (PORT is honored as a fallback).
    #[arg(long, env = "PROXY_PORT")]
    pub port: Option<String>,

    /// Bearer clients must present; never a pool credential.
    #[arg(long, env = "AUTH_KEY")]
    pub auth_key: Option<String>,

    /// Upstream gateway host.
    #[arg(long, env = "UPSTREAM_HOST")]
    pub upstream_host: Option<String>,

    /// Base directory containing `keys/`.
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<String>,

    /// Cooldown window applied when a key exhausts, in hours.
    #[arg(long, env = "KEY_COOLDOWN_HOURS")]
    pub cooldown_hours: Option<String>,

    /// Rewrite request bodies into the upstream dialect.
    #[arg(long, env = "ENABLE_PARAMS_CONVERSION")]
    pub enable_params_conversion: Option<String>,

    /// Seconds to cache the upstream models list.
    #[arg(long, env = "MODELS_CACHE_TTL")]
    pub models_cache_ttl: Option<String>,
}

pub struct Bootstrap {
    pub config: ProxyConfig,
    pub pool: Arc<KeyPool>,
}

/// Preload `.env`, parse CLI/ENV, load the key pool. Any failure here is a
/// startup precondition failure; the binary maps it to exit code 1.
pub fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    bootstrap(args)
}

pub fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let host = sanitize_optional_env_value(args.host);
    let port = match parse_u16_env_value(args.port, "PROXY_PORT")? {
        Some(port) => Some(port),
        None => parse_u16_env_value(std::env::var("PORT").ok(), "PORT")?,
    };
    let auth_key = sanitize_optional_env_value(args.auth_key);
    let upstream_host = sanitize_optional_env_value(args.upstream_host);
    let data_dir = sanitize_optional_env_value(args.data_dir).map(PathBuf::from);
    let cooldown_hours = parse_u64_env_value(args.cooldown_hours, "KEY_COOLDOWN_HOURS")?;
    let enable_params_conversion =
        parse_bool_env_value(args.enable_params_conversion, "ENABLE_PARAMS_CONVERSION")?;
    let models_cache_ttl_secs = parse_u64_env_value(args.models_cache_ttl, "MODELS_CACHE_TTL")?;

    let patch = ProxyConfigPatch {
        host,
        port,
        auth_key,
        upstream_host,
        data_dir,
        cooldown_hours,
        enable_params_conversion,
        models_cache_ttl_secs,
    };
    let config: ProxyConfig = patch.into_config().context("finalize config")?;

    let pool = KeyPool::load(&config.data_dir, config.cooldown).context("load key pool")?;
    if pool.is_empty() {
        anyhow::bail!("key pool is empty");
    }
    info!(
        event = "bootstrap",
        port = config.port,
        upstream = %config.upstream_host,
        keys = pool.len()
    );

    Ok(Bootstrap {
        config,
        pool: Arc::new(pool),
    })
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // Some PaaS systems inject unresolved placeholders like `${VAR}`.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_env_values_are_ignored() {
        assert_eq!(sanitize_optional_env_value(Some("${PORT}".into())), None);
        assert_eq!(sanitize_optional_env_value(Some("  ".into())), None);
        assert_eq!(
            sanitize_optional_env_value(Some(" 3001 ".into())),
            Some("3001".to_string())
        );
    }

    #[test]
    fn bootstrap_loads_pool_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys");
        std::fs::create_dir_all(&keys).unwrap();
        std::fs::write(keys.join("active_keys.txt"), "k1,k2").unwrap();

        let args = CliArgs {
            host: None,
            port: Some("3111".to_string()),
            auth_key: Some("pk".to_string()),
            upstream_host: None,
            data_dir: Some(dir.path().to_string_lossy().into_owned()),
            cooldown_hours: Some("1".to_string()),
            enable_params_conversion: None,
            models_cache_ttl: None,
        };
        let boot = bootstrap(args).unwrap();
        assert_eq!(boot.config.port, 3111);
        assert_eq!(boot.pool.len(), 2);
    }

    #[test]
    fn bootstrap_fails_without_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            host: None,
            port: None,
            auth_key: Some("pk".to_string()),
            upstream_host: None,
            data_dir: Some(dir.path().to_string_lossy().into_owned()),
            cooldown_hours: None,
            enable_params_conversion: None,
            models_cache_ttl: None,
        };
        assert!(bootstrap(args).is_err());
    }

    #[test]
    fn bool_values_accept_common_spellings() {
        assert_eq!(
            parse_bool_env_value(Some("TRUE".into()), "X").unwrap(),
            Some(true)
        );
        assert_eq!(
            parse_bool_env_value(Some("off".into()), "X").unwrap(),
            Some(false)
        );
        assert!(parse_bool_env_value(Some("maybe".into()), "X").is_err());
    }
}
