use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tracing::{info, warn};

use keyrelay_pool::{KeyPool, is_quota_error, mask_key};

use crate::upstream_client::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpRequest,
};

struct CachedModels {
    fetched_at: Instant,
    data: Vec<Value>,
}

/// TTL-gated snapshot of the upstream `/v1/models` list. Misses fall back
/// to the static catalog at the call site.
pub struct ModelsCache {
    ttl: Duration,
    cached: ArcSwapOption<CachedModels>,
}

impl ModelsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: ArcSwapOption::empty(),
        }
    }

    pub fn cached(&self) -> Option<Vec<Value>> {
        let entry = self.cached.load_full()?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.data.clone())
    }

    /// Serve from cache unless stale or `force`; probe upstream with a
    /// pooled credential otherwise. `None` means the probe failed and the
    /// caller should serve its fallback.
    pub async fn fetch(
        &self,
        client: &Arc<dyn UpstreamClient>,
        pool: &KeyPool,
        host: &str,
        force: bool,
    ) -> Option<Vec<Value>> {
        if !force && let Some(data) = self.cached() {
            return Some(data);
        }

        let key = pool.select()?;
        let request = UpstreamHttpRequest {
            method: HttpMethod::Get,
            url: format!("https://{host}/v1/models"),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {key}")),
                ("Host".to_string(), host.to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            body: None,
            is_stream: false,
        };

        match client.send(request).await {
            Ok(resp) if resp.status == 200 => {
                let UpstreamBody::Bytes(bytes) = resp.body else {
                    return None;
                };
                let value = serde_json::from_slice::<Value>(&bytes).ok()?;
                let data = value.get("data")?.as_array()?.clone();
                pool.mark_success(&key);
                self.cached.store(Some(Arc::new(CachedModels {
                    fetched_at: Instant::now(),
                    data: data.clone(),
                })));
                info!(event = "models_refreshed", count = data.len());
                Some(data)
            }
            Ok(resp) => {
                let UpstreamBody::Bytes(bytes) = resp.body else {
                    return None;
                };
                let text = String::from_utf8_lossy(&bytes);
                if is_quota_error(resp.status, &text) {
                    pool.mark_exhausted(&key);
                }
                warn!(
                    event = "models_refresh_failed",
                    status = resp.status,
                    key = %mask_key(&key)
                );
                None
            }
            Err(err) => {
                warn!(event = "models_refresh_failed", error = %err);
                None
            }
        }
    }
}
