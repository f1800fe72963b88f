use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde_json::{Value, json};
use tracing::{info, warn};

use keyrelay_catalog::ProviderTag;
use keyrelay_common::ProxyConfig;
use keyrelay_params::normalize;
use keyrelay_pool::{KeyPool, is_quota_error, mask_key};

use crate::upstream_client::{
    Headers, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse,
};

const SSE_DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// One client request, as seen by the dispatcher after routing.
#[derive(Debug)]
pub struct ProxyCall {
    pub method: HttpMethod,
    /// Path without the leading slash, forwarded verbatim upstream.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// What the normalizer made of the request body.
#[derive(Debug)]
struct RequestEnvelope {
    body: Bytes,
    is_stream: bool,
    model: Option<String>,
    provider: Option<ProviderTag>,
}

/// Outcome of the most recent failed attempt, deciding the terminal status
/// when the retry loop runs dry.
#[derive(Debug)]
enum LastFailure {
    Quota,
    Transport(UpstreamFailure),
}

/// The proxy engine: multiplexes client requests over the key pool and
/// relays the upstream response, streaming or buffered.
pub struct ProxyEngine {
    config: ProxyConfig,
    pool: Arc<KeyPool>,
    client: Arc<dyn UpstreamClient>,
}

impl ProxyEngine {
    pub fn new(config: ProxyConfig, pool: Arc<KeyPool>, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            config,
            pool,
            client,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn handle(&self, call: ProxyCall) -> UpstreamHttpResponse {
        let envelope = self.prepare(&call.body);
        info!(
            event = "dispatch",
            path = %call.path,
            model = envelope.model.as_deref().unwrap_or("-"),
            provider = envelope.provider.map(|p| p.as_str()).unwrap_or("-"),
            stream = envelope.is_stream
        );
        if envelope.is_stream {
            self.handle_stream(call, envelope)
        } else {
            self.handle_buffered(call, envelope).await
        }
    }

    /// Parse and (when enabled) normalize the request body.
    fn prepare(&self, body: &Bytes) -> RequestEnvelope {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return RequestEnvelope {
                body: body.clone(),
                is_stream: false,
                model: None,
                provider: None,
            };
        };
        if !value.is_object() {
            return RequestEnvelope {
                body: body.clone(),
                is_stream: false,
                model: None,
                provider: None,
            };
        }

        if self.config.enable_params_conversion {
            let (converted, provider) = normalize(&value);
            let is_stream = converted
                .get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let model = converted
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string);
            let body = serde_json::to_vec(&converted)
                .map(Bytes::from)
                .unwrap_or_else(|_| body.clone());
            return RequestEnvelope {
                body,
                is_stream,
                model,
                provider: Some(provider),
            };
        }

        RequestEnvelope {
            body: body.clone(),
            is_stream: value.get("stream").and_then(Value::as_bool).unwrap_or(false),
            model: value
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
            provider: None,
        }
    }

    fn max_attempts(&self) -> usize {
        match self.pool.len() {
            0 => 1,
            len => len.min(5),
        }
    }

    async fn handle_buffered(
        &self,
        call: ProxyCall,
        envelope: RequestEnvelope,
    ) -> UpstreamHttpResponse {
        let max_attempts = self.max_attempts();
        let mut last_failure: Option<LastFailure> = None;

        for attempt in 1..=max_attempts {
            let Some(key) = self.pool.select() else {
                return error_response(500, "configuration_error", "no upstream keys configured");
            };
            let request = build_upstream_request(
                &self.config.upstream_host,
                call.method,
                &call.path,
                call.query.as_deref(),
                &call.headers,
                &key,
                &envelope.body,
                false,
            );
            info!(
                event = "upstream_attempt",
                attempt,
                key = %mask_key(&key),
                path = %call.path
            );

            match self.client.send(request).await {
                Err(failure) => {
                    warn!(
                        event = "upstream_transport_error",
                        attempt,
                        key = %mask_key(&key),
                        error = %failure
                    );
                    self.pool.mark_exhausted(&key);
                    last_failure = Some(LastFailure::Transport(failure));
                }
                Ok(resp) => {
                    let bytes = body_bytes(resp.body).await;
                    if resp.status == 200 {
                        self.pool.mark_success(&key);
                        return UpstreamHttpResponse {
                            status: resp.status,
                            headers: resp.headers,
                            body: UpstreamBody::Bytes(bytes),
                        };
                    }

                    let text = String::from_utf8_lossy(&bytes);
                    if is_quota_error(resp.status, &text) {
                        warn!(
                            event = "key_quota_exhausted",
                            attempt,
                            key = %mask_key(&key),
                            status = resp.status
                        );
                        self.pool.mark_exhausted(&key);
                        last_failure = Some(LastFailure::Quota);
                        continue;
                    }

                    // Anything unclassified is the upstream talking to the
                    // client; relay it untouched on the first attempt.
                    return UpstreamHttpResponse {
                        status: resp.status,
                        headers: resp.headers,
                        body: UpstreamBody::Bytes(bytes),
                    };
                }
            }
        }

        final_error(last_failure)
    }

    /// Streaming dispatch: the response is committed as a 200 SSE stream up
    /// front; the relay task retries across keys until the first upstream
    /// 200, after which bytes flow verbatim and no retry ever happens.
    fn handle_stream(&self, call: ProxyCall, envelope: RequestEnvelope) -> UpstreamHttpResponse {
        // Nothing is committed yet, so an unconfigured pool can still fail
        // with a real status instead of an in-stream frame.
        if self.pool.is_empty() {
            return error_response(500, "configuration_error", "no upstream keys configured");
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
        let max_attempts = self.max_attempts();
        let pool = self.pool.clone();
        let client = self.client.clone();
        let host = self.config.upstream_host.clone();
        let body = envelope.body;
        let headers = call.headers;
        let method = call.method;
        let path = call.path;
        let query = call.query;

        tokio::spawn(async move {
            let mut last_failure: Option<LastFailure> = None;

            for attempt in 1..=max_attempts {
                let Some(key) = pool.select() else {
                    send_error_frame(
                        &tx,
                        &error_json(500, "configuration_error", "no upstream keys configured"),
                    )
                    .await;
                    return;
                };
                let request = build_upstream_request(
                    &host,
                    method,
                    &path,
                    query.as_deref(),
                    &headers,
                    &key,
                    &body,
                    true,
                );
                info!(
                    event = "upstream_attempt",
                    attempt,
                    key = %mask_key(&key),
                    path = %path,
                    stream = true
                );

                match client.send(request).await {
                    Err(failure) => {
                        warn!(
                            event = "upstream_transport_error",
                            attempt,
                            key = %mask_key(&key),
                            error = %failure
                        );
                        pool.mark_exhausted(&key);
                        last_failure = Some(LastFailure::Transport(failure));
                    }
                    Ok(resp) if resp.status == 200 => {
                        pool.mark_success(&key);
                        match resp.body {
                            UpstreamBody::Stream(mut upstream) => {
                                while let Some(chunk) = upstream.recv().await {
                                    if tx.send(chunk).await.is_err() {
                                        // Client went away; dropping the
                                        // receiver aborts the upstream pull.
                                        return;
                                    }
                                }
                            }
                            UpstreamBody::Bytes(bytes) => {
                                let _ = tx.send(bytes).await;
                            }
                        }
                        return;
                    }
                    Ok(resp) => {
                        let bytes = body_bytes(resp.body).await;
                        let text = String::from_utf8_lossy(&bytes);
                        if is_quota_error(resp.status, &text) {
                            warn!(
                                event = "key_quota_exhausted",
                                attempt,
                                key = %mask_key(&key),
                                status = resp.status
                            );
                            pool.mark_exhausted(&key);
                            last_failure = Some(LastFailure::Quota);
                            continue;
                        }

                        let payload = serde_json::from_slice::<Value>(&bytes).unwrap_or_else(
                            |_| error_json(resp.status, "upstream_error", text.as_ref()),
                        );
                        send_error_frame(&tx, &payload).await;
                        return;
                    }
                }
            }

            send_error_frame(&tx, &final_error_json(last_failure)).await;
        });

        UpstreamHttpResponse {
            status: 200,
            headers: vec![
                ("content-type".to_string(), "text/event-stream".to_string()),
                ("cache-control".to_string(), "no-cache".to_string()),
                ("x-accel-buffering".to_string(), "no".to_string()),
            ],
            body: UpstreamBody::Stream(rx),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_upstream_request(
    host: &str,
    method: HttpMethod,
    path: &str,
    query: Option<&str>,
    client_headers: &HeaderMap,
    key: &str,
    body: &Bytes,
    is_stream: bool,
) -> UpstreamHttpRequest {
    let mut url = format!("https://{host}/{path}");
    if let Some(query) = query
        && !query.is_empty()
    {
        url.push('?');
        url.push_str(query);
    }

    let mut headers: Headers = vec![
        ("Authorization".to_string(), format!("Bearer {key}")),
        ("Host".to_string(), host.to_string()),
    ];
    for name in [CONTENT_TYPE, ACCEPT, USER_AGENT] {
        if let Some(value) = client_headers.get(&name).and_then(|v| v.to_str().ok()) {
            headers.push((name.as_str().to_string(), value.to_string()));
        }
    }
    if let Some(value) = client_headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
    {
        headers.push(("X-Request-ID".to_string(), value.to_string()));
    }

    UpstreamHttpRequest {
        method,
        url,
        headers,
        body: (!body.is_empty()).then(|| body.clone()),
        is_stream,
    }
}

async fn body_bytes(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut out = Vec::new();
            while let Some(chunk) = rx.recv().await {
                out.extend_from_slice(&chunk);
            }
            Bytes::from(out)
        }
    }
}

async fn send_error_frame(tx: &tokio::sync::mpsc::Sender<Bytes>, payload: &Value) {
    let frame = format!("data: {payload}\n\n");
    if tx.send(Bytes::from(frame)).await.is_err() {
        return;
    }
    let _ = tx.send(Bytes::from_static(SSE_DONE_FRAME)).await;
}

pub fn error_json(code: u16, kind: &str, message: &str) -> Value {
    json!({
        "error": {
            "message": message,
            "type": kind,
            "code": code,
        }
    })
}

pub fn error_response(status: u16, kind: &str, message: &str) -> UpstreamHttpResponse {
    let payload = error_json(status, kind, message);
    UpstreamHttpResponse {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: UpstreamBody::Bytes(Bytes::from(payload.to_string())),
    }
}

fn final_error_parts(last_failure: Option<LastFailure>) -> (u16, &'static str, String) {
    match last_failure {
        Some(LastFailure::Transport(failure)) if failure.is_timeout() => {
            (504, "timeout", failure.to_string())
        }
        Some(LastFailure::Transport(failure)) => (502, "transport_error", failure.to_string()),
        _ => (
            503,
            "all_keys_exhausted",
            "all upstream keys are exhausted or cooling down".to_string(),
        ),
    }
}

fn final_error(last_failure: Option<LastFailure>) -> UpstreamHttpResponse {
    let (status, kind, message) = final_error_parts(last_failure);
    error_response(status, kind, &message)
}

fn final_error_json(last_failure: Option<LastFailure>) -> Value {
    let (status, kind, message) = final_error_parts(last_failure);
    error_json(status, kind, &message)
}
