use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Query, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use keyrelay_catalog::ProviderTag;
use keyrelay_common::{SERVICE_NAME, SERVICE_VERSION};
use keyrelay_core::engine::{ProxyCall, ProxyEngine};
use keyrelay_core::models_cache::ModelsCache;
use keyrelay_core::upstream_client::{
    HttpMethod, UpstreamBody, UpstreamClient, UpstreamHttpResponse,
};

use crate::admin;

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<ProxyEngine>,
    pub models: Arc<ModelsCache>,
    pub client: Arc<dyn UpstreamClient>,
}

/// Build the full application router: health (public), models and admin
/// (proxy-key auth), everything else falling through to the dispatcher.
pub fn router(state: RouterState) -> Router {
    let protected = Router::new()
        .route("/v1/models", get(models_list))
        .route("/v1/models/{*model}", get(models_get))
        .merge(admin::router())
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .with_state(state)
        .merge(protected)
        .layer(middleware::from_fn(cors))
}

/// Permissive CORS: preflights short-circuit, everything else gets the
/// wildcard origin stamped on.
async fn cors(req: axum::http::Request<Body>, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return (
            StatusCode::NO_CONTENT,
            [
                ("access-control-allow-origin", "*"),
                ("access-control-allow-methods", "GET, POST, PUT, PATCH, DELETE, OPTIONS"),
                ("access-control-allow-headers", "*"),
            ],
        )
            .into_response();
    }

    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    resp
}

async fn require_auth(
    State(state): State<RouterState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return unauthorized();
    };
    if token != state.engine.config().auth_key {
        return unauthorized();
    }
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if value.len() > prefix.len() && value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        let token = value[prefix.len()..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": {
                "message": "Invalid API key provided",
                "type": "invalid_request_error",
                "code": "invalid_api_key",
            }
        })),
    )
        .into_response()
}

async fn health(State(state): State<RouterState>) -> Response {
    let pool = state.engine.pool();
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(serde_json::json!({
        "ok": true,
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "keys": {
            "total": pool.len(),
            "available": pool.available(),
        },
        "timestamp": timestamp,
    }))
    .into_response()
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ModelsQuery {
    provider: Option<String>,
    refresh: Option<bool>,
}

async fn models_list(
    State(state): State<RouterState>,
    Query(query): Query<ModelsQuery>,
) -> Response {
    let filter = match query.provider.as_deref() {
        Some(raw) => match ProviderTag::parse(raw) {
            Some(tag) => Some(tag),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": {
                            "message": format!("unknown provider: {raw}"),
                            "type": "invalid_request_error",
                        }
                    })),
                )
                    .into_response();
            }
        },
        None => None,
    };
    let force = query.refresh.unwrap_or(false);

    let host = state.engine.config().upstream_host.clone();
    let data = state
        .models
        .fetch(&state.client, state.engine.pool(), &host, force)
        .await;

    let data: Vec<serde_json::Value> = match data {
        Some(upstream) => upstream
            .into_iter()
            .filter(|entry| {
                filter.is_none_or(|tag| {
                    entry
                        .get("id")
                        .and_then(|id| id.as_str())
                        .is_some_and(|id| id.starts_with(&format!("{}/", tag.as_str())))
                })
            })
            .collect(),
        None => keyrelay_catalog::list(filter)
            .into_iter()
            .map(|entry| entry.to_openai_value())
            .collect(),
    };

    Json(serde_json::json!({ "object": "list", "data": data })).into_response()
}

async fn models_get(
    State(_state): State<RouterState>,
    axum::extract::Path(model): axum::extract::Path<String>,
) -> Response {
    let canonical = keyrelay_catalog::normalize(model.trim_start_matches('/'));
    match keyrelay_catalog::lookup(&canonical) {
        Some(entry) => Json(entry.to_openai_value()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": {
                    "message": format!("model not found: {model}"),
                    "type": "invalid_request_error",
                }
            })),
        )
            .into_response(),
    }
}

/// Everything the proxy does not serve itself forwards upstream.
async fn dispatch(
    State(state): State<RouterState>,
    method: Method,
    uri: Uri,
    RawQuery(query): RawQuery,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = HttpMethod::parse(method.as_str()) else {
        return (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed").into_response();
    };

    // Give every proxied request an id so upstream logs correlate.
    if !headers.contains_key("x-request-id")
        && let Ok(value) = HeaderValue::from_str(&uuid::Uuid::now_v7().to_string())
    {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }

    let path = uri.path().trim_start_matches('/').to_string();
    info!(event = "proxy_request", path = %path);

    let call = ProxyCall {
        method,
        path,
        query,
        headers,
        body,
    };
    to_axum_response(state.engine.handle(call).await)
}

fn to_axum_response(resp: UpstreamHttpResponse) -> Response {
    let mut builder = Response::builder().status(resp.status);
    if let Some(headers) = builder.headers_mut() {
        for (k, v) in resp.headers {
            // Hyper handles framing itself; hop-by-hop headers must not leak.
            if is_hop_by_hop_or_framing_header(&k) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(&v),
            ) {
                headers.append(name, value);
            }
        }
    }

    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        UpstreamBody::Stream(rx) => {
            let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}
