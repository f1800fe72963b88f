use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use tower::ServiceExt;

use keyrelay_common::ProxyConfigPatch;
use keyrelay_core::engine::ProxyEngine;
use keyrelay_core::models_cache::ModelsCache;
use keyrelay_core::upstream_client::{
    UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamTransportErrorKind,
};
use keyrelay_pool::KeyPool;

use crate::{RouterState, router};

/// Upstream stub that always answers the same way.
struct StaticUpstream {
    status: u16,
    body: &'static str,
    fail: bool,
}

impl UpstreamClient for StaticUpstream {
    fn send<'a>(
        &'a self,
        _req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            if self.fail {
                return Err(UpstreamFailure::Transport {
                    kind: UpstreamTransportErrorKind::Connect,
                    message: "refused".to_string(),
                });
            }
            Ok(UpstreamHttpResponse {
                status: self.status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: UpstreamBody::Bytes(Bytes::from_static(self.body.as_bytes())),
            })
        })
    }
}

fn make_state(upstream: StaticUpstream) -> RouterState {
    let config = ProxyConfigPatch {
        auth_key: Some("proxy-key".to_string()),
        ..Default::default()
    }
    .into_config()
    .unwrap();
    let pool = Arc::new(KeyPool::from_keys(
        vec!["k1".to_string(), "k2".to_string()],
        config.cooldown,
    ));
    let client: Arc<dyn UpstreamClient> = Arc::new(upstream);
    RouterState {
        engine: Arc::new(ProxyEngine::new(config, pool, client.clone())),
        models: Arc::new(ModelsCache::new(Duration::from_secs(3600))),
        client,
    }
}

fn ok_upstream() -> StaticUpstream {
    StaticUpstream {
        status: 200,
        body: r#"{"id":"chatcmpl-1"}"#,
        fail: false,
    }
}

fn dead_upstream() -> StaticUpstream {
    StaticUpstream {
        status: 0,
        body: "",
        fail: true,
    }
}

#[tokio::test]
async fn health_is_public_and_reports_pool_counts() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "keyrelay");
    assert_eq!(json["keys"]["total"], 2);
    assert_eq!(json["keys"]["available"], 2);
}

#[tokio::test]
async fn missing_bearer_is_rejected_with_openai_shape() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .oneshot(Request::get("/v1/models").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn wrong_bearer_is_rejected() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn models_list_falls_back_to_catalog_when_upstream_is_down() {
    let app = router(make_state(dead_upstream()));
    let resp = app
        .oneshot(
            Request::get("/v1/models?provider=google")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = to_bytes(resp.into_body(), 256 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["object"], "list");
    let data = json["data"].as_array().unwrap();
    assert!(!data.is_empty());
    assert!(
        data.iter()
            .all(|m| m["id"].as_str().unwrap().starts_with("google/"))
    );
}

#[tokio::test]
async fn models_get_resolves_aliases_and_404s_unknown() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .clone()
        .oneshot(
            Request::get("/v1/models/claude-sonnet-4")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "anthropic/claude-sonnet-4-20250514");

    let resp = app
        .oneshot(
            Request::get("/v1/models/acme/unlisted")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn preflight_short_circuits_with_permissive_cors() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/chat/completions")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn dispatch_forwards_and_stamps_cors() {
    let app = router(make_state(ok_upstream()));
    let resp = app
        .oneshot(
            Request::post("/v1/chat/completions")
                .header("authorization", "Bearer proxy-key")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"model":"openai/gpt-4o","messages":[]}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    assert_eq!(&body[..], br#"{"id":"chatcmpl-1"}"#);
}

#[tokio::test]
async fn admin_status_and_reset_surface() {
    let state = make_state(ok_upstream());
    state.engine.pool().mark_exhausted("k1");
    let app = router(state.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::get("/admin/status")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["total"], 2);
    assert_eq!(json["available"], 1);
    assert_eq!(json["keys"][0]["disabled"], true);

    let resp = app
        .clone()
        .oneshot(
            Request::post("/admin/reset")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.engine.pool().available(), 2);

    let resp = app
        .oneshot(
            Request::post("/admin/reset/9")
                .header("authorization", "Bearer proxy-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
