use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tracing::info;

use crate::proxy::RouterState;

pub fn router() -> Router<RouterState> {
    Router::new()
        .route("/admin/status", get(status))
        .route("/admin/reset", post(reset_all))
        .route("/admin/reset/{index}", post(reset_one))
        .route("/admin/reload", post(reload))
}

async fn status(State(state): State<RouterState>) -> Response {
    Json(state.engine.pool().status()).into_response()
}

async fn reset_all(State(state): State<RouterState>) -> Response {
    state.engine.pool().reset_all();
    info!(event = "admin_reset_all");
    Json(serde_json::json!({ "ok": true })).into_response()
}

async fn reset_one(State(state): State<RouterState>, Path(index): Path<usize>) -> Response {
    if state.engine.pool().reset(index) {
        info!(event = "admin_reset", index);
        Json(serde_json::json!({ "ok": true, "index": index })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": {
                    "message": format!("no key at index {index}"),
                    "type": "invalid_request_error",
                }
            })),
        )
            .into_response()
    }
}

async fn reload(State(state): State<RouterState>) -> Response {
    match state.engine.pool().reload() {
        Ok(count) => Json(serde_json::json!({ "ok": true, "keys": count })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": {
                    "message": err.to_string(),
                    "type": "configuration_error",
                }
            })),
        )
            .into_response(),
    }
}
