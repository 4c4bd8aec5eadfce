//! `/in/:slug`: receives an arbitrary inbound request and fans
//! it out to the endpoint's configured forward URLs.

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use std::net::SocketAddr;

use crate::server::app::AppState;
use crate::store::EndpointStore;

pub async fn inbound_handler(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    method: axum::http::Method,
    body: axum::body::Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let endpoint = match EndpointStore::find_by_slug(&state.pool, &slug).await {
        Ok(e) => e,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "unknown endpoint" })),
            )
        }
    };

    let headers_json = headers_to_json(&headers);
    let body_text = String::from_utf8(body.to_vec()).ok();

    match state
        .inbound
        .receive(
            &endpoint,
            method.as_str(),
            headers_json,
            body_text.as_deref(),
            Some(&addr.ip().to_string()),
        )
        .await
    {
        Ok(event) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "event_id": event.id, "forwarded_to": event.task_ids.len() })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            map.insert(name.as_str().to_string(), serde_json::Value::String(v.to_string()));
        }
    }
    serde_json::Value::Object(map)
}
