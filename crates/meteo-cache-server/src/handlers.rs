use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use meteo_cache_core::{CacheStore, DEFAULT_CONTENT_TYPE, ProxyRequest, ProxyResponse};
use serde_json::{Map, Value, json};

use crate::server::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Liveness of the cache dependency only; the upstream is not contacted.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.proxy.cache();
    let (status, label, connection) = match cache.ping().await {
        Ok(()) => (StatusCode::OK, "ok", "connected"),
        Err(e) => {
            tracing::warn!(error = %e, backend = cache.name(), "health check ping failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "error", "disconnected")
        }
    };

    let mut body = Map::new();
    body.insert("status".into(), Value::from(label));
    body.insert(cache.name().into(), Value::from(connection));
    (status, Json(Value::Object(body)))
}

pub async fn metrics() -> Response {
    match crate::metrics::render_metrics() {
        Some(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Metrics not initialized" })),
        )
            .into_response(),
    }
}

/// Every path other than the service endpoints: cache-aside proxy to upstream.
pub async fn proxy(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET {
        return method_not_allowed();
    }

    let request = ProxyRequest::from_path_and_query(uri.path(), uri.query());
    let response = state.proxy.handle(&request).await;
    into_http_response(response)
}

fn into_http_response(response: ProxyResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&response.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        X_CACHE,
        HeaderValue::from_static(response.cache_status.as_str()),
    );

    (status, headers, response.body).into_response()
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET")],
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}
