//! Endpoint handlers binding request bodies to the router and upstream
//! client.
//!
//! ```text
//! Request -> pipeline -> handler -> ModelRouter -> UpstreamClient -> Upstream
//! ```
//!
//! Bodies are forwarded bit-transparent: buffered replies pass through as
//! raw bytes, streamed replies are piped chunk by chunk. The only response
//! the proxy assembles itself is the aggregated `/v1/models` listing.

pub mod client;
pub mod error;
pub mod limits;
pub mod middleware;
pub mod routing;
pub mod schemas;

use std::collections::HashSet;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::server::AppState;
use client::UpstreamReply;
use error::ProxyError;
use middleware::RequestContext;
use schemas::{to_payload, ChatCompletionRequest, CompletionRequest, EmbeddingsRequest};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const COMPLETIONS_PATH: &str = "/v1/completions";
const EMBEDDINGS_PATH: &str = "/v1/embeddings";
const MODELS_PATH: &str = "/v1/models";

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

pub async fn metrics_exposition(State(state): State<AppState>) -> Response {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

/// `GET /v1/models`: with no model map, a plain passthrough of the default
/// upstream; otherwise one listing aggregated across every configured
/// upstream, with entry ids rewritten to the configured model names.
pub async fn list_models(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ProxyError> {
    let timeout = Duration::from_secs_f64(state.settings.timeout_models_s);

    if !state.router.has_model_map() {
        let reply = state
            .client
            .get(state.router.default_base(), MODELS_PATH, timeout, &ctx.request_id)
            .await?;
        return Ok(passthrough_response(reply));
    }

    let mut data = Vec::new();
    let mut seen = HashSet::new();
    for (model, base) in state.router.configured_upstreams() {
        let reply = match state
            .client
            .get(base, MODELS_PATH, timeout, &ctx.request_id)
            .await
        {
            Ok(reply) if reply.status.is_success() => reply,
            // Unreachable or unhealthy upstreams drop out of the listing.
            _ => continue,
        };
        let Ok(listing) = serde_json::from_slice::<Value>(&reply.body) else {
            continue;
        };

        let entries = listing
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if entries.is_empty() {
            if seen.insert(model.to_string()) {
                data.push(json!({
                    "id": model,
                    "object": "model",
                    "owned_by": "llamacpp",
                    "meta": {"upstream": base},
                }));
            }
            continue;
        }

        for mut entry in entries {
            let Some(object) = entry.as_object_mut() else {
                continue;
            };
            if let Some(upstream_id) = object.insert("id".to_string(), json!(model)) {
                object.insert("upstream_model_id".to_string(), upstream_id);
            }
            if seen.insert(model.to_string()) {
                data.push(entry);
            }
        }
    }

    let models: Vec<Value> = data.iter().filter_map(|entry| entry.get("id").cloned()).collect();
    Ok(Json(json!({"object": "list", "data": data, "models": models})).into_response())
}

pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = ChatCompletionRequest::parse(&body)?;
    let base = state.router.upstream_for_model(&request.model)?;
    let payload = to_payload(&request)?;
    let timeout = Duration::from_secs_f64(state.settings.timeout_chat_s);

    if request.stream {
        let upstream = state
            .client
            .post_stream(base, CHAT_COMPLETIONS_PATH, &payload, timeout, &ctx.request_id)
            .await?;
        return Ok(stream_response(upstream));
    }

    let reply = state
        .client
        .post_json(base, CHAT_COMPLETIONS_PATH, &payload, timeout, &ctx.request_id)
        .await?;
    Ok(passthrough_response(reply))
}

pub async fn completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = CompletionRequest::parse(&body)?;
    let base = state.router.upstream_for_model(&request.model)?;
    let payload = to_payload(&request)?;
    let timeout = Duration::from_secs_f64(state.settings.timeout_completions_s);

    if request.stream {
        let upstream = state
            .client
            .post_stream(base, COMPLETIONS_PATH, &payload, timeout, &ctx.request_id)
            .await?;
        return Ok(stream_response(upstream));
    }

    let reply = state
        .client
        .post_json(base, COMPLETIONS_PATH, &payload, timeout, &ctx.request_id)
        .await?;
    Ok(passthrough_response(reply))
}

pub async fn embeddings(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let request = EmbeddingsRequest::parse(&body)?;
    let base = state.router.upstream_for_model(&request.model)?;
    let payload = to_payload(&request)?;
    let timeout = Duration::from_secs_f64(state.settings.timeout_embeddings_s);

    let reply = state
        .client
        .post_json(base, EMBEDDINGS_PATH, &payload, timeout, &ctx.request_id)
        .await?;
    Ok(passthrough_response(reply))
}

/// Return a buffered upstream reply untouched: status, content type, bytes.
fn passthrough_response(reply: UpstreamReply) -> Response {
    let mut response = Response::new(Body::from(reply.body));
    *response.status_mut() = reply.status;
    if let Ok(value) = HeaderValue::from_str(&reply.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Pipe an open upstream response through as a streaming body. Dropping the
/// body (client disconnect included) drops the upstream response and frees
/// its connection.
fn stream_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/event-stream")
        .to_string();

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}
