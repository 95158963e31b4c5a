//! The request pipeline: correlation id, auth, rate limiting, and response
//! finalization. Runs outermost so every response, including CORS preflight
//! and error paths, carries the correlation and rate-limit headers and lands
//! in the metrics.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::proxy::error::InternalErrorMarker;
use crate::server::AppState;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Per-request state handed to the endpoint handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn pipeline(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = req.uri().path().to_string();
    let method = req.method().clone();
    let request_id = request_id_for(&req);
    let peer_ip = peer_ip(&req);

    // Only /v1/* traffic is authenticated and rate limited; /health,
    // /metrics and preflight pass straight through.
    let authenticated = route.starts_with("/v1/") && method != Method::OPTIONS;
    let mut client_id = peer_ip;
    let mut rate_remaining = state.limiter.limit();

    let mut response = match admit(&state, &req, authenticated, &mut client_id, &mut rate_remaining)
    {
        Ok(()) => {
            req.extensions_mut().insert(RequestContext {
                request_id: request_id.clone(),
            });
            next.run(req).await
        }
        Err(refusal) => refusal,
    };

    let latency_s = started.elapsed().as_secs_f64();
    let status = response.status();

    let headers = response.headers_mut();
    insert_header(headers, X_REQUEST_ID, &request_id);
    if authenticated {
        insert_header(headers, X_RATELIMIT_LIMIT, &state.limiter.limit().to_string());
        insert_header(headers, X_RATELIMIT_REMAINING, &rate_remaining.to_string());
    }

    if let Some(marker) = response.extensions().get::<InternalErrorMarker>() {
        state.metrics.record_upstream_error(&route);
        tracing::error!(
            event = "request_failed",
            request_id = %request_id,
            method = %method,
            route = %route,
            error = %marker.0,
            "request failed"
        );
    }

    state
        .metrics
        .record_request(&route, method.as_str(), status.as_u16(), latency_s);
    tracing::info!(
        event = "request_completed",
        request_id = %request_id,
        client_id = %client_id,
        method = %method,
        route = %route,
        status = status.as_u16(),
        latency_ms = (latency_s * 100_000.0).round() / 100.0,
        "request completed"
    );

    response
}

/// Auth + rate-limit gate. On refusal returns the finished short-circuit
/// response; `client_id` and `rate_remaining` are updated for finalization.
fn admit(
    state: &AppState,
    req: &Request,
    authenticated: bool,
    client_id: &mut String,
    rate_remaining: &mut u32,
) -> Result<(), Response> {
    if !authenticated {
        return Ok(());
    }

    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let identity = state
        .auth
        .authenticate(authorization)
        .map_err(IntoResponse::into_response)?;
    if state.auth.enabled() {
        *client_id = identity.client_id;
    }

    let decision = state.limiter.check(client_id);
    if !decision.allowed {
        state.metrics.record_rate_limited();
        *rate_remaining = 0;
        return Err(rate_limited_response(decision.retry_after_s));
    }
    *rate_remaining = decision.remaining;
    Ok(())
}

fn rate_limited_response(retry_after_s: u64) -> Response {
    let body = json!({
        "error": {"message": "Rate limit exceeded", "type": "rate_limit_error"}
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    insert_header(
        response.headers_mut(),
        header::RETRY_AFTER,
        &retry_after_s.to_string(),
    );
    response
}

/// The inbound `x-request-id` when present and non-empty, else a fresh
/// 32-hex-character token.
fn request_id_for(req: &Request) -> String {
    req.headers()
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

fn peer_ip(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
