//! Router assembly and the listening loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, CorsLayer};

use crate::auth::ApiKeyAuth;
use crate::config::Settings;
use crate::metrics::MetricsRegistry;
use crate::proxy::{self, client::UpstreamClient, limits::SlidingWindowRateLimiter, routing::ModelRouter};

/// Shared per-process state. Everything here is either immutable after
/// startup (settings, auth table, model map) or internally synchronized
/// (limiter, metrics).
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub auth: Arc<ApiKeyAuth>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub metrics: Arc<MetricsRegistry>,
    pub router: Arc<ModelRouter>,
    pub client: Arc<UpstreamClient>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        Self {
            auth: Arc::new(ApiKeyAuth::from_settings(&settings)),
            limiter: Arc::new(SlidingWindowRateLimiter::new(settings.rate_limit_rpm)),
            router: Arc::new(ModelRouter::from_settings(&settings)),
            client: Arc::new(UpstreamClient::new(&settings, Arc::clone(&metrics))),
            metrics,
            settings: Arc::new(settings),
        }
    }
}

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(proxy::health))
        .route("/metrics", get(proxy::metrics_exposition))
        .route("/v1/models", get(proxy::list_models))
        .route("/v1/chat/completions", post(proxy::chat_completions))
        .route("/v1/completions", post(proxy::completions))
        .route("/v1/embeddings", post(proxy::embeddings))
        // A handler panic becomes a marked 500 here, inside the pipeline,
        // so finalization still stamps headers and records it.
        .layer(CatchPanicLayer::custom(proxy::error::response_for_panic));

    if !state.settings.cors_allowed_origins.is_empty() {
        router = router.layer(cors_layer(&state.settings.cors_allowed_origins));
    }

    // The pipeline goes on last so it wraps everything, CORS included.
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::middleware::pipeline,
        ))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub async fn serve(settings: Settings) -> std::io::Result<()> {
    let addr = settings.listen_addr.clone();
    let state = AppState::new(settings);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "proxy listening");
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app(AppState::new(Settings::default()));
        tokio::spawn(async move {
            axum::serve(listener, a.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap()
        });
        let r = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        let s = r.json::<serde_json::Value>().await.unwrap();
        assert_eq!(s["status"], "ok");
    }
}
