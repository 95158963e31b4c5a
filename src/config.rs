//! Runtime configuration resolved from the environment at startup.

use std::collections::BTreeMap;
use std::env;

/// Immutable process-lifetime settings.
///
/// Every field has a default so the proxy starts with no environment at all,
/// pointing at a llama.cpp server on localhost with auth disabled.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Default upstream base URL, trailing slash stripped.
    pub llama_cpp_base_url: String,
    /// Optional model -> upstream base URL map. Empty means every request
    /// goes to the default upstream.
    pub model_upstreams: BTreeMap<String, String>,
    /// Accepted bearer keys, each optionally `KEY:CLIENT_ID`.
    pub openai_api_keys: Vec<String>,
    /// Single extra key appended to the list above.
    pub fallback_openai_api_key: String,
    pub cors_allowed_origins: Vec<String>,
    pub connect_timeout_s: f64,
    pub timeout_chat_s: f64,
    pub timeout_completions_s: f64,
    pub timeout_embeddings_s: f64,
    pub timeout_models_s: f64,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff base in seconds, doubled each attempt.
    pub retry_backoff_s: f64,
    /// Sliding-window capacity per client per minute.
    pub rate_limit_rpm: u32,
    pub log_level: String,
    pub listen_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llama_cpp_base_url: "http://127.0.0.1:8080".to_string(),
            model_upstreams: BTreeMap::new(),
            openai_api_keys: Vec::new(),
            fallback_openai_api_key: String::new(),
            cors_allowed_origins: Vec::new(),
            connect_timeout_s: 5.0,
            timeout_chat_s: 120.0,
            timeout_completions_s: 120.0,
            timeout_embeddings_s: 60.0,
            timeout_models_s: 10.0,
            max_retries: 2,
            retry_backoff_s: 0.35,
            rate_limit_rpm: 120,
            log_level: "info".to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            llama_cpp_base_url: strip_trailing_slash(&env_or(
                "LLAMA_CPP_BASE_URL",
                &defaults.llama_cpp_base_url,
            )),
            model_upstreams: parse_model_upstreams(&env_or("MODEL_UPSTREAMS", "")),
            openai_api_keys: env_csv("OPENAI_API_KEYS"),
            fallback_openai_api_key: env_or("OPENAI_API_KEY", ""),
            cors_allowed_origins: env_csv("CORS_ALLOWED_ORIGINS"),
            connect_timeout_s: env_f64("CONNECT_TIMEOUT_S", defaults.connect_timeout_s),
            timeout_chat_s: env_f64("TIMEOUT_CHAT_S", defaults.timeout_chat_s),
            timeout_completions_s: env_f64("TIMEOUT_COMPLETIONS_S", defaults.timeout_completions_s),
            timeout_embeddings_s: env_f64("TIMEOUT_EMBEDDINGS_S", defaults.timeout_embeddings_s),
            timeout_models_s: env_f64("TIMEOUT_MODELS_S", defaults.timeout_models_s),
            max_retries: env_u32("MAX_RETRIES", defaults.max_retries),
            retry_backoff_s: env_f64("RETRY_BACKOFF_S", defaults.retry_backoff_s),
            rate_limit_rpm: env_u32("RATE_LIMIT_RPM", defaults.rate_limit_rpm),
            log_level: env_or("LOG_LEVEL", &defaults.log_level),
            listen_addr: env_or("LISTEN_ADDR", &defaults.listen_addr),
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    env_or(name, "").parse().unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env_or(name, "").parse().unwrap_or(default)
}

fn env_csv(name: &str) -> Vec<String> {
    env_or(name, "")
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn strip_trailing_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Parse `model=base_url` entries, comma-separated. Malformed entries are
/// skipped; a later duplicate model wins.
fn parse_model_upstreams(raw: &str) -> BTreeMap<String, String> {
    let mut upstreams = BTreeMap::new();
    for entry in raw.split(',') {
        let Some((model, base)) = entry.split_once('=') else {
            continue;
        };
        let model = model.trim();
        let base = base.trim();
        if model.is_empty() || base.is_empty() {
            continue;
        }
        upstreams.insert(model.to_string(), strip_trailing_slash(base));
    }
    upstreams
}
