//! Model-to-upstream selection.

use std::collections::BTreeMap;

use crate::config::Settings;
use crate::proxy::error::ProxyError;

/// Maps a requested model id to an upstream base URL. With no configured
/// map, every model goes to the default upstream.
pub struct ModelRouter {
    upstreams: BTreeMap<String, String>,
    default_base: String,
}

impl ModelRouter {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            upstreams: settings.model_upstreams.clone(),
            default_base: settings.llama_cpp_base_url.clone(),
        }
    }

    pub fn has_model_map(&self) -> bool {
        !self.upstreams.is_empty()
    }

    pub fn default_base(&self) -> &str {
        &self.default_base
    }

    pub fn upstream_for_model(&self, model: &str) -> Result<&str, ProxyError> {
        if self.upstreams.is_empty() {
            return Ok(&self.default_base);
        }
        self.upstreams.get(model).map(String::as_str).ok_or_else(|| {
            let available = self
                .upstreams
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            ProxyError::BadRequest(format!(
                "Unknown model '{model}'. Available models: {available}"
            ))
        })
    }

    /// Configured `(model, base_url)` pairs, sorted by model id.
    pub fn configured_upstreams(&self) -> impl Iterator<Item = (&str, &str)> {
        self.upstreams
            .iter()
            .map(|(model, base)| (model.as_str(), base.as_str()))
    }
}
