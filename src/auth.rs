//! Bearer-key authentication.
//!
//! The key table is built once at startup from `OPENAI_API_KEYS` (and the
//! single `OPENAI_API_KEY` fallback). When no keys are configured at all,
//! authentication is disabled and every request maps to the `anonymous`
//! identity.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::proxy::error::ProxyError;

/// Resolved caller identity, used as the rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub key: String,
}

pub struct ApiKeyAuth {
    keys: HashMap<String, String>,
}

impl ApiKeyAuth {
    pub fn from_settings(settings: &Settings) -> Self {
        let mut specs = settings.openai_api_keys.clone();
        if !settings.fallback_openai_api_key.is_empty() {
            specs.push(settings.fallback_openai_api_key.clone());
        }

        let mut keys = HashMap::new();
        for spec in &specs {
            // `KEY:CLIENT_ID` splits on the first colon only; duplicates
            // overwrite (last wins).
            if let Some((key, client_id)) = spec.split_once(':') {
                let key = key.trim();
                let client_id = client_id.trim();
                if key.is_empty() {
                    continue;
                }
                let client_id = if client_id.is_empty() {
                    default_client_id(key)
                } else {
                    client_id.to_string()
                };
                keys.insert(key.to_string(), client_id);
            } else {
                let key = spec.trim();
                if !key.is_empty() {
                    keys.insert(key.to_string(), default_client_id(key));
                }
            }
        }

        Self { keys }
    }

    pub fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Map the raw `Authorization` header value to an identity.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<ClientIdentity, ProxyError> {
        if !self.enabled() {
            return Ok(ClientIdentity {
                client_id: "anonymous".to_string(),
                key: String::new(),
            });
        }

        let token = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| {
                ProxyError::Unauthorized("Missing or invalid Authorization header".to_string())
            })?;

        let client_id = self
            .keys
            .get(token)
            .ok_or_else(|| ProxyError::Unauthorized("Invalid API key".to_string()))?;

        Ok(ClientIdentity {
            client_id: client_id.clone(),
            key: token.to_string(),
        })
    }
}

fn default_client_id(key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("client-{}", &digest[..12])
}
