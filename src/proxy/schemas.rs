//! Request body schemas for the `/v1/*` endpoints.
//!
//! Only the fields the proxy needs are typed; everything else is captured in
//! a flattened map and re-serialized untouched, so the payload reaching the
//! upstream is lossless.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::proxy::error::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A field accepted as either a single string or a list of strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: StringOrList,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: StringOrList,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProxyError> {
        let request: Self = from_body(body)?;
        if request.messages.is_empty() {
            return Err(ProxyError::Validation(
                "messages must not be empty".to_string(),
            ));
        }
        Ok(request)
    }
}

impl CompletionRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProxyError> {
        from_body(body)
    }
}

impl EmbeddingsRequest {
    pub fn parse(body: &[u8]) -> Result<Self, ProxyError> {
        let request: Self = from_body(body)?;
        let empty = match &request.input {
            StringOrList::One(text) => text.is_empty(),
            StringOrList::Many(items) => items.is_empty(),
        };
        if empty {
            return Err(ProxyError::Validation(
                "input must not be empty".to_string(),
            ));
        }
        Ok(request)
    }
}

fn from_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ProxyError> {
    serde_json::from_slice(body).map_err(|err| ProxyError::Validation(err.to_string()))
}

/// Serialize a validated request back into the JSON payload forwarded
/// upstream.
pub fn to_payload<T: Serialize>(request: &T) -> Result<Value, ProxyError> {
    serde_json::to_value(request).map_err(|err| ProxyError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_minimal() {
        let body = json!({
            "model": "llama",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let request = ChatCompletionRequest::parse(body.to_string().as_bytes()).unwrap();
        assert_eq!(request.model, "llama");
        assert!(!request.stream);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
    }

    #[test]
    fn test_chat_request_missing_messages() {
        let body = json!({"model": "llama"});
        let err = ChatCompletionRequest::parse(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }

    #[test]
    fn test_chat_request_empty_messages() {
        let body = json!({"model": "llama", "messages": []});
        let err = ChatCompletionRequest::parse(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }

    #[test]
    fn test_chat_request_bad_role() {
        let body = json!({
            "model": "llama",
            "messages": [{"role": "robot", "content": "hi"}]
        });
        assert!(ChatCompletionRequest::parse(body.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_chat_extra_fields_round_trip() {
        let body = json!({
            "model": "llama",
            "messages": [{"role": "user", "content": "hi", "tool_call_id": "t1"}],
            "temperature": 0.2,
            "top_p": 0.9
        });
        let request = ChatCompletionRequest::parse(body.to_string().as_bytes()).unwrap();
        let payload = to_payload(&request).unwrap();
        assert_eq!(payload["temperature"], json!(0.2));
        assert_eq!(payload["top_p"], json!(0.9));
        assert_eq!(payload["messages"][0]["tool_call_id"], json!("t1"));
        // `name` was absent and stays absent.
        assert!(payload["messages"][0].get("name").is_none());
    }

    #[test]
    fn test_completion_prompt_forms() {
        let one = json!({"model": "llama", "prompt": "hello"});
        let many = json!({"model": "llama", "prompt": ["a", "b"]});
        assert!(CompletionRequest::parse(one.to_string().as_bytes()).is_ok());
        let request = CompletionRequest::parse(many.to_string().as_bytes()).unwrap();
        assert!(matches!(request.prompt, StringOrList::Many(ref items) if items.len() == 2));
    }

    #[test]
    fn test_embeddings_rejects_empty_input() {
        let empty_list = json!({"model": "llama", "input": []});
        let empty_str = json!({"model": "llama", "input": ""});
        assert!(EmbeddingsRequest::parse(empty_list.to_string().as_bytes()).is_err());
        assert!(EmbeddingsRequest::parse(empty_str.to_string().as_bytes()).is_err());
        let ok = json!({"model": "llama", "input": ["one"]});
        assert!(EmbeddingsRequest::parse(ok.to_string().as_bytes()).is_ok());
    }

    #[test]
    fn test_invalid_json_is_validation_error() {
        let err = ChatCompletionRequest::parse(b"{not json").unwrap_err();
        assert!(matches!(err, ProxyError::Validation(_)));
    }
}
