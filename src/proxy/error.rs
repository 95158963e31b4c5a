//! Proxy error types and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Domain errors raised anywhere in the request pipeline. Each maps to an
/// HTTP status and is serialized as `{"error":{"message": ...}}`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProxyError {
    /// Missing, malformed, or unknown bearer token.
    #[error("{0}")]
    Unauthorized(String),
    /// Refused by the sliding-window limiter.
    #[error("Rate limit exceeded")]
    RateLimited,
    /// Unknown model or otherwise unroutable request.
    #[error("{0}")]
    BadRequest(String),
    /// Request body failed schema validation.
    #[error("{0}")]
    Validation(String),
    /// Transport failure after retries.
    #[error("{0}")]
    BadGateway(String),
    /// Upstream timeout after retries.
    #[error("{0}")]
    GatewayTimeout(String),
    /// Anything unexpected.
    #[error("Internal server error")]
    Internal(String),
}

/// Attached to 500 responses so the pipeline finalizer can tell a failure of
/// our own apart from an upstream 500 forwarded verbatim.
#[derive(Debug, Clone)]
pub struct InternalErrorMarker(pub String);

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ProxyError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ProxyError::RateLimited => json!({
                "error": {"message": self.to_string(), "type": "rate_limit_error"}
            }),
            _ => json!({"error": {"message": self.to_string()}}),
        };

        let mut response = (status, Json(body)).into_response();
        if let ProxyError::Internal(detail) = self {
            response
                .extensions_mut()
                .insert(InternalErrorMarker(detail));
        }
        response
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Turn a caught handler panic into the 500 error response. The payload
/// message lands in the marker so the pipeline finalizer can log it and
/// count the failure.
pub fn response_for_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    };
    ProxyError::Internal(detail).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ProxyError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ProxyError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ProxyError::BadGateway("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::GatewayTimeout("x".into()).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_response_carries_marker() {
        let response = ProxyError::Internal("boom".into()).into_response();
        let marker = response.extensions().get::<InternalErrorMarker>().unwrap();
        assert_eq!(marker.0, "boom");
    }

    #[test]
    fn test_domain_response_has_no_marker() {
        let response = ProxyError::BadGateway("down".into()).into_response();
        assert!(response.extensions().get::<InternalErrorMarker>().is_none());
    }

    #[test]
    fn test_panic_payload_becomes_internal_error() {
        for payload in [
            Box::new("str panic") as Box<dyn std::any::Any + Send>,
            Box::new("string panic".to_string()),
        ] {
            let response = response_for_panic(payload);
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(response.extensions().get::<InternalErrorMarker>().is_some());
        }
    }

    #[test]
    fn test_opaque_panic_payload_still_maps() {
        let response = response_for_panic(Box::new(42u32));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let marker = response.extensions().get::<InternalErrorMarker>().unwrap();
        assert_eq!(marker.0, "handler panicked");
    }
}
