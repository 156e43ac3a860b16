use std::future::Future;

use axum::{
    http::{header::HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    PayloadTooLarge,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub const fn retryable(self) -> bool {
        matches!(self, Self::InternalError)
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::NotFound => "requested resource not found",
            Self::PayloadTooLarge => "payload exceeds maximum allowed size",
            Self::InternalError => "internal server error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    code: ErrorCode,
    message: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let request_id = current_request_id();

        let mut response = (
            self.code.status(),
            Json(json!({
                "error": {
                    "code": self.code.as_str(),
                    "message": self.message,
                    "retryable": self.code.retryable(),
                    "request_id": request_id.clone(),
                }
            })),
        )
            .into_response();

        if let Some(request_id) = request_id {
            attach_request_id_header(&mut response, &request_id);
        }

        response
    }
}

pub async fn with_request_id_scope<F>(request_id: String, future: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, future).await
}

pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}

pub fn request_id_from_headers_or_generate(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn attach_request_id_header(response: &mut Response, request_id: &str) {
    if let Ok(header) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header);
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::to_bytes,
        http::{HeaderMap, HeaderValue, StatusCode},
        response::IntoResponse,
    };
    use serde_json::Value;

    use super::{
        request_id_from_headers_or_generate, with_request_id_scope, ErrorCode, GatewayError,
        REQUEST_ID_HEADER,
    };

    async fn body_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("error response body should be readable");
        serde_json::from_slice(&body).expect("error response body should be valid json")
    }

    #[tokio::test]
    async fn gateway_error_uses_scoped_request_id() {
        let response = with_request_id_scope("req-scoped-123".to_owned(), async {
            GatewayError::from_code(ErrorCode::InternalError).into_response()
        })
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).and_then(|value| value.to_str().ok()),
            Some("req-scoped-123")
        );
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(parsed["error"]["retryable"], true);
        assert_eq!(parsed["error"]["request_id"], "req-scoped-123");
    }

    #[tokio::test]
    async fn custom_message_outside_request_scope_has_null_request_id() {
        let response = GatewayError::new(ErrorCode::NotFound, "no such route").into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(REQUEST_ID_HEADER).is_none());
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["request_id"], Value::Null);
        assert_eq!(parsed["error"]["message"], "no such route");
        assert_eq!(parsed["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn payload_too_large_is_not_retryable() {
        let response = GatewayError::from_code(ErrorCode::PayloadTooLarge).into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let parsed = body_json(response).await;
        assert_eq!(parsed["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert_eq!(parsed["error"]["retryable"], false);
    }

    #[test]
    fn request_id_header_is_reused_when_present() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(request_id_from_headers_or_generate(&headers), "abc");

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("  "));
        assert_ne!(request_id_from_headers_or_generate(&headers), "  ");
    }
}
