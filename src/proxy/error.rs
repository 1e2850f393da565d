//! Proxy error types and response handling

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

/// Errors that can occur while bridging a request
#[derive(Debug)]
pub enum ProxyError {
    BodyRead(String),
    InvalidJson(String),
    Upstream(String),
    ResponseBuild(String),
    NotFound(String),
}

impl ProxyError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            ProxyError::BodyRead(msg) => (StatusCode::BAD_REQUEST, "body_read_error", msg),
            ProxyError::InvalidJson(msg) => (StatusCode::BAD_REQUEST, "invalid_json", msg),
            ProxyError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ProxyError::ResponseBuild(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "response_build_error", msg)
            }
            ProxyError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        let (status, kind, message) = self.parts();

        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            tracing::error!("Proxy error: {} - {}", status, message);
        } else {
            tracing::debug!("Client error: {} - {}", status, message);
        }

        let body = json!({"error": {"type": kind, "message": message}}).to_string();
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("Internal error building error response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ProxyError::BodyRead("x".into()), StatusCode::BAD_REQUEST),
            (ProxyError::InvalidJson("x".into()), StatusCode::BAD_REQUEST),
            (ProxyError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (
                ProxyError::ResponseBuild("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ProxyError::NotFound("x".into()), StatusCode::NOT_FOUND),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
