//! Upstream response conversion
//!
//! The backend answers every request with an SSE stream. What the client gets
//! depends on whether the request carried tool definitions:
//!
//! - **with tools**: the stream passes through byte for byte; a scanner taps
//!   it so the completion payload can still be recorded once it ends
//! - **without tools**: the stream is buffered and the completion payload is
//!   returned as a single JSON body
//!
//! When no completion event shows up the buffered text goes back unchanged
//! with the upstream status. That is reported as [`ConversionOutcome::Fallback`],
//! never as an error. Non-2xx responses are passed through and never reach
//! the completion hook.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;

use super::error::ProxyError;
use super::sse::SseCompletionScanner;

/// Headers never copied from upstream
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Called with the completion payload once the upstream response finished
///
/// In buffered mode edits to the payload reach the client; in pass-through
/// mode the bytes have already been sent.
pub type CompletionHook = Box<dyn FnOnce(&mut Value) + Send + 'static>;

/// How an upstream response was turned into the client response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum ConversionOutcome {
    /// Completion payload returned as JSON
    Converted,
    /// No completion event; raw text returned
    Fallback,
    /// Tool-bearing request; stream passed through
    Streamed,
    /// Non-2xx upstream status passed through
    UpstreamError(u16),
}

// ============================================================================
// Buffered Conversion
// ============================================================================

/// Upstream response read to the end
#[derive(Debug)]
pub struct BufferedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Raw body; dropped once a completion is seen on a 2xx response
    pub raw: Bytes,
    pub completion: Option<Value>,
}

impl BufferedResponse {
    /// Read the whole upstream body through a completion scanner
    ///
    /// A read error ends buffering early; whatever arrived is kept. Non-2xx
    /// bodies are kept whole and never scanned.
    pub async fn read(upstream: reqwest::Response) -> Self {
        let status = upstream.status();
        let headers = upstream.headers().clone();

        let mut scanner = SseCompletionScanner::new();
        let mut raw: Vec<u8> = Vec::new();
        let mut stream = upstream.bytes_stream();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if !status.is_success() {
                        raw.extend_from_slice(&bytes);
                        continue;
                    }
                    if scanner.is_complete() {
                        continue;
                    }
                    scanner.feed(&bytes);
                    if scanner.is_complete() {
                        raw = Vec::new();
                    } else {
                        raw.extend_from_slice(&bytes);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream body read failed, using partial body");
                    break;
                }
            }
        }
        scanner.finish();

        Self {
            status,
            headers,
            raw: Bytes::from(raw),
            completion: scanner.into_completion(),
        }
    }

    pub fn outcome(&self) -> ConversionOutcome {
        if !self.status.is_success() {
            ConversionOutcome::UpstreamError(self.status.as_u16())
        } else if self.completion.is_some() {
            ConversionOutcome::Converted
        } else {
            ConversionOutcome::Fallback
        }
    }

    /// Build the client response: JSON on success, raw text otherwise
    pub fn into_response(self) -> Result<Response<Body>, ProxyError> {
        let mut builder = Response::builder().status(self.status);
        let headers = copy_headers(&self.headers);

        match self.completion.filter(|_| self.status.is_success()) {
            Some(payload) => {
                let body = serde_json::to_vec(&payload)
                    .map_err(|e| ProxyError::ResponseBuild(e.to_string()))?;
                for (name, value) in headers.iter() {
                    if *name != header::CONTENT_TYPE {
                        builder = builder.header(name, value);
                    }
                }
                builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
            }
            None => {
                for (name, value) in headers.iter() {
                    builder = builder.header(name, value);
                }
                builder
                    .body(Body::from(self.raw))
                    .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
            }
        }
    }
}

/// Copy upstream headers minus hop-by-hop ones and content-length
pub fn copy_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

// ============================================================================
// Converter
// ============================================================================

/// Turns an upstream response into the client response
pub struct ResponseConverter {
    has_tools: bool,
    on_completion: Option<CompletionHook>,
}

impl ResponseConverter {
    pub fn new(has_tools: bool) -> Self {
        Self {
            has_tools,
            on_completion: None,
        }
    }

    /// Run `hook` on the completion payload of a successful response
    pub fn on_completion(mut self, hook: impl FnOnce(&mut Value) + Send + 'static) -> Self {
        self.on_completion = Some(Box::new(hook));
        self
    }

    pub async fn into_client_response(
        self,
        upstream: reqwest::Response,
    ) -> Result<(Response<Body>, ConversionOutcome), ProxyError> {
        if self.has_tools && upstream.status().is_success() {
            let response = stream_through(upstream, self.on_completion)?;
            return Ok((response, ConversionOutcome::Streamed));
        }

        let mut buffered = BufferedResponse::read(upstream).await;
        let outcome = buffered.outcome();
        match outcome {
            ConversionOutcome::Converted => {
                if let (Some(hook), Some(payload)) =
                    (self.on_completion, buffered.completion.as_mut())
                {
                    hook(payload);
                }
            }
            ConversionOutcome::Fallback => {
                tracing::warn!(
                    status = %buffered.status,
                    bytes = buffered.raw.len(),
                    "No completion event in upstream stream, returning raw body"
                );
            }
            _ => {}
        }
        Ok((buffered.into_response()?, outcome))
    }
}

/// Pass the upstream stream through unchanged while scanning it
fn stream_through(
    upstream: reqwest::Response,
    hook: Option<CompletionHook>,
) -> Result<Response<Body>, ProxyError> {
    let mut builder = Response::builder().status(upstream.status());
    for (name, value) in copy_headers(upstream.headers()).iter() {
        builder = builder.header(name, value);
    }
    if !super::sse::is_sse_response(upstream.headers()) {
        builder = builder.header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
    }

    let state = Some((
        Box::pin(upstream.bytes_stream()),
        SseCompletionScanner::new(),
        hook,
    ));
    let tapped = futures::stream::unfold(state, |state| async move {
        let (mut stream, mut scanner, hook) = state?;
        match stream.next().await {
            Some(Ok(chunk)) => {
                scanner.feed(&chunk);
                Some((Ok(chunk), Some((stream, scanner, hook))))
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Upstream stream failed mid-response");
                Some((Err(e), None))
            }
            None => {
                scanner.finish();
                let events = scanner.events();
                match (scanner.into_completion(), hook) {
                    (Some(mut payload), Some(hook)) => hook(&mut payload),
                    (None, _) => {
                        tracing::warn!(events, "Streamed response ended without a completion event")
                    }
                    _ => {}
                }
                None
            }
        }
    });

    builder
        .body(Body::from_stream(tapped))
        .map_err(|e| ProxyError::ResponseBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    const COMPLETED: &str = "event: response.created\n\
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_1\"}}\n\n\
event: response.completed\n\
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_1\",\"output\":[],\"usage\":{\"input_tokens\":5}}}\n\n";

    fn upstream(status: u16, body: &str) -> reqwest::Response {
        let response = axum::http::Response::builder()
            .status(status)
            .header("content-type", "text/event-stream")
            .header("connection", "keep-alive")
            .header("content-length", body.len().to_string())
            .header("x-request-id", "req-9")
            .body(body.to_string())
            .unwrap();
        reqwest::Response::from(response)
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_completed_stream_converts_to_exact_json() {
        let (response, outcome) = ResponseConverter::new(false)
            .into_client_response(upstream(200, COMPLETED))
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Converted);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-9");
        assert!(response.headers().get("connection").is_none());

        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            body,
            json!({"id": "resp_1", "output": [], "usage": {"input_tokens": 5}})
        );
    }

    #[tokio::test]
    async fn test_missing_completion_falls_back_to_raw_text() {
        let raw = "data: {\"type\":\"response.created\"}\n\nnot really sse";
        let (response, outcome) = ResponseConverter::new(false)
            .into_client_response(upstream(200, raw))
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Fallback);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );
        assert!(response.headers().get("content-length").is_none());
        assert_eq!(body_text(response).await, raw);
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through_without_hook() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let error_body = "{\"detail\":\"Unsupported model\"}";

        let (response, outcome) = ResponseConverter::new(false)
            .on_completion(move |_| *flag.lock().unwrap() = true)
            .into_client_response(upstream(400, error_body))
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::UpstreamError(400));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, error_body);
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_body_with_completion_event() {
        let (response, outcome) = ResponseConverter::new(false)
            .into_client_response(upstream(500, COMPLETED))
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::UpstreamError(500));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, COMPLETED);
    }

    #[tokio::test]
    async fn test_hook_edits_buffered_payload() {
        let (response, _) = ResponseConverter::new(false)
            .on_completion(|payload| payload["rewritten"] = json!(true))
            .into_client_response(upstream(200, COMPLETED))
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["rewritten"], json!(true));
    }

    #[tokio::test]
    async fn test_tool_requests_stream_through_and_tap_completion() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let (response, outcome) = ResponseConverter::new(true)
            .on_completion(move |payload| *sink.lock().unwrap() = Some(payload.clone()))
            .into_client_response(upstream(200, COMPLETED))
            .await
            .unwrap();
        assert_eq!(outcome, ConversionOutcome::Streamed);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        // Body is byte-identical; the hook runs once the stream is drained
        assert_eq!(body_text(response).await, COMPLETED);
        let payload = seen.lock().unwrap().clone().unwrap();
        assert_eq!(payload["id"], "resp_1");
    }
}
