//! POST /v1/responses
//!
//! Read → transform → forward → convert. Compaction finalization and
//! session recording happen in the converter's completion hook, so they only
//! run for successful responses that actually completed.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
};
use serde_json::{json, Value};

use crate::logging::{
    generate_request_id, STAGE_AFTER_TRANSFORM, STAGE_BEFORE_TRANSFORM, STAGE_COMPACTION_FINALIZED,
    STAGE_COMPACTION_REQUEST, STAGE_RESPONSE_CONVERTED, STAGE_UPSTREAM_ERROR,
};
use crate::proxy::error::ProxyError;
use crate::proxy::helpers::build_upstream_headers;
use crate::proxy::response::{ConversionOutcome, ResponseConverter};
use crate::proxy::state::ProxyState;
use crate::proxy::transformation::{complete_response, transform_request};

/// Bridge one Responses API request to the backend
pub async fn responses_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>, ProxyError> {
    let request_id = generate_request_id();

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ProxyError::BodyRead(e.to_string()))?;
    let body: Value = serde_json::from_slice(&body_bytes)
        .map_err(|e| ProxyError::InvalidJson(e.to_string()))?;

    state
        .request_log
        .record(STAGE_BEFORE_TRANSFORM, &request_id, body.clone());

    let transformed = transform_request(
        &body,
        &state.instructions,
        &state.user_config,
        state.bridge_mode.is_bridge(),
        &state.sessions,
    );

    let (wire_body, has_tools, session, compaction, cache_key) = match transformed {
        Some(t) => {
            state.request_log.record(
                STAGE_AFTER_TRANSFORM,
                &request_id,
                json!({
                    "model": t.model.as_str(),
                    "original_model": &t.original_model,
                    "cache_key": &t.cache_key,
                    "tokens_before": t.tokens.before,
                    "tokens_after": t.tokens.after,
                    "session": t.session.as_ref().map(|ctx| json!({
                        "key": &ctx.key,
                        "seen_before": ctx.seen_before,
                        "compaction_continuation": ctx.compaction_continuation,
                        "compaction_request": ctx.is_compaction_request,
                        "remembered_turns": ctx.memory.entries.len(),
                    })),
                    "body": &t.body,
                }),
            );
            if let Some(decision) = &t.compaction {
                state.request_log.record(
                    STAGE_COMPACTION_REQUEST,
                    &request_id,
                    json!({
                        "mode": decision.mode,
                        "reason": decision.reason,
                        "approx_tokens": decision.approx_tokens,
                        "turn_count": decision.turn_count,
                        "dropped_turns": decision.serialization.dropped_turns,
                    }),
                );
            }
            (t.body, t.has_tools, t.session, t.compaction, t.cache_key)
        }
        None => {
            // Nothing to bridge; forward untouched
            tracing::debug!(request_id = %request_id, "Body has no input array, forwarding as-is");
            let has_tools = body
                .get("tools")
                .and_then(Value::as_array)
                .is_some_and(|tools| !tools.is_empty());
            (body, has_tools, None, None, None)
        }
    };

    let upstream = state
        .client
        .post(&state.upstream_url)
        .headers(build_upstream_headers(
            &state.credentials,
            cache_key.as_deref(),
        ))
        .json(&wire_body)
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let sessions = state.sessions.clone();
    let log = state.request_log.clone();
    let hook_request_id = request_id.clone();
    let converter = ResponseConverter::new(has_tools).on_completion(move |payload| {
        let mode = compaction.as_ref().map(|decision| decision.mode);
        let summary = complete_response(payload, session.as_ref(), compaction.as_ref(), &sessions);
        if let Some(summary) = summary {
            log.record(
                STAGE_COMPACTION_FINALIZED,
                &hook_request_id,
                json!({
                    "mode": mode,
                    "summary_chars": summary.text.chars().count(),
                }),
            );
        }
    });

    let (response, outcome) = converter.into_client_response(upstream).await?;
    match outcome {
        ConversionOutcome::UpstreamError(status) => {
            tracing::warn!(request_id = %request_id, status, "Upstream returned an error");
            // Nothing recorded; the client retries with the same history
            if let Some(key) = &cache_key {
                state.sessions.touch(key);
            }
            state
                .request_log
                .record(STAGE_UPSTREAM_ERROR, &request_id, json!({ "status": status }));
        }
        outcome => {
            state.request_log.record(
                STAGE_RESPONSE_CONVERTED,
                &request_id,
                json!({ "outcome": outcome }),
            );
        }
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use axum::{
        http::{header, HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use crate::config::Config;
    use crate::logging::RequestLog;
    use crate::proxy::server::router;
    use crate::proxy::sessions::{SessionConfig, SessionManager};
    use crate::proxy::state::ProxyState;
    use crate::proxy::transformation::compaction::SUMMARY_MARKER;

    type Captured = Arc<Mutex<Vec<(HeaderMap, Value)>>>;

    const REPLY: &str = "Summary of work.";

    fn completed_stream(id: &str) -> String {
        let response = json!({
            "id": id,
            "object": "response",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{"type": "output_text", "text": REPLY}]
            }],
            "usage": {"input_tokens": 12, "output_tokens": 4, "total_tokens": 16}
        });
        let done = json!({"type": "response.completed", "response": response});
        format!(
            "event: response.created\ndata: {{\"type\":\"response.created\"}}\n\n\
             event: response.completed\ndata: {}\n\n",
            done
        )
    }

    async fn fake_backend(
        axum::extract::State(captured): axum::extract::State<Captured>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let id = {
            let mut captured = captured.lock().unwrap();
            captured.push((headers, body));
            format!("resp_{}", captured.len())
        };
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            completed_stream(&id),
        )
    }

    async fn failing_backend() -> impl IntoResponse {
        (StatusCode::TOO_MANY_REQUESTS, "slow down")
    }

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    struct Harness {
        bridge: String,
        captured: Captured,
        sessions: Arc<SessionManager>,
    }

    async fn harness_with(backend: Router) -> (String, Arc<SessionManager>) {
        let backend_addr = serve(backend).await;
        let config = Config {
            backend_url: format!("http://{}", backend_addr),
            access_token: Some("tok".to_string()),
            account_id: Some("acct".to_string()),
            ..Default::default()
        };
        let sessions = SessionManager::new_shared(SessionConfig::default());
        let state =
            ProxyState::from_config(&config, sessions.clone(), RequestLog::disabled()).unwrap();
        let bridge_addr = serve(router(state)).await;
        (format!("http://{}", bridge_addr), sessions)
    }

    async fn harness() -> Harness {
        let captured: Captured = Arc::default();
        let backend = Router::new()
            .route("/codex/responses", post(fake_backend))
            .with_state(captured.clone());
        let (bridge, sessions) = harness_with(backend).await;
        Harness {
            bridge,
            captured,
            sessions,
        }
    }

    fn user(text: &str) -> Value {
        json!({"type": "message", "role": "user", "content": [{"type": "input_text", "text": text}]})
    }

    fn assistant(text: &str) -> Value {
        json!({"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": text}]})
    }

    async fn post_json(url: &str, body: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(url)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_plain_request_is_bridged_and_converted() {
        let h = harness().await;
        let body = json!({
            "model": "gpt-5-codex-high",
            "input": [user("fix the parser")],
            "max_output_tokens": 100,
            "prompt_cache_key": "conv-1"
        });

        let response = post_json(&format!("{}/v1/responses", h.bridge), &body).await;
        assert_eq!(response.status(), 200);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let payload: Value = response.json().await.unwrap();
        assert_eq!(payload["id"], "resp_1");
        assert_eq!(payload["output"][0]["content"][0]["text"], REPLY);

        let captured = h.captured.lock().unwrap();
        let (headers, sent) = &captured[0];
        assert_eq!(sent["model"], "gpt-5-codex");
        assert_eq!(sent["store"], false);
        assert_eq!(sent["stream"], true);
        assert_eq!(sent["prompt_cache_key"], "conv-1");
        assert!(sent.get("max_output_tokens").is_none());
        assert!(sent["input"].to_string().contains("compatibility bridge"));
        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["chatgpt-account-id"], "acct");
        assert_eq!(headers["session_id"], "conv-1");

        let memory = h.sessions.get("conv-1");
        assert_eq!(memory.entries.len(), 1);
        assert_eq!(memory.usage.map(|u| u.total_tokens), Some(16));
    }

    #[tokio::test]
    async fn test_compaction_command_summarizes_and_rewrites_memory() {
        let h = harness().await;
        let body = json!({
            "model": "gpt-5.1",
            "prompt_cache_key": "conv-2",
            "tools": [{"type": "function", "name": "shell"}],
            "input": [
                user("fix the parser"),
                assistant("done, tests pass"),
                user("/compact")
            ]
        });

        let response = post_json(&format!("{}/responses", h.bridge), &body).await;
        assert_eq!(response.status(), 200);
        let payload: Value = response.json().await.unwrap();
        let text = payload["output"][0]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains(SUMMARY_MARKER));
        assert!(text.contains(REPLY));

        let sent = h.captured.lock().unwrap()[0].1.clone();
        assert!(sent.get("tools").is_none());
        assert!(sent["input"].to_string().contains("fix the parser"));

        let memory = h.sessions.get("conv-2");
        let baseline = memory.compaction.expect("compaction baseline stored");
        assert_eq!(baseline.turn_count, 3);
        assert!(baseline.summary.text().unwrap().starts_with(SUMMARY_MARKER));
    }

    #[tokio::test]
    async fn test_tool_requests_stream_through() {
        let h = harness().await;
        let body = json!({
            "model": "gpt-5",
            "prompt_cache_key": "conv-3",
            "tools": [{"type": "function", "name": "shell"}],
            "input": [user("list files")]
        });

        let response = post_json(&format!("{}/v1/responses", h.bridge), &body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        let text = response.text().await.unwrap();
        assert!(text.contains("response.completed"));

        // The hook runs once the stream has been fully read
        let memory = h.sessions.get("conv-3");
        assert_eq!(memory.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_body_without_input_is_forwarded_untouched() {
        let h = harness().await;
        let body = json!({"model": "whatever", "custom": 1});

        let response = post_json(&format!("{}/v1/responses", h.bridge), &body).await;
        assert_eq!(response.status(), 200);
        assert_eq!(h.captured.lock().unwrap()[0].1, body);
        assert!(h.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through_without_recording() {
        let backend = Router::new().route("/codex/responses", post(failing_backend));
        let (bridge, sessions) = harness_with(backend).await;
        let body = json!({"model": "gpt-5", "prompt_cache_key": "conv-4", "input": [user("hi")]});

        let response = post_json(&format!("{}/v1/responses", bridge), &body).await;
        assert_eq!(response.status(), 429);
        assert_eq!(response.text().await.unwrap(), "slow down");
        assert!(sessions.get("conv-4").entries.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected() {
        let h = harness().await;
        let response = reqwest::Client::new()
            .post(format!("{}/v1/responses", h.bridge))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let error: Value = response.json().await.unwrap();
        assert_eq!(error["error"]["type"], "invalid_json");
        assert!(h.captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_and_unknown_routes() {
        let h = harness().await;
        let health: Value = reqwest::get(format!("{}/health", h.bridge))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health, json!({"status": "ok", "sessions": 0}));

        let missing = reqwest::get(format!("{}/v1/chat/completions", h.bridge))
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }
}
