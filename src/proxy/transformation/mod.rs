//! Request transformation pipeline
//!
//! Turns a client Responses-API request into one the stateless Codex backend
//! accepts. Every stage is fail-safe: malformed input degrades to a default,
//! never to an error.
//!
//! # Pipeline
//!
//! ```text
//! body → normalize model ─┐
//!      → resolve config ──┼→ filter + inject → session key / memory
//!                         │      → compaction decision → wire body
//! ```
//!
//! After the upstream call, [`complete_response`] finalizes a compaction
//! and records the response in the session.

pub mod compaction;
pub mod content;
pub mod input_filter;
pub mod model;
pub mod reasoning;

use serde_json::{json, Map, Value};

use crate::proxy::sessions::{resolve_cache_key, CompactionBaseline, SessionContext, SessionManager};
use crate::tokens::{approximate_item_tokens, TokenDelta};
use compaction::{decide_compaction, finalize_compaction_response, CompactionDecision, CompactionSummary};
use content::{clone_items, InputItem};
use input_filter::filter_input;
use model::{normalize_model_value, CanonicalModel};
use reasoning::{resolve_model_config, ModelConfig, UserConfig};

/// Fields the backend rejects
const REJECTED_FIELDS: &[&str] = &["max_output_tokens", "max_completion_tokens"];

/// Fields dropped from summarization requests
const TOOL_FIELDS: &[&str] = &["tools", "tool_choice", "parallel_tool_calls"];

// ============================================================================
// Transformed Request
// ============================================================================

/// Result of [`transform_request`]
#[derive(Debug, Clone)]
pub struct TransformedRequest {
    /// Wire body for the backend
    pub body: Value,
    /// Present when sessions are enabled and a key could be resolved
    pub session: Option<SessionContext>,
    /// Present when this request was turned into a summarization request
    pub compaction: Option<CompactionDecision>,
    /// The outgoing request carries tool definitions
    pub has_tools: bool,
    pub model: CanonicalModel,
    /// Model name as the client sent it
    pub original_model: Option<String>,
    pub cache_key: Option<String>,
    pub tokens: TokenDelta,
}

/// Transform a client request body
///
/// Returns `None` when there is nothing to transform (the body is not an
/// object with an `input` array). The body is borrowed; nothing in it is
/// modified.
pub fn transform_request(
    body: &Value,
    instructions: &str,
    user_config: &UserConfig,
    bridge_mode: bool,
    sessions: &SessionManager,
) -> Option<TransformedRequest> {
    let obj = body.as_object()?;
    let input = obj.get("input")?.as_array()?;

    let original_model = obj.get("model").and_then(Value::as_str).map(String::from);
    let model = normalize_model_value(obj.get("model"), user_config.default_model);
    let config = resolve_model_config(model, original_model.as_deref(), user_config);

    let filtered = filter_input(input, &user_config.filter, bridge_mode, instructions);
    let client_turns = filtered
        .client_items()
        .iter()
        .filter(|item| item.is_conversational())
        .count();

    let cache_key = resolve_cache_key(obj, filtered.client_items());

    // Session memory, and history rewritten from a stored compaction summary
    let mut history: Vec<InputItem> = filtered.client_items().to_vec();
    let mut session = match (&cache_key, sessions.is_enabled()) {
        (Some(key), true) => {
            let memory = sessions.get(key);
            let mut continuation = false;
            if let Some(rewritten) = memory
                .compaction
                .as_ref()
                .and_then(|baseline| baseline.rewrite_history(&history))
            {
                tracing::debug!(
                    cache_key = %key,
                    before = history.len(),
                    after = rewritten.len(),
                    "Replaying compaction summary"
                );
                history = rewritten;
                continuation = true;
            }
            Some(SessionContext {
                key: key.clone(),
                seen_before: memory.has_seen(&filtered.content_hash),
                memory,
                content_hash: filtered.content_hash.clone(),
                compaction_continuation: continuation,
                is_compaction_request: false,
            })
        }
        _ => None,
    };

    let mut compaction = decide_compaction(&history, &user_config.compaction);
    if let Some(decision) = compaction.as_mut() {
        // The client keeps resending its own history, so the baseline counts
        // client turns rather than the rewritten ones
        decision.turn_count = client_turns;
        if let Some(ctx) = session.as_mut() {
            ctx.is_compaction_request = true;
        }
        tracing::info!(
            mode = ?decision.mode,
            reason = %decision.reason,
            total_turns = decision.serialization.total_turns,
            dropped_turns = decision.serialization.dropped_turns,
            "Compaction triggered"
        );
    }

    let mut out: Map<String, Value> = obj.clone();
    let final_input: Vec<Value> = match &compaction {
        Some(decision) => {
            for field in TOOL_FIELDS {
                out.remove(*field);
            }
            decision.build_input()
        }
        None => std::iter::once(filtered.items[0].clone())
            .chain(history)
            .map(InputItem::into_value)
            .collect(),
    };

    let tokens = TokenDelta::new(
        approximate_item_tokens(&clone_items(input)),
        approximate_item_tokens(&clone_items(&final_input)),
    );

    apply_wire_fields(&mut out, model, &config, cache_key.as_deref());
    out.insert("input".to_string(), Value::Array(final_input));

    let has_tools = out
        .get("tools")
        .and_then(Value::as_array)
        .is_some_and(|tools| !tools.is_empty());

    tracing::debug!(
        model = %model,
        original_model = original_model.as_deref().unwrap_or("-"),
        cache_key = cache_key.as_deref().unwrap_or("-"),
        removed_references = filtered.removed_references,
        removed_sdk_prompts = filtered.removed_sdk_prompts,
        tokens_before = tokens.before,
        tokens_after = tokens.after,
        token_delta = tokens.delta(),
        has_tools,
        "Request transformed"
    );

    Some(TransformedRequest {
        body: Value::Object(out),
        session,
        compaction,
        has_tools,
        model,
        original_model,
        cache_key,
        tokens,
    })
}

/// Set model, reasoning, verbosity and storage fields on the wire body
fn apply_wire_fields(
    out: &mut Map<String, Value>,
    model: CanonicalModel,
    config: &ModelConfig,
    cache_key: Option<&str>,
) {
    for field in REJECTED_FIELDS {
        out.remove(*field);
    }

    out.insert("model".to_string(), json!(model.as_str()));
    out.insert("store".to_string(), Value::Bool(false));
    out.insert("stream".to_string(), Value::Bool(true));
    out.insert(
        "reasoning".to_string(),
        json!({
            "effort": config.reasoning_effort.as_str(),
            "summary": config.reasoning_summary.as_str(),
        }),
    );

    // Keep other text options (format, ...) the client set
    let mut text = out
        .get("text")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    text.insert(
        "verbosity".to_string(),
        json!(config.text_verbosity.as_str()),
    );
    out.insert("text".to_string(), Value::Object(text));

    if !config.include.is_empty() {
        out.insert("include".to_string(), json!(config.include));
    }
    if let Some(key) = cache_key {
        out.insert("prompt_cache_key".to_string(), json!(key));
    }
}

// ============================================================================
// Response Completion
// ============================================================================

/// Post-response bookkeeping for a successful upstream response
///
/// Finalizes a triggered compaction (rewriting the payload's assistant text
/// and replacing the session history) and records the response. A payload
/// that cannot be finalized leaves the session history untouched.
pub fn complete_response(
    payload: &mut Value,
    session: Option<&SessionContext>,
    compaction: Option<&CompactionDecision>,
    sessions: &SessionManager,
) -> Option<CompactionSummary> {
    let summary = compaction.and_then(|decision| {
        let summary = finalize_compaction_response(payload, decision.mode);
        if summary.is_none() {
            tracing::warn!("Compaction response had no output, keeping history");
        }
        summary.map(|summary| (decision, summary))
    });

    if let Some(ctx) = session {
        if let Some((decision, summary)) = &summary {
            sessions.apply_compaction_summary(
                ctx,
                CompactionBaseline {
                    preserved: decision.preserved.clone(),
                    summary: summary.item.clone(),
                    turn_count: decision.turn_count,
                },
            );
        }
        sessions.record_response(ctx, payload);
    }

    summary.map(|(_, summary)| summary)
}
