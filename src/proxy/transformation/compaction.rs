//! Conversation compaction
//!
//! The backend keeps no history, so every request resends the whole
//! conversation. Once that gets long (or the user asks for it) the history
//! is replaced by a summary produced by the model itself:
//!
//! ```text
//! detect trigger → serialize transcript → summarization request
//!     → finalize response → session replaces history with summary
//! ```
//!
//! Two triggers exist. A *command* is the latest user message being a
//! trigger phrase (`/compact`). *Auto* compaction fires when the
//! approximate token count of the history is strictly above a configured
//! threshold and the history has enough turns to be worth summarizing.

use serde::Serialize;
use serde_json::Value;

use super::content::{InputItem, Role};
use crate::tokens::approximate_item_tokens;
use crate::util::truncate_utf8_safe;

/// Prefix that identifies a summary turn
pub const SUMMARY_MARKER: &str = "[Conversation summary]";

/// Used when the summarization response carries no assistant text
pub const SUMMARY_PLACEHOLDER: &str = "no summary provided";

pub const DEFAULT_PHRASES: &[&str] = &["compact", "codex-compact", "compact-history"];
pub const DEFAULT_MIN_TURNS: usize = 8;
pub const DEFAULT_CHAR_BUDGET: usize = 40_000;

const COMPACTION_INSTRUCTIONS: &str = "You are compacting a coding session so it can continue \
in a fresh context. The user message holds a transcript of the conversation so far. \
Write a summary another assistant can continue from: the user's goals and constraints, \
decisions already made, files and code that were changed, commands that were run and \
their outcome, and any open problems with the next step. Be specific about names and \
paths. Do not call tools.";

const AUTO_NOTE: &str =
    "The conversation was getting long, so earlier turns were compacted automatically.";
const COMMAND_NOTE: &str = "Conversation compacted. Earlier turns are replaced by this summary.";

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CompactionSettings {
    pub enabled: bool,
    /// Auto-compact above this many approximate tokens; `None` disables auto mode
    pub auto_threshold_tokens: Option<usize>,
    /// Fewest conversational turns before auto mode may fire
    pub min_turns: usize,
    /// Character budget for the serialized transcript
    pub char_budget: usize,
    /// Command phrases, without leading `/` or `!`
    pub phrases: Vec<String>,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_threshold_tokens: None,
            min_turns: DEFAULT_MIN_TURNS,
            char_budget: DEFAULT_CHAR_BUDGET,
            phrases: DEFAULT_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// Transcript
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    fn strip_prefix(line: &str) -> Option<(Self, &str)> {
        [Self::User, Self::Assistant, Self::Tool]
            .into_iter()
            .find_map(|role| {
                line.strip_prefix(role.as_str())
                    .and_then(|rest| rest.strip_prefix(": "))
                    .map(|text| (role, text))
            })
    }
}

/// One conversational turn as it appears in a transcript
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptTurn {
    pub role: TurnRole,
    pub text: String,
}

impl TranscriptTurn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    /// Convert a conversational item; items without text yield `None`
    pub fn from_item(item: &InputItem) -> Option<Self> {
        if let Some((name, args)) = item.tool_call() {
            return Some(Self::new(TurnRole::Tool, format!("call {}({})", name, args)));
        }
        if let Some(output) = item.tool_output() {
            return Some(Self::new(TurnRole::Tool, output));
        }
        let role = match item.role()? {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Assistant,
            Role::System | Role::Developer => return None,
        };
        Some(Self::new(role, item.text()?))
    }

    /// `role: text`, continuation lines indented by two spaces
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.text.replace('\n', "\n  "))
    }
}

/// A serialized transcript and what it left out
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSerialization {
    pub transcript: String,
    pub total_turns: usize,
    pub dropped_turns: usize,
}

/// Serialize turns newest first until the budget is spent
///
/// The kept turns are emitted in chronological order. Older turns that do
/// not fit are dropped whole. The newest turn is never dropped: if it alone
/// exceeds the budget its text is cut at a character boundary.
pub fn serialize_transcript(turns: &[TranscriptTurn], char_budget: usize) -> TranscriptSerialization {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0usize;

    for turn in turns.iter().rev() {
        let rendered = turn.render();
        let len = rendered.chars().count();
        let separator = usize::from(!kept.is_empty());

        if used + separator + len > char_budget {
            if kept.is_empty() {
                let prefix = turn.role.as_str().len() + 2;
                let text = truncate_chars(&turn.text, char_budget.saturating_sub(prefix));
                kept.push(TranscriptTurn::new(turn.role, text).render());
            }
            break;
        }

        used += separator + len;
        kept.push(rendered);
    }

    kept.reverse();
    TranscriptSerialization {
        dropped_turns: turns.len() - kept.len(),
        total_turns: turns.len(),
        transcript: kept.join("\n"),
    }
}

/// Inverse of [`serialize_transcript`]
///
/// Lines that are neither a role line nor a continuation are folded into
/// the previous turn; leading garbage is skipped.
#[allow(dead_code)] // Reserved for transcript inspection
pub fn parse_transcript(transcript: &str) -> Vec<TranscriptTurn> {
    let mut turns: Vec<TranscriptTurn> = Vec::new();
    if transcript.is_empty() {
        return turns;
    }

    for line in transcript.split('\n') {
        if let Some(rest) = line.strip_prefix("  ") {
            if let Some(last) = turns.last_mut() {
                last.text.push('\n');
                last.text.push_str(rest);
            }
            continue;
        }
        match TurnRole::strip_prefix(line) {
            Some((role, text)) => turns.push(TranscriptTurn::new(role, text)),
            None => {
                if let Some(last) = turns.last_mut() {
                    last.text.push('\n');
                    last.text.push_str(line);
                }
            }
        }
    }
    turns
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => truncate_utf8_safe(s, idx),
        None => s,
    }
}

// ============================================================================
// Decision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactionMode {
    Command,
    Auto,
}

impl CompactionMode {
    /// Note shown to the user above the summary
    pub fn note(&self) -> &'static str {
        match self {
            Self::Command => COMMAND_NOTE,
            Self::Auto => AUTO_NOTE,
        }
    }
}

/// A triggered compaction for one request
#[derive(Debug, Clone)]
pub struct CompactionDecision {
    pub mode: CompactionMode,
    pub reason: String,
    pub approx_tokens: usize,
    /// System/developer items kept verbatim across the compaction
    pub preserved: Vec<InputItem>,
    pub serialization: TranscriptSerialization,
    /// Conversational items the client sent, command turn included
    pub turn_count: usize,
}

impl CompactionDecision {
    /// Two-message input for the summarization request
    pub fn build_input(&self) -> Vec<Value> {
        let mut request = String::from("Summarize this conversation transcript.");
        if self.serialization.dropped_turns > 0 {
            request.push_str(&format!(
                " The {} oldest turns did not fit and are omitted.",
                self.serialization.dropped_turns
            ));
        }
        request.push_str("\n\n");
        request.push_str(&self.serialization.transcript);

        vec![
            InputItem::message(Role::Developer, COMPACTION_INSTRUCTIONS).into_value(),
            InputItem::message(Role::User, request).into_value(),
        ]
    }
}

/// Strip one leading `/` or `!` and match against the trigger phrases
///
/// A phrase matches exactly or followed by whitespace (`/compact now`).
pub fn is_compaction_command(text: &str, phrases: &[String]) -> bool {
    let trimmed = text.trim();
    let command = trimmed
        .strip_prefix('/')
        .or_else(|| trimmed.strip_prefix('!'))
        .unwrap_or(trimmed)
        .to_lowercase();

    phrases.iter().any(|phrase| {
        let phrase = phrase.to_lowercase();
        match command.strip_prefix(phrase.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with(char::is_whitespace),
            None => false,
        }
    })
}

/// Decide whether this request compacts, and how
///
/// `items` are the client's filtered items (no injected instruction).
pub fn decide_compaction(
    items: &[InputItem],
    settings: &CompactionSettings,
) -> Option<CompactionDecision> {
    if !settings.enabled {
        return None;
    }

    let (preserved, conversation): (Vec<&InputItem>, Vec<&InputItem>) =
        items.iter().partition(|item| item.is_instruction());
    let turn_count = conversation.len();
    let approx_tokens = approximate_item_tokens(items);

    let last_user_command = conversation
        .last()
        .filter(|item| item.role() == Some(Role::User))
        .and_then(|item| item.text())
        .filter(|text| is_compaction_command(text, &settings.phrases));

    let (mode, reason, history) = if let Some(command) = last_user_command {
        (
            CompactionMode::Command,
            format!("command {:?}", command.trim()),
            &conversation[..turn_count - 1],
        )
    } else {
        let threshold = settings.auto_threshold_tokens?;
        if approx_tokens <= threshold || turn_count < settings.min_turns {
            return None;
        }
        (
            CompactionMode::Auto,
            format!("~{} tokens over threshold {}", approx_tokens, threshold),
            &conversation[..],
        )
    };

    let turns: Vec<TranscriptTurn> = history
        .iter()
        .filter_map(|item| TranscriptTurn::from_item(item))
        .collect();

    Some(CompactionDecision {
        mode,
        reason,
        approx_tokens,
        preserved: preserved.into_iter().cloned().collect(),
        serialization: serialize_transcript(&turns, settings.char_budget),
        turn_count,
    })
}

// ============================================================================
// Finalization
// ============================================================================

/// Summary extracted from a compaction response
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionSummary {
    /// Summary text, always starting with [`SUMMARY_MARKER`]
    pub text: String,
    /// The turn that replaces the summarized history
    pub item: InputItem,
}

fn with_marker(text: &str) -> String {
    if text.starts_with(SUMMARY_MARKER) {
        text.to_string()
    } else {
        format!("{}\n{}", SUMMARY_MARKER, text)
    }
}

/// Rewrite the compaction response for the user and extract the summary
///
/// `payload` is the converted response object. The first assistant
/// `output_text` part is replaced by the mode's note plus the summary; when
/// no such part exists an assistant message is appended. Returns `None` when
/// the payload has no `output` array.
pub fn finalize_compaction_response(
    payload: &mut Value,
    mode: CompactionMode,
) -> Option<CompactionSummary> {
    let output = payload.get_mut("output")?.as_array_mut()?;

    let found = output
        .iter_mut()
        .filter(|item| item.get("role").and_then(Value::as_str) == Some("assistant"))
        .filter_map(|item| item.get_mut("content")?.as_array_mut())
        .flat_map(|parts| parts.iter_mut())
        .find(|part| {
            part.get("type").and_then(Value::as_str) == Some("output_text")
                && part.get("text").is_some_and(Value::is_string)
        });

    let summary = match found {
        Some(part) => {
            let raw = part
                .get("text")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(SUMMARY_PLACEHOLDER);
            let summary = with_marker(raw);
            part["text"] = Value::String(format!("{}\n\n{}", mode.note(), summary));
            summary
        }
        None => {
            let summary = with_marker(SUMMARY_PLACEHOLDER);
            let display = format!("{}\n\n{}", mode.note(), summary);
            output.push(InputItem::message(Role::Assistant, display).into_value());
            summary
        }
    };

    Some(CompactionSummary {
        item: InputItem::message(Role::User, summary.clone()),
        text: summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn phrases() -> Vec<String> {
        CompactionSettings::default().phrases
    }

    fn history(turns: usize, chars_per_turn: usize) -> Vec<InputItem> {
        let mut items = vec![InputItem::message(Role::System, "sys")];
        for i in 0..turns {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            items.push(InputItem::message(role, "x".repeat(chars_per_turn)));
        }
        items
    }

    #[test]
    fn test_command_phrases() {
        let p = phrases();
        assert!(is_compaction_command("/compact", &p));
        assert!(is_compaction_command("  !codex-compact  ", &p));
        assert!(is_compaction_command("compact-history", &p));
        assert!(is_compaction_command("/compact please keep file names", &p));
        assert!(is_compaction_command("/COMPACT", &p));
        assert!(!is_compaction_command("/compaction", &p));
        assert!(!is_compaction_command("please compact", &p));
        assert!(!is_compaction_command("//compact", &p));
    }

    #[test]
    fn test_command_trigger_excludes_command_turn() {
        let items = vec![
            InputItem::message(Role::Developer, "rules"),
            InputItem::message(Role::User, "fix the bug"),
            InputItem::message(Role::Assistant, "done"),
            InputItem::message(Role::User, "/compact"),
        ];
        let decision = decide_compaction(&items, &CompactionSettings::default()).unwrap();
        assert_eq!(decision.mode, CompactionMode::Command);
        assert_eq!(decision.turn_count, 3);
        assert_eq!(decision.preserved.len(), 1);
        assert_eq!(decision.serialization.total_turns, 2);
        assert_eq!(
            decision.serialization.transcript,
            "user: fix the bug\nassistant: done"
        );
    }

    #[test]
    fn test_command_must_be_latest_turn() {
        let items = vec![
            InputItem::message(Role::User, "/compact"),
            InputItem::message(Role::Assistant, "summary"),
            InputItem::message(Role::User, "carry on"),
        ];
        assert!(decide_compaction(&items, &CompactionSettings::default()).is_none());
    }

    #[test]
    fn test_auto_threshold_is_strict() {
        // 8 turns of 100 chars plus "sys": 803 chars, 200 tokens
        let items = history(8, 100);
        assert_eq!(approximate_item_tokens(&items), 200);

        let at = CompactionSettings {
            auto_threshold_tokens: Some(200),
            ..Default::default()
        };
        assert!(decide_compaction(&items, &at).is_none());

        let below = CompactionSettings {
            auto_threshold_tokens: Some(199),
            ..Default::default()
        };
        let decision = decide_compaction(&items, &below).unwrap();
        assert_eq!(decision.mode, CompactionMode::Auto);
        assert_eq!(decision.turn_count, 8);
    }

    #[test]
    fn test_auto_requires_min_turns_and_threshold() {
        let items = history(7, 1000);
        let settings = CompactionSettings {
            auto_threshold_tokens: Some(10),
            ..Default::default()
        };
        assert!(decide_compaction(&items, &settings).is_none());

        let no_threshold = CompactionSettings::default();
        assert!(decide_compaction(&history(20, 1000), &no_threshold).is_none());
    }

    #[test]
    fn test_disabled_never_triggers() {
        let settings = CompactionSettings {
            enabled: false,
            ..Default::default()
        };
        let items = vec![InputItem::message(Role::User, "/compact")];
        assert!(decide_compaction(&items, &settings).is_none());
    }

    #[test]
    fn test_transcript_round_trip() {
        let turns = vec![
            TranscriptTurn::new(TurnRole::User, "line one\nline two\n\n  indented"),
            TranscriptTurn::new(TurnRole::Assistant, ""),
            TranscriptTurn::new(TurnRole::Tool, "call ls({\"path\":\".\"})"),
            TranscriptTurn::new(TurnRole::Assistant, "user: not a role line"),
        ];
        let serialized = serialize_transcript(&turns, DEFAULT_CHAR_BUDGET);
        assert_eq!(serialized.dropped_turns, 0);
        assert_eq!(parse_transcript(&serialized.transcript), turns);
    }

    #[test]
    fn test_compacting_a_summary_drops_zero_turns() {
        let items = vec![
            InputItem::message(Role::System, "sys"),
            InputItem::message(
                Role::User,
                format!("{}\nThe user is fixing a parser.", SUMMARY_MARKER),
            ),
            InputItem::message(Role::User, "/compact"),
        ];
        let decision = decide_compaction(&items, &CompactionSettings::default()).unwrap();
        assert_eq!(decision.preserved.len(), 1);
        assert_eq!(decision.serialization.total_turns, 1);
        assert_eq!(decision.serialization.dropped_turns, 0);
        assert!(decision
            .serialization
            .transcript
            .starts_with("user: [Conversation summary]"));
    }

    #[test]
    fn test_reserialized_transcript_is_stable() {
        let turns: Vec<TranscriptTurn> = (0..6)
            .map(|i| TranscriptTurn::new(TurnRole::User, format!("turn {}", i)))
            .collect();
        let first = serialize_transcript(&turns, 40);
        assert!(first.dropped_turns > 0);

        let reparsed = parse_transcript(&first.transcript);
        let second = serialize_transcript(&reparsed, 40);
        assert_eq!(second.dropped_turns, 0);
        assert_eq!(second.transcript, first.transcript);
    }

    #[test]
    fn test_budget_drops_oldest_first() {
        let turns = vec![
            TranscriptTurn::new(TurnRole::User, "aaaa"),
            TranscriptTurn::new(TurnRole::Assistant, "bbbb"),
            TranscriptTurn::new(TurnRole::User, "cccc"),
        ];
        // "assistant: bbbb" (15) + "\n" + "user: cccc" (10) = 26
        let serialized = serialize_transcript(&turns, 26);
        assert_eq!(serialized.transcript, "assistant: bbbb\nuser: cccc");
        assert_eq!(serialized.total_turns, 3);
        assert_eq!(serialized.dropped_turns, 1);
    }

    #[test]
    fn test_oversized_newest_turn_is_truncated() {
        let turns = vec![
            TranscriptTurn::new(TurnRole::User, "old"),
            TranscriptTurn::new(TurnRole::User, "日本語日本語"),
        ];
        let serialized = serialize_transcript(&turns, 9);
        assert_eq!(serialized.transcript, "user: 日本語");
        assert_eq!(serialized.dropped_turns, 1);
    }

    #[test]
    fn test_tool_items_become_tool_turns() {
        let call = InputItem::from_value(json!({
            "type": "function_call", "call_id": "c", "name": "read", "arguments": "{}"
        }));
        let output = InputItem::from_value(json!({
            "type": "function_call_output", "call_id": "c", "output": "file body"
        }));
        assert_eq!(
            TranscriptTurn::from_item(&call),
            Some(TranscriptTurn::new(TurnRole::Tool, "call read({})"))
        );
        assert_eq!(
            TranscriptTurn::from_item(&output),
            Some(TranscriptTurn::new(TurnRole::Tool, "file body"))
        );
    }

    #[test]
    fn test_build_input_is_two_messages() {
        let items = vec![
            InputItem::message(Role::User, "hello"),
            InputItem::message(Role::User, "/compact"),
        ];
        let decision = decide_compaction(&items, &CompactionSettings::default()).unwrap();
        let input = decision.build_input();
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"], "developer");
        assert_eq!(input[1]["role"], "user");
        let text = input[1]["content"][0]["text"].as_str().unwrap();
        assert!(text.ends_with("user: hello"));
    }

    #[test]
    fn test_finalize_rewrites_assistant_text() {
        let mut payload = json!({
            "id": "resp_1",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "  The user is fixing a parser.  "}
                ]}
            ]
        });
        let summary = finalize_compaction_response(&mut payload, CompactionMode::Command).unwrap();
        assert_eq!(
            summary.text,
            format!("{}\nThe user is fixing a parser.", SUMMARY_MARKER)
        );
        assert_eq!(summary.item.role(), Some(Role::User));

        let shown = payload["output"][1]["content"][0]["text"].as_str().unwrap();
        assert!(shown.starts_with(COMMAND_NOTE));
        assert!(shown.ends_with(&summary.text));
    }

    #[test]
    fn test_finalize_keeps_existing_marker_and_uses_placeholder() {
        let mut marked = json!({"output": [{"role": "assistant", "content": [
            {"type": "output_text", "text": "[Conversation summary] already"}
        ]}]});
        let summary = finalize_compaction_response(&mut marked, CompactionMode::Auto).unwrap();
        assert_eq!(summary.text, "[Conversation summary] already");

        let mut empty = json!({"output": []});
        let summary = finalize_compaction_response(&mut empty, CompactionMode::Auto).unwrap();
        assert!(summary.text.ends_with(SUMMARY_PLACEHOLDER));
        assert_eq!(empty["output"].as_array().unwrap().len(), 1);

        let mut malformed = json!({"error": "nope"});
        assert!(finalize_compaction_response(&mut malformed, CompactionMode::Auto).is_none());
    }
}
