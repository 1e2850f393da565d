//! Input filtering and instruction injection
//!
//! Runs over the client's `input` array before anything else touches it:
//!
//! 1. drop items that point at server-stored state (the backend runs with
//!    `store=false`, so references to earlier responses cannot resolve)
//! 2. in bridge mode, drop the client SDK's own system prompt
//! 3. prepend exactly one developer message carrying our instructions
//! 4. hash the filtered client items so sessions can recognise replays
//!
//! Order of the surviving items is always preserved.

use regex::Regex;
use serde_json::Value;

use super::content::InputItem;
use super::content::Role;
use crate::util::short_hash;

/// Id prefixes the backend assigns to stored reasoning items, responses and references
const DEFAULT_REFERENCE_PREFIXES: &[&str] = &["rs_", "resp_", "ref_"];

/// Opening lines of the known SDK system prompts, already normalized
pub const DEFAULT_SDK_SIGNATURES: &[&str] = &[
    "you are opencode",
    "you are a coding agent running in the opencode",
];

/// Injected in legacy mode instead of the bridge instructions
pub const LEGACY_TOOL_NOTICE: &str = "Tool names in this session follow the client, not the Codex CLI. \
Where your instructions mention `apply_patch`, use the client's `edit` or `write` tool. \
Where they mention `update_plan`, use `todowrite`. \
Only call tools that appear in the request's tool list.";

// ============================================================================
// Settings
// ============================================================================

/// How to recognise server-stored references by id
#[derive(Debug, Clone)]
pub enum ReferenceMatcher {
    /// Built-in id prefixes
    Prefixes(&'static [&'static str]),
    /// User-configured pattern
    Pattern(Regex),
}

impl ReferenceMatcher {
    pub fn matches(&self, id: &str) -> bool {
        match self {
            Self::Prefixes(prefixes) => prefixes.iter().any(|p| id.starts_with(p)),
            Self::Pattern(re) => re.is_match(id),
        }
    }
}

/// Filtering knobs, carried inside [`super::reasoning::UserConfig`]
#[derive(Debug, Clone)]
pub struct FilterSettings {
    pub reference: ReferenceMatcher,
    /// Exact SDK prompt text, when the host knows it
    pub sdk_prompt: Option<String>,
    /// Normalized prefixes identifying SDK prompts
    pub sdk_signatures: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            reference: ReferenceMatcher::Prefixes(DEFAULT_REFERENCE_PREFIXES),
            sdk_prompt: None,
            sdk_signatures: DEFAULT_SDK_SIGNATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FilterSettings {
    /// Replace the built-in reference prefixes with a regex
    pub fn with_reference_pattern(mut self, pattern: &str) -> anyhow::Result<Self> {
        self.reference = ReferenceMatcher::Pattern(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_sdk_prompt(mut self, prompt: Option<String>) -> Self {
        self.sdk_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Does this item point at server-stored state?
    pub fn is_reference(&self, item: &InputItem) -> bool {
        if item.kind() == Some("item_reference") {
            return true;
        }
        item.id().is_some_and(|id| self.reference.matches(id))
    }

    /// Is this a system/developer message from the client SDK's own prompt?
    pub fn is_sdk_prompt(&self, item: &InputItem) -> bool {
        if !item.is_instruction() {
            return false;
        }
        let Some(text) = item.text() else {
            return false;
        };
        let trimmed = text.trim();

        if let Some(known) = &self.sdk_prompt {
            if trimmed == known.trim() {
                return true;
            }
        }

        let normalized = normalize_signature(trimmed);
        self.sdk_signatures
            .iter()
            .any(|sig| normalized.starts_with(sig.as_str()))
    }
}

/// Lowercase and collapse whitespace runs to single spaces
pub fn normalize_signature(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Filtering
// ============================================================================

/// Output of [`filter_input`]
#[derive(Debug, Clone)]
pub struct FilteredInput {
    /// Injected instruction message followed by the surviving client items
    pub items: Vec<InputItem>,
    /// Hash of the surviving client items (injected message excluded)
    pub content_hash: String,
    pub removed_references: usize,
    pub removed_sdk_prompts: usize,
}

impl FilteredInput {
    /// Client items only, without the injected message
    pub fn client_items(&self) -> &[InputItem] {
        &self.items[1..]
    }
}

/// Filter the client's items and prepend the instruction message
///
/// Items are deep-cloned from the borrowed input. Malformed items are kept.
pub fn filter_input(
    input: &[Value],
    settings: &FilterSettings,
    bridge_mode: bool,
    instructions: &str,
) -> FilteredInput {
    let mut removed_references = 0;
    let mut removed_sdk_prompts = 0;
    let mut kept = Vec::with_capacity(input.len() + 1);

    for raw in input {
        let item = InputItem::deep_clone(raw);
        if settings.is_reference(&item) {
            removed_references += 1;
            continue;
        }
        if bridge_mode && settings.is_sdk_prompt(&item) {
            removed_sdk_prompts += 1;
            continue;
        }
        kept.push(item);
    }

    let content_hash = hash_items(&kept);

    let notice = if bridge_mode {
        instructions
    } else {
        LEGACY_TOOL_NOTICE
    };
    let mut items = Vec::with_capacity(kept.len() + 1);
    items.push(InputItem::message(Role::Developer, notice));
    items.extend(kept);

    FilteredInput {
        items,
        content_hash,
        removed_references,
        removed_sdk_prompts,
    }
}

/// Stable content hash of a list of items
pub fn hash_items(items: &[InputItem]) -> String {
    let bytes = serde_json::to_vec(items).unwrap_or_default();
    short_hash(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn texts(filtered: &FilteredInput) -> Vec<String> {
        filtered
            .client_items()
            .iter()
            .map(|i| i.text().unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_references_removed_and_order_preserved() {
        let input = vec![
            json!({"role": "user", "content": "a"}),
            json!({"type": "item_reference", "id": "msg_1"}),
            json!({"type": "reasoning", "id": "rs_123", "summary": []}),
            json!({"role": "assistant", "id": "msg_2", "content": "b"}),
            json!({"type": "message", "role": "assistant", "id": "resp_9", "content": "stored"}),
            json!({"role": "user", "content": "c"}),
        ];
        let filtered = filter_input(&input, &FilterSettings::default(), true, "inst");
        assert_eq!(filtered.removed_references, 3);
        assert_eq!(texts(&filtered), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_custom_reference_pattern() {
        let settings = FilterSettings::default()
            .with_reference_pattern("^stored-")
            .unwrap();
        let input = vec![
            json!({"role": "user", "id": "stored-1", "content": "x"}),
            json!({"role": "user", "id": "rs_1", "content": "y"}),
        ];
        let filtered = filter_input(&input, &settings, true, "inst");
        assert_eq!(texts(&filtered), vec!["y"]);
    }

    #[test]
    fn test_invalid_reference_pattern_is_an_error() {
        assert!(FilterSettings::default()
            .with_reference_pattern("(unclosed")
            .is_err());
    }

    #[test]
    fn test_sdk_prompt_removed_only_in_bridge_mode() {
        let input = vec![
            json!({"role": "system", "content": "You are  OpenCode, the best coding agent"}),
            json!({"role": "system", "content": "Project rules: use tabs"}),
            json!({"role": "user", "content": "hi"}),
        ];

        let bridge = filter_input(&input, &FilterSettings::default(), true, "inst");
        assert_eq!(bridge.removed_sdk_prompts, 1);
        assert_eq!(texts(&bridge), vec!["Project rules: use tabs", "hi"]);

        let legacy = filter_input(&input, &FilterSettings::default(), false, "inst");
        assert_eq!(legacy.removed_sdk_prompts, 0);
        assert_eq!(legacy.client_items().len(), 3);
    }

    #[test]
    fn test_exact_sdk_prompt_match() {
        let settings =
            FilterSettings::default().with_sdk_prompt(Some("Custom SDK prompt".to_string()));
        let input = vec![
            json!({"role": "developer", "content": "  Custom SDK prompt\n"}),
            json!({"role": "user", "content": "Custom SDK prompt"}),
        ];
        let filtered = filter_input(&input, &settings, true, "inst");
        assert_eq!(filtered.removed_sdk_prompts, 1);
        assert_eq!(filtered.client_items()[0].role(), Some(Role::User));
    }

    #[test]
    fn test_single_instruction_injected_first() {
        let input = vec![json!({"role": "user", "content": "hi"})];

        let bridge = filter_input(&input, &FilterSettings::default(), true, "bridge rules");
        assert_eq!(bridge.items.len(), 2);
        assert_eq!(bridge.items[0].role(), Some(Role::Developer));
        assert_eq!(bridge.items[0].text().as_deref(), Some("bridge rules"));

        let legacy = filter_input(&input, &FilterSettings::default(), false, "bridge rules");
        assert_eq!(legacy.items[0].text().as_deref(), Some(LEGACY_TOOL_NOTICE));
    }

    #[test]
    fn test_hash_excludes_injection_and_is_stable() {
        let input = vec![
            json!({"role": "user", "content": "hi"}),
            json!({"type": "item_reference", "id": "ref_1"}),
        ];
        let a = filter_input(&input, &FilterSettings::default(), true, "one");
        let b = filter_input(&input, &FilterSettings::default(), false, "two");
        assert_eq!(a.content_hash, b.content_hash);

        let other = filter_input(
            &[json!({"role": "user", "content": "bye"})],
            &FilterSettings::default(),
            true,
            "one",
        );
        assert_ne!(a.content_hash, other.content_hash);
    }

    #[test]
    fn test_malformed_items_survive() {
        let input = vec![
            json!({"content": null}),
            json!({"role": "system", "content": 7}),
            json!(42),
        ];
        let filtered = filter_input(&input, &FilterSettings::default(), true, "inst");
        assert_eq!(filtered.client_items().len(), 3);
    }
}
