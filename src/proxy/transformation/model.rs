//! Model name normalization
//!
//! Clients send whatever model name their UI offers ("GPT 5.1 Codex High",
//! "openai/gpt-5-codex", "codex_mini"). The backend only accepts a handful
//! of canonical identifiers. Normalization folds the input and walks an
//! ordered rule table, most specific rule first, so "codex-mini" is matched
//! before the generic "codex" and newer generation markers before older ones.
//!
//! Unrecognized input never fails: it resolves to the configured default.

use serde::{Deserialize, Serialize};

// ============================================================================
// Canonical Models
// ============================================================================

/// Backend model identifiers this bridge can target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalModel {
    #[serde(rename = "gpt-5")]
    Gpt5,
    #[serde(rename = "gpt-5-codex")]
    Gpt5Codex,
    #[serde(rename = "codex-mini-latest")]
    CodexMini,
    #[default]
    #[serde(rename = "gpt-5.1")]
    Gpt51,
    #[serde(rename = "gpt-5.1-codex")]
    Gpt51Codex,
    #[serde(rename = "gpt-5.1-codex-mini")]
    Gpt51CodexMini,
    #[serde(rename = "gpt-5.1-codex-max")]
    Gpt51CodexMax,
}

impl CanonicalModel {
    /// All canonical models, in declaration order
    pub const ALL: [CanonicalModel; 7] = [
        Self::Gpt5,
        Self::Gpt5Codex,
        Self::CodexMini,
        Self::Gpt51,
        Self::Gpt51Codex,
        Self::Gpt51CodexMini,
        Self::Gpt51CodexMax,
    ];

    /// Wire identifier sent to the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt5 => "gpt-5",
            Self::Gpt5Codex => "gpt-5-codex",
            Self::CodexMini => "codex-mini-latest",
            Self::Gpt51 => "gpt-5.1",
            Self::Gpt51Codex => "gpt-5.1-codex",
            Self::Gpt51CodexMini => "gpt-5.1-codex-mini",
            Self::Gpt51CodexMax => "gpt-5.1-codex-max",
        }
    }

    /// Exact lookup of a canonical identifier
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == id)
    }
}

impl std::fmt::Display for CanonicalModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Rule Table
// ============================================================================

type Predicate = fn(&str) -> bool;

/// Ordered (predicate, canonical) pairs, evaluated top to bottom
///
/// Predicates see the folded name (see [`fold`]).
const RULES: &[(Predicate, CanonicalModel)] = &[
    (|m: &str| m.contains("codex-max"), CanonicalModel::Gpt51CodexMax),
    (
        |m: &str| m.contains("gpt-5.1-codex-mini") || (m.contains("5.1") && m.contains("codex-mini")),
        CanonicalModel::Gpt51CodexMini,
    ),
    (|m: &str| m.contains("codex-mini"), CanonicalModel::CodexMini),
    (|m: &str| m.contains("gpt-5.1-codex"), CanonicalModel::Gpt51Codex),
    (|m: &str| m.contains("gpt-5.1"), CanonicalModel::Gpt51),
    (|m: &str| m.contains("codex"), CanonicalModel::Gpt5Codex),
    (|m: &str| m.contains("gpt-5"), CanonicalModel::Gpt5),
];

/// Lowercase and punctuation-fold a model name
///
/// - drops a provider prefix (`openai/gpt-5` -> `gpt-5`)
/// - maps every run of non-alphanumeric characters except `.` to a single `-`
/// - rewrites `gpt-5-1` to `gpt-5.1` so "GPT 5 1" style spellings still match
pub fn fold(name: &str) -> String {
    let name = name.trim();
    let name = name.rsplit('/').next().unwrap_or(name);

    let mut folded = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '.' {
            folded.push(c);
            last_dash = false;
        } else if !last_dash {
            folded.push('-');
            last_dash = true;
        }
    }
    let folded = folded.trim_end_matches('-');

    if let Some(rest) = folded.strip_prefix("gpt-5-1") {
        if rest.is_empty() || rest.starts_with('-') {
            return format!("gpt-5.1{}", rest);
        }
    }
    folded.to_string()
}

/// Map a client model name to a canonical backend model
///
/// `None`, empty, and unrecognized names all resolve to `default`.
pub fn normalize_model(name: Option<&str>, default: CanonicalModel) -> CanonicalModel {
    let Some(name) = name else {
        return default;
    };
    let folded = fold(name);
    if folded.is_empty() {
        return default;
    }

    if let Some(exact) = CanonicalModel::from_id(&folded) {
        return exact;
    }

    RULES
        .iter()
        .find(|(matches, _)| matches(&folded))
        .map(|(_, model)| *model)
        .unwrap_or(default)
}

/// Normalize a raw JSON `model` field (non-strings resolve to the default)
pub fn normalize_model_value(
    value: Option<&serde_json::Value>,
    default: CanonicalModel,
) -> CanonicalModel {
    normalize_model(value.and_then(|v| v.as_str()), default)
}
