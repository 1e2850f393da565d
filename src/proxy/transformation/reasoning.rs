//! Per-model configuration resolution
//!
//! Users configure reasoning options globally and per model. Per-model
//! entries are keyed by the *client-facing* name ("gpt-5-codex-high"), not
//! the canonical backend id, because several client names can normalize to
//! the same backend model while needing different settings.
//!
//! Resolution merges per-model options over global options field by field,
//! fills defaults, and then clamps the result against a static capability
//! table. Clamping never rejects: an unsupported effort is replaced by the
//! nearest supported lower level.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::compaction::CompactionSettings;
use super::input_filter::FilterSettings;
use super::model::{normalize_model, CanonicalModel};

/// Response field always requested so reasoning survives `store=false`
pub const ENCRYPTED_REASONING_INCLUDE: &str = "reasoning.encrypted_content";

// ============================================================================
// Option Enums
// ============================================================================

/// Reasoning effort, ordered from cheapest to most thorough
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    #[serde(rename = "xhigh")]
    XHigh,
}

impl ReasoningEffort {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Self::None),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "xhigh" | "x-high" | "extra-high" => Some(Self::XHigh),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }
}

/// Reasoning summary style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningSummary {
    Auto,
    Concise,
    Detailed,
}

impl ReasoningSummary {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "concise" => Some(Self::Concise),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Concise => "concise",
            Self::Detailed => "detailed",
        }
    }
}

/// Output verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextVerbosity {
    Low,
    Medium,
    High,
}

impl TextVerbosity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

// ============================================================================
// User Options
// ============================================================================

/// One layer of user options (global or per-model); every field optional
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOptions {
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_summary: Option<ReasoningSummary>,
    pub text_verbosity: Option<TextVerbosity>,
    pub include: Option<Vec<String>>,
}

impl ModelOptions {
    /// Parse options leniently
    ///
    /// Accepts both `snake_case` and `camelCase` keys. Invalid values are
    /// dropped field by field; a non-object yields empty options.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let field = |snake: &str, camel: &str| obj.get(snake).or_else(|| obj.get(camel));

        Self {
            reasoning_effort: field("reasoning_effort", "reasoningEffort")
                .and_then(Value::as_str)
                .and_then(ReasoningEffort::parse),
            reasoning_summary: field("reasoning_summary", "reasoningSummary")
                .and_then(Value::as_str)
                .and_then(ReasoningSummary::parse),
            text_verbosity: field("text_verbosity", "textVerbosity")
                .and_then(Value::as_str)
                .and_then(TextVerbosity::parse),
            include: obj.get("include").and_then(Value::as_array).map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            }),
        }
    }

    /// Field-by-field overlay: `self` wins where set
    pub fn over(&self, base: &ModelOptions) -> ModelOptions {
        ModelOptions {
            reasoning_effort: self.reasoning_effort.or(base.reasoning_effort),
            reasoning_summary: self.reasoning_summary.or(base.reasoning_summary),
            text_verbosity: self.text_verbosity.or(base.text_verbosity),
            include: self.include.clone().or_else(|| base.include.clone()),
        }
    }
}

/// Merged user configuration handed to the request pipeline
#[derive(Debug, Clone, Default)]
pub struct UserConfig {
    /// Canonical model used when the client's name is unrecognized
    pub default_model: CanonicalModel,
    /// Options applied to every model
    pub global: ModelOptions,
    /// Options keyed by the client-facing model name
    pub models: HashMap<String, ModelOptions>,
    /// Compaction triggers and budgets
    pub compaction: CompactionSettings,
    /// Input filtering knobs
    pub filter: FilterSettings,
}

impl UserConfig {
    /// Build from a loosely-typed JSON object
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "default_model": "gpt-5.1",
    ///   "global": { "reasoningEffort": "high" },
    ///   "models": { "gpt-5-codex-low": { "options": { "reasoningEffort": "low" } } }
    /// }
    /// ```
    /// Per-model entries may also be flat option objects. Anything missing,
    /// `null`, or malformed degrades to the empty default.
    pub fn from_value(value: &Value) -> Self {
        let mut config = Self::default();
        let Some(obj) = value.as_object() else {
            return config;
        };

        let default_name = obj
            .get("default_model")
            .or_else(|| obj.get("defaultModel"))
            .or_else(|| obj.get("default"))
            .and_then(Value::as_str);
        if default_name.is_some() {
            config.default_model = normalize_model(default_name, CanonicalModel::default());
        }

        if let Some(global) = obj.get("global") {
            config.global = ModelOptions::from_value(global);
        }

        let models = obj
            .get("models")
            .or_else(|| obj.get("overrides"))
            .and_then(Value::as_object);
        if let Some(models) = models {
            for (name, entry) in models {
                let options = entry.get("options").unwrap_or(entry);
                config
                    .models
                    .insert(name.clone(), ModelOptions::from_value(options));
            }
        }

        config
    }
}

// ============================================================================
// Capability Table
// ============================================================================

/// What a canonical model accepts
#[derive(Debug, Clone, Copy)]
pub struct ModelCapabilities {
    /// Supported efforts, ascending
    pub efforts: &'static [ReasoningEffort],
    /// Supported verbosity values
    pub verbosity: &'static [TextVerbosity],
}

const ALL_VERBOSITY: &[TextVerbosity] =
    &[TextVerbosity::Low, TextVerbosity::Medium, TextVerbosity::High];
const MEDIUM_ONLY: &[TextVerbosity] = &[TextVerbosity::Medium];

/// Static capability table
pub fn capabilities(model: CanonicalModel) -> ModelCapabilities {
    use ReasoningEffort::*;
    match model {
        CanonicalModel::Gpt5 => ModelCapabilities {
            efforts: &[Minimal, Low, Medium, High],
            verbosity: ALL_VERBOSITY,
        },
        CanonicalModel::Gpt51 => ModelCapabilities {
            efforts: &[None, Low, Medium, High],
            verbosity: ALL_VERBOSITY,
        },
        CanonicalModel::Gpt5Codex | CanonicalModel::Gpt51Codex => ModelCapabilities {
            efforts: &[Low, Medium, High],
            verbosity: MEDIUM_ONLY,
        },
        CanonicalModel::CodexMini | CanonicalModel::Gpt51CodexMini => ModelCapabilities {
            efforts: &[Medium, High],
            verbosity: MEDIUM_ONLY,
        },
        CanonicalModel::Gpt51CodexMax => ModelCapabilities {
            efforts: &[Low, Medium, High, XHigh],
            verbosity: MEDIUM_ONLY,
        },
    }
}

/// Replace an unsupported effort with the nearest supported lower level
///
/// When nothing lower is supported the model's lowest level is used.
pub fn clamp_effort(requested: ReasoningEffort, model: CanonicalModel) -> ReasoningEffort {
    let supported = capabilities(model).efforts;
    if supported.contains(&requested) {
        return requested;
    }
    supported
        .iter()
        .copied()
        .filter(|e| *e < requested)
        .max()
        .or_else(|| supported.iter().copied().min())
        .unwrap_or(requested)
}

/// Collapse an unsupported verbosity onto the model's supported value
pub fn clamp_verbosity(requested: TextVerbosity, model: CanonicalModel) -> TextVerbosity {
    let supported = capabilities(model).verbosity;
    if supported.contains(&requested) {
        requested
    } else {
        supported.first().copied().unwrap_or(requested)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolved per-request configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub reasoning_effort: ReasoningEffort,
    pub reasoning_summary: ReasoningSummary,
    pub text_verbosity: TextVerbosity,
    pub include: BTreeSet<String>,
}

/// Merge global and per-model options, fill defaults, clamp per model
///
/// `original` is the client-facing name before normalization; per-model
/// options are looked up by it first and by the canonical id second.
pub fn resolve_model_config(
    model: CanonicalModel,
    original: Option<&str>,
    user: &UserConfig,
) -> ModelConfig {
    let per_model = original
        .and_then(|name| user.models.get(name))
        .or_else(|| user.models.get(model.as_str()));

    let merged = match per_model {
        Some(options) => options.over(&user.global),
        None => user.global.clone(),
    };

    let effort = merged.reasoning_effort.unwrap_or(ReasoningEffort::Medium);
    let verbosity = merged.text_verbosity.unwrap_or(TextVerbosity::Medium);

    let mut include: BTreeSet<String> = merged.include.unwrap_or_default().into_iter().collect();
    include.insert(ENCRYPTED_REASONING_INCLUDE.to_string());

    ModelConfig {
        reasoning_effort: clamp_effort(effort, model),
        reasoning_summary: merged.reasoning_summary.unwrap_or(ReasoningSummary::Auto),
        text_verbosity: clamp_verbosity(verbosity, model),
        include,
    }
}
