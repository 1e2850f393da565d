//! Compaction configuration

use serde::Deserialize;

use crate::proxy::transformation::compaction::{
    CompactionSettings, DEFAULT_CHAR_BUDGET, DEFAULT_MIN_TURNS, DEFAULT_PHRASES,
};

/// [compaction] section
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionConfig {
    pub enabled: bool,
    /// Approximate tokens above which history is compacted; None disables auto mode
    pub auto_threshold_tokens: Option<usize>,
    pub min_turns: usize,
    pub transcript_char_budget: usize,
    pub phrases: Vec<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_threshold_tokens: None,
            min_turns: DEFAULT_MIN_TURNS,
            transcript_char_budget: DEFAULT_CHAR_BUDGET,
            phrases: DEFAULT_PHRASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Compaction settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileCompaction {
    pub enabled: Option<bool>,
    pub auto_threshold_tokens: Option<usize>,
    pub min_turns: Option<usize>,
    pub transcript_char_budget: Option<usize>,
    pub phrases: Option<Vec<String>>,
}

impl CompactionConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileCompaction>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        // Phrases are matched without their leading / or !
        let phrases = file
            .phrases
            .map(|list| {
                list.into_iter()
                    .map(|p| p.trim().trim_start_matches(['/', '!']).to_string())
                    .filter(|p| !p.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.phrases);

        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            // Zero means "no threshold"
            auto_threshold_tokens: file.auto_threshold_tokens.filter(|t| *t > 0),
            min_turns: file.min_turns.unwrap_or(defaults.min_turns),
            transcript_char_budget: file
                .transcript_char_budget
                .unwrap_or(defaults.transcript_char_budget),
            phrases,
        }
    }

    pub fn to_settings(&self) -> CompactionSettings {
        CompactionSettings {
            enabled: self.enabled,
            auto_threshold_tokens: self.auto_threshold_tokens,
            min_turns: self.min_turns,
            char_budget: self.transcript_char_budget,
            phrases: self.phrases.clone(),
        }
    }
}
