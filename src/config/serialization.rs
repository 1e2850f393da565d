//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

/// Quote a string as a TOML basic string
fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn optional_line(key: &str, value: Option<String>, example: &str) -> String {
    match value {
        Some(v) => format!("{} = {}\n", key, quote(&v)),
        None => format!("# {} = {}\n", key, quote(example)),
    }
}

impl Config {
    /// Serialize the [models] section, or an example when unset
    pub(super) fn models_to_toml(&self) -> String {
        let rendered = self.models.as_ref().and_then(|table| {
            let mut wrapper = toml::Table::new();
            wrapper.insert("models".to_string(), toml::Value::Table(table.clone()));
            toml::to_string(&wrapper).ok()
        });

        match rendered {
            Some(section) => section,
            None => r#"# [models]
# default = "gpt-5.1"              # Used when the client's model name is unrecognized
#
# [models.global]                  # Applies to every model
# reasoningEffort = "medium"       # none, minimal, low, medium, high, xhigh
# reasoningSummary = "auto"        # auto, concise, detailed
# textVerbosity = "medium"         # low, medium, high (codex models: medium only)
# include = ["reasoning.encrypted_content"]
#
# # Keyed by the model name the client sends, not the backend id
# [models.overrides."gpt-5-codex-high"]
# reasoningEffort = "high"
"#
            .to_string(),
        }
    }

    /// Render the full config file
    ///
    /// The access token is never written; set it through the environment.
    pub fn to_toml(&self) -> String {
        let threshold = match self.compaction.auto_threshold_tokens {
            Some(t) => format!("auto_threshold_tokens = {}\n", t),
            None => "# auto_threshold_tokens = 120000   # unset: auto compaction off\n".to_string(),
        };
        let phrases: Vec<String> = self.compaction.phrases.iter().map(|p| quote(p)).collect();

        format!(
            r#"# codex-bridge configuration
#
# Environment variables override this file:
#   CODEX_BRIDGE_BIND, CODEX_BRIDGE_BACKEND_URL, CODEX_BRIDGE_ACCESS_TOKEN,
#   CODEX_BRIDGE_ACCOUNT_ID, CODEX_BRIDGE_MODE

# Proxy bind address
bind_addr = {bind}

# Backend base URL (requests go to <backend_url>/codex/responses)
backend_url = {backend}

# Credentials (prefer CODEX_BRIDGE_ACCESS_TOKEN for the token)
# access_token = "..."
{account}
# bridge: strip the client SDK prompt and inject bridge instructions
# legacy: keep client prompts and inject a tool-name notice
bridge_mode = {mode}

{instructions}{sdk_prompt}{reference}
# Upstream request timeout
request_timeout_secs = {timeout}

# Conversation memory (in-process only)
[sessions]
enabled = {sessions_enabled}
ttl_secs = {ttl}
max_entries = {max_entries}

# History compaction
[compaction]
enabled = {compaction_enabled}
{threshold}min_turns = {min_turns}
transcript_char_budget = {budget}
phrases = [{phrases}]

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = {log_level}
# JSON file logging (in addition to stderr)
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = {log_file_rotation}  # hourly, daily, never
file_prefix = {log_file_prefix}
# Stage-tagged request records as JSON Lines
request_dumps = {request_dumps}
request_dump_dir = {request_dump_dir}

{models}"#,
            bind = quote(&self.bind_addr.to_string()),
            backend = quote(&self.backend_url),
            account = optional_line("account_id", self.account_id.clone(), "..."),
            mode = quote(self.bridge_mode.as_str()),
            instructions = optional_line(
                "instructions_path",
                self.instructions_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                "~/.config/codex-bridge/instructions.md",
            ),
            sdk_prompt = optional_line(
                "sdk_prompt_path",
                self.sdk_prompt_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                "~/.config/codex-bridge/sdk-prompt.txt",
            ),
            reference = optional_line(
                "reference_pattern",
                self.reference_pattern.clone(),
                "^(rs|resp|ref)_",
            ),
            timeout = self.request_timeout_secs,
            sessions_enabled = self.sessions.enabled,
            ttl = self.sessions.ttl_secs,
            max_entries = self.sessions.max_entries,
            compaction_enabled = self.compaction.enabled,
            threshold = threshold,
            min_turns = self.compaction.min_turns,
            budget = self.compaction.transcript_char_budget,
            phrases = phrases.join(", "),
            log_level = quote(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quote(&self.logging.file_dir.display().to_string()),
            log_file_rotation = quote(self.logging.file_rotation.as_str()),
            log_file_prefix = quote(&self.logging.file_prefix),
            request_dumps = self.logging.request_dumps,
            request_dump_dir = quote(&self.logging.request_dump_dir.display().to_string()),
            models = self.models_to_toml(),
        )
    }
}
