//! Configuration for the bridge
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/codex-bridge/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::proxy::transformation::input_filter::FilterSettings;
use crate::proxy::transformation::reasoning::UserConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod compaction;
mod observability;
mod serialization;
mod sessions;


// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (maintain public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use compaction::{CompactionConfig, FileCompaction};
pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use sessions::{FileSessions, SessionsConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const ENV_PREFIX: &str = "CODEX_BRIDGE_";
const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_BACKEND_URL: &str = "https://chatgpt.com/backend-api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Instructions injected in bridge mode when no file is configured
pub const DEFAULT_INSTRUCTIONS: &str = "You are running behind a compatibility bridge. \
The client's system prompt has been removed; follow the client's tool list and \
the conversation as given. Tools named in the Codex CLI instructions may not exist \
here, so only call tools that appear in the request.";

// ─────────────────────────────────────────────────────────────────────────────
// Bridge Mode
// ─────────────────────────────────────────────────────────────────────────────

/// How client instructions are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeMode {
    /// Strip the SDK prompt and inject bridge instructions
    #[default]
    Bridge,
    /// Keep client prompts and inject a tool-name notice
    Legacy,
}

impl BridgeMode {
    /// Parse mode string; unknown values fall back to bridge
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "legacy" | "off" | "false" => Self::Legacy,
            _ => Self::Bridge,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Legacy => "legacy",
        }
    }

    pub fn is_bridge(&self) -> bool {
        *self == Self::Bridge
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the proxy server to
    pub bind_addr: SocketAddr,

    /// Backend base URL; requests go to `{backend_url}/codex/responses`
    pub backend_url: String,

    /// Bearer token for the backend
    pub access_token: Option<String>,

    /// Account id sent as `chatgpt-account-id`
    pub account_id: Option<String>,

    pub bridge_mode: BridgeMode,

    /// File holding the bridge instructions
    pub instructions_path: Option<PathBuf>,

    /// File holding the client SDK's exact system prompt
    pub sdk_prompt_path: Option<PathBuf>,

    /// Regex for ids of server-stored items (built-in prefixes when unset)
    pub reference_pattern: Option<String>,

    /// Upstream request timeout
    pub request_timeout_secs: u64,

    /// Raw [models] section, parsed leniently into a `UserConfig`
    pub models: Option<toml::Table>,

    pub sessions: SessionsConfig,

    pub compaction: CompactionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            access_token: None,
            account_id: None,
            bridge_mode: BridgeMode::default(),
            instructions_path: None,
            sdk_prompt_path: None,
            reference_pattern: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            models: None,
            sessions: SessionsConfig::default(),
            compaction: CompactionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub backend_url: Option<String>,
    pub access_token: Option<String>,
    pub account_id: Option<String>,
    pub bridge_mode: Option<String>,
    pub instructions_path: Option<String>,
    pub sdk_prompt_path: Option<String>,
    pub reference_pattern: Option<String>,
    pub request_timeout_secs: Option<u64>,

    /// Optional [models] section, kept loose on purpose
    pub models: Option<toml::Table>,

    /// Optional [sessions] section
    pub sessions: Option<FileSessions>,

    /// Optional [compaction] section
    pub compaction: Option<FileCompaction>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

/// Environment overrides, read once so loading stays testable
#[derive(Debug, Default, Clone)]
pub(crate) struct EnvOverrides {
    pub bind: Option<String>,
    pub backend_url: Option<String>,
    pub access_token: Option<String>,
    pub account_id: Option<String>,
    pub mode: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| {
            std::env::var(format!("{}{}", ENV_PREFIX, name))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };
        Self {
            bind: var("BIND"),
            backend_url: var("BACKEND_URL"),
            access_token: var("ACCESS_TOKEN"),
            account_id: var("ACCOUNT_ID"),
            mode: var("MODE"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/codex-bridge/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("codex-bridge").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if Self::write_template(&path).is_err() {
            tracing::debug!(path = %path.display(), "Could not write config template");
        }
    }

    /// Write the default template to `path`, replacing any existing file
    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, Self::default().to_toml())
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Read and parse the config file; a missing file yields defaults
    fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
        let Some(path) = path else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Cannot read config file {}", path.display()))
            }
        }
    }

    /// Load configuration: env vars > file > defaults
    ///
    /// `path` overrides the default config location.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(Self::config_path);
        let file = Self::load_file_config(path.as_deref())?;
        Self::resolve(file, EnvOverrides::from_env())
    }

    /// Merge a parsed file with environment overrides
    pub(crate) fn resolve(file: FileConfig, env: EnvOverrides) -> Result<Self> {
        let defaults = Self::default();

        // Bind address: env > file > default
        let bind = env
            .bind
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", bind))?;

        // Backend URL: env > file > default
        let backend_url = env
            .backend_url
            .or(file.backend_url)
            .unwrap_or(defaults.backend_url)
            .trim_end_matches('/')
            .to_string();

        // Credentials: env > file
        let access_token = env.access_token.or(file.access_token);
        let account_id = env.account_id.or(file.account_id);

        let bridge_mode = env
            .mode
            .or(file.bridge_mode)
            .map(|m| BridgeMode::from_str(&m))
            .unwrap_or_default();

        let reference_pattern = file.reference_pattern.filter(|p| !p.trim().is_empty());
        if let Some(pattern) = &reference_pattern {
            regex::Regex::new(pattern)
                .with_context(|| format!("Invalid reference_pattern {:?}", pattern))?;
        }

        Ok(Self {
            bind_addr,
            backend_url,
            access_token,
            account_id,
            bridge_mode,
            instructions_path: file.instructions_path.map(PathBuf::from),
            sdk_prompt_path: file.sdk_prompt_path.map(PathBuf::from),
            reference_pattern,
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            models: file.models,
            sessions: SessionsConfig::from_file(file.sessions),
            compaction: CompactionConfig::from_file(file.compaction),
            logging: LoggingConfig::from_file(file.logging),
        })
    }

    /// Instruction text for bridge mode
    pub fn instructions(&self) -> Result<String> {
        match &self.instructions_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read instructions {}", path.display())),
            None => Ok(DEFAULT_INSTRUCTIONS.to_string()),
        }
    }

    /// Build the pipeline's user configuration
    ///
    /// The [models] section is parsed leniently; only unreadable files and
    /// an invalid reference pattern are errors.
    pub fn user_config(&self) -> Result<UserConfig> {
        let models = match &self.models {
            Some(table) => serde_json::to_value(table).unwrap_or(serde_json::Value::Null),
            None => serde_json::Value::Null,
        };
        let mut user = UserConfig::from_value(&models);

        let sdk_prompt = match &self.sdk_prompt_path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read SDK prompt {}", path.display()))?,
            ),
            None => None,
        };
        let mut filter = FilterSettings::default().with_sdk_prompt(sdk_prompt);
        if let Some(pattern) = &self.reference_pattern {
            filter = filter
                .with_reference_pattern(pattern)
                .with_context(|| format!("Invalid reference_pattern {:?}", pattern))?;
        }
        user.filter = filter;
        user.compaction = self.compaction.to_settings();
        Ok(user)
    }
}
