//! Session memory configuration

use serde::Deserialize;
use std::time::Duration;

use crate::proxy::sessions::SessionConfig;

/// [sessions] section
#[derive(Debug, Clone, PartialEq)]
pub struct SessionsConfig {
    pub enabled: bool,
    /// Idle seconds before a conversation is forgotten
    pub ttl_secs: u64,
    /// Conversations kept at once
    pub max_entries: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 256,
        }
    }
}

/// Session settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileSessions {
    pub enabled: Option<bool>,
    pub ttl_secs: Option<u64>,
    pub max_entries: Option<usize>,
}

impl SessionsConfig {
    /// Create from file config with defaults
    pub fn from_file(file: Option<FileSessions>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            ttl_secs: file.ttl_secs.unwrap_or(defaults.ttl_secs),
            max_entries: file.max_entries.unwrap_or(defaults.max_entries),
        }
    }

    /// Runtime settings for the session manager
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            enabled: self.enabled,
            ttl: Duration::from_secs(self.ttl_secs),
            max_entries: self.max_entries,
        }
    }
}
