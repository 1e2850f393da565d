//! Proxy state shared by every request

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::{BridgeMode, Config};
use crate::logging::RequestLog;

use super::helpers::{upstream_url, Credentials};
use super::sessions::SessionManager;
use super::transformation::reasoning::UserConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Proxy State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state for the proxy server
#[derive(Clone)]
pub struct ProxyState {
    /// HTTP client for the backend
    pub(super) client: reqwest::Client,
    /// Conversation memory, evicted on access
    pub sessions: Arc<SessionManager>,
    pub(super) user_config: Arc<UserConfig>,
    /// Injected as the first input item in bridge mode
    pub(super) instructions: Arc<str>,
    pub(super) bridge_mode: BridgeMode,
    pub(super) credentials: Arc<Credentials>,
    /// `{backend_url}/codex/responses`
    pub(super) upstream_url: String,
    pub(super) request_log: RequestLog,
}

impl ProxyState {
    /// Build state from config
    ///
    /// Reads the instruction and SDK prompt files; a missing or unreadable
    /// file is a startup error.
    pub fn from_config(
        config: &Config,
        sessions: Arc<SessionManager>,
        request_log: RequestLog,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            sessions,
            user_config: Arc::new(config.user_config()?),
            instructions: Arc::from(config.instructions()?),
            bridge_mode: config.bridge_mode,
            credentials: Arc::new(Credentials {
                access_token: config.access_token.clone(),
                account_id: config.account_id.clone(),
            }),
            upstream_url: upstream_url(&config.backend_url),
            request_log,
        })
    }
}
