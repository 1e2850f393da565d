// codex-bridge - Responses API bridge for the stateless Codex backend
//
// Clients speak the Responses API as if the server kept conversation state.
// The backend keeps none, so the bridge does:
// - Model normalization and per-model reasoning/verbosity config
// - Input filtering (stored-item references, SDK prompts) and instruction injection
// - In-process conversation memory keyed by a cache key
// - History compaction on command or above a token threshold
// - SSE → JSON conversion for requests without tools
//
// Architecture:
// - Proxy server (axum): receives client requests and forwards to the backend
// - Transformation: pure request pipeline, no IO
// - Sessions: bounded TTL map shared through Arc
// - Logging: tracing plus a stage-tagged request log

mod cli;
mod config;
mod logging;
mod proxy;
mod startup;
mod tokens;
mod util;

use anyhow::Result;
use clap::Parser;
use config::Config;
use logging::RequestLog;
use proxy::sessions::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Handle CLI commands first (config --show, --path, --reset)
    if let Some(command) = &cli.command {
        return cli::handle_command(&cli, command);
    }

    // Ensure config template exists (helps users discover options)
    if cli.config.is_none() {
        Config::ensure_config_exists();
    }

    let config = cli.load_config()?;

    // Precedence: RUST_LOG env var > config file > default "info"
    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init_tracing(&config.logging);

    let request_log = RequestLog::from_config(&config.logging)?;
    let sessions = SessionManager::new_shared(config.sessions.to_session_config());

    startup::print_startup(&config);
    startup::log_startup(&config);

    // Create shutdown channel for graceful proxy shutdown
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let mut proxy_handle = tokio::spawn(proxy::start_proxy(
        config,
        sessions,
        request_log,
        shutdown_rx,
    ));

    tokio::select! {
        result = &mut proxy_handle => {
            // Proxy exited on its own (bind failure, server error)
            return result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
        }
    }

    tracing::info!("Shutting down...");

    // If the send fails, the proxy has already shut down (which is fine)
    let _ = shutdown_tx.send(());
    proxy_handle.await??;

    tracing::info!("Shutdown complete");
    Ok(())
}
