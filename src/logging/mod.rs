// Logging module - tracing setup and the stage-tagged request log
//
// Two sinks:
// - tracing: stderr, plus an optional rolling JSON file
// - RequestLog: one record per pipeline stage, optionally dumped to
//   `requests-<date>.jsonl` by a background task
//
// The request log never blocks a request. Records go over a bounded channel
// with try_send; a full channel drops the record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

/// Records buffered before new ones are dropped
const DUMP_CHANNEL_CAPACITY: usize = 1024;

// Stage names
pub const STAGE_BEFORE_TRANSFORM: &str = "before-transform";
pub const STAGE_AFTER_TRANSFORM: &str = "after-transform";
pub const STAGE_COMPACTION_REQUEST: &str = "compaction-request";
pub const STAGE_UPSTREAM_ERROR: &str = "upstream-error";
pub const STAGE_RESPONSE_CONVERTED: &str = "response-converted";
pub const STAGE_COMPACTION_FINALIZED: &str = "compaction-finalized";

// ============================================================================
// Tracing
// ============================================================================

/// Install the global tracing subscriber
///
/// Precedence: RUST_LOG env var > config file > default "info".
/// The returned guard must live until shutdown so the file writer flushes.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let default_filter = format!("codex_bridge={},axum=info", config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let (file_layer, guard) = match file_writer(config) {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

/// Rolling non-blocking file writer, when file logging is on
fn file_writer(
    config: &LoggingConfig,
) -> Option<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    if !config.file_enabled {
        return None;
    }

    // Subscriber isn't installed yet, so this one goes straight to stderr
    if let Err(e) = fs::create_dir_all(&config.file_dir) {
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            config.file_dir, e
        );
        return None;
    }

    let appender = match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, &config.file_prefix),
    };
    Some(tracing_appender::non_blocking(appender))
}

/// Process-unique request id: `<millis>-<counter>`
pub fn generate_request_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}", Utc::now().timestamp_millis(), count)
}

// ============================================================================
// Request Log
// ============================================================================

/// One stage of one request
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub stage: &'static str,
    pub request_id: String,
    pub data: Value,
}

/// Stage-tagged request sink
///
/// Cheap to clone; every clone feeds the same writer.
#[derive(Clone, Debug, Default)]
pub struct RequestLog {
    sender: Option<mpsc::Sender<RequestRecord>>,
}

impl RequestLog {
    /// A log that only emits tracing events
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A log plus the writer that drains it into `dir`
    pub fn channel(dir: PathBuf) -> Result<(Self, RequestDumpWriter)> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create request dump directory {}", dir.display()))?;
        let (tx, rx) = mpsc::channel(DUMP_CHANNEL_CAPACITY);
        Ok((Self { sender: Some(tx) }, RequestDumpWriter { dir, rx }))
    }

    /// Build from config, spawning the dump writer when dumps are enabled
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        if !config.request_dumps {
            return Ok(Self::disabled());
        }
        let (log, writer) = Self::channel(config.request_dump_dir.clone())?;
        tokio::spawn(writer.run());
        tracing::info!(dir = %config.request_dump_dir.display(), "Request dumps enabled");
        Ok(log)
    }

    pub fn is_dumping(&self) -> bool {
        self.sender.is_some()
    }

    /// Record a stage of a request
    pub fn record(&self, stage: &'static str, request_id: &str, data: Value) {
        tracing::debug!(stage, request_id, "Request stage");
        tracing::trace!(stage, request_id, data = %data, "Request stage data");

        let Some(sender) = &self.sender else {
            return;
        };
        let record = RequestRecord {
            timestamp: Utc::now(),
            stage,
            request_id: request_id.to_string(),
            data,
        };
        if let Err(e) = sender.try_send(record) {
            tracing::debug!(stage, request_id, error = %e, "Request record dropped");
        }
    }
}

/// Background writer appending records as JSON Lines
#[derive(Debug)]
pub struct RequestDumpWriter {
    dir: PathBuf,
    rx: mpsc::Receiver<RequestRecord>,
}

impl RequestDumpWriter {
    /// Drain records until every `RequestLog` clone is dropped
    pub async fn run(mut self) {
        while let Some(record) = self.rx.recv().await {
            if let Err(e) = write_record(&self.dir, &record) {
                tracing::error!("Failed to write request record: {:?}", e);
            }
        }
        tracing::debug!("Request dump writer shutting down");
    }
}

/// File for a record's day: `requests-YYYY-MM-DD.jsonl`
pub fn dump_file_path(dir: &Path, timestamp: &DateTime<Utc>) -> PathBuf {
    dir.join(format!("requests-{}.jsonl", timestamp.format("%Y-%m-%d")))
}

fn write_record(dir: &Path, record: &RequestRecord) -> Result<()> {
    let path = dump_file_path(dir, &record.timestamp);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let json = serde_json::to_string(record).context("Failed to serialize request record")?;
    writeln!(file, "{}", json).context("Failed to write request record")?;
    file.flush().context("Failed to flush request record")?;
    Ok(())
}
