// Startup module - displays banner and feature status
//
// Printed to stdout once before serving; the same summary goes to the
// tracing log so file logs record what the bridge started with.

use crate::config::{Config, VERSION};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// Feature status for display
pub struct FeatureStatus {
    pub name: &'static str,
    pub enabled: bool,
    pub description: String,
}

/// Print the startup banner and feature status
pub fn print_startup(config: &Config) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}codex-bridge{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Responses API bridge for the stateless Codex backend{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    for feature in &feature_status(config) {
        print_feature_status(feature);
    }
    println!();

    println!(
        "  {MAGENTA}▸{RESET} Proxy listening on {BOLD}{}{RESET}",
        config.bind_addr
    );
    if config.access_token.is_none() {
        println!(
            "  {YELLOW}▸{RESET} {YELLOW}No access token{RESET} {DIM}(set CODEX_BRIDGE_ACCESS_TOKEN){RESET}"
        );
    }
    println!();
}

/// Status of each feature based on config
pub fn feature_status(config: &Config) -> Vec<FeatureStatus> {
    let compaction = match config.compaction.auto_threshold_tokens {
        Some(threshold) => format!("Commands + auto above ~{} tokens", threshold),
        None => "Commands only".to_string(),
    };

    vec![
        FeatureStatus {
            name: "bridge",
            enabled: config.bridge_mode.is_bridge(),
            description: format!("Instruction mode: {}", config.bridge_mode.as_str()),
        },
        FeatureStatus {
            name: "sessions",
            enabled: config.sessions.enabled,
            description: format!(
                "Conversation memory ({} max, {}s idle)",
                config.sessions.max_entries, config.sessions.ttl_secs
            ),
        },
        FeatureStatus {
            name: "compaction",
            enabled: config.compaction.enabled,
            description: compaction,
        },
        FeatureStatus {
            name: "dumps",
            enabled: config.logging.request_dumps,
            description: format!(
                "Request records in {}",
                config.logging.request_dump_dir.display()
            ),
        },
        FeatureStatus {
            name: "file-log",
            enabled: config.logging.file_enabled,
            description: "JSON trace files".to_string(),
        },
    ]
}

fn print_feature_status(feature: &FeatureStatus) {
    use colors::*;

    let (icon, style) = if feature.enabled {
        (format!("{GREEN}✓{RESET}"), "")
    } else {
        (format!("{DIM}○{RESET}"), DIM)
    };

    println!(
        "    {icon} {style}{:<12}{RESET} {DIM}{}{RESET}",
        feature.name, feature.description
    );
}

/// Log the same summary through tracing
pub fn log_startup(config: &Config) {
    tracing::info!("codex-bridge v{}", VERSION);
    for feature in &feature_status(config) {
        let icon = if feature.enabled { "✓" } else { "○" };
        tracing::info!("  {} {} - {}", icon, feature.name, feature.description);
    }
    tracing::info!("▸ Listening on {}", config.bind_addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_status_reflects_config() {
        let mut config = Config::default();
        config.compaction.auto_threshold_tokens = Some(50_000);
        config.sessions.enabled = false;

        let features = feature_status(&config);
        let get = |name: &str| features.iter().find(|f| f.name == name).unwrap();

        assert!(get("bridge").enabled);
        assert!(!get("sessions").enabled);
        assert!(get("compaction").description.contains("50000"));
        assert!(!get("dumps").enabled);
    }
}
