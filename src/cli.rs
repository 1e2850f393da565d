// CLI module - command-line argument parsing and handlers
//
// Without a subcommand the proxy runs. Subcommands manage configuration:
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --reset: Regenerate config file with defaults

use crate::config::{Config, VERSION};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

/// codex-bridge - Responses API bridge for the stateless Codex backend
#[derive(Parser, Debug)]
#[command(name = "codex-bridge")]
#[command(version = VERSION)]
#[command(about = "Responses API bridge for the stateless Codex backend", long_about = None)]
pub struct Cli {
    /// Address to listen on (overrides config and CODEX_BRIDGE_BIND)
    #[arg(long, global = true)]
    pub bind: Option<String>,

    /// Config file to use instead of ~/.config/codex-bridge/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Skip the overwrite prompt for --reset
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

impl Cli {
    /// Load config honoring --config and --bind
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.clone())?;
        if let Some(bind) = &self.bind {
            config.bind_addr = bind
                .parse()
                .with_context(|| format!("Invalid --bind address {:?}", bind))?;
        }
        Ok(config)
    }

    /// Config file in effect
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Config::config_path)
    }
}

/// Run a subcommand
pub fn handle_command(cli: &Cli, command: &Commands) -> Result<()> {
    match command {
        Commands::Config {
            show,
            path,
            reset,
            yes,
        } => {
            if *path {
                handle_config_path(cli)
            } else if *show {
                handle_config_show(cli)
            } else if *reset {
                handle_config_reset(cli, *yes)
            } else {
                // No flag provided, show help
                println!("Usage: codex-bridge config [--show|--path|--reset]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --path    Show config file path");
                println!("  --reset   Reset config file to defaults");
                Ok(())
            }
        }
    }
}

fn handle_config_path(cli: &Cli) -> Result<()> {
    let path = cli
        .config_path()
        .context("Could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

fn handle_config_show(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;

    println!("# Effective configuration (env > file > defaults)");
    println!(
        "# access_token: {}",
        if config.access_token.is_some() {
            "set"
        } else {
            "not set"
        }
    );
    if let Some(path) = cli.config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

fn handle_config_reset(cli: &Cli, yes: bool) -> Result<()> {
    let path = cli
        .config_path()
        .context("Could not determine config path")?;

    if path.exists() && !yes {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    Config::write_template(&path)?;
    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from(["codex-bridge", "--bind", "0.0.0.0:9999"]).unwrap();
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9999"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_config_subcommand() {
        let cli = Cli::try_parse_from(["codex-bridge", "config", "--reset", "-y"]).unwrap();
        match cli.command {
            Some(Commands::Config {
                reset, yes, show, ..
            }) => {
                assert!(reset);
                assert!(yes);
                assert!(!show);
            }
            None => panic!("expected config subcommand"),
        }
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let cli =
            Cli::try_parse_from(["codex-bridge", "--config", "/tmp/bridge.toml", "config"])
                .unwrap();
        assert_eq!(cli.config_path(), Some(PathBuf::from("/tmp/bridge.toml")));
    }

    #[test]
    fn test_invalid_bind_flag_is_an_error() {
        let dir = std::env::temp_dir().join("codex-bridge-cli-test-missing");
        let cli = Cli::try_parse_from([
            "codex-bridge",
            "--config",
            dir.join("config.toml").to_str().unwrap(),
            "--bind",
            "nope",
        ])
        .unwrap();
        assert!(cli.load_config().is_err());
    }
}
