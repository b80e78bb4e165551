pub mod config;

use clap::{Parser, Subcommand};

/// orgbridge - one paired messaging session per organization.
#[derive(Debug, Parser)]
#[command(name = "orgbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `OB_CONFIG` (or
/// `config.toml` by default).  Returns the parsed config and the path that
/// was used.
pub fn load_config() -> anyhow::Result<(ob_domain::config::Config, String)> {
    let config_path = std::env::var("OB_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let config = ob_domain::config::Config::load_from_path(std::path::Path::new(&config_path))?;
    Ok((config, config_path))
}
