//! Command-line arguments for the agent binary

use std::path::PathBuf;

use clap::Parser;

use crate::config::{Config, LogFormat};
use crate::types::Port;

/// Parse port from command line argument
fn parse_port(s: &str) -> Result<Port, String> {
    s.parse::<Port>().map_err(|e| format!("Invalid port: {}", e))
}

/// FreeSWITCH call-quality metrics agent
#[derive(Parser, Debug, Clone)]
#[command(name = "fsagent", version, about)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", env = "FSAGENT_CONFIG")]
    pub config: PathBuf,

    /// Number of worker threads (default: one per CPU core)
    #[arg(short, long, env = "FSAGENT_THREADS")]
    pub threads: Option<usize>,

    /// Log filter (overrides config file; RUST_LOG still wins)
    #[arg(long, env = "FSAGENT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (overrides config file)
    #[arg(long, value_enum, env = "FSAGENT_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Health endpoint port (overrides config file)
    #[arg(long, env = "FSAGENT_HTTP_PORT", value_parser = parse_port)]
    pub http_port: Option<Port>,

    /// Validate the configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
    }

    #[must_use]
    pub fn config_path(&self) -> String {
        self.config.to_string_lossy().into_owned()
    }
}
