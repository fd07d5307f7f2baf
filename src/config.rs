//! Server configuration.
//!
//! Values come from three layers, highest precedence first: command-line
//! flags, an optional JSON file named by `--config`, and built-in
//! defaults.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::server::DEFAULT_FACT_NAME;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default listening address.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default log filter when neither the flag nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single line output.
    #[default]
    Compact,
    /// Structured JSON.
    Json,
}

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Base path for rule files; the current directory when absent.
    pub path: Option<PathBuf>,
    /// Rule file (`.clp` or `.dat`) loaded at start-up.
    pub file: Option<String>,
    pub watch_facts: bool,
    pub watch_rules: bool,
    /// Fact name wrapping unstructured messages.
    pub fact_name: String,
    pub log_filter: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            path: None,
            file: None,
            watch_facts: false,
            watch_rules: false,
            fact_name: DEFAULT_FACT_NAME.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl ServerConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Absolute working path: the configured one, or the current directory.
    pub fn working_path(&self) -> Result<PathBuf> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => std::env::current_dir()?,
        };
        path.canonicalize().map_err(|e| {
            BridgeError::Config(format!("cannot access {}: {e}", path.display()))
        })
    }
}

/// Command-line flags of the bridge server.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "clipswire", about = "Bridge a rule engine to TCP clients")]
pub struct ServerArgs {
    /// Port to listen on [default: 5000]
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Address to listen on [default: 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Base path where rule files are found
    #[arg(short = 'd', long)]
    pub path: Option<PathBuf>,

    /// Rule file (.clp or .dat) to load at start-up
    #[arg(short = 'e', long)]
    pub file: Option<String>,

    /// Watch facts (0 or 1)
    #[arg(short = 'w', long, value_parser = parse_switch)]
    pub watch_facts: Option<bool>,

    /// Watch rules (0 or 1)
    #[arg(short = 'r', long, value_parser = parse_switch)]
    pub watch_rules: Option<bool>,

    /// Fact name for unstructured messages [default: network]
    #[arg(long)]
    pub fact_name: Option<String>,

    /// Log filter directive, e.g. `clipswire=debug`
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// JSON file supplying values for flags not given here
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

impl ServerArgs {
    /// Merge flags over the configuration file (if any) and defaults.
    pub fn resolve(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if self.path.is_some() {
            config.path = self.path;
        }
        if self.file.is_some() {
            config.file = self.file;
        }
        if let Some(on) = self.watch_facts {
            config.watch_facts = on;
        }
        if let Some(on) = self.watch_rules {
            config.watch_rules = on;
        }
        if let Some(name) = self.fact_name {
            config.fact_name = name;
        }
        if let Some(filter) = self.log_filter {
            config.log_filter = filter;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }

        if config.fact_name.trim().is_empty() {
            return Err(BridgeError::Config("fact name cannot be empty".to_string()));
        }
        Ok(config)
    }
}

/// Accept `0`/`1` as well as `true`/`false`.
fn parse_switch(value: &str) -> std::result::Result<bool, String> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(format!("expected 0 or 1, got {other:?}")),
    }
}
