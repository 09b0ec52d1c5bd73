//! Configuration module for the flutd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use crate::canvas::PixelFormat;
use crate::runtime::Limits;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the pixelflut server
#[derive(Parser, Debug, Default)]
#[command(name = "flutd")]
#[command(version)]
#[command(about = "A pixelflut canvas server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0 or ::)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Canvas width in pixels
    #[arg(short = 'W', long)]
    pub width: Option<u32>,

    /// Canvas height in pixels
    #[arg(short = 'H', long)]
    pub height: Option<u32>,

    /// Canvas pixel format
    #[arg(long, value_enum)]
    pub format: Option<PixelFormat>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum line length in bytes, terminator excluded
    #[arg(long)]
    pub max_line: Option<usize>,

    /// Per-connection input buffer limit in bytes
    #[arg(long)]
    pub max_buffer: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events fetched per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Canvas configuration
#[derive(Debug, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default)]
    pub format: PixelFormat,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            format: PixelFormat::default(),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_line")]
    pub max_line: usize,
    #[serde(default = "default_max_buffer")]
    pub max_buffer: usize,
    /// Queued response bytes at which reading pauses
    #[serde(default = "default_max_output")]
    pub max_output: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line: default_max_line(),
            max_buffer: default_max_buffer(),
            max_output: default_max_output(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1337
}

fn default_max_connections() -> usize {
    10_000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_dimension() -> u32 {
    1024
}

fn default_max_line() -> usize {
    1024
}

fn default_max_buffer() -> usize {
    10 * 1024
}

fn default_max_output() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub event_capacity: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub max_line: usize,
    pub max_buffer: usize,
    pub max_output: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve parsed CLI arguments against the config file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            event_capacity: file.server.event_capacity,
            width: cli.width.unwrap_or(file.canvas.width),
            height: cli.height.unwrap_or(file.canvas.height),
            format: cli.format.unwrap_or(file.canvas.format),
            max_line: cli.max_line.unwrap_or(file.limits.max_line),
            max_buffer: cli.max_buffer.unwrap_or(file.limits.max_buffer),
            max_output: file.limits.max_output,
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "canvas dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_line == 0 {
            return Err(ConfigError::Invalid("max_line must be positive".into()));
        }
        if self.max_buffer <= self.max_line {
            return Err(ConfigError::Invalid(format!(
                "max_buffer ({}) must be larger than max_line ({})",
                self.max_buffer, self.max_line
            )));
        }
        if self.max_output == 0 {
            return Err(ConfigError::Invalid("max_output must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        self.listen_addr()?;
        Ok(())
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid host address '{}'", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_line: self.max_line,
            max_buffer: self.max_buffer,
            max_output: self.max_output,
            max_connections: self.max_connections,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
