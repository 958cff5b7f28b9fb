//! Configuration module for chat-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(author = "chat-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP chat relay", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:4567)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port to bind to, keeping the host part of the listen address
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Mode>,
}

/// What the process should do once configured.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Run the relay server (the default)
    Serve,
    /// Connect to a relay as an interactive terminal client
    Join {
        /// Host of the relay server
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port of the relay server
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Display name; prompted for when omitted
        #[arg(long)]
        name: Option<String>,
    },
}

/// Port the reference relay listens on.
pub const DEFAULT_PORT: u16 = 4567;

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Listen backlog handed to the kernel
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Upper bound on a single write to one recipient, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            backlog: default_backlog(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_backlog() -> i32 {
    1024
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub backlog: i32,
    pub write_timeout: Duration,
    pub log_level: String,
    pub mode: Mode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let mut listen = cli.listen.unwrap_or(toml_config.server.listen);
        if let Some(port) = cli.port {
            listen = with_port(&listen, port)?;
        }

        Ok(Config {
            listen,
            workers: cli.workers.or(toml_config.server.workers),
            backlog: toml_config.server.backlog,
            write_timeout: Duration::from_millis(toml_config.server.write_timeout_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            mode: cli.command.unwrap_or(Mode::Serve),
        })
    }
}

/// Replace the port of a `host:port` listen address.
fn with_port(listen: &str, port: u16) -> Result<String, ConfigError> {
    match listen.rsplit_once(':') {
        Some((host, _)) => Ok(format!("{host}:{port}")),
        None => Err(ConfigError::InvalidListen(listen.to_string())),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Listen address '{addr}' has no port")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:4567");
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.server.write_timeout_ms, 5000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            workers = 4
            write_timeout_ms = 250

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.server.write_timeout_ms, 250);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = CliArgs::try_parse_from(["chat-relay"]).unwrap();
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen, "127.0.0.1:4567");
        assert_eq!(config.mode, Mode::Serve);
        assert_eq!(config.write_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_port_overrides_listen_port() {
        let cli =
            CliArgs::try_parse_from(["chat-relay", "--listen", "0.0.0.0:1", "--port", "7000"])
                .unwrap();
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(config.listen, "0.0.0.0:7000");
    }

    #[test]
    fn test_port_without_listen_port_is_rejected() {
        let cli = CliArgs::try_parse_from(["chat-relay", "-l", "localhost", "-p", "7000"]).unwrap();
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::InvalidListen(_))
        ));
    }

    #[test]
    fn test_join_subcommand() {
        let cli =
            CliArgs::try_parse_from(["chat-relay", "join", "--name", "alice", "--port", "5000"])
                .unwrap();
        let config = Config::from_cli(cli).unwrap();
        assert_eq!(
            config.mode,
            Mode::Join {
                host: "127.0.0.1".to_string(),
                port: 5000,
                name: Some("alice".to_string()),
            }
        );
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::try_parse_from(["chat-relay", "-c", "/nonexistent/relay.toml"]).unwrap();
        assert!(matches!(
            Config::from_cli(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }

    #[test]
    fn test_cli_log_level_overrides_file() {
        let path = std::env::temp_dir().join(format!("chat-relay-{}.toml", std::process::id()));
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let path_arg = path.to_str().unwrap();

        let cli = CliArgs::try_parse_from(["chat-relay", "-c", path_arg]).unwrap();
        assert_eq!(Config::from_cli(cli).unwrap().log_level, "debug");

        let cli =
            CliArgs::try_parse_from(["chat-relay", "-c", path_arg, "--log-level", "info"]).unwrap();
        let level = Config::from_cli(cli).map(|c| c.log_level);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(level.unwrap(), "info");
    }
}
