//! Configuration for the server and client binaries.
//!
//! Both support command-line arguments and an optional TOML configuration
//! file. CLI arguments take precedence over config file values.

use clap::Parser;
use rand::Rng;
use serde::Deserialize;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The only transport the service speaks.
const TCP: &str = "tcp";

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "salute-server")]
#[command(version = "0.1.0")]
#[command(about = "Problem-solving server with client registration", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Server name used in logs
    #[arg(short, long)]
    pub name: Option<String>,

    /// Longest array accepted by `solve`
    #[arg(short = 'a', long)]
    pub max_array_len: Option<usize>,

    /// Maximum concurrent connections (0 = unbounded)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the interactive client
#[derive(Parser, Debug, Default)]
#[command(name = "salute-client")]
#[command(version = "0.1.0")]
#[command(about = "Interactive client for the problem-solving server", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server address (e.g., 127.0.0.1:8080)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Client name; a random suffix is appended unless prompting
    #[arg(short, long)]
    pub name: Option<String>,

    /// Prompt for a client name on startup
    #[arg(long)]
    pub ask_name: bool,

    /// Connection attempts before giving up
    #[arg(short = 'r', long)]
    pub max_retries: Option<u32>,

    /// Delay between connection attempts in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Server TOML file structure
#[derive(Debug, Deserialize, Default)]
pub struct ServerFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_server_name")]
    pub name: String,
    /// 0 = unbounded
    #[serde(default)]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            transport: default_transport(),
            name: default_server_name(),
            max_connections: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_max_array_len")]
    pub max_array_len: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_array_len: default_max_array_len(),
        }
    }
}

/// Client TOML file structure
#[derive(Debug, Deserialize, Default)]
pub struct ClientFile {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default)]
    pub ask_name: bool,
    #[serde(default = "default_true")]
    pub default_name_allowed: bool,
    #[serde(default = "default_max_rng_value")]
    pub max_rng_value: u32,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            ask_name: false,
            default_name_allowed: true,
            max_rng_value: default_max_rng_value(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_listen")]
    pub server: String,
    #[serde(default = "default_transport")]
    pub transport: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            server: default_listen(),
            transport: default_transport(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_transport() -> String {
    TCP.to_string()
}

fn default_server_name() -> String {
    "Server".to_string()
}

fn default_client_name() -> String {
    "Client".to_string()
}

fn default_max_array_len() -> usize {
    100
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_rng_value() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub name: String,
    pub max_array_len: usize,
    /// 0 = unbounded
    pub max_connections: usize,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(ServerArgs::default(), ServerFile::default())
    }
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ServerArgs::parse();
        let file = match cli.config {
            Some(ref path) => read_toml(path)?,
            None => ServerFile::default(),
        };
        Self::resolve(cli, file)
    }

    /// Validate the file, then merge CLI args over it.
    pub fn resolve(cli: ServerArgs, file: ServerFile) -> Result<Self, ConfigError> {
        check_transport(&file.server.transport)?;
        Ok(Self::merge(cli, file))
    }

    fn merge(cli: ServerArgs, file: ServerFile) -> Self {
        ServerConfig {
            listen: cli.listen.unwrap_or(file.server.listen),
            name: cli.name.unwrap_or(file.server.name),
            max_array_len: cli.max_array_len.unwrap_or(file.limits.max_array_len),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: String,
    /// Base name; see [`resolve_client_name`].
    pub name: String,
    pub ask_name: bool,
    pub default_name_allowed: bool,
    pub max_rng_value: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::merge(ClientArgs::default(), ClientFile::default())
    }
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = ClientArgs::parse();
        let file = match cli.config {
            Some(ref path) => read_toml(path)?,
            None => ClientFile::default(),
        };
        Self::resolve(cli, file)
    }

    /// Validate the file, then merge CLI args over it.
    pub fn resolve(cli: ClientArgs, file: ClientFile) -> Result<Self, ConfigError> {
        check_transport(&file.connection.transport)?;
        Ok(Self::merge(cli, file))
    }

    fn merge(cli: ClientArgs, file: ClientFile) -> Self {
        ClientConfig {
            server: cli.server.unwrap_or(file.connection.server),
            name: cli.name.unwrap_or(file.client.name),
            ask_name: cli.ask_name || file.client.ask_name,
            default_name_allowed: file.client.default_name_allowed,
            max_rng_value: file.client.max_rng_value.max(1),
            max_retries: cli.max_retries.unwrap_or(file.connection.max_retries),
            retry_delay: Duration::from_millis(
                cli.retry_delay_ms
                    .unwrap_or(file.connection.retry_delay_ms),
            ),
            log_level: cli.log_level.unwrap_or(file.logging.level),
        }
    }
}

fn read_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

fn check_transport(transport: &str) -> Result<(), ConfigError> {
    if transport.eq_ignore_ascii_case(TCP) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedTransport(transport.to_string()))
    }
}

/// Pick the name this client registers under.
///
/// Without prompting, the base name gets a random numeric suffix so several
/// clients can share one config. When prompting, an empty answer falls back
/// to that generated name if allowed, otherwise the prompt repeats.
pub fn resolve_client_name<R: BufRead, W: Write>(
    config: &ClientConfig,
    input: &mut R,
    output: &mut W,
) -> std::io::Result<String> {
    let generated = || {
        let suffix = rand::rng().random_range(0..config.max_rng_value);
        format!("{}{}", config.name, suffix)
    };

    if !config.ask_name {
        return Ok(generated());
    }

    let mut line = String::new();
    loop {
        write!(output, "Enter a client name: ")?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no client name entered",
            ));
        }

        let name = line.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
        if config.default_name_allowed {
            return Ok(generated());
        }
        writeln!(output, "You must enter a client name!")?;
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Unsupported transport '{0}', only tcp is available")]
    UnsupportedTransport(String),
}
