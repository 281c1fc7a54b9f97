//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SOFABOLT_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use sofabolt_conn::writer::default_max_pending;
use sofabolt_protocol::DEFAULT_PORT;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::server::ServerConfig;

/// File-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: NetworkConfig,
    pub timeouts: TimeoutConfig,
    pub shutdown: ShutdownConfig,
    /// Settings of the bundled echo server.
    pub echo: EchoConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SOFABOLT_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::ParseError(_, msg) => ConfigError::ParseError(path.to_path_buf(), msg),
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `SOFABOLT_*` overrides looked up through `lookup`.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(addr) = parse("SOFABOLT_BIND_ADDR").and_then(|v| v.parse().ok()) {
            self.server.bind_addr = addr;
        }
        if let Some(n) = parse("SOFABOLT_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.server.max_connections = n;
        }
        if let Some(v) = parse("SOFABOLT_ASYNC_DISPATCH") {
            self.server.async_dispatch = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(n) = parse("SOFABOLT_MAX_PENDING_COMMANDS").and_then(|v| v.parse().ok()) {
            self.server.max_pending_commands = n;
        }
        set_parsed(&mut self.timeouts.read_timeout_ms, parse("SOFABOLT_READ_TIMEOUT_MS"));
        set_parsed(&mut self.timeouts.idle_timeout_ms, parse("SOFABOLT_IDLE_TIMEOUT_MS"));
        set_parsed(&mut self.timeouts.write_timeout_ms, parse("SOFABOLT_WRITE_TIMEOUT_MS"));
        set_parsed(
            &mut self.timeouts.flush_interval_ms,
            parse("SOFABOLT_FLUSH_INTERVAL_MS"),
        );
        set_parsed(&mut self.echo.delay_ms, parse("SOFABOLT_ECHO_DELAY_MS"));
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.server.max_pending_commands == 0 {
            return Err(ConfigError::ValidationError(
                "max_pending_commands must be positive".to_string(),
            ));
        }
        if self.shutdown.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "shutdown poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Converts to the runtime server configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.server.bind_addr,
            max_connections: self.server.max_connections,
            read_timeout: Duration::from_millis(self.timeouts.read_timeout_ms),
            write_timeout: Duration::from_millis(self.timeouts.write_timeout_ms),
            idle_timeout: Duration::from_millis(self.timeouts.idle_timeout_ms),
            flush_interval: Duration::from_millis(self.timeouts.flush_interval_ms),
            max_pending_commands: self.server.max_pending_commands,
            async_dispatch: self.server.async_dispatch,
            shutdown_poll_interval: Duration::from_millis(self.shutdown.poll_interval_ms),
            shutdown_idle_threshold: Duration::from_millis(self.shutdown.idle_threshold_ms),
            ..ServerConfig::default()
        }
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, value: Option<String>) {
    if let Some(v) = value.and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

/// Listener and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Run each request on its own task instead of inline on the read loop.
    pub async_dispatch: bool,
    /// Concurrent async handlers per connection, and writer queue depth.
    pub max_pending_commands: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_connections: 10240,
            async_dispatch: false,
            max_pending_commands: default_max_pending(),
        }
    }
}

/// Connection timeouts in milliseconds. Zero disables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub flush_interval_ms: u64,
}

/// Graceful shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub poll_interval_ms: u64,
    pub idle_threshold_ms: u64,
    /// Connections still open after this are closed forcibly.
    pub deadline_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            idle_threshold_ms: 5000,
            deadline_ms: 30_000,
        }
    }
}

impl ShutdownConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Delay before each echo reply.
    pub delay_ms: u64,
}

impl EchoConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.bind_addr.port(), 12200);
        assert_eq!(config.server.max_connections, 10240);
        assert!(!config.server.async_dispatch);
        assert_eq!(config.shutdown.poll_interval_ms, 500);
        assert!(config.validate().is_ok());

        let runtime = config.server_config();
        assert_eq!(runtime.shutdown_idle_threshold, Duration::from_secs(5));
        assert_eq!(runtime.read_timeout, Duration::ZERO);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  bind_addr: \"0.0.0.0:12345\"\n  async_dispatch: true\ntimeouts:\n  read_timeout_ms: 1500\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr.port(), 12345);
        assert!(config.server.async_dispatch);
        assert_eq!(config.timeouts.read_timeout_ms, 1500);
        // untouched sections keep their defaults
        assert_eq!(config.server.max_connections, 10240);
        assert_eq!(config.shutdown.idle_threshold_ms, 5000);
        assert_eq!(
            config.server_config().read_timeout,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  bind_addr: \"not an address\"").unwrap();
        match Config::from_file(file.path()) {
            Err(ConfigError::ParseError(path, _)) => assert_eq!(path, file.path()),
            other => panic!("unexpected {:?}", other),
        }

        let missing = Config::from_file("/nonexistent/sofabolt.yaml");
        assert!(matches!(missing, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SOFABOLT_BIND_ADDR", "127.0.0.1:9000"),
            ("SOFABOLT_ASYNC_DISPATCH", "TRUE"),
            ("SOFABOLT_IDLE_TIMEOUT_MS", "250"),
            ("SOFABOLT_MAX_CONNECTIONS", "garbage"),
            ("SOFABOLT_ECHO_DELAY_MS", "20"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert!(config.server.async_dispatch);
        assert_eq!(config.timeouts.idle_timeout_ms, 250);
        assert_eq!(config.server.max_connections, 10240);
        assert_eq!(config.echo.delay(), Duration::from_millis(20));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.server.max_pending_commands = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.server.bind_addr, config.server.bind_addr);
    }
}
