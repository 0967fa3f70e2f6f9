//! Configuration structures for packetlog

use crate::{PacketLogError, Result};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;

/// Largest accepted `server.chunk_size`
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Largest accepted `timestamp.interval_secs` (one day)
pub const MAX_TIMESTAMP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener and worker settings
    pub server: ServerSettings,
    /// Log file configuration
    pub storage: StorageSettings,
    /// Packet framing configuration
    pub framing: FramingSettings,
    /// Periodic timestamp record configuration
    pub timestamp: TimestampSettings,
    /// Shutdown and failure policy
    pub shutdown: ShutdownSettings,
    /// Diagnostic logging configuration
    pub logging: LoggingSettings,
}

/// Core server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to
    pub bind_address: String,
    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Maximum concurrent client workers
    pub max_connections: usize,
    /// Listen backlog passed to the kernel
    pub backlog: i32,
    /// Upper bound on the bytes taken from the socket per receive
    pub chunk_size: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Path of the shared append-only log file
    pub data_file: PathBuf,
    /// Delete the log file once the server has shut down
    pub remove_on_shutdown: bool,
    /// Call `fdatasync` after every append
    pub sync_writes: bool,
}

/// Packet framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingSettings {
    /// Keep bytes received after a newline as the start of the next packet.
    /// When false they are discarded, matching older clients' expectations.
    pub preserve_remainder: bool,
    /// Largest packet accepted before the connection is dropped
    pub max_packet_bytes: usize,
}

/// Timestamp record configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampSettings {
    /// Enable the timestamp writer
    pub enabled: bool,
    /// Seconds between timestamp records
    pub interval_secs: u64,
    /// `chrono` strftime pattern for the record
    pub format: String,
}

/// Shutdown configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Seconds to wait for workers to finish after cancellation
    pub drain_timeout_secs: u64,
    /// Stop the service when the log file cannot be written or read.
    /// When false only the affected connection is dropped.
    pub fatal_storage_errors: bool,
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Output format (pretty, json)
    pub format: String,
    /// Also send events to the systemd journal
    pub journald: bool,
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address to connect to
    pub address: String,
    /// Connect and echo timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            max_connections: 128,
            backlog: 128,
            chunk_size: 512,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("/var/tmp/aesdsocketdata"),
            remove_on_shutdown: true,
            sync_writes: false,
        }
    }
}

impl Default for FramingSettings {
    fn default() -> Self {
        Self {
            preserve_remainder: true,
            max_packet_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Default for TimestampSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            format: "%a, %d %b %Y %H:%M:%S %z".to_string(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
            fatal_storage_errors: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "packetlog=info,warn".to_string(),
            format: "pretty".to_string(),
            journald: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9000".to_string(),
            timeout_seconds: 5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PacketLogError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Address the listener binds to, as `host:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.is_empty() {
            return Err(PacketLogError::Config("Bind address cannot be empty".to_string()));
        }
        if self.server.max_connections == 0 || self.server.max_connections > Semaphore::MAX_PERMITS {
            return Err(PacketLogError::Config(format!(
                "max_connections must be between 1 and {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.server.chunk_size == 0 || self.server.chunk_size > MAX_CHUNK_SIZE {
            return Err(PacketLogError::Config(format!(
                "chunk_size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }
        if self.storage.data_file.as_os_str().is_empty() {
            return Err(PacketLogError::Config("Data file path cannot be empty".to_string()));
        }
        if self.framing.max_packet_bytes == 0 {
            return Err(PacketLogError::Config(
                "max_packet_bytes must be at least 1".to_string(),
            ));
        }
        if self.timestamp.enabled
            && (self.timestamp.interval_secs == 0
                || self.timestamp.interval_secs > MAX_TIMESTAMP_INTERVAL_SECS)
        {
            return Err(PacketLogError::Config(format!(
                "Timestamp interval must be between 1 and {} seconds",
                MAX_TIMESTAMP_INTERVAL_SECS
            )));
        }
        if StrftimeItems::new(&self.timestamp.format).any(|item| item == Item::Error) {
            return Err(PacketLogError::Config(format!(
                "Invalid timestamp format '{}'",
                self.timestamp.format
            )));
        }
        match self.logging.format.as_str() {
            "pretty" | "json" => Ok(()),
            other => Err(PacketLogError::Config(format!(
                "Unknown logging format '{}'",
                other
            ))),
        }
    }
}

impl ClientConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(PacketLogError::Config("Server address cannot be empty".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(PacketLogError::Config("Timeout must be at least one second".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_address(), "0.0.0.0:9000");
        assert_eq!(config.server.max_connections, 128);
        assert_eq!(config.storage.data_file, PathBuf::from("/var/tmp/aesdsocketdata"));
        assert_eq!(config.timestamp.interval_secs, 10);
        assert!(config.framing.preserve_remainder);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [server]
            port = 9100
            max_connections = 4

            [framing]
            preserve_remainder = false
        "#;

        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_connections, 4);
        assert_eq!(config.server.chunk_size, 512);
        assert!(!config.framing.preserve_remainder);
        assert_eq!(config.framing.max_packet_bytes, 1024 * 1024);
        assert!(config.timestamp.enabled);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(
            &path,
            r#"
                [storage]
                data_file = "/tmp/packets.log"
                remove_on_shutdown = false

                [timestamp]
                interval_secs = 3

                [logging]
                format = "json"
            "#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.storage.data_file, PathBuf::from("/tmp/packets.log"));
        assert!(!config.storage.remove_on_shutdown);
        assert_eq!(config.timestamp.interval_secs, 3);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server]\nmax_connections = 0\n").unwrap();

        match ServerConfig::from_file(&path) {
            Err(PacketLogError::Config(msg)) => assert!(msg.contains("max_connections")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        assert!(matches!(
            ServerConfig::from_file(&path),
            Err(PacketLogError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_file(dir.path().join("missing.toml")),
            Err(PacketLogError::Config(_))
        ));
    }

    #[test]
    fn test_sample_config_parses() {
        let config: ServerConfig = toml::from_str(include_str!("../../config/server.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_address(), "0.0.0.0:9000");
    }

    #[test]
    fn test_validate_rejects_unknown_log_format() {
        let mut config = ServerConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_allowed_when_disabled() {
        let mut config = ServerConfig::default();
        config.timestamp.interval_secs = 0;
        assert!(config.validate().is_err());
        config.timestamp.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_worker_cap() {
        let config: ServerConfig =
            toml::from_str("[server]\nmax_connections = 9000000000000000000\n").unwrap();
        assert!(matches!(config.validate(), Err(PacketLogError::Config(_))));

        let mut config = ServerConfig::default();
        config.server.max_connections = Semaphore::MAX_PERMITS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_huge_timestamp_interval() {
        let config: ServerConfig =
            toml::from_str("[timestamp]\ninterval_secs = 9223372036854775807\n").unwrap();
        assert!(matches!(config.validate(), Err(PacketLogError::Config(_))));

        let mut config = ServerConfig::default();
        config.timestamp.interval_secs = MAX_TIMESTAMP_INTERVAL_SECS;
        assert!(config.validate().is_ok());
        config.timestamp.interval_secs = MAX_TIMESTAMP_INTERVAL_SECS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_chunk() {
        let mut config = ServerConfig::default();
        config.server.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());
        config.server.chunk_size = MAX_CHUNK_SIZE;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_timestamp_format() {
        let mut config = ServerConfig::default();
        config.timestamp.format = "%Q".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_config_validation() {
        assert!(ClientConfig::default().validate().is_ok());
        let config = ClientConfig {
            address: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
