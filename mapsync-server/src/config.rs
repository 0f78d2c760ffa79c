//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via MAPSYNC_CONFIG)
//! 3. Environment variables

use mapsync_protocol::{
    CodecLimits, UnknownPacketPolicy, VersionMatching, VersionPolicy, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_MAX_STRING_LEN, DEFAULT_PORT, MAX_FRAME_SIZE_CEILING, MOD_VERSION,
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::fmt::Hyphenated;

/// Smallest accepted `protocol.max_string_len`.
pub const MIN_STRING_LEN: u16 = 64;

const FRAME_ID_LEN: usize = 2;
const STRING_PREFIX_LEN: usize = 2;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Protocol configuration.
    pub protocol: ProtocolConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        // Start with defaults
        let mut config = Self::default();

        // Load from file if specified
        if let Ok(path) = std::env::var("MAPSYNC_CONFIG") {
            config = Self::from_file(&path)?;
        }

        // Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.protocol.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Idle connection timeout in seconds. Also bounds the wait for the handshake.
    pub idle_timeout_secs: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Capacity of each per-server tile relay channel.
    pub relay_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            idle_timeout_secs: 300,
            max_connections: 1000,
            relay_capacity: 256,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("MAPSYNC_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("MAPSYNC_IDLE_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.idle_timeout_secs = secs;
            }
        }

        if let Ok(max) = std::env::var("MAPSYNC_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "network.idle_timeout_secs must be positive".to_string(),
            ));
        }
        if self.relay_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "network.relay_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Mod version this server speaks.
    pub mod_version: String,
    /// How client versions are matched against `mod_version`.
    pub version_policy: VersionMatching,
    /// Maximum frame length in bytes.
    pub max_frame_size: u32,
    /// Maximum byte length of a single string field.
    pub max_string_len: u16,
    /// What to do with unregistered packet ids after the handshake.
    pub unknown_packets: UnknownPacketPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mod_version: MOD_VERSION.to_string(),
            version_policy: VersionMatching::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_string_len: DEFAULT_MAX_STRING_LEN,
            unknown_packets: UnknownPacketPolicy::default(),
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(version) = std::env::var("MAPSYNC_MOD_VERSION") {
            self.mod_version = version;
        }

        if let Ok(policy) = std::env::var("MAPSYNC_VERSION_POLICY") {
            match policy.to_lowercase().as_str() {
                "exact" => self.version_policy = VersionMatching::Exact,
                "same_minor" | "sameminor" => self.version_policy = VersionMatching::SameMinor,
                other => tracing::warn!("Ignoring unknown MAPSYNC_VERSION_POLICY '{}'", other),
            }
        }

        if let Ok(size) = std::env::var("MAPSYNC_MAX_FRAME_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_frame_size = n;
            }
        }

        if let Ok(len) = std::env::var("MAPSYNC_MAX_STRING_LEN") {
            if let Ok(n) = len.parse() {
                self.max_string_len = n;
            }
        }

        if let Ok(policy) = std::env::var("MAPSYNC_UNKNOWN_PACKETS") {
            match policy.to_lowercase().as_str() {
                "ignore" => self.unknown_packets = UnknownPacketPolicy::Ignore,
                "close" => self.unknown_packets = UnknownPacketPolicy::Close,
                other => tracing::warn!("Ignoring unknown MAPSYNC_UNKNOWN_PACKETS '{}'", other),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mod_version.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "protocol.mod_version must not be empty".to_string(),
            ));
        }
        if self.max_string_len < MIN_STRING_LEN {
            return Err(ConfigError::ValidationError(format!(
                "protocol.max_string_len must be at least {}, got {}",
                MIN_STRING_LEN, self.max_string_len
            )));
        }
        if self.mod_version.len() > self.max_string_len as usize {
            return Err(ConfigError::ValidationError(format!(
                "protocol.mod_version is longer than max_string_len ({} bytes)",
                self.max_string_len
            )));
        }
        let min_frame = self.min_frame_size();
        if self.max_frame_size < min_frame || self.max_frame_size > MAX_FRAME_SIZE_CEILING {
            return Err(ConfigError::ValidationError(format!(
                "protocol.max_frame_size must be between {} and {} bytes, got {}",
                min_frame, MAX_FRAME_SIZE_CEILING, self.max_frame_size
            )));
        }
        Ok(())
    }

    /// Smallest frame limit that still fits every packet the server sends.
    ///
    /// Welcome carries `mod_version` and a hyphenated uuid; Disconnect carries
    /// a reason byte and a message of up to `max_string_len` bytes.
    pub fn min_frame_size(&self) -> u32 {
        let welcome = FRAME_ID_LEN + STRING_PREFIX_LEN + self.mod_version.len()
            + STRING_PREFIX_LEN + Hyphenated::LENGTH;
        let disconnect = FRAME_ID_LEN + 1 + STRING_PREFIX_LEN + self.max_string_len as usize;
        welcome.max(disconnect) as u32
    }

    /// Returns the version policy built around `mod_version`.
    pub fn version_policy(&self) -> VersionPolicy {
        self.version_policy.policy(self.mod_version.clone())
    }

    /// Returns the codec limits.
    pub fn codec_limits(&self) -> CodecLimits {
        CodecLimits::default()
            .with_max_frame_size(self.max_frame_size)
            .with_max_string_len(self.max_string_len)
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("MAPSYNC_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("MAPSYNC_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
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

/// Custom serde module for SocketAddr (to handle as string in YAML).
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
    use mapsync_protocol::{Disconnect, DisconnectReason, Encoder, Welcome};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 12312);
        assert_eq!(config.protocol.mod_version, MOD_VERSION);
        assert_eq!(config.protocol.version_policy, VersionMatching::Exact);
        assert_eq!(config.protocol.unknown_packets, UnknownPacketPolicy::Ignore);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.protocol.max_frame_size, config.protocol.max_frame_size);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:4000\"\nprotocol:\n  version_policy: same_minor\n  unknown_packets: close"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 4000);
        assert_eq!(config.network.idle_timeout_secs, 300);
        assert_eq!(config.protocol.version_policy, VersionMatching::SameMinor);
        assert_eq!(config.protocol.unknown_packets, UnknownPacketPolicy::Close);
        assert_eq!(
            config.protocol.version_policy(),
            VersionPolicy::SameMinor(MOD_VERSION.to_string())
        );
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/mapsync.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(..))));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "network:\n  bind_addr: \"not an address\"").unwrap();

        let result = Config::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(..))));
    }

    #[test]
    fn test_save_and_reload() {
        let file = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.protocol.max_string_len = 256;
        config.save(file.path()).unwrap();

        let reloaded = Config::from_file(file.path()).unwrap();
        assert_eq!(reloaded.protocol.max_string_len, 256);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.protocol.mod_version = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.protocol.max_frame_size = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.max_frame_size = MAX_FRAME_SIZE_CEILING + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.max_string_len = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.max_string_len = MIN_STRING_LEN;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.network.idle_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_limits_too_small_for_replies() {
        // A session id alone is 36 bytes
        let mut config = Config::default();
        config.protocol.max_string_len = 16;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(ref msg)) if msg.contains("max_string_len")
        ));

        let mut config = Config::default();
        config.protocol.max_frame_size = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(ref msg)) if msg.contains("max_frame_size")
        ));

        let mut config = Config::default();
        config.protocol.max_string_len = 64;
        config.protocol.mod_version = "1".repeat(65);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_min_frame_size_fits_replies() {
        let mut protocol = ProtocolConfig::default();
        protocol.max_string_len = 64;
        // Disconnect: id + reason + prefix + 64 bytes
        assert_eq!(protocol.min_frame_size(), 2 + 1 + 2 + 64);

        let mut config = Config::default();
        config.protocol = protocol.clone();
        config.protocol.max_frame_size = protocol.min_frame_size();
        assert!(config.validate().is_ok());
        config.protocol.max_frame_size -= 1;
        assert!(config.validate().is_err());

        // The smallest valid limits can carry a real Welcome and a maximal Disconnect
        let limits = config.protocol.codec_limits().with_max_frame_size(protocol.min_frame_size());
        let welcome = Welcome::new(MOD_VERSION, uuid::Uuid::new_v4().to_string());
        assert!(Encoder::encode(welcome, &limits).is_ok());
        let goodbye = Disconnect::new(DisconnectReason::ServerShutdown, "x".repeat(64));
        assert!(Encoder::encode(goodbye, &limits).is_ok());
    }

    #[test]
    fn test_codec_limits() {
        let mut config = ProtocolConfig::default();
        config.max_frame_size = 4096;
        config.max_string_len = 64;

        let limits = config.codec_limits();
        assert_eq!(limits.max_frame_size, 4096);
        assert_eq!(limits.max_string_len, 64);
    }
}
