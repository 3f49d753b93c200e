//! Configuration management
//!
//! Config file is a TOML document, `config.toml` in the working directory
//! unless `--config` points elsewhere. Every section is optional; missing
//! keys take their defaults.
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! poll_interval_ms = 100
//! read_timeout_ms = 10
//! strict_length = true
//!
//! [queue]
//! policy = "drop_oldest"
//! capacity = 256
//! ```

use crate::codec::LengthPolicy;
use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_TIMEOUT_MS,
};
use crate::error::{LinkError, Result};
use crate::link::LinkOptions;
use crate::queue::QueuePolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default config file name
pub const CONFIG_FILE: &str = "config.toml";

// =============================================================================
// Application Configuration
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub queue: QueueConfig,
}

// =============================================================================
// Link Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (empty = must be given on the command line)
    pub port: String,
    pub baud_rate: u32,
    /// Write loop wake-up interval when the queue is empty
    pub poll_interval_ms: u64,
    /// Serial read timeout; bounds how fast the read loop sees `close`
    pub read_timeout_ms: u64,
    /// Reject inbound frames whose length byte is not 0x0A
    pub strict_length: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            strict_length: true,
        }
    }
}

// =============================================================================
// Queue Configuration
// =============================================================================

/// What a full outbound queue does with a new frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// No limit, `capacity` is ignored
    #[default]
    Unbounded,
    DropOldest,
    RejectNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub policy: OverflowPolicy,
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            policy: OverflowPolicy::Unbounded,
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueueConfig {
    pub fn to_policy(&self) -> QueuePolicy {
        match self.policy {
            OverflowPolicy::Unbounded => QueuePolicy::Unbounded,
            OverflowPolicy::DropOldest => QueuePolicy::DropOldest {
                capacity: self.capacity,
            },
            OverflowPolicy::RejectNew => QueuePolicy::RejectNew {
                capacity: self.capacity,
            },
        }
    }
}

impl Config {
    /// Check values the session cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.link.baud_rate == 0 {
            return Err(LinkError::ConfigValidation {
                field: "link.baud_rate",
                reason: "must be greater than 0".into(),
            });
        }
        if self.link.poll_interval_ms == 0 {
            return Err(LinkError::ConfigValidation {
                field: "link.poll_interval_ms",
                reason: "must be greater than 0".into(),
            });
        }
        if self.link.read_timeout_ms == 0 {
            return Err(LinkError::ConfigValidation {
                field: "link.read_timeout_ms",
                reason: "must be greater than 0".into(),
            });
        }
        if self.queue.policy != OverflowPolicy::Unbounded && self.queue.capacity == 0 {
            return Err(LinkError::ConfigValidation {
                field: "queue.capacity",
                reason: "bounded queue needs a capacity of at least 1".into(),
            });
        }
        Ok(())
    }

    /// Session options derived from this config
    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            poll_interval: Duration::from_millis(self.link.poll_interval_ms),
            length_policy: if self.link.strict_length {
                LengthPolicy::Strict
            } else {
                LengthPolicy::Ignore
            },
            queue_policy: self.queue.to_policy(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.link.read_timeout_ms)
    }
}

/// Resolve the config path (explicit path or `config.toml` in the cwd)
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
}

/// Read and validate a config file
pub fn read(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| LinkError::ConfigIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: Config = toml::from_str(&content).map_err(|e| LinkError::ConfigParse {
        path: path.to_path_buf(),
        source: Box::new(e),
    })?;
    config.validate()?;
    Ok(config)
}

/// Load config from file, falling back to defaults
///
/// A missing file is normal and silent; unreadable or invalid files are
/// reported with `warn!` and replaced by defaults.
pub fn load(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }

    match read(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}, using defaults", e);
            Config::default()
        }
    }
}

/// Save config to file
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| LinkError::ConfigValidation {
        field: "config",
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| LinkError::ConfigIo {
        path: path.to_path_buf(),
        source: e,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ares-link-{}-{}.toml", name, std::process::id()))
    }

    // =========================================================================
    // Default values tests
    // =========================================================================

    #[test]
    fn test_default_link_config_values() {
        let config = LinkConfig::default();

        assert_eq!(config.port, "");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.read_timeout_ms, 10);
        assert!(config.strict_length);
    }

    #[test]
    fn test_default_queue_config_values() {
        let config = QueueConfig::default();

        assert_eq!(config.policy, OverflowPolicy::Unbounded);
        assert_eq!(config.capacity, 256);
        assert_eq!(config.to_policy(), QueuePolicy::Unbounded);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    // =========================================================================
    // Parsing tests
    // =========================================================================

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[link]\nport = \"COM3\"\n").unwrap();

        assert_eq!(config.link.port, "COM3");
        assert_eq!(config.link.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overflow_policy_toml_names() {
        let config: Config =
            toml::from_str("[queue]\npolicy = \"drop_oldest\"\ncapacity = 8\n").unwrap();
        assert_eq!(
            config.queue.to_policy(),
            QueuePolicy::DropOldest { capacity: 8 }
        );

        let config: Config = toml::from_str("[queue]\npolicy = \"reject_new\"\n").unwrap();
        assert_eq!(
            config.queue.to_policy(),
            QueuePolicy::RejectNew {
                capacity: DEFAULT_QUEUE_CAPACITY
            }
        );
    }

    #[test]
    fn test_unknown_policy_is_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[queue]\npolicy = \"forever\"\n");
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_zero_baud_rate_is_invalid() {
        let mut config = Config::default();
        config.link.baud_rate = 0;
        match config.validate() {
            Err(LinkError::ConfigValidation { field, .. }) => assert_eq!(field, "link.baud_rate"),
            other => panic!("Expected ConfigValidation, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_capacity_only_matters_when_bounded() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_ok());

        config.queue.policy = OverflowPolicy::RejectNew;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_link_options() {
        let mut config = Config::default();
        config.link.poll_interval_ms = 25;
        config.link.strict_length = false;
        config.queue.policy = OverflowPolicy::DropOldest;
        config.queue.capacity = 4;

        let options = config.link_options();
        assert_eq!(options.poll_interval, Duration::from_millis(25));
        assert_eq!(options.length_policy, LengthPolicy::Ignore);
        assert_eq!(options.queue_policy, QueuePolicy::DropOldest { capacity: 4 });
    }

    // =========================================================================
    // File tests
    // =========================================================================

    #[test]
    fn test_save_then_read() {
        let path = temp_path("save");
        let mut config = Config::default();
        config.link.port = "/dev/ttyACM0".into();
        config.queue.policy = OverflowPolicy::RejectNew;

        save(&config, &path).unwrap();
        let loaded = read(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = load(Path::new("/nonexistent/ares-link/config.toml"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file_gives_defaults() {
        let path = temp_path("invalid");
        fs::write(&path, "[link]\nbaud_rate = \"fast\"\n").unwrap();

        assert!(matches!(read(&path), Err(LinkError::ConfigParse { .. })));
        assert_eq!(load(&path), Config::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_config_path() {
        assert_eq!(config_path(None), PathBuf::from("config.toml"));
        assert_eq!(
            config_path(Some(Path::new("/etc/ares.toml"))),
            PathBuf::from("/etc/ares.toml")
        );
    }
}
