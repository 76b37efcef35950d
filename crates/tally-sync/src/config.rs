//! # Sync Configuration
//!
//! Configuration management for the sync engine and the agent binary.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_REMOTE_URL=https://script.google.com/macros/s/.../exec       │
//! │     TALLY_SYNC_INTERVAL=120                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tally-pos/sync.toml (Linux)                              │
//! │     ~/Library/Application Support/com.tally.pos/sync.toml (macOS)      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no remote, 60s interval, auto-generated device id                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Counter 1"
//!
//! [remote]
//! url = "https://script.google.com/macros/s/AKfy.../exec"
//! timeout_secs = 30
//!
//! [sync]
//! enabled = true
//! interval_secs = 60
//!
//! [database]
//! path = "/var/lib/tally/tally.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

const CONFIG_FILE_NAME: &str = "sync.toml";
const DATABASE_FILE_NAME: &str = "tally.db";

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated if not provided; `load_or_init` writes it back.
    #[serde(default = "generate_device_id")]
    pub id: String,

    /// Human-readable device name (e.g., "Counter 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Counter".to_string()
}

fn generate_device_id() -> String {
    Uuid::new_v4().to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: generate_device_id(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the spreadsheet web app lives and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Web-app endpoint. Sync cannot start without it.
    #[serde(default)]
    pub url: Option<String>,

    /// Whole-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,

    /// TCP/TLS connect timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: None,
            timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl RemoteSettings {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Run the periodic sync loop. Manual triggers work either way.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between periodic syncs (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            interval_secs: default_interval(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Location of the local Record Store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Device-specific configuration.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Remote endpoint.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Sync behavior settings.
    #[serde(default)]
    pub sync: SyncSettings,

    /// Local store location.
    #[serde(default)]
    pub database: DatabaseSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration like `load`, first writing the file when it is
    /// missing or has no `device.id`. The generated id then stays the same
    /// across restarts. Rewriting drops comments from the file.
    pub fn load_or_init(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let Some(path) = config_path.or_else(Self::default_config_path) else {
            return Self::load(None);
        };

        let to_write = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let raw: toml::Table = toml::from_str(&contents)?;
            let has_id = raw
                .get("device")
                .and_then(|device| device.get("id"))
                .is_some();
            (!has_id)
                .then(|| toml::from_str::<SyncConfig>(&contents))
                .transpose()?
        } else {
            Some(Self::default())
        };

        if let Some(config) = to_write {
            config.save(Some(path.clone()))?;
            info!(?path, device_id = %config.device.id, "Persisted generated device id");
        }

        Self::load(Some(path))
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        if let Some(ref url) = self.remote.url {
            let parsed = Url::parse(url)?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    url
                )));
            }
        }

        if self.remote.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "remote.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.remote.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "remote.connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `TALLY_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("TALLY_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(name) = lookup("TALLY_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Some(url) = lookup("TALLY_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Some(secs) = lookup("TALLY_REMOTE_TIMEOUT") {
            match secs.parse::<u64>() {
                Ok(s) => self.remote.timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring non-numeric TALLY_REMOTE_TIMEOUT"),
            }
        }

        if let Some(secs) = lookup("TALLY_SYNC_INTERVAL") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring non-numeric TALLY_SYNC_INTERVAL"),
            }
        }

        if let Some(flag) = lookup("TALLY_SYNC_ENABLED") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.sync.enabled = true,
                "0" | "false" | "no" | "off" => self.sync.enabled = false,
                _ => warn!(value = %flag, "Unknown TALLY_SYNC_ENABLED value"),
            }
        }

        if let Some(path) = lookup("TALLY_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "tally", "pos")
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Returns the remote URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.url.as_deref()
    }

    /// Periodic sync interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    /// Resolves the SQLite file: configured path, else the platform data
    /// directory, else the working directory.
    pub fn database_path(&self) -> PathBuf {
        if let Some(ref path) = self.database.path {
            return path.clone();
        }
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().join(DATABASE_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
    }
}
