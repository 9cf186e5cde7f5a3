//! # Sync Configuration
//!
//! `SyncConfig` is resolved once in `main` and passed down by value. No
//! component reads the environment after startup.
//!
//! ```text
//! defaults ──► stockbridge.toml ──► STOCKBRIDGE_* variables ──► validate()
//!              (--config, or the      (each one replaces a
//!               platform config dir)   single field)
//! ```
//!
//! ## File Layout
//! ```toml
//! [instance]
//! role = "local"           # local | cloud
//! name = "downtown"
//!
//! [remote]
//! url = "https://cloud.example.com"
//! shared_secret = "change-me"
//! timeout_secs = 30
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8765
//! admin_token = "admin-secret"
//!
//! [schedule]
//! interval_secs = 300
//!
//! [storage]
//! database_path = "/var/lib/stockbridge/store.db"
//! checkpoint_dir = "/var/lib/stockbridge/checkpoints"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Instance Role
// =============================================================================

/// Which side of the pair this process is.
///
/// ```text
/// LOCAL  ── push sales/returns/stock ──►  CLOUD
/// LOCAL  ◄── pull master data ─────────   CLOUD
/// ```
///
/// The local instance owns stock. The cloud instance owns catalog and prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    #[default]
    Local,
    Cloud,
}

impl InstanceRole {
    pub fn is_local(&self) -> bool {
        matches!(self, InstanceRole::Local)
    }
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceRole::Local => write!(f, "local"),
            InstanceRole::Cloud => write!(f, "cloud"),
        }
    }
}

impl std::str::FromStr for InstanceRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("local") || s.eq_ignore_ascii_case("store") {
            Ok(InstanceRole::Local)
        } else if s.eq_ignore_ascii_case("cloud") || s.eq_ignore_ascii_case("remote") {
            Ok(InstanceRole::Cloud)
        } else {
            Err(SyncError::InvalidConfig(format!("instance role '{s}' (expected local or cloud)")))
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    #[serde(default)]
    pub role: InstanceRole,

    /// Stamped as `origin_system` on every pushed record.
    #[serde(default = "default_instance_name")]
    pub name: String,
}

fn default_instance_name() -> String {
    "store".to_string()
}

impl Default for InstanceSettings {
    fn default() -> Self {
        InstanceSettings {
            role: InstanceRole::default(),
            name: default_instance_name(),
        }
    }
}

/// The other instance of the pair.
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL, e.g. `https://cloud.example.com`.
    #[serde(default)]
    pub url: Option<String>,

    /// Sent as `Authorization: SyncToken <secret>`, and expected from callers.
    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            url: None,
            shared_secret: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("url", &self.url)
            .field("shared_secret", &redacted(&self.shared_secret))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// HTTP server settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token accepted by `POST /sync/trigger`.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            admin_token: None,
        }
    }
}

impl ServerSettings {
    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl std::fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSettings")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("admin_token", &redacted(&self.admin_token))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Seconds between two cycles in `watch` mode.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_interval() -> u64 {
    300
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        ScheduleSettings {
            interval_secs: default_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Holds `last_push` and `last_pull`.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "stockbridge", "stockbridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn default_database_path() -> PathBuf {
    data_dir().join("stockbridge.db")
}

fn default_checkpoint_dir() -> PathBuf {
    data_dir().join("checkpoints")
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: default_database_path(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// =============================================================================
// SyncConfig
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub instance: InstanceSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the configuration for this process.
    ///
    /// A missing file is not an error; a file that does not parse is.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.is_file() => Self::from_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "No config file, starting from defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &std::path::Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&raw)?;
        info!(path = %path.display(), role = %config.instance.role, "Config file read");
        Ok(config)
    }

    /// Rejects settings no cycle could run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.instance.name.trim().is_empty() {
            return Err(SyncError::InvalidConfig("instance.name must not be empty".into()));
        }

        if let Some(ref raw) = self.remote.url {
            let url = url::Url::parse(raw)?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!("{raw}: expected http or https")));
            }
        }

        if self.remote.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig("timeout_secs must be greater than 0".into()));
        }

        if self.schedule.interval_secs == 0 {
            return Err(SyncError::InvalidConfig("interval_secs must be greater than 0".into()));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a key lookup (the process environment in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(role) = lookup("STOCKBRIDGE_ROLE") {
            match role.parse() {
                Ok(parsed) => {
                    debug!(role = %role, "Overriding instance role from environment");
                    self.instance.role = parsed;
                }
                Err(_) => warn!(role = %role, "Unknown instance role in environment"),
            }
        }

        if let Some(name) = lookup("STOCKBRIDGE_INSTANCE_NAME") {
            self.instance.name = name;
        }

        if let Some(url) = lookup("STOCKBRIDGE_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.url = Some(url);
        }

        if let Some(token) = lookup("STOCKBRIDGE_SYNC_TOKEN") {
            self.remote.shared_secret = Some(token);
        }

        if let Some(token) = lookup("STOCKBRIDGE_ADMIN_TOKEN") {
            self.server.admin_token = Some(token);
        }

        if let Some(dir) = lookup("STOCKBRIDGE_CHECKPOINT_DIR") {
            self.storage.checkpoint_dir = PathBuf::from(dir);
        }

        if let Some(path) = lookup("STOCKBRIDGE_DB_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup("STOCKBRIDGE_BIND_ADDR") {
            self.server.bind_addr = addr;
        }

        if let Some(port) = lookup("STOCKBRIDGE_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding server port from environment");
                self.server.port = p;
            }
        }

        if let Some(secs) = lookup("STOCKBRIDGE_SYNC_INTERVAL_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.schedule.interval_secs = s;
            }
        }

        if let Some(secs) = lookup("STOCKBRIDGE_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.remote.timeout_secs = s;
            }
        }
    }

    /// `stockbridge.toml` in the platform config directory.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockbridge", "stockbridge")
            .map(|dirs| dirs.config_dir().join("stockbridge.toml"))
    }

    pub fn role(&self) -> InstanceRole {
        self.instance.role
    }

    pub fn instance_name(&self) -> &str {
        &self.instance.name
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote.url.as_deref()
    }

    pub fn shared_secret(&self) -> Option<&str> {
        self.remote.shared_secret.as_deref()
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.server.admin_token.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs)
    }

    /// True when both the remote URL and the shared secret are set.
    pub fn is_cloud_configured(&self) -> bool {
        self.remote.url.is_some() && self.remote.shared_secret.is_some()
    }
}
