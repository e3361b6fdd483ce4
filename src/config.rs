//! Configuration loading for hiernet.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::audit::DEFAULT_AUDIT_CAPACITY;
use crate::error::Error;
use crate::protocol::{Message, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};

pub type Result<T> = std::result::Result<T, Error>;

/// Get the hiernet home directory (~/.hiernet).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".hiernet"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.hiernet/settings.json
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load settings from an explicit file.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

/// Write settings as pretty JSON, creating parent directories.
pub fn save_settings_to(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

fn validate_settings(settings: &Settings) -> Result<()> {
    let timeout = settings.protocol.default_timeout_seconds;
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err(Error::Config(format!(
            "protocol.default_timeout_seconds must be positive, got {}",
            timeout
        )));
    }
    if settings.router.audit_log_capacity == 0 {
        return Err(Error::Config(
            "router.audit_log_capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Defaults applied to outgoing requests.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProtocolSettings {
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: f64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ProtocolSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_timeout_seconds).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Apply the configured timeout and retry budget to a message.
    pub fn apply(&self, message: Message) -> Message {
        message
            .with_timeout(self.default_timeout())
            .with_max_retries(self.default_max_retries)
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_timeout_seconds(),
            default_max_retries: default_max_retries(),
        }
    }
}

/// Router configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RouterSettings {
    #[serde(default = "default_audit_log_capacity")]
    pub audit_log_capacity: usize,
    /// Pause between scheduler passes over the priority queues.
    #[serde(default = "default_scheduler_idle_ms")]
    pub scheduler_idle_ms: u64,
}

fn default_audit_log_capacity() -> usize {
    DEFAULT_AUDIT_CAPACITY
}

fn default_scheduler_idle_ms() -> u64 {
    10
}

impl RouterSettings {
    pub fn scheduler_idle(&self) -> Duration {
        Duration::from_millis(self.scheduler_idle_ms)
    }
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            audit_log_capacity: default_audit_log_capacity(),
            scheduler_idle_ms: default_scheduler_idle_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LoggingSettings {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
}

/// hiernet settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub protocol: ProtocolSettings,

    #[serde(default)]
    pub router: RouterSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}
