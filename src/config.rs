//! Configuration loading and management
//!
//! The daemon reads one TOML file, `$LAMP_CONFIG` or
//! `~/.config/lamp-daemon/config.toml`. Every key is optional; a missing
//! file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::command::ControlMode;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "LAMP_CONFIG";

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the Unix domain socket for IPC; defaults to `<data_dir>/daemon.sock`
    pub socket_path: Option<PathBuf>,

    /// Directory for runtime data and persisted records
    pub data_dir: PathBuf,

    /// Interval between `update()` calls on the active mode
    pub update_interval_ms: u64,

    pub control: ControlConfig,
    pub serial: SerialConfig,
    pub vision: VisionConfig,
    pub speaker: SpeakerConfig,
    pub schedule: ScheduleConfig,
    pub modes: ModesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control mode used when nothing was persisted
    pub default_mode: ControlMode,
    /// Store control-mode changes in `control.json`
    pub persist: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub enabled: bool,
    pub port: String,
    /// Logged only; line settings are left to the system
    pub baudrate: u32,
    /// Read/write poll timeout in seconds
    pub timeout: f64,
    /// Capacity of the outbound frame queue
    pub queue_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub enabled: bool,
    /// File or FIFO carrying JSON-lines detections
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    pub enabled: bool,
    /// External TTS program, e.g. `espeak -v en`; log-only when unset
    pub command: Option<String>,
    pub queue_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub check_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub pomodoro_work_minutes: u64,
    pub follow_send_interval_ms: u64,
    pub pet_idle_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: None,
            data_dir: default_data_dir(),
            update_interval_ms: 100,
            control: ControlConfig::default(),
            serial: SerialConfig::default(),
            vision: VisionConfig::default(),
            speaker: SpeakerConfig::default(),
            schedule: ScheduleConfig::default(),
            modes: ModesConfig::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            default_mode: ControlMode::All,
            persist: true,
        }
    }
}

impl SerialConfig {
    /// `timeout` as a duration, kept within 10 ms to 60 s
    pub fn poll_interval(&self) -> Duration {
        let secs = if self.timeout.is_finite() {
            self.timeout.clamp(0.01, 60.0)
        } else {
            1.0
        };
        Duration::from_secs_f64(secs)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyAMA0".to_string(),
            baudrate: 115_200,
            timeout: 1.0,
            queue_size: 64,
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source: None,
        }
    }
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            queue_size: 16,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1_000,
        }
    }
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            pomodoro_work_minutes: 25,
            follow_send_interval_ms: 100,
            pet_idle_secs: 10,
        }
    }
}

impl ModesConfig {
    pub fn follow_send_interval(&self) -> Duration {
        Duration::from_millis(self.follow_send_interval_ms)
    }

    pub fn pet_idle(&self) -> Duration {
        Duration::from_secs(self.pet_idle_secs)
    }
}

impl Config {
    /// Load configuration from `$LAMP_CONFIG` or the default location
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".config")
                    .join("lamp-daemon")
                    .join("config.toml")
            }
        };
        Self::load_from(&path)
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let timeout = self.serial.timeout;
        ensure!(
            timeout.is_finite() && timeout > 0.0,
            "serial.timeout must be a positive number of seconds, got {}",
            timeout
        );
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("daemon.sock"))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(10))
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule.check_interval_ms.max(10))
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".local")
        .join("share")
        .join("lamp-daemon")
}
