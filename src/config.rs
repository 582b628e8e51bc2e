//! Configuration loaded from `~/.devmirror/config.json`.
//!
//! Every field has a default, so a partial file only overrides what it names.

use crate::platform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default control daemon port
pub const DEFAULT_DAEMON_PORT: u16 = 9848;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon_port: u16,
    /// Persisted device/alias table (default: `<config_dir>/devices.json`)
    pub alias_file: Option<PathBuf>,
    pub screenshots_dir: Option<PathBuf>,
    /// Where mirroring children write their stdout/stderr
    pub log_dir: Option<PathBuf>,
    /// Upper bound for short tool invocations (listing, key events, captures)
    pub command_timeout_secs: u64,
    pub android: AndroidConfig,
    pub ios: IosConfig,
    pub window: WindowConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_port: DEFAULT_DAEMON_PORT,
            alias_file: None,
            screenshots_dir: None,
            log_dir: None,
            command_timeout_secs: 10,
            android: AndroidConfig::default(),
            ios: IosConfig::default(),
            window: WindowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    pub enabled: bool,
    pub adb: String,
    pub scrcpy: String,
    pub grace_period_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            adb: "adb".to_string(),
            scrcpy: "scrcpy".to_string(),
            grace_period_ms: 3_000,
            stop_timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    pub enabled: bool,
    pub idevice_id: String,
    pub ideviceinfo: String,
    pub idevicescreenshot: String,
    pub ios_video_stream: String,
    pub grace_period_ms: u64,
    pub stop_timeout_ms: u64,
    /// Preferred public stream port
    pub stream_port: u16,
    /// Preferred internal pull-socket port
    pub pull_port: u16,
    /// Record a process-less session when the streamer binary is missing
    pub simulate_without_streamer: bool,
}

impl Default for IosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idevice_id: "idevice_id".to_string(),
            ideviceinfo: "ideviceinfo".to_string(),
            idevicescreenshot: "idevicescreenshot".to_string(),
            ios_video_stream: "ios_video_stream".to_string(),
            grace_period_ms: 5_000,
            stop_timeout_ms: 5_000,
            stream_port: 8000,
            pull_port: 7879,
            simulate_without_streamer: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Process/window name of the local mirroring application
    pub process_name: String,
    /// Keystroke helper (`xdotool`, or `powershell` on Windows)
    pub helper: String,
    /// Pause between activating the window and sending keys
    pub settle_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            process_name: "scrcpy".to_string(),
            helper: if cfg!(windows) { "powershell" } else { "xdotool" }.to_string(),
            settle_ms: 500,
        }
    }
}

impl Config {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn alias_path(&self) -> PathBuf {
        self.alias_file
            .clone()
            .unwrap_or_else(|| platform::config_dir().join("devices.json"))
    }

    pub fn screenshots_path(&self) -> PathBuf {
        self.screenshots_dir
            .clone()
            .unwrap_or_else(platform::default_screenshots_dir)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| platform::config_dir().join("logs"))
    }
}

/// Default config file location
pub fn config_file() -> PathBuf {
    platform::config_dir().join("config.json")
}

/// Load the config at `path`, or `None` when the file does not exist.
///
/// A file that exists but cannot be parsed is reported and replaced by defaults.
pub fn load_config(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_str::<Config>(&data).map_err(|e| e.to_string()))
    {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::warn!("Ignoring unreadable config {}: {}", path.display(), e);
            Some(Config::default())
        }
    }
}

/// Save config to `path`
pub fn save_config(path: &Path, config: &Config) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(config)?;
    fs::write(path, data)
}
