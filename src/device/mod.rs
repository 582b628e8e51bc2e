//! Platform toolchains.
//!
//! Android and iOS are reached through structurally different command-line
//! tools. Each is wrapped in a [`DevicePlatform`] so the registry and the
//! session manager can treat them uniformly: the platform describes *how* to
//! list devices, launch a mirror and press keys, while the session manager
//! owns the lifecycle of whatever it launches.

pub mod action;
pub mod android;
#[cfg(test)]
pub(crate) mod fake;
pub mod ios;

pub use action::{screenshot_file_name, ActionOutcome, DeviceAction, DisplayPower, KeyAction};
pub use android::AndroidPlatform;
pub use ios::IosPlatform;

use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder used when a device property cannot be read.
pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Android => write!(f, "android"),
            Platform::Ios => write!(f, "ios"),
        }
    }
}

/// Properties reported by the platform tools for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    pub platform: Platform,
    pub name: String,
    pub model: String,
    pub os_version: String,
}

/// Options for starting a mirror, as sent by callers.
///
/// Each platform translates the subset it understands into command-line
/// flags and ignores the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MirrorOptions {
    pub no_audio: bool,
    pub stay_awake: bool,
    pub show_touches: bool,
    pub turn_screen_off: bool,
    pub fullscreen: bool,
    pub always_on_top: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<String>,
    /// Record the mirrored stream to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<PathBuf>,
    /// Preferred public stream port (network-stream platforms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub stream: bool,
    pub verbose: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            no_audio: true,
            stay_awake: true,
            show_touches: false,
            turn_screen_off: false,
            fullscreen: false,
            always_on_top: false,
            max_size: None,
            max_fps: None,
            bit_rate: None,
            record: None,
            port: None,
            interface: None,
            stream: true,
            verbose: false,
        }
    }
}

/// Ports a network-stream mirror binds: the public stream and the internal
/// pull socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPorts {
    pub stream: u16,
    pub pull: u16,
}

/// Whether one external tool a platform relies on can be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// The platform keeps working, in reduced form, without it.
    pub optional: bool,
}

impl ToolStatus {
    pub fn resolve(tool: &str, optional: bool) -> Self {
        Self {
            tool: tool.to_string(),
            path: crate::platform::resolve_tool(tool),
            optional,
        }
    }

    pub fn found(&self) -> bool {
        self.path.is_some()
    }
}

/// What the session manager should launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launcher {
    Binary(PathBuf),
    /// The launcher binary is missing and the platform accepts a
    /// process-less session in its place.
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorTimings {
    /// How long a fresh child must survive before the start counts
    pub grace_period: Duration,
    /// How long a stopping child gets before it is killed
    pub stop_timeout: Duration,
}

/// Capability set of one device platform.
#[async_trait]
pub trait DevicePlatform: Send + Sync {
    fn platform(&self) -> Platform;

    /// Devices the platform tool reports as fully online.
    async fn list_connected(&self) -> Result<Vec<String>>;

    /// Device properties; never fails, missing values become placeholders.
    async fn device_info(&self, device_id: &str) -> DeviceInfo;

    fn mirror_launcher(&self) -> Result<Launcher>;

    /// Preferred ports when the mirror exposes a network stream.
    fn stream_ports(&self, options: &MirrorOptions) -> Option<StreamPorts>;

    fn mirror_args(
        &self,
        device_id: &str,
        options: &MirrorOptions,
        ports: Option<&StreamPorts>,
    ) -> Vec<String>;

    fn timings(&self) -> MirrorTimings;

    /// Which of the platform's external tools resolve right now.
    fn check_dependencies(&self) -> Vec<ToolStatus>;

    /// Session-independent actions, sent straight to the device.
    async fn perform(&self, device_id: &str, action: &DeviceAction) -> Result<ActionOutcome>;

    /// Flip the device display from inside the mirroring window.
    async fn toggle_mirror_display(&self, device_id: &str, power: DisplayPower) -> Result<()> {
        let _ = (device_id, power);
        Err(MirrorError::UnsupportedAction(format!(
            "mirror display toggle on {}",
            self.platform()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_quiet_and_awake() {
        let opts: MirrorOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.no_audio);
        assert!(opts.stay_awake);
        assert!(opts.stream);
        assert!(!opts.show_touches);
        assert!(!opts.fullscreen);
        assert!(!opts.always_on_top);
    }

    #[test]
    fn options_accept_camel_case_map() {
        let opts: MirrorOptions =
            serde_json::from_str(r#"{"noAudio": false, "maxSize": 1024, "port": 8100, "alwaysOnTop": true}"#)
                .unwrap();
        assert!(!opts.no_audio);
        assert!(opts.always_on_top);
        assert_eq!(opts.max_size, Some(1024));
        assert_eq!(opts.port, Some(8100));
    }

    #[test]
    fn platform_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Platform::Ios).unwrap(), "\"ios\"");
        assert_eq!(Platform::Android.to_string(), "android");
    }

    #[test]
    fn tool_status_reports_resolution() {
        let sh = ToolStatus::resolve("sh", false);
        assert!(sh.found() || cfg!(windows));

        let missing = ToolStatus::resolve("devmirror-no-such-tool", true);
        assert!(!missing.found());
        assert!(missing.optional);
        let json = serde_json::to_value(&missing).unwrap();
        assert!(json.get("path").is_none());
    }
}
