//! iOS devices through libimobiledevice and `ios_video_stream`.
//!
//! The streamer publishes the screen on a local HTTP port and pulls frames
//! from an internal socket, so every session needs two free ports. There is
//! no input-injection tool in this toolchain: key actions are refused.

use super::{
    screenshot_file_name, ActionOutcome, DeviceAction, DeviceInfo, DevicePlatform, Launcher,
    MirrorOptions, MirrorTimings, Platform, StreamPorts, ToolStatus, UNKNOWN,
};
use crate::config::IosConfig;
use crate::error::{MirrorError, Result};
use crate::platform;
use crate::process;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// UDIDs are 25 or 40 characters; anything this short is noise.
const MIN_UDID_LEN: usize = 10;

pub struct IosPlatform {
    config: IosConfig,
    timings: MirrorTimings,
    command_timeout: Duration,
    screenshots_dir: PathBuf,
}

impl IosPlatform {
    pub fn new(config: &IosConfig, command_timeout: Duration, screenshots_dir: PathBuf) -> Self {
        Self {
            timings: MirrorTimings {
                grace_period: Duration::from_millis(config.grace_period_ms),
                stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            },
            config: config.clone(),
            command_timeout,
            screenshots_dir,
        }
    }

    async fn screenshot(&self, device_id: &str, requested: Option<&str>) -> Result<ActionOutcome> {
        std::fs::create_dir_all(&self.screenshots_dir).map_err(|e| MirrorError::ToolFailed {
            program: "screenshot".to_string(),
            code: None,
            stderr: format!("cannot create {}: {}", self.screenshots_dir.display(), e),
        })?;

        let local = self.screenshots_dir.join(screenshot_file_name(requested, || {
            format!(
                "ios_{}_{}.png",
                platform::file_safe(platform::id_suffix(device_id, 4)),
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )
        }));
        let local_arg = local.display().to_string();

        let tool = &self.config.idevicescreenshot;
        process::run(tool, ["-u", device_id, local_arg.as_str()], self.command_timeout)
            .await?
            .require_success(tool)?;

        info!(device_id, path = %local.display(), "Screenshot saved");
        Ok(ActionOutcome {
            message: format!("Screenshot saved to {}", local.display()),
            artifact: Some(local),
        })
    }
}

/// UDIDs from `idevice_id -l`, one per line.
pub fn parse_idevice_id(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.len() > MIN_UDID_LEN)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Build device info from `ideviceinfo` "Key: Value" output.
pub fn parse_ideviceinfo(device_id: &str, output: &str) -> DeviceInfo {
    let props: HashMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(_, v)| !v.is_empty())
        .collect();

    DeviceInfo {
        id: device_id.to_string(),
        platform: Platform::Ios,
        name: props
            .get("DeviceName")
            .map(|s| s.to_string())
            .unwrap_or_else(|| fallback_name(device_id)),
        model: props.get("ProductType").unwrap_or(&UNKNOWN).to_string(),
        os_version: props.get("ProductVersion").unwrap_or(&UNKNOWN).to_string(),
    }
}

fn fallback_name(device_id: &str) -> String {
    format!("iPhone {}", platform::id_suffix(device_id, 4))
}

#[async_trait]
impl DevicePlatform for IosPlatform {
    fn platform(&self) -> Platform {
        Platform::Ios
    }

    async fn list_connected(&self) -> Result<Vec<String>> {
        let tool = &self.config.idevice_id;
        let out = process::run(tool, ["-l"], self.command_timeout)
            .await?
            .require_success(tool)?;
        Ok(parse_idevice_id(&out.stdout))
    }

    async fn device_info(&self, device_id: &str) -> DeviceInfo {
        let tool = &self.config.ideviceinfo;
        let result = process::run(tool, ["-u", device_id], self.command_timeout)
            .await
            .and_then(|out| out.require_success(tool));
        match result {
            Ok(out) => parse_ideviceinfo(device_id, &out.stdout),
            Err(e) => {
                warn!(device_id, "Property query failed: {}", e);
                parse_ideviceinfo(device_id, "")
            }
        }
    }

    fn mirror_launcher(&self) -> Result<Launcher> {
        match platform::resolve_tool(&self.config.ios_video_stream) {
            Some(path) => Ok(Launcher::Binary(path)),
            None if self.config.simulate_without_streamer => {
                warn!(
                    tool = %self.config.ios_video_stream,
                    "Streamer not found, sessions will be simulated"
                );
                Ok(Launcher::Simulated)
            }
            None => Err(MirrorError::ToolNotFound(
                self.config.ios_video_stream.clone(),
            )),
        }
    }

    fn stream_ports(&self, options: &MirrorOptions) -> Option<StreamPorts> {
        Some(StreamPorts {
            stream: options.port.unwrap_or(self.config.stream_port),
            pull: self.config.pull_port,
        })
    }

    fn mirror_args(
        &self,
        device_id: &str,
        options: &MirrorOptions,
        ports: Option<&StreamPorts>,
    ) -> Vec<String> {
        let ports = ports.copied().unwrap_or(StreamPorts {
            stream: self.config.stream_port,
            pull: self.config.pull_port,
        });
        let mut args = vec![
            "-udid".to_string(),
            device_id.to_string(),
            "-port".to_string(),
            ports.stream.to_string(),
            "-pullSpec".to_string(),
            format!("tcp://127.0.0.1:{}", ports.pull),
        ];
        if let Some(interface) = options.interface.as_deref().filter(|i| *i != "none") {
            args.push("-interface".to_string());
            args.push(interface.to_string());
        }
        if options.stream {
            args.push("-stream".to_string());
        }
        if options.verbose {
            args.push("-v".to_string());
        }
        args
    }

    fn timings(&self) -> MirrorTimings {
        self.timings
    }

    /// libimobiledevice is required; the streamer only when sessions cannot
    /// fall back to simulation.
    fn check_dependencies(&self) -> Vec<ToolStatus> {
        vec![
            ToolStatus::resolve(&self.config.idevice_id, false),
            ToolStatus::resolve(&self.config.ideviceinfo, false),
            ToolStatus::resolve(&self.config.idevicescreenshot, false),
            ToolStatus::resolve(
                &self.config.ios_video_stream,
                self.config.simulate_without_streamer,
            ),
        ]
    }

    async fn perform(&self, device_id: &str, action: &DeviceAction) -> Result<ActionOutcome> {
        match action {
            DeviceAction::Screenshot(name) => self.screenshot(device_id, name.as_deref()).await,
            other => Err(MirrorError::UnsupportedAction(format!("{} on ios", other))),
        }
    }
}
