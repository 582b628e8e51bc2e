//! Scriptable platform for tests.
//!
//! Mirrors are `sh -c <script>`, so a test picks whether the child lives,
//! dies during the grace period, or ignores SIGTERM.

use super::{
    ActionOutcome, DeviceAction, DeviceInfo, DevicePlatform, DisplayPower, Launcher, MirrorOptions,
    MirrorTimings, Platform, StreamPorts, ToolStatus,
};
use crate::error::{MirrorError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const LIVE: &str = "exec sleep 30";

pub struct FakePlatform {
    platform: Platform,
    connected: Mutex<Vec<String>>,
    script: Mutex<String>,
    launcher: Mutex<Launcher>,
    ports: Option<StreamPorts>,
    grace_period: Duration,
    pub launches: AtomicUsize,
    pub performed: Mutex<Vec<String>>,
    pub toggles: Mutex<Vec<(String, DisplayPower)>>,
    window_present: bool,
}

impl FakePlatform {
    pub fn new(platform: Platform, connected: &[&str]) -> Self {
        Self {
            platform,
            connected: Mutex::new(connected.iter().map(|s| s.to_string()).collect()),
            script: Mutex::new(LIVE.to_string()),
            launcher: Mutex::new(Launcher::Binary(PathBuf::from("/bin/sh"))),
            ports: None,
            grace_period: Duration::from_millis(200),
            launches: AtomicUsize::new(0),
            performed: Mutex::new(Vec::new()),
            toggles: Mutex::new(Vec::new()),
            window_present: true,
        }
    }

    pub fn with_ports(mut self, ports: StreamPorts) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn without_window(mut self) -> Self {
        self.window_present = false;
        self
    }

    pub fn set_script(&self, script: &str) {
        *self.script.lock().unwrap() = script.to_string();
    }

    pub fn set_launcher(&self, launcher: Launcher) {
        *self.launcher.lock().unwrap() = launcher;
    }

    pub fn set_connected(&self, ids: &[&str]) {
        *self.connected.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DevicePlatform for FakePlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_connected(&self) -> Result<Vec<String>> {
        Ok(self.connected.lock().unwrap().clone())
    }

    async fn device_info(&self, device_id: &str) -> DeviceInfo {
        DeviceInfo {
            id: device_id.to_string(),
            platform: self.platform,
            name: format!("Fake {}", device_id),
            model: "FK-1".to_string(),
            os_version: "1.0".to_string(),
        }
    }

    fn mirror_launcher(&self) -> Result<Launcher> {
        Ok(self.launcher.lock().unwrap().clone())
    }

    fn stream_ports(&self, options: &MirrorOptions) -> Option<StreamPorts> {
        self.ports.map(|p| StreamPorts {
            stream: options.port.unwrap_or(p.stream),
            pull: p.pull,
        })
    }

    fn mirror_args(
        &self,
        _device_id: &str,
        _options: &MirrorOptions,
        _ports: Option<&StreamPorts>,
    ) -> Vec<String> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        vec!["-c".to_string(), self.script.lock().unwrap().clone()]
    }

    fn timings(&self) -> MirrorTimings {
        MirrorTimings {
            grace_period: self.grace_period,
            stop_timeout: Duration::from_millis(500),
        }
    }

    fn check_dependencies(&self) -> Vec<ToolStatus> {
        vec![ToolStatus::resolve("/bin/sh", false)]
    }

    async fn perform(&self, device_id: &str, action: &DeviceAction) -> Result<ActionOutcome> {
        self.performed
            .lock()
            .unwrap()
            .push(format!("{} {}", device_id, action));
        Ok(ActionOutcome::message(format!("Sent {}", action)))
    }

    async fn toggle_mirror_display(&self, device_id: &str, power: DisplayPower) -> Result<()> {
        if !self.window_present {
            return Err(MirrorError::WindowNotFound(format!("fake - {}", device_id)));
        }
        self.toggles
            .lock()
            .unwrap()
            .push((device_id.to_string(), power));
        Ok(())
    }
}
