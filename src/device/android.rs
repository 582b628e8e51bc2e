//! Android devices through `adb` and `scrcpy`.

use super::{
    screenshot_file_name, ActionOutcome, DeviceAction, DeviceInfo, DevicePlatform, DisplayPower,
    Launcher, MirrorOptions, MirrorTimings, Platform, StreamPorts, ToolStatus, UNKNOWN,
};
use crate::config::AndroidConfig;
use crate::error::{MirrorError, Result};
use crate::mirror::window::WindowSignaller;
use crate::platform;
use crate::process;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Device-side scratch directory for screencap output.
const REMOTE_SCREENSHOT_DIR: &str = "/sdcard";

pub struct AndroidPlatform {
    adb: String,
    scrcpy: String,
    timings: MirrorTimings,
    command_timeout: Duration,
    screenshots_dir: PathBuf,
    window: WindowSignaller,
}

impl AndroidPlatform {
    pub fn new(
        config: &AndroidConfig,
        command_timeout: Duration,
        screenshots_dir: PathBuf,
        window: WindowSignaller,
    ) -> Self {
        Self {
            adb: config.adb.clone(),
            scrcpy: config.scrcpy.clone(),
            timings: MirrorTimings {
                grace_period: Duration::from_millis(config.grace_period_ms),
                stop_timeout: Duration::from_millis(config.stop_timeout_ms),
            },
            command_timeout,
            screenshots_dir,
            window,
        }
    }

    async fn adb(&self, device_id: &str, args: &[&str]) -> Result<process::CommandOutput> {
        let mut full = vec!["-s", device_id];
        full.extend_from_slice(args);
        process::run(&self.adb, full, self.command_timeout)
            .await?
            .require_success(&self.adb)
    }

    async fn screenshot(&self, device_id: &str, requested: Option<&str>) -> Result<ActionOutcome> {
        std::fs::create_dir_all(&self.screenshots_dir).map_err(|e| MirrorError::ToolFailed {
            program: "screenshot".to_string(),
            code: None,
            stderr: format!("cannot create {}: {}", self.screenshots_dir.display(), e),
        })?;

        let local = self.screenshots_dir.join(screenshot_file_name(requested, || {
            format!(
                "android_{}_{}.png",
                platform::file_safe(platform::id_suffix(device_id, 4)),
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )
        }));
        let local_arg = local.display().to_string();
        // Unique per capture so concurrent screenshots of one device do not
        // overwrite each other on the device.
        let remote = format!(
            "{}/devmirror_{}.png",
            REMOTE_SCREENSHOT_DIR,
            Uuid::new_v4().simple()
        );

        self.adb(device_id, &["shell", "screencap", "-p", remote.as_str()])
            .await?;
        self.adb(device_id, &["pull", remote.as_str(), local_arg.as_str()])
            .await?;
        if let Err(e) = self.adb(device_id, &["shell", "rm", remote.as_str()]).await {
            debug!(device_id, "Could not remove remote screenshot: {}", e);
        }

        info!(device_id, path = %local.display(), "Screenshot saved");
        Ok(ActionOutcome {
            message: format!("Screenshot saved to {}", local.display()),
            artifact: Some(local),
        })
    }
}

/// Serials from `adb devices` output whose state is exactly `device`.
///
/// `unauthorized`, `offline` and friends are still attaching and cannot be
/// mirrored yet.
pub fn parse_adb_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let serial = cols.next()?;
            (cols.next()? == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Build device info from the three `getprop` lines (model, brand, release).
pub fn parse_getprop(device_id: &str, output: &str) -> DeviceInfo {
    let mut lines = output.lines().map(str::trim);
    let model = lines.next().filter(|s| !s.is_empty());
    let brand = lines.next().filter(|s| !s.is_empty());
    let release = lines.next().filter(|s| !s.is_empty());

    let name = match (brand, model) {
        (Some(brand), Some(model)) => format!("{} {}", brand, model),
        (None, Some(model)) => model.to_string(),
        _ => fallback_name(device_id),
    };

    DeviceInfo {
        id: device_id.to_string(),
        platform: Platform::Android,
        name,
        model: model.unwrap_or(UNKNOWN).to_string(),
        os_version: release.unwrap_or(UNKNOWN).to_string(),
    }
}

fn fallback_name(device_id: &str) -> String {
    format!("Android {}", platform::id_suffix(device_id, 4))
}

fn fallback_info(device_id: &str) -> DeviceInfo {
    DeviceInfo {
        id: device_id.to_string(),
        platform: Platform::Android,
        name: fallback_name(device_id),
        model: UNKNOWN.to_string(),
        os_version: UNKNOWN.to_string(),
    }
}

#[async_trait]
impl DevicePlatform for AndroidPlatform {
    fn platform(&self) -> Platform {
        Platform::Android
    }

    async fn list_connected(&self) -> Result<Vec<String>> {
        let out = process::run(&self.adb, ["devices"], self.command_timeout)
            .await?
            .require_success(&self.adb)?;
        Ok(parse_adb_devices(&out.stdout))
    }

    async fn device_info(&self, device_id: &str) -> DeviceInfo {
        let query = "getprop ro.product.model && getprop ro.product.brand && getprop ro.build.version.release";
        match self.adb(device_id, &["shell", query]).await {
            Ok(out) => parse_getprop(device_id, &out.stdout),
            Err(e) => {
                warn!(device_id, "Property query failed: {}", e);
                fallback_info(device_id)
            }
        }
    }

    fn mirror_launcher(&self) -> Result<Launcher> {
        platform::resolve_tool(&self.scrcpy)
            .map(Launcher::Binary)
            .ok_or_else(|| MirrorError::ToolNotFound(self.scrcpy.clone()))
    }

    fn stream_ports(&self, _options: &MirrorOptions) -> Option<StreamPorts> {
        None
    }

    fn mirror_args(
        &self,
        device_id: &str,
        options: &MirrorOptions,
        _ports: Option<&StreamPorts>,
    ) -> Vec<String> {
        let mut args = vec!["-s".to_string(), device_id.to_string()];
        if options.no_audio {
            args.push("--no-audio".to_string());
        }
        if options.stay_awake {
            args.push("--stay-awake".to_string());
        }
        if options.show_touches {
            args.push("--show-touches".to_string());
        }
        if options.turn_screen_off {
            args.push("--turn-screen-off".to_string());
        }
        if let Some(size) = options.max_size {
            args.push(format!("--max-size={}", size));
        }
        if let Some(fps) = options.max_fps {
            args.push(format!("--max-fps={}", fps));
        }
        if let Some(rate) = &options.bit_rate {
            args.push(format!("--video-bit-rate={}", rate));
        }
        if let Some(path) = &options.record {
            args.push(format!("--record={}", path.display()));
        }
        if options.fullscreen {
            args.push("--fullscreen".to_string());
        }
        if options.always_on_top {
            args.push("--always-on-top".to_string());
        }
        args.push(format!("--window-title={}", self.window.window_title(device_id)));
        args
    }

    fn timings(&self) -> MirrorTimings {
        self.timings
    }

    fn check_dependencies(&self) -> Vec<ToolStatus> {
        vec![
            ToolStatus::resolve(&self.adb, false),
            ToolStatus::resolve(&self.scrcpy, false),
        ]
    }

    async fn perform(&self, device_id: &str, action: &DeviceAction) -> Result<ActionOutcome> {
        match action {
            DeviceAction::Key(key) => {
                self.adb(device_id, &["shell", "input", "keyevent", key.android_keycode()])
                    .await?;
                Ok(ActionOutcome::message(format!("Sent {}", key.as_str())))
            }
            DeviceAction::Keycode(code) => {
                self.adb(device_id, &["shell", "input", "keyevent", code.as_str()])
                    .await?;
                Ok(ActionOutcome::message(format!("Sent keycode {}", code)))
            }
            DeviceAction::Screenshot(name) => self.screenshot(device_id, name.as_deref()).await,
            DeviceAction::MirrorDisplay(power) => {
                self.toggle_mirror_display(device_id, *power).await?;
                Ok(ActionOutcome::message(format!("{}", action)))
            }
        }
    }

    async fn toggle_mirror_display(&self, device_id: &str, power: DisplayPower) -> Result<()> {
        self.window.send_display_toggle(device_id, power).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowConfig;

    fn android(adb: &str, screenshots: PathBuf) -> AndroidPlatform {
        let config = AndroidConfig {
            adb: adb.to_string(),
            ..Default::default()
        };
        AndroidPlatform::new(
            &config,
            Duration::from_secs(5),
            screenshots,
            WindowSignaller::new(&WindowConfig::default(), Duration::from_secs(1)),
        )
    }

    #[test]
    fn adb_devices_keeps_only_online_devices() {
        let output = "\
* daemon not running; starting now at tcp:5037
* daemon started successfully
List of devices attached
SN1\tdevice
emulator-5554\tdevice
SN3\tunauthorized
192.168.1.20:5555\toffline

";
        assert_eq!(parse_adb_devices(output), vec!["SN1", "emulator-5554"]);
    }

    #[test]
    fn getprop_output_becomes_device_info() {
        let info = parse_getprop("R58M123ABCD", "SM-G991B\nsamsung\n14\n");
        assert_eq!(info.name, "samsung SM-G991B");
        assert_eq!(info.model, "SM-G991B");
        assert_eq!(info.os_version, "14");
    }

    #[test]
    fn empty_getprop_falls_back_to_placeholders() {
        let info = parse_getprop("R58M123ABCD", "");
        assert_eq!(info.name, "Android ABCD");
        assert_eq!(info.model, UNKNOWN);
        assert_eq!(info.os_version, UNKNOWN);
    }

    #[test]
    fn options_translate_to_scrcpy_flags() {
        let platform = android("adb", PathBuf::from("/tmp"));
        let options = MirrorOptions {
            show_touches: true,
            max_size: Some(1024),
            bit_rate: Some("8M".into()),
            ..Default::default()
        };
        let args = platform.mirror_args("SN1", &options, None);
        assert_eq!(&args[..2], ["-s", "SN1"]);
        assert!(args.contains(&"--no-audio".to_string()));
        assert!(args.contains(&"--stay-awake".to_string()));
        assert!(args.contains(&"--show-touches".to_string()));
        assert!(!args.contains(&"--turn-screen-off".to_string()));
        assert!(args.contains(&"--max-size=1024".to_string()));
        assert!(args.contains(&"--video-bit-rate=8M".to_string()));
        assert!(!args.contains(&"--fullscreen".to_string()));
        assert_eq!(args.last().unwrap(), "--window-title=scrcpy - SN1");
    }

    #[test]
    fn window_placement_flags() {
        let platform = android("adb", PathBuf::from("/tmp"));
        let options = MirrorOptions {
            fullscreen: true,
            always_on_top: true,
            ..Default::default()
        };
        let args = platform.mirror_args("SN1", &options, None);
        assert!(args.contains(&"--fullscreen".to_string()));
        assert!(args.contains(&"--always-on-top".to_string()));
    }

    #[test]
    fn no_stream_ports_for_local_mirroring() {
        let platform = android("adb", PathBuf::from("/tmp"));
        assert!(platform.stream_ports(&MirrorOptions::default()).is_none());
    }

    #[cfg(unix)]
    mod with_fake_adb {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Fake adb that logs its arguments and answers the calls we make.
        fn fake_adb(dir: &std::path::Path) -> PathBuf {
            let path = dir.join("adb");
            let script = format!(
                r#"#!/bin/sh
echo "$@" >> "{log}"
case "$*" in
  devices) printf 'List of devices attached\nSN1\tdevice\nSN2\tunauthorized\n' ;;
  *getprop*) printf 'Pixel 7\ngoogle\n14\n' ;;
  *" pull "*) for last; do :; done; printf 'PNG' > "$last" ;;
  *) ;;
esac
"#,
                log = dir.join("calls.log").display()
            );
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn lists_and_describes_devices() {
            let temp = TempDir::new().unwrap();
            let adb = fake_adb(temp.path());
            let platform = android(&adb.display().to_string(), temp.path().join("shots"));

            assert_eq!(platform.list_connected().await.unwrap(), vec!["SN1"]);
            let info = platform.device_info("SN1").await;
            assert_eq!(info.name, "google Pixel 7");
            assert_eq!(info.os_version, "14");
        }

        #[tokio::test]
        async fn key_action_sends_keyevent() {
            let temp = TempDir::new().unwrap();
            let adb = fake_adb(temp.path());
            let platform = android(&adb.display().to_string(), temp.path().join("shots"));

            let outcome = platform
                .perform("SN1", &DeviceAction::Key(crate::device::KeyAction::Recent))
                .await
                .unwrap();
            assert_eq!(outcome.message, "Sent recent");

            let calls = std::fs::read_to_string(temp.path().join("calls.log")).unwrap();
            assert!(calls.contains("-s SN1 shell input keyevent KEYCODE_APP_SWITCH"));
        }

        #[tokio::test]
        async fn screenshot_is_pulled_into_screenshots_dir() {
            let temp = TempDir::new().unwrap();
            let adb = fake_adb(temp.path());
            let shots = temp.path().join("shots");
            let platform = android(&adb.display().to_string(), shots.clone());

            let outcome = platform
                .perform("R58M123ABCD", &DeviceAction::Screenshot(None))
                .await
                .unwrap();
            let artifact = outcome.artifact.unwrap();
            assert!(artifact.starts_with(&shots));
            let file_name = artifact.file_name().unwrap().to_string_lossy().into_owned();
            assert!(file_name.starts_with("android_ABCD_"));
            assert_eq!(std::fs::read_to_string(&artifact).unwrap(), "PNG");

            let calls = std::fs::read_to_string(temp.path().join("calls.log")).unwrap();
            assert!(calls.contains("shell rm /sdcard/devmirror_"));
        }

        #[tokio::test]
        async fn requested_screenshot_name_gets_png_extension() {
            let temp = TempDir::new().unwrap();
            let adb = fake_adb(temp.path());
            let shots = temp.path().join("shots");
            let platform = android(&adb.display().to_string(), shots.clone());

            let outcome = platform
                .perform("SN1", &DeviceAction::Screenshot(Some("checkout".into())))
                .await
                .unwrap();
            assert_eq!(outcome.artifact.unwrap(), shots.join("checkout.png"));
        }

        #[tokio::test]
        async fn concurrent_screenshots_use_distinct_remote_files() {
            let temp = TempDir::new().unwrap();
            let adb = fake_adb(temp.path());
            let platform = android(&adb.display().to_string(), temp.path().join("shots"));

            let action_a = DeviceAction::Screenshot(Some("a".into()));
            let action_b = DeviceAction::Screenshot(Some("b".into()));
            let (a, b) = tokio::join!(
                platform.perform("SN1", &action_a),
                platform.perform("SN1", &action_b),
            );
            a.unwrap();
            b.unwrap();

            let calls = std::fs::read_to_string(temp.path().join("calls.log")).unwrap();
            let mut remotes: Vec<&str> = calls
                .lines()
                .filter(|line| line.contains("screencap"))
                .filter_map(|line| line.split_whitespace().last())
                .collect();
            remotes.sort();
            remotes.dedup();
            assert_eq!(remotes.len(), 2);
            assert!(remotes.iter().all(|r| r.starts_with("/sdcard/devmirror_")));
        }

        #[tokio::test]
        async fn device_info_survives_failing_tool() {
            let platform = android("devmirror-no-such-adb", PathBuf::from("/tmp"));
            let info = platform.device_info("SN0042").await;
            assert_eq!(info.name, "Android 0042");
            assert_eq!(info.model, UNKNOWN);
        }
    }
}
