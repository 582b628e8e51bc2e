//! Keystrokes into the local mirroring window.
//!
//! scrcpy turns the device's physical display off with Alt+O and back on with
//! Alt+Shift+O while the stream keeps running. There is no API for that, so
//! we find the window and type the shortcut into it. Window matching and focus
//! are inherently racy; a failure here says nothing about whether the session
//! itself is alive.

use crate::config::WindowConfig;
use crate::device::DisplayPower;
use crate::error::{MirrorError, Result};
use crate::process;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(windows)]
const SENT_MARKER: &str = "KEYS_SENT";

#[derive(Debug, Clone)]
pub struct WindowSignaller {
    process_name: String,
    helper: String,
    settle: Duration,
    timeout: Duration,
}

impl WindowSignaller {
    pub fn new(config: &WindowConfig, timeout: Duration) -> Self {
        Self {
            process_name: config.process_name.clone(),
            helper: config.helper.clone(),
            settle: Duration::from_millis(config.settle_ms),
            timeout,
        }
    }

    /// Title given to the mirroring window of `device_id` at launch.
    pub fn window_title(&self, device_id: &str) -> String {
        format!("{} - {}", self.process_name, device_id)
    }

    pub async fn send_display_toggle(&self, device_id: &str, power: DisplayPower) -> Result<()> {
        let title = self.window_title(device_id);
        debug!(device_id, title = %title, ?power, "Sending display toggle to mirror window");
        self.send_keys(&title, power).await?;
        info!(device_id, ?power, "Display toggle sent to mirror window");
        Ok(())
    }

    #[cfg(not(windows))]
    async fn send_keys(&self, title: &str, power: DisplayPower) -> Result<()> {
        let pattern = format!("^{}$", regex_escape(title));
        let found = process::run(&self.helper, ["search", "--name", pattern.as_str()], self.timeout)
            .await?;

        let Some(window_id) = found
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
        else {
            return Err(MirrorError::WindowNotFound(title.to_string()));
        };

        process::run(
            &self.helper,
            ["windowactivate", "--sync", window_id.as_str()],
            self.timeout,
        )
        .await?
        .require_success(&self.helper)?;

        tokio::time::sleep(self.settle).await;

        process::run(
            &self.helper,
            [
                "key",
                "--window",
                window_id.as_str(),
                "--clearmodifiers",
                xdotool_keys(power),
            ],
            self.timeout,
        )
        .await?
        .require_success(&self.helper)?;
        Ok(())
    }

    #[cfg(windows)]
    async fn send_keys(&self, title: &str, power: DisplayPower) -> Result<()> {
        let script = powershell_script(&self.process_name, title, power, self.settle);
        let out = process::run(
            &self.helper,
            ["-NoProfile", "-NonInteractive", "-Command", script.as_str()],
            self.timeout,
        )
        .await?;

        if out.stdout.contains(SENT_MARKER) {
            return Ok(());
        }
        out.require_success(&self.helper)?;
        Err(MirrorError::WindowNotFound(title.to_string()))
    }
}

#[cfg_attr(windows, allow(dead_code))]
fn xdotool_keys(power: DisplayPower) -> &'static str {
    match power {
        DisplayPower::Off => "alt+o",
        DisplayPower::On => "alt+shift+o",
    }
}

#[cfg_attr(not(windows), allow(dead_code))]
fn sendkeys_keys(power: DisplayPower) -> &'static str {
    match power {
        DisplayPower::Off => "%o",
        DisplayPower::On => "%+o",
    }
}

/// xdotool matches `--name` as a regular expression.
#[cfg_attr(windows, allow(dead_code))]
fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[cfg_attr(not(windows), allow(dead_code))]
fn powershell_script(process_name: &str, title: &str, power: DisplayPower, settle: Duration) -> String {
    format!(
        r#"Add-Type -AssemblyName System.Windows.Forms
Add-Type -AssemblyName Microsoft.VisualBasic
$proc = Get-Process -Name {name} -ErrorAction SilentlyContinue | Where-Object {{ $_.MainWindowTitle -eq {title} }} | Select-Object -First 1
if ($proc) {{
    [Microsoft.VisualBasic.Interaction]::AppActivate($proc.Id)
    Start-Sleep -Milliseconds {settle}
    [System.Windows.Forms.SendKeys]::SendWait("{keys}")
    Write-Host "KEYS_SENT"
}} else {{
    Write-Host "NO_WINDOW"
}}"#,
        name = powershell_quote(process_name),
        title = powershell_quote(title),
        settle = settle.as_millis(),
        keys = sendkeys_keys(power),
    )
}
