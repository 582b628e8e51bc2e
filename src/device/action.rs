//! The closed set of remote-control actions.

use crate::error::{MirrorError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Hardware-style key presses delivered straight to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Home,
    Back,
    Recent,
    VolumeUp,
    VolumeDown,
    Wake,
    Power,
}

impl KeyAction {
    pub fn android_keycode(self) -> &'static str {
        match self {
            KeyAction::Home => "KEYCODE_HOME",
            KeyAction::Back => "KEYCODE_BACK",
            KeyAction::Recent => "KEYCODE_APP_SWITCH",
            KeyAction::VolumeUp => "KEYCODE_VOLUME_UP",
            KeyAction::VolumeDown => "KEYCODE_VOLUME_DOWN",
            KeyAction::Wake => "KEYCODE_WAKEUP",
            KeyAction::Power => "KEYCODE_POWER",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyAction::Home => "home",
            KeyAction::Back => "back",
            KeyAction::Recent => "recent",
            KeyAction::VolumeUp => "volume_up",
            KeyAction::VolumeDown => "volume_down",
            KeyAction::Wake => "wake",
            KeyAction::Power => "power",
        }
    }
}

/// Whether the mirroring window should show the device's physical display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPower {
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Key(KeyAction),
    /// Arbitrary Android keycode, e.g. `KEYCODE_CAMERA`
    Keycode(String),
    /// Capture the screen, optionally under a caller-chosen file name
    Screenshot(Option<String>),
    /// Toggle the device display through the mirroring window, stream stays up
    MirrorDisplay(DisplayPower),
}

impl DeviceAction {
    /// Parse a wire action name plus optional payload.
    pub fn parse(name: &str, payload: Option<&Value>) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let base = normalized.strip_prefix("ios_").unwrap_or(&normalized);

        let action = match base {
            "home" | "home_button" => DeviceAction::Key(KeyAction::Home),
            "back" | "back_button" => DeviceAction::Key(KeyAction::Back),
            "recent" | "recents" | "app_switch" => DeviceAction::Key(KeyAction::Recent),
            "volume_up" => DeviceAction::Key(KeyAction::VolumeUp),
            "volume_down" => DeviceAction::Key(KeyAction::VolumeDown),
            "wake" | "wake_device" | "screen_on" => DeviceAction::Key(KeyAction::Wake),
            "power" | "power_button" | "lock_device" | "screen_off" => {
                DeviceAction::Key(KeyAction::Power)
            }
            "keycode" | "send_keycode" => DeviceAction::Keycode(parse_keycode(payload)?),
            "screenshot" => DeviceAction::Screenshot(parse_filename(payload)?),
            "mirror_screen_on" => DeviceAction::MirrorDisplay(DisplayPower::On),
            "mirror_screen_off" => DeviceAction::MirrorDisplay(DisplayPower::Off),
            _ => return Err(MirrorError::UnsupportedAction(name.to_string())),
        };
        Ok(action)
    }

    /// Actions that only make sense while a mirroring session is running.
    pub fn requires_session(&self) -> bool {
        matches!(self, DeviceAction::MirrorDisplay(_))
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Key(key) => write!(f, "{}", key.as_str()),
            DeviceAction::Keycode(code) => write!(f, "keycode {}", code),
            DeviceAction::Screenshot(_) => write!(f, "screenshot"),
            DeviceAction::MirrorDisplay(DisplayPower::On) => write!(f, "mirror_screen_on"),
            DeviceAction::MirrorDisplay(DisplayPower::Off) => write!(f, "mirror_screen_off"),
        }
    }
}

/// Keycodes end up in a device-side shell, so only plain identifiers pass.
fn parse_keycode(payload: Option<&Value>) -> Result<String> {
    let raw = match payload {
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(map)) => map
            .get("keycode")
            .and_then(Value::as_str)
            .ok_or_else(|| MirrorError::InvalidPayload("missing \"keycode\"".to_string()))?,
        _ => {
            return Err(MirrorError::InvalidPayload(
                "keycode action needs a keycode payload".to_string(),
            ))
        }
    };

    let code = raw.trim();
    let valid = !code.is_empty()
        && code.len() <= 64
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(MirrorError::InvalidPayload(format!("bad keycode: {:?}", raw)));
    }
    Ok(code.to_string())
}

/// Optional screenshot name. Only a bare file name is accepted; the file always
/// lands in the screenshots directory.
fn parse_filename(payload: Option<&Value>) -> Result<Option<String>> {
    let raw = match payload {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.as_str(),
        Some(Value::Object(map)) => match map.get("filename") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => {
                return Err(MirrorError::InvalidPayload(
                    "\"filename\" must be a string".to_string(),
                ))
            }
        },
        Some(_) => {
            return Err(MirrorError::InvalidPayload(
                "screenshot payload must be a file name".to_string(),
            ))
        }
    };

    let name = raw.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let valid = name.len() <= 128
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if !valid {
        return Err(MirrorError::InvalidPayload(format!("bad file name: {:?}", raw)));
    }
    Ok(Some(name.to_string()))
}

/// File name for a screenshot: the requested one with `.png` appended when it
/// lacks the extension, or `generated` when none was requested.
pub fn screenshot_file_name(requested: Option<&str>, generated: impl FnOnce() -> String) -> String {
    match requested {
        Some(name) if name.ends_with(".png") => name.to_string(),
        Some(name) => format!("{}.png", name),
        None => generated(),
    }
}

/// Result of a successful action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub message: String,
    /// File produced by the action (screenshots)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl ActionOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            artifact: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!(
            DeviceAction::parse("home_button", None).unwrap(),
            DeviceAction::Key(KeyAction::Home)
        );
        assert_eq!(
            DeviceAction::parse("ios_screenshot", None).unwrap(),
            DeviceAction::Screenshot(None)
        );
        assert_eq!(
            DeviceAction::parse("Mirror_Screen_Off", None).unwrap(),
            DeviceAction::MirrorDisplay(DisplayPower::Off)
        );
        assert_eq!(
            DeviceAction::parse("screen_off", None).unwrap(),
            DeviceAction::Key(KeyAction::Power)
        );
    }

    #[test]
    fn unknown_action_is_unsupported() {
        let err = DeviceAction::parse("self_destruct", None).unwrap_err();
        assert!(matches!(err, MirrorError::UnsupportedAction(ref a) if a == "self_destruct"));
    }

    #[test]
    fn keycode_payload_is_validated() {
        let ok = DeviceAction::parse("keycode", Some(&json!({"keycode": "KEYCODE_CAMERA"}))).unwrap();
        assert_eq!(ok, DeviceAction::Keycode("KEYCODE_CAMERA".into()));

        let bare = DeviceAction::parse("keycode", Some(&json!("26"))).unwrap();
        assert_eq!(bare, DeviceAction::Keycode("26".into()));

        let err = DeviceAction::parse("keycode", Some(&json!({"keycode": "3; reboot"}))).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPayload(_)));

        let err = DeviceAction::parse("keycode", None).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidPayload(_)));
    }

    #[test]
    fn only_display_toggles_need_a_session() {
        assert!(DeviceAction::MirrorDisplay(DisplayPower::On).requires_session());
        assert!(!DeviceAction::Key(KeyAction::Wake).requires_session());
        assert!(!DeviceAction::Screenshot(None).requires_session());
    }

    #[test]
    fn screenshot_takes_optional_file_name() {
        let named = DeviceAction::parse("screenshot", Some(&json!({"filename": "login"}))).unwrap();
        assert_eq!(named, DeviceAction::Screenshot(Some("login".into())));

        let bare = DeviceAction::parse("screenshot", Some(&json!("home.png"))).unwrap();
        assert_eq!(bare, DeviceAction::Screenshot(Some("home.png".into())));

        let empty = DeviceAction::parse("screenshot", Some(&json!({}))).unwrap();
        assert_eq!(empty, DeviceAction::Screenshot(None));

        for bad in [json!("../etc/passwd"), json!({"filename": "a/b"}), json!({"filename": 7})] {
            let err = DeviceAction::parse("screenshot", Some(&bad)).unwrap_err();
            assert!(matches!(err, MirrorError::InvalidPayload(_)), "{}", bad);
        }
    }

    #[test]
    fn png_extension_is_added_when_missing() {
        let generated = || "auto.png".to_string();
        assert_eq!(screenshot_file_name(Some("login"), generated), "login.png");
        assert_eq!(screenshot_file_name(Some("login.png"), generated), "login.png");
        assert_eq!(screenshot_file_name(None, generated), "auto.png");
    }

    #[test]
    fn recent_maps_to_app_switch() {
        assert_eq!(KeyAction::Recent.android_keycode(), "KEYCODE_APP_SWITCH");
    }
}
