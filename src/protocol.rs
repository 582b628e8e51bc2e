//! Control messages exchanged with the daemon
//!
//! One JSON request per WebSocket text frame, answered by one [`Reply`].

use crate::device::MirrorOptions;
use crate::error::MirrorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests sent from the CLI (or any local client) to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Connected and known devices with connection/session flags
    Devices,
    /// Re-query the platform tools
    Refresh,
    Connect {
        device_id: String,
        #[serde(default)]
        options: MirrorOptions,
    },
    Disconnect {
        device_id: String,
    },
    Action {
        device_id: String,
        action: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Status {
        device_id: String,
    },
    Alias {
        device_id: String,
        alias: String,
    },
    Sessions,
    /// Which platform tools resolve
    Dependencies,
    Ping,
}

/// Reply envelope: every request gets a success flag and a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => self.data = Some(value),
            Err(e) => tracing::warn!("Failed to serialize reply data: {}", e),
        }
        self
    }

    pub fn error(err: &MirrorError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            error_kind: Some(err.kind().to_string()),
            data: None,
        }
    }
}

impl From<MirrorError> for Reply {
    fn from(err: MirrorError) -> Self {
        Reply::error(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn connect_request_defaults_options() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"type": "connect", "device_id": "SN1"}"#).unwrap();
        match req {
            ControlRequest::Connect { device_id, options } => {
                assert_eq!(device_id, "SN1");
                assert!(options.no_audio);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn action_request_carries_payload() {
        let req: ControlRequest = serde_json::from_value(json!({
            "type": "action",
            "device_id": "SN1",
            "action": "keycode",
            "payload": {"keycode": "KEYCODE_CAMERA"}
        }))
        .unwrap();
        assert!(matches!(
            req,
            ControlRequest::Action { ref payload, .. } if payload.as_ref().unwrap()["keycode"] == "KEYCODE_CAMERA"
        ));
    }

    #[test]
    fn error_reply_carries_kind() {
        let reply = Reply::from(MirrorError::NoActiveSession("SN1".into()));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "no_active_session");
        assert!(json.get("data").is_none());
    }
}
