//! Request-level operations over the registry and the session manager.
//!
//! Everything returns a [`Reply`]; no error escapes to the transport.

use crate::config::Config;
use crate::device::MirrorOptions;
use crate::mirror::{SessionInfo, SessionManager};
use crate::protocol::{ControlRequest, Reply};
use crate::registry::DeviceRegistry;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Connection and session state of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub connected: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
}

pub struct ControlService {
    registry: Arc<DeviceRegistry>,
    manager: SessionManager,
}

impl ControlService {
    pub fn new(registry: Arc<DeviceRegistry>, manager: SessionManager) -> Self {
        Self { registry, manager }
    }

    pub fn from_config(config: &Config) -> Self {
        let registry = Arc::new(DeviceRegistry::from_config(config));
        let manager = SessionManager::new(Arc::clone(&registry), config.log_path());
        Self::new(registry, manager)
    }

    pub async fn handle(&self, request: ControlRequest) -> Reply {
        match request {
            ControlRequest::Devices => self.devices().await,
            ControlRequest::Refresh => self.refresh().await,
            ControlRequest::Connect { device_id, options } => {
                self.connect(&device_id, options).await
            }
            ControlRequest::Disconnect { device_id } => self.disconnect(&device_id).await,
            ControlRequest::Action {
                device_id,
                action,
                payload,
            } => self.action(&device_id, &action, payload.as_ref()).await,
            ControlRequest::Status { device_id } => self.status(&device_id).await,
            ControlRequest::Alias { device_id, alias } => self.alias(&device_id, &alias).await,
            ControlRequest::Sessions => self.sessions().await,
            ControlRequest::Dependencies => self.dependencies(),
            ControlRequest::Ping => Reply::ok("pong"),
        }
    }

    pub async fn devices(&self) -> Reply {
        let mut entries = self.registry.list_devices().await;
        for entry in &mut entries {
            entry.active = self.manager.is_active(&entry.record.id).await;
        }
        Reply::ok(format!("{} device(s)", entries.len())).with_data(&entries)
    }

    pub async fn refresh(&self) -> Reply {
        let new_devices = self.registry.refresh().await;
        Reply::ok(format!("{} new device(s)", new_devices))
            .with_data(&json!({ "new_devices": new_devices }))
    }

    pub async fn connect(&self, device_id: &str, options: MirrorOptions) -> Reply {
        match self.manager.start(device_id, options).await {
            Ok(info) => Reply::ok(format!("Mirroring started for {}", device_id)).with_data(&info),
            Err(e) => Reply::error(&e),
        }
    }

    pub async fn disconnect(&self, device_id: &str) -> Reply {
        let outcome = self.manager.stop(device_id).await;
        Reply::ok(outcome.describe())
    }

    pub async fn action(&self, device_id: &str, action: &str, payload: Option<&Value>) -> Reply {
        match self.manager.execute_action(device_id, action, payload).await {
            Ok(outcome) => Reply::ok(outcome.message.clone()).with_data(&outcome),
            Err(e) => Reply::error(&e),
        }
    }

    pub async fn device_status(&self, device_id: &str) -> DeviceStatus {
        let session = self.manager.session(device_id).await;
        DeviceStatus {
            device_id: device_id.to_string(),
            connected: self.registry.is_connected(device_id).await,
            active: session.is_some(),
            session,
        }
    }

    pub async fn status(&self, device_id: &str) -> Reply {
        let status = self.device_status(device_id).await;
        let message = match (status.connected, status.active) {
            (true, true) => "connected, mirroring",
            (true, false) => "connected",
            (false, true) => "disconnected, mirroring",
            (false, false) => "disconnected",
        };
        Reply::ok(message).with_data(&status)
    }

    pub async fn alias(&self, device_id: &str, alias: &str) -> Reply {
        match self.registry.set_alias(device_id, alias).await {
            Ok(record) => Reply::ok(format!("Alias set to {}", record.display_alias())).with_data(&record),
            Err(e) => Reply::error(&e),
        }
    }

    pub async fn sessions(&self) -> Reply {
        let sessions = self.manager.sessions().await;
        Reply::ok(format!("{} active session(s)", sessions.len())).with_data(&sessions)
    }

    pub fn dependencies(&self) -> Reply {
        let report = self.registry.dependencies();
        let missing: Vec<&str> = report
            .iter()
            .flat_map(|p| p.tools.iter())
            .filter(|t| !t.found())
            .map(|t| t.tool.as_str())
            .collect();
        let message = if missing.is_empty() {
            "All tools found".to_string()
        } else {
            format!("Missing: {}", missing.join(", "))
        };
        Reply::ok(message).with_data(&report)
    }

    /// Stop every session; used on daemon shutdown.
    pub async fn shutdown(&self) -> usize {
        self.manager.shutdown_all().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::device::fake::FakePlatform;
    use crate::device::{DevicePlatform, Platform};
    use crate::registry::AliasStore;
    use tempfile::TempDir;

    fn service(temp: &TempDir, android: Arc<FakePlatform>) -> ControlService {
        let registry = Arc::new(DeviceRegistry::new(
            vec![android as Arc<dyn DevicePlatform>],
            AliasStore::load(temp.path().join("devices.json")),
        ));
        let manager = SessionManager::new(Arc::clone(&registry), temp.path().join("logs"));
        ControlService::new(registry, manager)
    }

    #[tokio::test]
    async fn disconnected_device_keeps_mirroring() {
        let temp = TempDir::new().unwrap();
        let android = Arc::new(FakePlatform::new(Platform::Android, &["SN1"]));
        let service = service(&temp, android.clone());

        assert!(service.connect("SN1", MirrorOptions::default()).await.success);
        android.set_connected(&[]);

        let status = service.device_status("SN1").await;
        assert!(!status.connected);
        assert!(status.active);

        let reply = service.devices().await;
        let data = reply.data.unwrap();
        assert_eq!(data[0]["id"], "SN1");
        assert_eq!(data[0]["connected"], false);
        assert_eq!(data[0]["active"], true);

        service.shutdown().await;
    }

    #[tokio::test]
    async fn failures_become_envelopes() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(FakePlatform::new(Platform::Android, &["SN1"])));

        let reply = service.action("SN1", "mirror_screen_off", None).await;
        assert!(!reply.success);
        assert_eq!(reply.error_kind.as_deref(), Some("no_active_session"));

        let reply = service.connect("SN9", MirrorOptions::default()).await;
        assert_eq!(reply.error_kind.as_deref(), Some("not_connected"));
    }

    #[tokio::test]
    async fn disconnect_twice_succeeds() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(FakePlatform::new(Platform::Android, &["SN1"])));
        service.connect("SN1", MirrorOptions::default()).await;

        assert!(service.disconnect("SN1").await.success);
        let second = service.disconnect("SN1").await;
        assert!(second.success);
        assert_eq!(second.message, "No mirroring session was running");
    }

    #[tokio::test]
    async fn dispatches_requests() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp, Arc::new(FakePlatform::new(Platform::Android, &["SN1"])));

        let reply = service.handle(ControlRequest::Refresh).await;
        assert_eq!(reply.data.unwrap()["new_devices"], 1);

        let reply = service
            .handle(ControlRequest::Alias {
                device_id: "SN1".into(),
                alias: "Bench".into(),
            })
            .await;
        assert!(reply.success);
        assert_eq!(reply.data.unwrap()["alias"], "Bench");

        let reply = service.handle(ControlRequest::Sessions).await;
        assert_eq!(reply.data.unwrap(), json!([]));

        let reply = service.handle(ControlRequest::Dependencies).await;
        assert!(reply.success);
        assert_eq!(reply.message, "All tools found");
        let data = reply.data.unwrap();
        assert_eq!(data[0]["platform"], "android");
        assert_eq!(data[0]["ready"], true);
        assert_eq!(data[0]["tools"][0]["path"], "/bin/sh");
    }
}
