use crate::device::{MirrorOptions, Platform, StreamPorts};
use crate::process::{ChildHandle, Termination};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// What backs a session.
#[derive(Debug)]
pub enum SessionKind {
    Real(ChildHandle),
    /// Recorded without a process because the launcher binary is missing.
    /// Always live, never polled.
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKindTag {
    Real,
    Simulated,
}

#[derive(Debug)]
pub struct MirrorSession {
    pub session_id: Uuid,
    pub device_id: String,
    pub platform: Platform,
    pub kind: SessionKind,
    pub started_at: DateTime<Utc>,
    pub ports: Option<StreamPorts>,
    pub options: MirrorOptions,
    pub stop_timeout: Duration,
}

impl MirrorSession {
    pub fn is_live(&mut self) -> bool {
        match &mut self.kind {
            SessionKind::Real(child) => child.is_running(),
            SessionKind::Simulated => true,
        }
    }

    pub fn stream_url(&self) -> Option<String> {
        self.ports
            .map(|p| format!("http://localhost:{}", p.stream))
    }

    pub fn info(&self) -> SessionInfo {
        let (kind, pid) = match &self.kind {
            SessionKind::Real(child) => (SessionKindTag::Real, child.pid()),
            SessionKind::Simulated => (SessionKindTag::Simulated, None),
        };
        SessionInfo {
            session_id: self.session_id,
            device_id: self.device_id.clone(),
            platform: self.platform,
            kind,
            pid,
            port: self.ports.map(|p| p.stream),
            pull_port: self.ports.map(|p| p.pull),
            stream_url: self.stream_url(),
            started_at: self.started_at,
            options: self.options.clone(),
        }
    }

    pub async fn stop(self) -> StopOutcome {
        match self.kind {
            SessionKind::Simulated => {
                info!(device_id = %self.device_id, "Simulated session cleared");
                StopOutcome::Simulated
            }
            SessionKind::Real(child) => {
                let pid = child.pid();
                let program = child.program().to_string();
                let termination = child.terminate(self.stop_timeout).await;
                info!(device_id = %self.device_id, %program, pid = ?pid, ?termination, "Mirroring stopped");
                StopOutcome::Stopped(termination)
            }
        }
    }
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub device_id: String,
    pub platform: Platform,
    pub kind: SessionKindTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub options: MirrorOptions,
}

/// Result of a stop request. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotTracked,
    Simulated,
    Stopped(Termination),
}

impl StopOutcome {
    pub fn describe(&self) -> &'static str {
        match self {
            StopOutcome::NotTracked => "No mirroring session was running",
            StopOutcome::Simulated => "Simulated session cleared",
            StopOutcome::Stopped(Termination::AlreadyExited) => "Mirroring process had already exited",
            StopOutcome::Stopped(Termination::Graceful) => "Mirroring stopped",
            StopOutcome::Stopped(Termination::Forced) => "Mirroring process killed after timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated(ports: Option<StreamPorts>) -> MirrorSession {
        MirrorSession {
            session_id: Uuid::new_v4(),
            device_id: "UDID-0001".into(),
            platform: Platform::Ios,
            kind: SessionKind::Simulated,
            started_at: Utc::now(),
            ports,
            options: MirrorOptions::default(),
            stop_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn simulated_session_is_always_live() {
        let mut session = simulated(None);
        assert!(session.is_live());
        assert!(session.is_live());
    }

    #[test]
    fn info_reports_stream_url_from_port() {
        let session = simulated(Some(StreamPorts { stream: 8001, pull: 7879 }));
        let info = session.info();
        assert_eq!(info.kind, SessionKindTag::Simulated);
        assert_eq!(info.port, Some(8001));
        assert_eq!(info.stream_url.as_deref(), Some("http://localhost:8001"));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "simulated");
        assert!(json.get("pid").is_none());
    }

    #[tokio::test]
    async fn stopping_simulated_session_touches_nothing() {
        assert_eq!(simulated(None).stop().await, StopOutcome::Simulated);
    }
}
