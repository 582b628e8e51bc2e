//! Per-device mirroring lifecycle.
//!
//! Each device id owns a slot holding at most one [`MirrorSession`]. The slot
//! table itself is only locked long enough to find, create or prune a slot;
//! the slot's async mutex is what serializes start/stop/act for one device, and
//! it is held across the spawn, grace period and terminate. Devices never wait
//! on each other.
//!
//! A slot is pruned once it is empty and no caller holds it, so the table only
//! grows with devices that actually have sessions.
//!
//! There is no background sweeper. Any operation that looks at a slot polls
//! its child and clears the slot if the child has exited.

use super::session::{MirrorSession, SessionInfo, SessionKind, StopOutcome};
use crate::device::{
    ActionOutcome, DeviceAction, DevicePlatform, Launcher, MirrorOptions, Platform, StreamPorts,
};
use crate::error::{MirrorError, Result};
use crate::platform;
use crate::ports::{find_available_port, DEFAULT_SCAN_WIDTH};
use crate::process;
use crate::registry::DeviceRegistry;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Value;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes of the child's log attached to an early-exit error.
const LOG_TAIL_BYTES: u64 = 512;

type Slot = Arc<Mutex<Option<MirrorSession>>>;

pub struct SessionManager {
    slots: DashMap<String, Slot>,
    registry: Arc<DeviceRegistry>,
    log_dir: PathBuf,
}

impl SessionManager {
    pub fn new(registry: Arc<DeviceRegistry>, log_dir: PathBuf) -> Self {
        Self {
            slots: DashMap::new(),
            registry,
            log_dir,
        }
    }

    /// Slot for `device_id`, created on first use.
    fn slot(&self, device_id: &str) -> Slot {
        self.slots
            .entry(device_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing_slot(&self, device_id: &str) -> Option<Slot> {
        self.slots.get(device_id).map(|s| s.value().clone())
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.slots.iter().map(|s| s.value().clone()).collect()
    }

    /// Remove the slot for `device_id` if it holds no session and nobody else
    /// has a handle to it. The caller must have dropped its own handle.
    fn prune(&self, device_id: &str) {
        let removed = self.slots.remove_if(device_id, |_, slot| {
            Arc::strong_count(slot) == 1 && slot.try_lock().map(|s| s.is_none()).unwrap_or(false)
        });
        if removed.is_some() {
            debug!(device_id, "Slot pruned");
        }
    }

    /// Start mirroring `device_id`.
    pub async fn start(&self, device_id: &str, options: MirrorOptions) -> Result<SessionInfo> {
        let slot = self.slot(device_id);
        let mut guard = slot.lock().await;
        let result = self.start_locked(&mut guard, device_id, options).await;
        drop(guard);
        if result.is_err() {
            drop(slot);
            self.prune(device_id);
        }
        result
    }

    async fn start_locked(
        &self,
        guard: &mut Option<MirrorSession>,
        device_id: &str,
        options: MirrorOptions,
    ) -> Result<SessionInfo> {
        if let Some(session) = guard.as_mut() {
            if session.is_live() {
                return Err(MirrorError::AlreadyActive(device_id.to_string()));
            }
            info!(device_id, "Reaping exited mirroring session");
            *guard = None;
        }

        let backend = self
            .registry
            .locate(device_id)
            .await?
            .ok_or_else(|| MirrorError::NotConnected(device_id.to_string()))?;

        let session = self.launch(backend.as_ref(), device_id, options).await?;
        let info = session.info();
        info!(
            device_id,
            session_id = %info.session_id,
            platform = %info.platform,
            pid = ?info.pid,
            port = ?info.port,
            "Mirroring started"
        );
        *guard = Some(session);
        Ok(info)
    }

    async fn launch(
        &self,
        backend: &dyn DevicePlatform,
        device_id: &str,
        options: MirrorOptions,
    ) -> Result<MirrorSession> {
        let launcher = backend.mirror_launcher()?;
        let ports = backend.stream_ports(&options).map(allocate_ports);
        let timings = backend.timings();

        let kind = match launcher {
            Launcher::Simulated => {
                warn!(device_id, "Launcher unavailable, recording simulated session");
                SessionKind::Simulated
            }
            Launcher::Binary(program) => {
                let args = backend.mirror_args(device_id, &options, ports.as_ref());
                let log_file = self
                    .log_dir
                    .join(format!("{}.log", platform::file_safe(device_id)));
                debug!(device_id, program = %program.display(), ?args, "Launching mirror");

                let mut child = process::spawn(&program, &args, Some(&log_file))?;
                tokio::time::sleep(timings.grace_period).await;

                if let Some(status) = child.try_exit() {
                    warn!(device_id, %status, "Mirroring process exited during startup");
                    return Err(MirrorError::SpawnExitedEarly {
                        device_id: device_id.to_string(),
                        status: status.to_string(),
                        detail: log_tail(&log_file)
                            .map(|tail| format!(": {}", tail))
                            .unwrap_or_default(),
                    });
                }
                // No await between here and the slot assignment in `start_locked`.
                child.release();
                SessionKind::Real(child)
            }
        };

        Ok(MirrorSession {
            session_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            platform: backend.platform(),
            kind,
            started_at: Utc::now(),
            ports,
            options,
            stop_timeout: timings.stop_timeout,
        })
    }

    /// Stop mirroring `device_id`. Succeeds whether or not anything was
    /// running; the slot is empty afterwards either way.
    pub async fn stop(&self, device_id: &str) -> StopOutcome {
        let Some(slot) = self.existing_slot(device_id) else {
            return StopOutcome::NotTracked;
        };
        let mut guard = slot.lock().await;
        let session = guard.take();
        let outcome = match session {
            Some(session) => session.stop().await,
            None => StopOutcome::NotTracked,
        };
        drop(guard);
        drop(slot);
        self.prune(device_id);
        outcome
    }

    /// Whether `device_id` has a live session. Clears the slot if the child
    /// has exited.
    pub async fn is_active(&self, device_id: &str) -> bool {
        self.live_platform(device_id).await.is_some()
    }

    async fn live_platform(&self, device_id: &str) -> Option<Platform> {
        let slot = self.existing_slot(device_id)?;
        let mut guard = slot.lock().await;
        reap(&mut guard)
    }

    pub async fn session(&self, device_id: &str) -> Option<SessionInfo> {
        let slot = self.existing_slot(device_id)?;
        let mut guard = slot.lock().await;
        reap(&mut guard)?;
        guard.as_ref().map(MirrorSession::info)
    }

    /// Every live session, oldest first.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let mut out = Vec::new();
        for slot in self.all_slots() {
            let mut guard = slot.lock().await;
            if reap(&mut guard).is_some() {
                out.extend(guard.as_ref().map(MirrorSession::info));
            }
        }
        out.sort_by_key(|s| s.started_at);
        out
    }

    /// Dispatch a named action to `device_id`.
    pub async fn execute_action(
        &self,
        device_id: &str,
        action: &str,
        payload: Option<&Value>,
    ) -> Result<ActionOutcome> {
        let action = DeviceAction::parse(action, payload)?;
        let session_platform = self.live_platform(device_id).await;

        if action.requires_session() {
            let backend = session_platform
                .and_then(|p| self.registry.backend(p))
                .ok_or_else(|| MirrorError::NoActiveSession(device_id.to_string()))?;
            return match &action {
                DeviceAction::MirrorDisplay(power) => {
                    backend.toggle_mirror_display(device_id, *power).await?;
                    Ok(ActionOutcome::message(format!("Sent {}", action)))
                }
                other => backend.perform(device_id, other).await,
            };
        }

        let backend = match session_platform.and_then(|p| self.registry.backend(p)) {
            Some(backend) => backend,
            None => self
                .registry
                .locate(device_id)
                .await?
                .ok_or_else(|| MirrorError::NotConnected(device_id.to_string()))?,
        };
        let outcome = backend.perform(device_id, &action).await?;
        debug!(device_id, %action, "Action performed");
        Ok(outcome)
    }

    /// Stop every tracked session. Returns how many were running.
    pub async fn shutdown_all(&self) -> usize {
        let stops = self.all_slots().into_iter().map(|slot| async move {
            let mut guard = slot.lock().await;
            match guard.take() {
                Some(session) => {
                    session.stop().await;
                    1usize
                }
                None => 0,
            }
        });
        let stopped: usize = join_all(stops).await.into_iter().sum();
        if stopped > 0 {
            info!(stopped, "All mirroring sessions stopped");
        }
        stopped
    }
}

/// Clear the slot if its child has exited; returns the live session's platform.
fn reap(slot: &mut Option<MirrorSession>) -> Option<Platform> {
    let session = slot.as_mut()?;
    if session.is_live() {
        return Some(session.platform);
    }
    info!(device_id = %session.device_id, "Reaping exited mirroring session");
    *slot = None;
    None
}

/// Pick the stream and pull ports, never the same one for both.
fn allocate_ports(preferred: StreamPorts) -> StreamPorts {
    let stream = find_available_port(preferred.stream, DEFAULT_SCAN_WIDTH);
    let mut pull = find_available_port(preferred.pull, DEFAULT_SCAN_WIDTH);
    if pull == stream {
        pull = find_available_port(stream.wrapping_add(1).max(1), DEFAULT_SCAN_WIDTH);
    }
    if stream != preferred.stream {
        info!(preferred = preferred.stream, port = stream, "Stream port moved");
    }
    StreamPorts { stream, pull }
}

fn log_tail(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))
        .ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;
    let tail = String::from_utf8_lossy(&buf).trim().to_string();
    (!tail.is_empty()).then_some(tail)
}
