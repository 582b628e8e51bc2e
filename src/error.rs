//! Error types for device mirroring.
//!
//! Every tool or process failure is translated into one of these kinds before it
//! leaves the session manager, so callers only ever see a closed set.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: String, secs: u64 },

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Mirroring process for {device_id} exited during startup ({status}){detail}")]
    SpawnExitedEarly {
        device_id: String,
        status: String,
        detail: String,
    },

    #[error("{program} failed with exit code {code:?}: {stderr}")]
    ToolFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Mirroring already active for {0}")]
    AlreadyActive(String),

    #[error("No active mirroring session for {0}")]
    NoActiveSession(String),

    #[error("Mirroring window not found: {0}")]
    WindowNotFound(String),

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Persisted device table is corrupt: {0}")]
    PersistenceCorrupt(String),
}

impl MirrorError {
    /// Stable identifier used in reply envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorError::ToolNotFound(_) => "tool_not_found",
            MirrorError::Timeout { .. } => "timeout",
            MirrorError::SpawnFailed { .. } => "spawn_failed",
            MirrorError::SpawnExitedEarly { .. } => "spawn_exited_early",
            MirrorError::ToolFailed { .. } => "tool_failed",
            MirrorError::NotConnected(_) => "not_connected",
            MirrorError::AlreadyActive(_) => "already_active",
            MirrorError::NoActiveSession(_) => "no_active_session",
            MirrorError::WindowNotFound(_) => "window_not_found",
            MirrorError::UnsupportedAction(_) => "unsupported_action",
            MirrorError::InvalidPayload(_) => "invalid_payload",
            MirrorError::PersistenceCorrupt(_) => "persistence_corrupt",
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
