//! Mirroring sessions: one external child process per device.

pub mod manager;
pub mod session;
pub mod window;

pub use manager::SessionManager;
pub use session::{MirrorSession, SessionInfo, SessionKind, SessionKindTag, StopOutcome};
pub use window::WindowSignaller;
