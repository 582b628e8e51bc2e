//! Screen-mirroring sessions for attached Android and iOS devices.
//!
//! [`mirror::SessionManager`] owns one external mirroring process per device;
//! [`registry::DeviceRegistry`] discovers devices and keeps their aliases;
//! [`service::ControlService`] is the request surface the daemon serves.

pub mod client;
pub mod config;
pub mod daemon;
pub mod device;
pub mod error;
pub mod mirror;
pub mod platform;
pub mod ports;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod service;

pub use error::{MirrorError, Result};
