//! Local TCP port selection for tools that expose a network stream.
//!
//! Ports are probed, not reserved: another process may grab one between the
//! probe and the child's own bind, in which case the child fails to start and
//! that surfaces as an ordinary spawn failure.

use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

/// How many consecutive ports are probed by default.
pub const DEFAULT_SCAN_WIDTH: u16 = 100;

/// Check whether `port` can currently be bound on loopback.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Find a free loopback port at or just above `preferred`.
///
/// Tries `preferred`, `preferred + 1`, ... up to `scan_width` candidates. When
/// none can be bound, `preferred` is returned anyway.
pub fn find_available_port(preferred: u16, scan_width: u16) -> u16 {
    let width = scan_width.max(1);
    for offset in 0..width {
        let Some(port) = preferred.checked_add(offset) else {
            break;
        };
        if port == 0 {
            continue;
        }
        if is_port_free(port) {
            if offset > 0 {
                debug!(preferred, port, "Preferred port busy, using next free port");
            }
            return port;
        }
    }

    debug!(preferred, "No free port found in range, falling back to preferred");
    preferred
}
