//! Host platform helpers: well-known directories and external tool lookup.

use std::path::{Path, PathBuf};

/// Name of the per-user configuration directory.
const CONFIG_DIR_NAME: &str = ".devmirror";

/// Get the user's home directory
pub fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}

/// Configuration directory (`~/.devmirror`, or `./.devmirror` without a home)
pub fn config_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default folder for screenshots pulled from devices
pub fn default_screenshots_dir() -> PathBuf {
    dirs_next::picture_dir()
        .map(|p| p.join("Device Screenshots"))
        .unwrap_or_else(|| config_dir().join("screenshots"))
}

/// Resolve a configured tool to an executable path.
///
/// Entries containing a path separator are taken literally and must exist;
/// bare names are looked up on `PATH`.
pub fn resolve_tool(tool: &str) -> Option<PathBuf> {
    let path = Path::new(tool);
    if path.components().count() > 1 || path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(tool).ok()
}

/// Check whether a process with `pid` exists.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        // Signal 0 only performs the existence/permission check.
        Ok(raw) => kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH"])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// Turn a device identifier into something safe to use as a file name.
///
/// Serials such as `192.168.1.20:5555` or `emulator-5554` keep their
/// alphanumerics; everything else becomes `_`.
pub fn file_safe(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "device".to_string()
    } else {
        cleaned
    }
}

/// Last `n` characters of an identifier, used for default aliases and names.
pub fn id_suffix(id: &str, n: usize) -> &str {
    let count = id.chars().count();
    if count <= n {
        return id;
    }
    let skip = count - n;
    match id.char_indices().nth(skip) {
        Some((idx, _)) => &id[idx..],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn file_safe_replaces_separators() {
        assert_eq!(file_safe("192.168.1.20:5555"), "192.168.1.20_5555");
        assert_eq!(file_safe("emulator-5554"), "emulator-5554");
        assert_eq!(file_safe(""), "device");
    }

    #[test]
    fn id_suffix_takes_last_chars() {
        assert_eq!(id_suffix("R58M12ABCDE", 4), "BCDE");
        assert_eq!(id_suffix("abc", 4), "abc");
    }

    #[test]
    fn resolve_tool_rejects_missing_explicit_path() {
        assert!(resolve_tool("/definitely/not/here/adb").is_none());
    }
}
