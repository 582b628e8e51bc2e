//! Launching external tools.
//!
//! Two modes: [`run`] for short commands whose output we need, bounded by a
//! timeout, and [`spawn`] for long-running mirroring children that outlive the
//! call. Spawned children get their own process group so a Ctrl+C aimed at
//! the controlling terminal does not take them down with the caller.
//!
//! A freshly spawned [`ChildHandle`] kills its child when dropped. Once an
//! owner has taken responsibility for the child it calls
//! [`ChildHandle::release`], after which dropping the handle leaves the child
//! running.

use crate::error::{MirrorError, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured result of a bounded command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into [`MirrorError::ToolFailed`].
    pub fn require_success(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(MirrorError::ToolFailed {
                program: program.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

fn display_name(program: &OsStr) -> String {
    program.to_string_lossy().into_owned()
}

fn launch_error(program: &str, e: io::Error) -> MirrorError {
    match e.kind() {
        io::ErrorKind::NotFound => MirrorError::ToolNotFound(program.to_string()),
        _ => MirrorError::SpawnFailed {
            program: program.to_string(),
            reason: e.to_string(),
        },
    }
}

/// Run a command to completion, giving up after `timeout`.
///
/// The child is killed if the deadline passes.
pub async fn run<P, I, S>(program: P, args: I, timeout: Duration) -> Result<CommandOutput>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = display_name(program.as_ref());
    let mut cmd = Command::new(program.as_ref());
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    debug!(program = %name, "Running command");

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            return Err(MirrorError::Timeout {
                program: name,
                secs: timeout.as_secs(),
            })
        }
        Ok(Err(e)) => return Err(launch_error(&name, e)),
        Ok(Ok(output)) => output,
    };

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Start a long-running child and return as soon as it exists.
///
/// stdout and stderr go to `log_file` when given, otherwise they are discarded.
pub fn spawn<P, I, S>(program: P, args: I, log_file: Option<&Path>) -> Result<ChildHandle>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = display_name(program.as_ref());
    let mut cmd = Command::new(program.as_ref());
    cmd.args(args).stdin(Stdio::null());

    match log_file {
        Some(path) => {
            let file = open_log(path).map_err(|e| MirrorError::SpawnFailed {
                program: name.clone(),
                reason: format!("cannot open log {}: {}", path.display(), e),
            })?;
            let err_file = file.try_clone().map_err(|e| MirrorError::SpawnFailed {
                program: name.clone(),
                reason: e.to_string(),
            })?;
            cmd.stdout(file).stderr(err_file);
        }
        None => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }

    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

    let child = cmd.spawn().map_err(|e| launch_error(&name, e))?;
    let handle = ChildHandle {
        pid: child.id(),
        program: name,
        child,
        kill_on_drop: true,
    };
    debug!(program = %handle.program, pid = ?handle.pid, "Spawned child");
    Ok(handle)
}

fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// How a child ended up stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// It had already exited before we asked.
    AlreadyExited,
    /// It exited after the polite request.
    Graceful,
    /// It had to be killed.
    Forced,
}

/// Handle to a spawned child process.
#[derive(Debug)]
pub struct ChildHandle {
    program: String,
    pid: Option<u32>,
    child: Child,
    kill_on_drop: bool,
}

impl ChildHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Let the child outlive this handle.
    pub fn release(&mut self) {
        self.kill_on_drop = false;
    }

    /// Non-blocking poll. `Some(status)` once the child has exited.
    ///
    /// A poll error is treated as an exit, and the child is killed first.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(program = %self.program, pid = ?self.pid, "Failed to poll child, killing it: {}", e);
                if let Err(e) = self.child.start_kill() {
                    debug!(program = %self.program, pid = ?self.pid, "Kill after failed poll: {}", e);
                }
                Some(ExitStatus::default())
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.try_exit().is_none()
    }

    /// Ask the child to exit, escalating to a kill after `timeout`.
    ///
    /// If the returned future is dropped early the child is killed.
    pub async fn terminate(mut self, timeout: Duration) -> Termination {
        self.kill_on_drop = true;
        if self.try_exit().is_some() {
            return Termination::AlreadyExited;
        }

        if self.request_exit() {
            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => return Termination::Graceful,
                Ok(Err(e)) => {
                    warn!(program = %self.program, pid = ?self.pid, "Wait after SIGTERM failed: {}", e)
                }
                Err(_) => {
                    warn!(
                        program = %self.program,
                        pid = ?self.pid,
                        "Child ignored termination request for {:?}, killing",
                        timeout
                    );
                }
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!(program = %self.program, pid = ?self.pid, "Failed to kill child: {}", e);
        }
        Termination::Forced
    }

    /// Send the platform's polite termination signal. Returns false when there
    /// is no such thing and the caller should go straight to a kill.
    #[cfg(unix)]
    fn request_exit(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                debug!(pid, "SIGTERM failed: {}", e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&self) -> bool {
        false
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if !self.kill_on_drop {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            warn!(program = %self.program, pid = ?self.pid, "Handle dropped before release, killing child");
            let _ = self.child.start_kill();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn run_captures_stdout_and_exit_code() {
        let out = run("sh", ["-c", "echo hello; echo oops >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn run_missing_tool_is_tool_not_found() {
        let err = run(
            "devmirror-no-such-tool",
            Vec::<String>::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MirrorError::ToolNotFound(ref t) if t == "devmirror-no-such-tool"));
    }

    #[tokio::test]
    async fn run_times_out() {
        let err = run("sleep", ["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn require_success_maps_non_zero_exit() {
        let out = run("sh", ["-c", "echo bad >&2; exit 1"], Duration::from_secs(5))
            .await
            .unwrap();
        let err = out.require_success("sh").unwrap_err();
        assert!(matches!(err, MirrorError::ToolFailed { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn spawned_child_stops_gracefully() {
        let mut child = spawn("sleep", ["30"], None).unwrap();
        assert!(child.pid().is_some());
        assert!(child.is_running());

        let outcome = child.terminate(Duration::from_secs(5)).await;
        assert_eq!(outcome, Termination::Graceful);
    }

    #[tokio::test]
    async fn stubborn_child_is_killed() {
        let child = spawn("sh", ["-c", "trap '' TERM; exec sleep 30"], None).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let outcome = child.terminate(Duration::from_millis(200)).await;
        assert_eq!(outcome, Termination::Forced);
    }

    #[tokio::test]
    async fn exited_child_is_observed_and_logged() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("logs").join("child.log");
        let mut child = spawn("sh", ["-c", "echo started; exit 2"], Some(&log)).unwrap();

        let mut status = None;
        for _ in 0..50 {
            status = child.try_exit();
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status.and_then(|s| s.code()), Some(2));
        assert_eq!(child.terminate(Duration::from_secs(1)).await, Termination::AlreadyExited);
        assert!(std::fs::read_to_string(&log).unwrap().contains("started"));
    }

    fn is_alive(pid: u32) -> bool {
        // A killed child may linger as a zombie until reaped.
        let out = std::process::Command::new("ps")
            .args(["-o", "stat=", "-p", &pid.to_string()])
            .output()
            .unwrap();
        let stat = String::from_utf8_lossy(&out.stdout);
        !stat.trim().is_empty() && !stat.trim_start().starts_with('Z')
    }

    #[tokio::test]
    async fn dropped_handle_kills_child() {
        let child = spawn("sleep", ["30"], None).unwrap();
        let pid = child.pid().unwrap();
        drop(child);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn released_handle_leaves_child_running() {
        let mut child = spawn("sleep", ["30"], None).unwrap();
        let pid = child.pid().unwrap();
        child.release();
        drop(child);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(is_alive(pid));
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGKILL,
        )
        .unwrap();
    }

    #[test]
    fn spawn_missing_tool_is_tool_not_found() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let err = spawn("devmirror-no-such-tool", Vec::<String>::new(), None).unwrap_err();
        assert!(matches!(err, MirrorError::ToolNotFound(_)));
    }
}
