//! Background control daemon
//!
//! Loopback-only WebSocket server hosting the one session manager. Every
//! client request is a JSON text frame answered by a JSON reply; mirroring
//! children live as long as the daemon does.

use crate::config::Config;
use crate::platform;
use crate::protocol::{ControlRequest, Reply};
use crate::service::ControlService;
use futures_util::{SinkExt, StreamExt};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Message},
};

/// Requests are small; anything bigger is not ours.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// The two files through which a running daemon advertises itself to
/// clients: its pid and the port it listens on.
struct DaemonFiles {
    pid: PathBuf,
    port: PathBuf,
}

impl DaemonFiles {
    fn in_dir(dir: &Path) -> Self {
        Self {
            pid: dir.join("daemon.pid"),
            port: dir.join("daemon.port"),
        }
    }

    fn located() -> Self {
        Self::in_dir(&platform::config_dir())
    }

    fn publish(&self, port: u16) -> std::io::Result<()> {
        if let Some(parent) = self.pid.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid, std::process::id().to_string())?;
        std::fs::write(&self.port, port.to_string())
    }

    fn withdraw(&self) {
        let _ = std::fs::remove_file(&self.pid);
        let _ = std::fs::remove_file(&self.port);
    }

    /// Pid of a live daemon. A daemon killed without cleanup leaves its files
    /// behind; they are withdrawn here so no client dials its port.
    fn live_pid(&self) -> Option<u32> {
        let recorded = read_number::<u32>(&self.pid);
        match recorded {
            Some(pid) if platform::is_process_alive(pid) => Some(pid),
            Some(pid) => {
                tracing::info!(pid, "Daemon is gone, removing its pid and port files");
                self.withdraw();
                None
            }
            None => {
                if self.port.exists() {
                    tracing::info!("Port file without a daemon pid, removing it");
                    self.withdraw();
                }
                None
            }
        }
    }

    fn live_port(&self) -> Option<u16> {
        self.live_pid()?;
        read_number(&self.port)
    }
}

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Port of the running daemon.
pub fn get_port() -> Option<u16> {
    DaemonFiles::located().live_port()
}

/// Pid of the running daemon.
pub fn get_pid() -> Option<u32> {
    DaemonFiles::located().live_pid()
}

type SharedService = Arc<ControlService>;

/// Start the daemon (blocking until Ctrl+C or SIGTERM)
pub async fn run(config: Config, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await?;
    let port = listener.local_addr()?.port();

    let files = DaemonFiles::located();
    files.publish(port)?;

    let service: SharedService = Arc::new(ControlService::from_config(&config));
    tracing::info!(port, "Control daemon listening on 127.0.0.1");

    #[cfg(unix)]
    run_server_loop_unix(listener, service.clone()).await;

    #[cfg(not(unix))]
    run_server_loop_ctrlc_only(listener, service.clone()).await;

    let stopped = service.shutdown().await;
    tracing::info!(stopped, "Daemon stopped");

    files.withdraw();
    Ok(())
}

/// Server loop with Unix signal handling (SIGTERM + Ctrl+C)
#[cfg(unix)]
async fn run_server_loop_unix(listener: TcpListener, service: SharedService) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::warn!(
                "Failed to set up SIGTERM handler: {}. Only Ctrl+C will work for shutdown.",
                e
            );
            run_server_loop_ctrlc_only(listener, service).await;
            return;
        }
    };

    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_client(stream, addr, service.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Daemon shutting down (Ctrl+C)");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Daemon shutting down (SIGTERM)");
                break;
            }
        }
    }
}

/// Server loop with Ctrl+C only (fallback or non-Unix)
async fn run_server_loop_ctrlc_only(listener: TcpListener, service: SharedService) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                if let Ok((stream, addr)) = result {
                    tokio::spawn(serve_client(stream, addr, service.clone()));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Daemon shutting down (Ctrl+C)");
                break;
            }
        }
    }
}

async fn serve_client(stream: TcpStream, addr: SocketAddr, service: SharedService) {
    if let Err(e) = handle_connection(stream, addr, service).await {
        tracing::debug!(%addr, "Client connection ended with error: {}", e);
    }
}

/// Answer requests on one connection until the client goes away
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: SharedService,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if !addr.ip().is_loopback() {
        tracing::warn!("Rejecting non-loopback client: {}", addr);
        return Ok(());
    }

    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_BYTES),
        max_frame_size: Some(MAX_MESSAGE_BYTES),
        ..Default::default()
    };
    let ws = accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut tx, mut rx) = ws.split();
    tracing::debug!("Client connected: {}", addr);

    while let Some(msg) = rx.next().await {
        match msg? {
            Message::Text(text) => {
                let reply = dispatch(&service, &text).await;
                tx.send(Message::Text(serde_json::to_string(&reply)?)).await?;
            }
            Message::Ping(data) => tx.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }

    tracing::debug!("Client disconnected: {}", addr);
    Ok(())
}

async fn dispatch(service: &ControlService, text: &str) -> Reply {
    match serde_json::from_str::<ControlRequest>(text) {
        Ok(request) => {
            tracing::debug!(?request, "Control request");
            service.handle(request).await
        }
        Err(e) => Reply {
            success: false,
            message: format!("Malformed request: {}", e),
            error_kind: Some("invalid_payload".to_string()),
            data: None,
        },
    }
}
