//! CLI side of the control channel

use crate::daemon;
use crate::protocol::{ControlRequest, Reply};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Covers the slowest request: a start waiting out its grace period.
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Port of the running daemon, if any.
pub fn daemon_port() -> Option<u16> {
    daemon::get_port()
}

/// Send one request to the daemon on `port` and wait for its reply.
pub async fn send(port: u16, request: &ControlRequest) -> Result<Reply, BoxError> {
    let url = format!("ws://127.0.0.1:{}", port);
    let (mut ws, _) = connect_async(url.as_str()).await?;
    ws.send(Message::Text(serde_json::to_string(request)?)).await?;

    let reply = tokio::time::timeout(REPLY_TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            if let Message::Text(text) = msg? {
                return Ok::<_, BoxError>(Some(serde_json::from_str::<Reply>(&text)?));
            }
        }
        Ok(None)
    })
    .await
    .map_err(|_| format!("no reply from daemon within {:?}", REPLY_TIMEOUT))??;

    let _ = ws.close(None).await;
    reply.ok_or_else(|| "daemon closed the connection without replying".into())
}
