//! IPC client for communicating with the daemon

use anyhow::{Context, Result};
use tokio::net::UnixStream;

use crate::config::Settings;
use crate::daemon::ipc::{
    deserialize_response, read_frame, serialize_request, write_frame, DaemonRequest,
    DaemonResponse,
};

/// Client for communicating with the daemon
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Connect to the daemon
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let socket_path = settings.socket_path();

        let stream = UnixStream::connect(&socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to daemon at {:?}. Is the daemon running? Try: scribe daemon start",
                    socket_path
                )
            })?;

        Ok(Self { stream })
    }

    /// Send a request and wait for the first response
    pub async fn send(&mut self, request: DaemonRequest) -> Result<DaemonResponse> {
        write_frame(&mut self.stream, &serialize_request(&request)?).await?;
        self.next()
            .await?
            .context("Daemon closed the connection without answering")
    }

    /// Next response on a streaming connection; `None` once the daemon hangs up
    pub async fn next(&mut self) -> Result<Option<DaemonResponse>> {
        let Some(body) = read_frame(&mut self.stream).await? else {
            return Ok(None);
        };
        let response = deserialize_response(&body).context("Failed to parse response")?;
        Ok(Some(response))
    }
}
