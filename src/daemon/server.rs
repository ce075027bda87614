//! Unix socket IPC server for daemon communication

use anyhow::Result;
use std::path::PathBuf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::daemon::ipc::{
    deserialize_request, read_frame, serialize_response, write_frame, DaemonRequest,
    DaemonResponse,
};

/// Responses for one request; streaming requests send several
pub type ResponseSender = mpsc::Sender<DaemonResponse>;

/// Command channel for the server
pub type CommandSender = mpsc::Sender<(DaemonRequest, ResponseSender)>;
pub type CommandReceiver = mpsc::Receiver<(DaemonRequest, ResponseSender)>;

/// Buffer between the handler and a connection's socket writes
const RESPONSE_BUFFER: usize = 64;

/// IPC server that listens on a Unix socket
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Start listening on the socket
    pub async fn start(&mut self) -> Result<()> {
        // Remove stale socket file if it exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);
        self.listener = Some(listener);

        Ok(())
    }

    /// Run the server, forwarding commands to the handler
    pub async fn run(&mut self, cmd_tx: CommandSender) -> Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("IPC server was not started");
        };

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let tx = cmd_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, tx).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// Handle a single client connection
///
/// Each request is answered by every response the handler sends until it
/// drops its sender, so a subscription keeps the connection streaming.
async fn handle_connection(mut stream: UnixStream, cmd_tx: CommandSender) -> Result<()> {
    debug!("New client connection");

    while let Some(body) = read_frame(&mut stream).await? {
        let request = match deserialize_request(&body) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to deserialize request: {}", e);
                let response = DaemonResponse::Error {
                    message: format!("Invalid request: {}", e),
                };
                write_frame(&mut stream, &serialize_response(&response)?).await?;
                continue;
            }
        };

        debug!("Received request: {:?}", request);

        let is_shutdown = matches!(request, DaemonRequest::Shutdown);

        let (resp_tx, mut resp_rx) = mpsc::channel(RESPONSE_BUFFER);
        if cmd_tx.send((request, resp_tx)).await.is_err() {
            let response = DaemonResponse::Error {
                message: "Daemon is shutting down".to_string(),
            };
            write_frame(&mut stream, &serialize_response(&response)?).await?;
            break;
        }

        while let Some(response) = resp_rx.recv().await {
            write_frame(&mut stream, &serialize_response(&response)?).await?;
            if is_shutdown || matches!(response, DaemonResponse::EndOfStream) {
                break;
            }
        }
        drop(resp_rx);

        if is_shutdown {
            break;
        }
    }

    debug!("Client disconnected");
    Ok(())
}
