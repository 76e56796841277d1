use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, oneshot},
};

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcRequest {
    Status,
    Pause,
    Resume,
    /// Rescan now and push whatever is pending; clears a halted retry
    ForceSync,
    Shutdown,
}

/// Snapshot of the daemon's queue and retry state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStatus {
    pub paused: bool,
    pub pending: usize,
    pub push_threshold: usize,
    pub auto_push: bool,
    pub destination: Option<String>,
    pub retry_attempts: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub halted: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum IpcResponse {
    Status(DaemonStatus),
    Ack(String),
    Error(String),
}

/// A control request handed to the daemon loop, with the channel for its answer
#[derive(Debug)]
pub struct ControlMessage {
    pub request: IpcRequest,
    pub reply: oneshot::Sender<IpcResponse>,
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the daemon is not reachable or answers garbage
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path)
            .await
            .with_context(|| format!("Failed to connect to {}", self.sock_path.display()))?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

/// Forwards decoded requests to the daemon loop and writes back its answer
#[derive(Debug, Clone)]
pub struct DaemonIpcHandler {
    control: mpsc::Sender<ControlMessage>,
}

impl DaemonIpcHandler {
    #[must_use]
    pub fn new(control: mpsc::Sender<ControlMessage>) -> Self {
        Self { control }
    }

    async fn dispatch(&self, request: IpcRequest) -> IpcResponse {
        let (reply, answer) = oneshot::channel();
        if self
            .control
            .send(ControlMessage { request, reply })
            .await
            .is_err()
        {
            return IpcResponse::Error("Daemon is shutting down".to_string());
        }
        answer
            .await
            .unwrap_or_else(|_| IpcResponse::Error("Daemon dropped the request".to_string()))
    }

    /// # Errors
    ///
    /// Returns an error if the response cannot be written
    pub async fn handle(&self, stream: &mut UnixStream, request: IpcRequest) -> Result<()> {
        log::debug!("IPC request: {request:?}");
        let response = self.dispatch(request).await;
        let encoded = bincode::serialize(&response)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }
}

/// Accept connections on `sock_path` until the process exits.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound
pub async fn listen(handler: DaemonIpcHandler, sock_path: &Path) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    match stream.read_to_end(&mut buf).await {
                        Ok(n) if n > 0 => match bincode::deserialize::<IpcRequest>(&buf) {
                            Ok(request) => {
                                if let Err(e) = handler.handle(&mut stream, request).await {
                                    log::error!("IPC handle error: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("IPC deserialize error: {e}");
                            }
                        },
                        Ok(_) => {} // Connection closed
                        Err(e) => {
                            log::error!("IPC read error: {e}");
                        }
                    }
                });
            }
            Err(e) => {
                log::error!("IPC accept error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_reaches_daemon_loop() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("test.sock");
        let (tx, mut rx) = mpsc::channel::<ControlMessage>(4);

        let listener_sock = sock.clone();
        tokio::spawn(async move {
            let _ = listen(DaemonIpcHandler::new(tx), &listener_sock).await;
        });
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let response = match msg.request {
                    IpcRequest::Status => IpcResponse::Status(DaemonStatus {
                        pending: 2,
                        ..DaemonStatus::default()
                    }),
                    other => IpcResponse::Ack(format!("{other:?}")),
                };
                let _ = msg.reply.send(response);
            }
        });

        for _ in 0..50 {
            if sock.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let client = IpcClient::new(&sock);
        let status = client.send_command(IpcRequest::Status).await.unwrap();
        assert!(matches!(status, IpcResponse::Status(s) if s.pending == 2));
        let paused = client.send_command(IpcRequest::Pause).await.unwrap();
        assert_eq!(paused, IpcResponse::Ack("Pause".to_string()));
    }

    #[tokio::test]
    async fn test_closed_daemon_reports_error() {
        let (tx, rx) = mpsc::channel::<ControlMessage>(1);
        drop(rx);
        let response = DaemonIpcHandler::new(tx).dispatch(IpcRequest::Status).await;
        assert!(matches!(response, IpcResponse::Error(_)));
    }
}
