// Inter-process communication via Unix domain sockets with length-prefixed JSON

use crate::complaints::{Actor, ComplaintStatus, NewComplaint};
use crate::department::Department;
use crate::error::{CivicError, Result};
use crate::ledger::LedgerQuery;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Requests sent from the CLI (or any other client) to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// File a complaint
    Submit {
        actor: Actor,
        complaint: NewComplaint,
    },
    UpdateStatus {
        actor: Actor,
        id: i64,
        status: ComplaintStatus,
    },
    /// Route a complaint to a department
    Assign {
        actor: Actor,
        id: i64,
        department: Department,
    },
    Delete {
        actor: Actor,
        id: i64,
    },
    BulkDelete {
        actor: Actor,
        ids: Vec<i64>,
    },
    /// List complaints, optionally for one department
    Complaints {
        #[serde(default)]
        department: Option<Department>,
    },
    /// Group located complaints into hotspots
    Hotspots {
        #[serde(default)]
        threshold: Option<f64>,
    },
    /// Read ledger blocks
    Ledger {
        #[serde(flatten)]
        query: LedgerQuery,
    },
    /// Verify the hash chain
    Verify,
    /// Backfill blocks for uncovered complaints
    Repair,
    /// Request daemon status
    Status,
    /// Request daemon to stop
    Stop,
}

/// IPC response message sent from daemon back to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    /// Create a successful response
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Create a successful response carrying `data`
    pub fn with_data<T: Serialize>(message: impl Into<String>, data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                success: true,
                message: Some(message.into()),
                data: Some(value),
            },
            Err(e) => Self::error(format!("Failed to encode response: {}", e)),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Decode `data` into a typed value
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .data
            .clone()
            .ok_or_else(|| CivicError::Daemon("Response carried no data".to_string()))?;
        serde_json::from_value(value).map_err(|e| CivicError::Json {
            source: e,
            context: "Failed to decode response data".to_string(),
        })
    }
}

/// Unix domain socket server for IPC
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

    /// Bind to the socket path and start listening
    pub async fn bind(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| CivicError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| CivicError::Daemon("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| CivicError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Shutdown the server and clean up socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = reader.read_u32().await.map_err(|e| CivicError::Io {
        source: e,
        context: "Failed to read frame length".to_string(),
    })?;

    if length > MAX_MESSAGE_SIZE {
        return Err(CivicError::Daemon(format!(
            "Message too large: {} bytes (max: {})",
            length, MAX_MESSAGE_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| CivicError::Io {
            source: e,
            context: "Failed to read frame payload".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| CivicError::Json {
        source: e,
        context: "Failed to deserialize IPC frame".to_string(),
    })
}

/// Write one length-prefixed JSON frame (4-byte big-endian length)
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|e| CivicError::Json {
        source: e,
        context: "Failed to serialize IPC frame".to_string(),
    })?;

    if payload.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CivicError::Daemon(format!(
            "Message too large: {} bytes (max: {})",
            payload.len(),
            MAX_MESSAGE_SIZE
        )));
    }

    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| CivicError::Io {
            source: e,
            context: "Failed to write frame length".to_string(),
        })?;

    writer.write_all(&payload).await.map_err(|e| CivicError::Io {
        source: e,
        context: "Failed to write frame payload".to_string(),
    })?;

    writer.flush().await.map_err(|e| CivicError::Io {
        source: e,
        context: "Failed to flush frame".to_string(),
    })?;

    Ok(())
}

/// IPC client for sending messages to the daemon
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connect, send one message, and wait for its response
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
            ) {
                CivicError::DaemonNotRunning
            } else {
                CivicError::Io {
                    source: e,
                    context: format!("Failed to connect to daemon at {:?}", self.socket_path),
                }
            }
        })?;

        write_frame(&mut stream, message).await?;
        read_frame(&mut stream).await
    }
}
