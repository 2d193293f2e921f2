// Daemon module: long-running ledger service

mod handler;
mod ipc;
mod process;
mod signals;

pub use handler::{DaemonContext, DaemonInfo};
pub use ipc::{read_frame, write_frame, IpcClient, IpcMessage, IpcResponse, IpcServer};
pub use process::ProcessManager;
pub use signals::{DaemonSignal, SignalHandler};

use crate::classifier;
use crate::config::{expand_path, Config};
use crate::error::{CivicError, Result};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::reconcile;
use crate::storage::StorageManager;
use std::sync::Arc;
use tokio::net::UnixStream;
use tokio::sync::{Notify, Semaphore};

/// Main daemon struct that manages the lifecycle and components
pub struct Daemon {
    config: Config,
    process_manager: ProcessManager,
    storage: Arc<StorageManager>,
}

impl Daemon {
    /// Open storage and prepare process bookkeeping
    pub fn new(config: Config) -> Result<Self> {
        let data_dir = expand_path(&config.storage.data_dir);
        let storage = Arc::new(StorageManager::new(data_dir)?);
        let process_manager = ProcessManager::new(expand_path(&config.daemon.pid_file));

        Ok(Self {
            config,
            process_manager,
            storage,
        })
    }

    /// Run in the current process until a shutdown signal or `stop` request
    pub async fn run_foreground(&mut self) -> Result<()> {
        self.process_manager.acquire()?;
        tracing::info!("Daemon starting (pid {})", std::process::id());

        let result = self.serve().await;

        if let Err(e) = self.process_manager.release() {
            tracing::error!("Failed to cleanup on exit: {}", e);
        }
        result
    }

    async fn serve(&self) -> Result<()> {
        let mut signal_handler = SignalHandler::new()?;

        let classifier = classifier::from_config(&self.config)?;
        let pipeline = Pipeline::new(
            self.storage.complaints.clone(),
            self.storage.ledger.clone(),
            classifier,
            PipelineSettings::from_config(&self.config)?,
        );

        let mut ipc_server = IpcServer::new(expand_path(&self.config.daemon.socket_path));
        ipc_server.bind().await?;

        let stop = Arc::new(Notify::new());
        let context = Arc::new(DaemonContext::new(
            pipeline.handle(),
            self.storage.clone(),
            self.config.clustering.threshold_degrees,
            stop.clone(),
        ));
        let connections = Arc::new(Semaphore::new(self.config.daemon.max_connections));

        tracing::info!("Daemon started successfully");

        loop {
            tokio::select! {
                accepted = ipc_server.accept() => {
                    let stream = match accepted {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            continue;
                        }
                    };

                    match connections.clone().try_acquire_owned() {
                        Ok(permit) => {
                            let context = context.clone();
                            tokio::spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_client(stream, &context).await {
                                    tracing::error!("Client handler error: {}", e);
                                }
                            });
                        }
                        Err(_) => {
                            tracing::warn!("Connection limit reached, rejecting client");
                            tokio::spawn(reject_client(stream));
                        }
                    }
                }

                sig = signal_handler.wait() => {
                    if sig.should_shutdown() {
                        tracing::info!("Shutdown signal received");
                        break;
                    }
                    self.spawn_repair();
                }

                _ = stop.notified() => {
                    tracing::info!("Stop requested by client");
                    break;
                }
            }
        }

        tracing::info!("Shutting down daemon");
        ipc_server.shutdown()?;
        pipeline.shutdown().await;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }

    fn spawn_repair(&self) {
        let storage = self.storage.clone();
        let default_department = self.config.default_department();
        tokio::task::spawn_blocking(move || {
            if let Err(e) =
                reconcile::repair(&storage.complaints, &storage.ledger, &default_department)
            {
                tracing::error!("Ledger repair failed: {}", e);
            }
        });
    }

    /// Fork into the background and run there
    pub fn start_daemon(&mut self) -> Result<()> {
        if self.process_manager.is_running() {
            let pid = self.process_manager.read_pid()?;
            return Err(CivicError::DaemonAlreadyRunning { pid });
        }

        let log_file = expand_path(&self.config.daemon.log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivicError::Io {
                source: e,
                context: format!("Failed to create log directory: {:?}", parent),
            })?;
        }

        let stdout = std::fs::File::create(log_file.with_extension("stdout")).map_err(|e| {
            CivicError::Io {
                source: e,
                context: "Failed to create stdout log file".to_string(),
            }
        })?;
        let stderr = std::fs::File::create(log_file.with_extension("stderr")).map_err(|e| {
            CivicError::Io {
                source: e,
                context: "Failed to create stderr log file".to_string(),
            }
        })?;

        // The PID file is written by `acquire` in the child
        let daemon = daemonize::Daemonize::new()
            .working_directory(std::env::current_dir().map_err(|e| CivicError::Io {
                source: e,
                context: "Failed to get current directory".to_string(),
            })?)
            .stdout(stdout)
            .stderr(stderr);

        daemon
            .start()
            .map_err(|e| CivicError::Daemon(format!("Failed to daemonize: {}", e)))?;

        // Only the child gets here; the runtime must be created after the fork
        let runtime = tokio::runtime::Runtime::new().map_err(|e| CivicError::Io {
            source: e,
            context: "Failed to create tokio runtime".to_string(),
        })?;
        runtime.block_on(async {
            if let Err(e) = self.run_foreground().await {
                tracing::error!("Daemon error: {}", e);
            }
        });

        Ok(())
    }

    /// Ask a running daemon to stop
    pub fn stop_daemon(&self) -> Result<()> {
        if !self.process_manager.is_running() {
            return Err(CivicError::DaemonNotRunning);
        }

        self.process_manager
            .signal(nix::sys::signal::Signal::SIGTERM)?;
        tracing::info!("Sent shutdown signal to daemon");

        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        status_of(&self.process_manager)
    }
}

/// Read the PID file and probe the process
pub fn status_of(process_manager: &ProcessManager) -> DaemonStatus {
    if process_manager.is_running() {
        DaemonStatus::Running {
            pid: process_manager.read_pid().ok(),
        }
    } else {
        DaemonStatus::Stopped
    }
}

/// Handle a client connection: one request, one response
async fn handle_client(mut stream: UnixStream, context: &DaemonContext) -> Result<()> {
    let message: IpcMessage = read_frame(&mut stream).await?;
    tracing::debug!("IPC request: {:?}", message);

    let response = context.handle(message).await;
    write_frame(&mut stream, &response).await
}

async fn reject_client(mut stream: UnixStream) {
    let busy = IpcResponse::error("Daemon is at its connection limit, retry shortly");
    if let Err(e) = write_frame(&mut stream, &busy).await {
        tracing::debug!("Failed to reject client: {}", e);
    }
}

/// Daemon status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: Option<i32> },
    Stopped,
}
