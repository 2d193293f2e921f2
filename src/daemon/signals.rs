// Signal handling for graceful shutdown and on-demand ledger sync

use crate::error::{CivicError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Signals the daemon reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    Terminate,
    Interrupt,
    Hangup,
    /// SIGUSR1: run a ledger repair pass
    Sync,
}

impl DaemonSignal {
    pub fn should_shutdown(self) -> bool {
        matches!(
            self,
            DaemonSignal::Terminate | DaemonSignal::Interrupt | DaemonSignal::Hangup
        )
    }
}

/// Signal handler that manages multiple Unix signals
pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
    sigusr1: Signal,
}

impl SignalHandler {
    /// Install handlers for SIGTERM, SIGINT, SIGHUP and SIGUSR1
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigusr1: install(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                DaemonSignal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                DaemonSignal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                DaemonSignal::Hangup
            }
            _ = self.sigusr1.recv() => {
                tracing::info!("Received SIGUSR1");
                DaemonSignal::Sync
            }
        }
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| CivicError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}
