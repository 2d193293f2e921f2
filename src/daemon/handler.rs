// Request dispatch for IPC clients

use super::ipc::{IpcMessage, IpcResponse};
use crate::clustering;
use crate::error::{CivicError, Result};
use crate::pipeline::{PipelineHandle, PipelineStats};
use crate::reconcile;
use crate::storage::{DbStats, StorageManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;

/// Payload of a `status` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub pipeline: PipelineStats,
    pub storage: DbStats,
}

/// Everything a client request may touch
pub struct DaemonContext {
    pipeline: PipelineHandle,
    storage: Arc<StorageManager>,
    hotspot_threshold: f64,
    stop: Arc<Notify>,
    started_at: DateTime<Utc>,
}

impl DaemonContext {
    pub fn new(
        pipeline: PipelineHandle,
        storage: Arc<StorageManager>,
        hotspot_threshold: f64,
        stop: Arc<Notify>,
    ) -> Self {
        Self {
            pipeline,
            storage,
            hotspot_threshold,
            stop,
            started_at: Utc::now(),
        }
    }

    /// Answer one request; failures become error responses
    pub async fn handle(&self, message: IpcMessage) -> IpcResponse {
        match self.dispatch(message).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Request failed: {}", e);
                IpcResponse::error(e.to_string())
            }
        }
    }

    /// Storage work runs on the blocking pool; SQLite may wait on its
    /// busy timeout while another writer holds the lock.
    async fn dispatch(&self, message: IpcMessage) -> Result<IpcResponse> {
        let pipeline = self.pipeline.clone();
        let storage = self.storage.clone();

        let response = match message {
            IpcMessage::Submit { actor, complaint } => {
                let submission = blocking(move || pipeline.submit(&actor, complaint)).await?;
                IpcResponse::with_data(
                    format!("Complaint #{} filed", submission.complaint.id),
                    &submission,
                )
            }
            IpcMessage::UpdateStatus { actor, id, status } => {
                let complaint =
                    blocking(move || pipeline.update_status(&actor, id, status)).await?;
                IpcResponse::with_data(format!("Complaint #{} is now {}", id, status), &complaint)
            }
            IpcMessage::Assign {
                actor,
                id,
                department,
            } => {
                let message = format!("Complaint #{} assigned to {}", id, department);
                let complaint =
                    blocking(move || pipeline.assign_department(&actor, id, department)).await?;
                IpcResponse::with_data(message, &complaint)
            }
            IpcMessage::Delete { actor, id } => {
                let complaint = blocking(move || pipeline.delete(&actor, id)).await?;
                IpcResponse::with_data(format!("Complaint #{} deleted", id), &complaint)
            }
            IpcMessage::BulkDelete { actor, ids } => {
                let deleted = blocking(move || pipeline.bulk_delete(&actor, &ids)).await?;
                IpcResponse::with_data(format!("{} complaints deleted", deleted.len()), &deleted)
            }
            IpcMessage::Complaints { department } => {
                let complaints = blocking(move || match department {
                    Some(department) => storage.complaints.list_by_department(&department),
                    None => storage.complaints.list(),
                })
                .await?;
                IpcResponse::with_data(format!("{} complaints", complaints.len()), &complaints)
            }
            IpcMessage::Hotspots { threshold } => {
                let located = blocking(move || storage.complaints.list_located()).await?;
                let groups =
                    clustering::group(&located, threshold.unwrap_or(self.hotspot_threshold));
                IpcResponse::with_data(format!("{} hotspots", groups.len()), &groups)
            }
            IpcMessage::Ledger { query } => {
                let blocks = blocking(move || storage.ledger.query(&query)).await?;
                IpcResponse::with_data(format!("{} blocks", blocks.len()), &blocks)
            }
            IpcMessage::Verify => {
                let report = blocking(move || storage.ledger.verify()).await?;
                IpcResponse::with_data(
                    format!("Chain intact: {} blocks", report.blocks_checked),
                    &report,
                )
            }
            IpcMessage::Repair => {
                let default_department = pipeline.default_department().clone();
                let report = blocking(move || {
                    reconcile::repair(&storage.complaints, &storage.ledger, &default_department)
                })
                .await?;
                IpcResponse::with_data(
                    format!("Added {} missing blocks", report.blocks_added),
                    &report,
                )
            }
            IpcMessage::Status => {
                let db_stats = blocking(move || storage.database.stats()).await?;
                let info = DaemonInfo {
                    pid: std::process::id(),
                    started_at: self.started_at,
                    uptime_secs: (Utc::now() - self.started_at).num_seconds(),
                    pipeline: pipeline.stats(),
                    storage: db_stats,
                };
                IpcResponse::with_data("Daemon is running", &info)
            }
            IpcMessage::Stop => {
                self.stop.notify_one();
                IpcResponse::success("Shutdown initiated")
            }
        };

        Ok(response)
    }
}

/// Run a synchronous storage operation off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CivicError::Daemon(format!("Background task failed: {}", e)))?
}
