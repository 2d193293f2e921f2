//! Submission and classification pipeline
//!
//! `submit` persists the complaint, records what is already certain on the
//! ledger, and queues the complaint for classification without waiting on
//! it. A dispatcher task drains the bounded queue and runs each
//! classification in its own task, bounded by a semaphore and a per-call
//! timeout. Each finished call is settled into exactly one [`Transition`].

mod settle;

pub use settle::{ClassificationOutcome, Transition};

use crate::classifier::{ClassificationRequest, Classifier};
use crate::complaints::{Actor, Complaint, ComplaintStatus, ComplaintStore, NewComplaint};
use crate::config::Config;
use crate::department::{heuristic_department_or, Department};
use crate::error::{CivicError, Result};
use crate::ledger::{Action, AppendReceipt, BlockPayload, LedgerStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Reason recorded on DELETED blocks for single deletes
pub const DELETE_REASON: &str = "Admin Delete";
/// Reason recorded on DELETED blocks for bulk deletes
pub const BULK_DELETE_REASON: &str = "Admin Bulk Delete";

/// Tunables for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub queue_size: usize,
    /// Lower-cased categories that get no block until classified
    pub ambiguous_categories: Vec<String>,
    /// Heuristic answer when no keyword family matches
    pub default_department: Department,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            timeout: config.classifier.timeout()?,
            max_concurrent: config.classifier.max_concurrent,
            queue_size: config.pipeline.queue_size,
            ambiguous_categories: config
                .pipeline
                .ambiguous_categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .collect(),
            default_department: config.default_department(),
        })
    }

    /// Case-insensitive membership test after trimming
    pub fn is_ambiguous(&self, category: &str) -> bool {
        let category = category.trim().to_lowercase();
        self.ambiguous_categories.iter().any(|c| *c == category)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrent: 4,
            queue_size: 256,
            ambiguous_categories: vec!["other".to_string(), "others".to_string()],
            default_department: Department::DEFAULT,
        }
    }
}

/// What `submit` hands back immediately
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub complaint: Complaint,
    /// FILED block, when the category was specific enough to record at once
    pub filed: Option<AppendReceipt>,
    /// False when the queue was unavailable and the complaint settled inline
    pub awaiting_classification: bool,
}

/// Counts per transition plus failures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub verified: u64,
    pub reassigned: u64,
    pub confirmed: u64,
    pub fallback: u64,
    pub unchanged: u64,
    pub dropped: u64,
    pub ledger_errors: u64,
    /// Classifications the complaint store failed to persist
    pub store_errors: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    verified: AtomicU64,
    reassigned: AtomicU64,
    confirmed: AtomicU64,
    fallback: AtomicU64,
    unchanged: AtomicU64,
    dropped: AtomicU64,
    ledger_errors: AtomicU64,
    store_errors: AtomicU64,
}

impl Counters {
    fn record(&self, transition: Transition) {
        let counter = match transition {
            Transition::Verified => &self.verified,
            Transition::Reassigned => &self.reassigned,
            Transition::Confirmed => &self.confirmed,
            Transition::Fallback => &self.fallback,
            Transition::Unchanged => &self.unchanged,
            Transition::Dropped => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            verified: self.verified.load(Ordering::Relaxed),
            reassigned: self.reassigned.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ledger_errors: self.ledger_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Complaint waiting for classification
#[derive(Debug, Clone)]
struct Job {
    complaint: Complaint,
    heuristic: Department,
    ambiguous: bool,
    role: Option<String>,
}

/// State shared by the handle, the dispatcher and the classification tasks
struct Shared {
    complaints: ComplaintStore,
    ledger: LedgerStore,
    classifier: Arc<dyn Classifier>,
    settings: PipelineSettings,
    counters: Counters,
}

impl Shared {
    /// Append a block. Failures are logged and counted, never returned.
    fn record(&self, payload: BlockPayload) -> Option<AppendReceipt> {
        let department = payload.department_label().to_string();
        match self.ledger.append(&payload, &department) {
            Ok(receipt) => Some(receipt),
            Err(e) => {
                self.counters.ledger_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Failed to record {} for complaint {:?}: {}",
                    payload.action,
                    payload.complaint_id,
                    e
                );
                None
            }
        }
    }

    async fn classify(&self, job: &Job) -> ClassificationOutcome {
        let request = ClassificationRequest::new(job.complaint.description.clone())
            .with_role(job.role.clone());
        let timeout = self.settings.timeout;

        match tokio::time::timeout(timeout, self.classifier.classify(&request)).await {
            Ok(Ok(result)) => ClassificationOutcome::Classified(result),
            Ok(Err(e)) => ClassificationOutcome::Failed(e.to_string()),
            Err(_) => ClassificationOutcome::Failed(
                CivicError::ClassifierTimeout {
                    secs: timeout.as_secs(),
                }
                .to_string(),
            ),
        }
    }
}

/// Cheap, cloneable entry point used by the daemon and tests
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Job>,
}

impl PipelineHandle {
    /// Persist a complaint and schedule its classification.
    ///
    /// Fails only when the complaint cannot be stored. Ledger problems are
    /// logged and left for repair.
    pub fn submit(&self, actor: &Actor, complaint: NewComplaint) -> Result<Submission> {
        if complaint.category.trim().is_empty() {
            return Err(CivicError::InvalidInput("category is required".to_string()));
        }
        if complaint.description.trim().is_empty() {
            return Err(CivicError::InvalidInput(
                "description is required".to_string(),
            ));
        }

        let shared = &self.shared;
        let heuristic = heuristic_department_or(
            &complaint.category,
            &complaint.description,
            &shared.settings.default_department,
        );
        let stored = shared.complaints.insert(&actor.id, &complaint, &heuristic)?;
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let ambiguous = shared.settings.is_ambiguous(&stored.category);
        let filed = if ambiguous {
            tracing::info!(
                "Complaint #{} is '{}', holding ledger entry until classified",
                stored.id,
                stored.category
            );
            None
        } else {
            shared.record(BlockPayload::for_complaint(Action::Filed, &stored).by(actor.id.as_str()))
        };

        let job = Job {
            complaint: stored.clone(),
            heuristic,
            ambiguous,
            role: actor.role.clone(),
        };

        let awaiting_classification = match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => {
                tracing::warn!(
                    "Classification queue unavailable, settling complaint #{} without it",
                    job.complaint.id
                );
                let transition = settle::settle(
                    shared,
                    &job,
                    ClassificationOutcome::Failed("classification queue unavailable".to_string()),
                );
                shared.counters.record(transition);
                false
            }
        };

        Ok(Submission {
            complaint: stored,
            filed,
            awaiting_classification,
        })
    }

    /// Change status and record `STATUS_UPDATE`
    pub fn update_status(
        &self,
        actor: &Actor,
        id: i64,
        status: ComplaintStatus,
    ) -> Result<Complaint> {
        let (previous, complaint) = self.shared.complaints.update_status(id, status)?;

        let payload = BlockPayload {
            complaint_id: Some(id),
            previous_status: Some(previous),
            new_status: Some(status),
            department: complaint.assigned_dept.clone(),
            ..BlockPayload::new(Action::StatusUpdate)
        }
        .by(actor.id.as_str());
        self.shared.record(payload);

        Ok(complaint)
    }

    /// Route to a department and record `DEPT_ASSIGNED`
    pub fn assign_department(
        &self,
        actor: &Actor,
        id: i64,
        department: Department,
    ) -> Result<Complaint> {
        let (previous, complaint) = self.shared.complaints.assign_department(id, &department)?;

        let payload = BlockPayload {
            complaint_id: Some(id),
            previous_dept: previous,
            ..BlockPayload::new(Action::DeptAssigned)
        }
        .by(actor.id.as_str())
        .department(department);
        self.shared.record(payload);

        Ok(complaint)
    }

    /// Delete one complaint and record `DELETED`. Its history stays.
    pub fn delete(&self, actor: &Actor, id: i64) -> Result<Complaint> {
        self.delete_with_reason(actor, id, DELETE_REASON)
    }

    /// Delete every existing id; missing ids are skipped. Returns deleted ids.
    pub fn bulk_delete(&self, actor: &Actor, ids: &[i64]) -> Result<Vec<i64>> {
        if ids.is_empty() {
            return Err(CivicError::InvalidInput(
                "no complaint ids provided".to_string(),
            ));
        }

        let mut deleted = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.delete_with_reason(actor, id, BULK_DELETE_REASON) {
                Ok(_) => deleted.push(id),
                Err(CivicError::ComplaintNotFound { .. }) => {
                    tracing::debug!("Bulk delete skipped missing complaint #{}", id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Bulk deleted {}/{} complaints", deleted.len(), ids.len());
        Ok(deleted)
    }

    fn delete_with_reason(&self, actor: &Actor, id: i64, reason: &str) -> Result<Complaint> {
        let complaint = self.shared.complaints.delete(id)?;

        // Filed under the complaint's department, not "General"
        let payload = BlockPayload {
            reason: Some(reason.to_string()),
            ..BlockPayload::for_complaint(Action::Deleted, &complaint)
        }
        .by(actor.id.as_str());
        self.shared.record(payload);

        Ok(complaint)
    }

    /// Department used when nothing else names one
    pub fn default_department(&self) -> &Department {
        &self.shared.settings.default_department
    }

    /// Counters so far
    pub fn stats(&self) -> PipelineStats {
        self.shared.counters.snapshot()
    }

    pub fn complaints(&self) -> &ComplaintStore {
        &self.shared.complaints
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.shared.ledger
    }
}

/// Owner of the dispatcher task
pub struct Pipeline {
    handle: PipelineHandle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn new(
        complaints: ComplaintStore,
        ledger: LedgerStore,
        classifier: Arc<dyn Classifier>,
        settings: PipelineSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!(
            "Pipeline started: classifier={}, max_concurrent={}, timeout={:?}",
            classifier.name(),
            settings.max_concurrent,
            settings.timeout
        );

        let shared = Arc::new(Shared {
            complaints,
            ledger,
            classifier,
            settings,
            counters: Counters::default(),
        });

        let dispatcher = tokio::spawn(dispatch(shared.clone(), rx, shutdown_rx));

        Self {
            handle: PipelineHandle { shared, tx },
            shutdown_tx: Some(shutdown_tx),
            dispatcher: Some(dispatcher),
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting work, finish everything queued or in flight, and
    /// report the final counts
    pub async fn shutdown(mut self) -> PipelineStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            tracing::info!("Waiting for pipeline to drain...");
            if let Err(e) = dispatcher.await {
                tracing::error!("Pipeline dispatcher failed: {}", e);
            }
        }

        let stats = self.handle.stats();
        tracing::info!(
            "Pipeline drained: {} submitted, {} verified, {} reassigned, {} fallback, {} ledger errors",
            stats.submitted,
            stats.verified,
            stats.reassigned,
            stats.fallback,
            stats.ledger_errors
        );
        stats
    }
}

/// Dispatcher: pulls jobs off the queue and fans them out
async fn dispatch(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Job>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let semaphore = Arc::new(Semaphore::new(shared.settings.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            // Dropping the pipeline without shutdown also closes the queue
            _ = &mut shutdown_rx, if !closing => {
                closing = true;
                rx.close();
            }

            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Classification task failed: {}", e);
                }
            }

            job = rx.recv() => {
                let Some(job) = job else { break };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let shared = shared.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = shared.classify(&job).await;
                    // Settling writes to SQLite; keep it off the async workers
                    let settled = tokio::task::spawn_blocking(move || {
                        let transition = settle::settle(&shared, &job, outcome);
                        shared.counters.record(transition);
                    })
                    .await;
                    if let Err(e) = settled {
                        tracing::error!("Settling a classification failed: {}", e);
                    }
                });
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Classification task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ClassificationResult, DisabledClassifier};
    use crate::complaints::{GeoPoint, Priority};
    use crate::storage::StorageManager;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Answers every call with the same result after an optional delay
    struct ScriptedClassifier {
        department: Department,
        delay: Duration,
    }

    impl ScriptedClassifier {
        fn answering(department: Department) -> Arc<dyn Classifier> {
            Arc::new(Self {
                department,
                delay: Duration::ZERO,
            })
        }

        fn slow(department: Department, delay: Duration) -> Arc<dyn Classifier> {
            Arc::new(Self { department, delay })
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(&self, _request: &ClassificationRequest) -> Result<ClassificationResult> {
            tokio::time::sleep(self.delay).await;
            Ok(ClassificationResult {
                department: self.department.clone(),
                priority: Priority::High,
                tags: "scripted".to_string(),
                confidence: 0.9,
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn setup(classifier: Arc<dyn Classifier>, timeout: Duration) -> (TempDir, StorageManager, Pipeline) {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
        let settings = PipelineSettings {
            timeout,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            storage.complaints.clone(),
            storage.ledger.clone(),
            classifier,
            settings,
        );
        (temp_dir, storage, pipeline)
    }

    fn citizen() -> Actor {
        Actor::new("17").with_role("citizen")
    }

    fn actions(storage: &StorageManager, id: i64) -> Vec<Action> {
        storage
            .ledger
            .blocks_for_complaint(id)
            .unwrap()
            .into_iter()
            .map(|b| b.payload.action)
            .collect()
    }

    #[test]
    fn test_ambiguous_categories() {
        let settings = PipelineSettings::default();
        assert!(settings.is_ambiguous("Other"));
        assert!(settings.is_ambiguous("  OTHERS "));
        assert!(!settings.is_ambiguous("Pothole"));
    }

    #[test]
    fn test_settings_take_configured_default_department() {
        let mut config = Config::default();
        config.pipeline.default_department = "PWD".to_string();
        let settings = PipelineSettings::from_config(&config).unwrap();
        assert_eq!(settings.default_department, Department::Pwd);
    }

    #[tokio::test]
    async fn test_specific_complaint_filed_before_classification() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::slow(Department::Pwd, Duration::from_millis(200)),
            Duration::from_secs(5),
        );
        let handle = pipeline.handle();

        let submission = handle
            .submit(
                &citizen(),
                NewComplaint::new("Pothole", "big pothole on road")
                    .at(GeoPoint::new(8.5241, 76.9366).unwrap()),
            )
            .unwrap();

        assert_eq!(submission.complaint.assigned_dept, Some(Department::Pwd));
        assert!(submission.filed.is_some());
        assert!(submission.awaiting_classification);

        // Classifier is still sleeping; the FILED block is already there.
        let id = submission.complaint.id;
        assert_eq!(actions(&storage, id), vec![Action::Filed]);
        let block = storage.ledger.tail().unwrap().unwrap();
        assert_eq!(block.department, "PWD");
        assert_eq!(block.payload.user_id.as_deref(), Some("17"));

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.confirmed, 1);
        assert_eq!(actions(&storage, id), vec![Action::Filed]);

        let updated = storage.complaints.require(id).unwrap();
        assert_eq!(updated.priority, Some(Priority::High));
        assert_eq!(updated.ai_tags.as_deref(), Some("scripted"));
    }

    #[tokio::test]
    async fn test_ambiguous_complaint_verified() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::answering(Department::WaterAuthority),
            Duration::from_secs(5),
        );
        let handle = pipeline.handle();

        let submission = handle
            .submit(&citizen(), NewComplaint::new("Other", "strange smell from drain"))
            .unwrap();
        let id = submission.complaint.id;

        assert_eq!(submission.complaint.assigned_dept, Some(Department::Corporation));
        assert!(submission.filed.is_none());
        assert!(actions(&storage, id).is_empty());

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.reassigned, 0);

        // The classifier disagreed with the heuristic, yet only VERIFIED is written
        let blocks = storage.ledger.blocks_for_complaint(id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload.action, Action::Verified);
        assert_eq!(blocks[0].department, "Water Authority");
        assert_eq!(blocks[0].payload.ai_tags.as_deref(), Some("scripted"));
        assert!(blocks[0].payload.previous_dept.is_none());
        assert!(!blocks
            .iter()
            .any(|b| b.payload.action == Action::Reassigned));

        let updated = storage.complaints.require(id).unwrap();
        assert_eq!(updated.assigned_dept, Some(Department::WaterAuthority));
    }

    #[tokio::test]
    async fn test_store_failure_still_records_verified() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::answering(Department::WaterAuthority),
            Duration::from_secs(5),
        );
        {
            let conn = storage.database.get_conn().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER complaints_frozen BEFORE UPDATE ON complaints
                 BEGIN SELECT RAISE(ABORT, 'complaints are frozen'); END;",
            )
            .unwrap();
        }
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Other", "strange smell from drain"))
            .unwrap()
            .complaint
            .id;

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.store_errors, 1);

        let blocks = storage.ledger.blocks_for_complaint(id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload.action, Action::Verified);
        assert_eq!(blocks[0].department, "Water Authority");

        // The row keeps its heuristic routing
        let complaint = storage.complaints.require(id).unwrap();
        assert_eq!(complaint.assigned_dept, Some(Department::Corporation));
    }

    #[tokio::test]
    async fn test_specific_complaint_deleted_before_settling_is_dropped() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::slow(Department::WaterAuthority, Duration::from_millis(200)),
            Duration::from_secs(5),
        );
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Pothole", "big pothole on road"))
            .unwrap()
            .complaint
            .id;
        handle.delete(&Actor::new("admin-1"), id).unwrap();

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.reassigned, 0);
        assert_eq!(actions(&storage, id), vec![Action::Filed, Action::Deleted]);
    }

    #[tokio::test]
    async fn test_ambiguous_complaint_deleted_before_settling_is_verified() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::slow(Department::WaterAuthority, Duration::from_millis(200)),
            Duration::from_secs(5),
        );
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Other", "strange smell from drain"))
            .unwrap()
            .complaint
            .id;
        handle.delete(&Actor::new("admin-1"), id).unwrap();

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.dropped, 0);
        assert_eq!(actions(&storage, id), vec![Action::Deleted, Action::Verified]);
    }

    #[tokio::test]
    async fn test_configured_default_department() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
        let settings = PipelineSettings {
            default_department: Department::Pwd,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            storage.complaints.clone(),
            storage.ledger.clone(),
            Arc::new(DisabledClassifier),
            settings,
        );
        let handle = pipeline.handle();
        assert_eq!(handle.default_department(), &Department::Pwd);

        let complaint = handle
            .submit(&citizen(), NewComplaint::new("Other", "strange smell"))
            .unwrap()
            .complaint;
        assert_eq!(complaint.assigned_dept, Some(Department::Pwd));

        pipeline.shutdown().await;
        let blocks = storage.ledger.blocks_for_complaint(complaint.id).unwrap();
        assert_eq!(blocks[0].payload.action, Action::Fallback);
        assert_eq!(blocks[0].department, "PWD");
    }

    #[tokio::test]
    async fn test_ambiguous_complaint_times_out_to_fallback() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::slow(Department::WaterAuthority, Duration::from_secs(10)),
            Duration::from_millis(50),
        );
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Other", "strange smell from drain"))
            .unwrap()
            .complaint
            .id;

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.verified, 0);

        let blocks = storage.ledger.blocks_for_complaint(id).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].payload.action, Action::Fallback);
        assert_eq!(blocks[0].department, "Corporation");
        assert!(blocks[0].payload.reason.as_deref().unwrap().contains("timed out"));

        // Heuristic routing stays in place.
        let complaint = storage.complaints.require(id).unwrap();
        assert_eq!(complaint.assigned_dept, Some(Department::Corporation));
        assert_eq!(complaint.priority, None);
    }

    #[tokio::test]
    async fn test_disabled_classifier_falls_back() {
        let (_dir, storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();

        let ambiguous = handle
            .submit(&citizen(), NewComplaint::new("others", "wires hanging low"))
            .unwrap()
            .complaint;
        let specific = handle
            .submit(&citizen(), NewComplaint::new("Garbage", "bins overflowing"))
            .unwrap()
            .complaint;

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.fallback, 1);
        assert_eq!(stats.unchanged, 1);

        let fallback = storage.ledger.blocks_for_complaint(ambiguous.id).unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].department, "KSEB");
        assert_eq!(actions(&storage, specific.id), vec![Action::Filed]);
    }

    #[tokio::test]
    async fn test_reassignment_recorded_as_system_ai() {
        let (_dir, storage, pipeline) = setup(
            ScriptedClassifier::answering(Department::WaterAuthority),
            Duration::from_secs(5),
        );
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Road Damage", "road flooded after rain"))
            .unwrap()
            .complaint
            .id;

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.reassigned, 1);

        let blocks = storage.ledger.blocks_for_complaint(id).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].payload.action, Action::Filed);
        assert_eq!(blocks[0].department, "PWD");

        let reassigned = &blocks[1].payload;
        assert_eq!(reassigned.action, Action::Reassigned);
        assert_eq!(reassigned.user_id.as_deref(), Some("SYSTEM_AI"));
        assert_eq!(reassigned.previous_dept, Some(Department::Pwd));
        assert_eq!(reassigned.department, Some(Department::WaterAuthority));
    }

    #[tokio::test]
    async fn test_full_queue_settles_inline() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
        let settings = PipelineSettings {
            timeout: Duration::from_secs(5),
            max_concurrent: 1,
            queue_size: 1,
            ..Default::default()
        };
        let pipeline = Pipeline::new(
            storage.complaints.clone(),
            storage.ledger.clone(),
            ScriptedClassifier::slow(Department::Pwd, Duration::from_millis(300)),
            settings,
        );
        let handle = pipeline.handle();

        let submissions: Vec<_> = (0..6)
            .map(|n| {
                handle
                    .submit(&citizen(), NewComplaint::new("Other", format!("issue {}", n)))
                    .unwrap()
            })
            .collect();

        assert!(submissions.iter().any(|s| !s.awaiting_classification));

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.verified + stats.fallback, 6);

        // Every ambiguous complaint ends with exactly one block either way.
        for submission in &submissions {
            assert_eq!(
                storage
                    .ledger
                    .blocks_for_complaint(submission.complaint.id)
                    .unwrap()
                    .len(),
                1
            );
        }
        assert!(storage.ledger.is_intact().unwrap());
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_input() {
        let (_dir, storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();

        assert!(matches!(
            handle.submit(&citizen(), NewComplaint::new("  ", "something")),
            Err(CivicError::InvalidInput(_))
        ));
        assert!(matches!(
            handle.submit(&citizen(), NewComplaint::new("Pothole", "")),
            Err(CivicError::InvalidInput(_))
        ));
        assert_eq!(storage.ledger.len().unwrap(), 1);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_assign_delete_are_recorded() {
        let (_dir, storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();
        let admin = Actor::new("admin-1").with_role("admin");

        let location = GeoPoint::new(8.5241, 76.9366).unwrap();
        let id = handle
            .submit(
                &citizen(),
                NewComplaint::new("Streetlight", "light out on main road").at(location),
            )
            .unwrap()
            .complaint
            .id;

        let updated = handle
            .update_status(&admin, id, ComplaintStatus::InProgress)
            .unwrap();
        assert_eq!(updated.status, ComplaintStatus::InProgress);

        handle
            .assign_department(&admin, id, Department::Corporation)
            .unwrap();
        handle.delete(&admin, id).unwrap();

        pipeline.shutdown().await;

        let blocks = storage.ledger.blocks_for_complaint(id).unwrap();
        let actions: Vec<_> = blocks.iter().map(|b| b.payload.action.clone()).collect();
        assert_eq!(
            actions,
            vec![
                Action::Filed,
                Action::StatusUpdate,
                Action::DeptAssigned,
                Action::Deleted
            ]
        );

        let status = &blocks[1].payload;
        assert_eq!(status.previous_status, Some(ComplaintStatus::Pending));
        assert_eq!(status.new_status, Some(ComplaintStatus::InProgress));
        assert_eq!(blocks[1].department, "KSEB");

        assert_eq!(blocks[2].payload.previous_dept, Some(Department::Kseb));
        assert_eq!(blocks[2].department, "Corporation");

        let deleted = &blocks[3];
        assert_eq!(deleted.payload.reason.as_deref(), Some(DELETE_REASON));
        assert_eq!(deleted.department, "Corporation");
        assert_eq!(deleted.payload.category.as_deref(), Some("Streetlight"));
        assert_eq!(deleted.payload.location, Some(location));
        assert_eq!(deleted.payload.user_id.as_deref(), Some("admin-1"));
        assert!(storage.complaints.get(id).unwrap().is_none());
        assert!(storage.ledger.is_intact().unwrap());
    }

    #[tokio::test]
    async fn test_deleting_keeps_earlier_blocks() {
        let (_dir, storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();

        let id = handle
            .submit(&citizen(), NewComplaint::new("Pothole", "big pothole on road"))
            .unwrap()
            .complaint
            .id;
        let filed = storage.ledger.blocks_for_complaint(id).unwrap().remove(0);

        handle.delete(&Actor::new("admin-1"), id).unwrap();
        pipeline.shutdown().await;

        let after = storage.ledger.blocks_for_complaint(id).unwrap();
        assert_eq!(after[0], filed);
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_delete_skips_missing() {
        let (_dir, storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();

        let a = handle
            .submit(&citizen(), NewComplaint::new("Garbage", "pile one"))
            .unwrap()
            .complaint
            .id;
        let b = handle
            .submit(&citizen(), NewComplaint::new("Garbage", "pile two"))
            .unwrap()
            .complaint
            .id;

        let deleted = handle
            .bulk_delete(&Actor::new("admin-1"), &[a, 999, b])
            .unwrap();
        assert_eq!(deleted, vec![a, b]);
        assert!(handle.bulk_delete(&Actor::new("admin-1"), &[]).is_err());

        pipeline.shutdown().await;
        let reason = storage
            .ledger
            .blocks_for_complaint(b)
            .unwrap()
            .pop()
            .and_then(|block| block.payload.reason);
        assert_eq!(reason.as_deref(), Some(BULK_DELETE_REASON));
    }

    #[tokio::test]
    async fn test_missing_complaint_errors() {
        let (_dir, _storage, pipeline) =
            setup(Arc::new(DisabledClassifier), Duration::from_secs(1));
        let handle = pipeline.handle();
        let admin = Actor::new("admin-1");

        assert!(matches!(
            handle.update_status(&admin, 42, ComplaintStatus::Completed),
            Err(CivicError::ComplaintNotFound { id: 42 })
        ));
        assert!(matches!(
            handle.delete(&admin, 42),
            Err(CivicError::ComplaintNotFound { id: 42 })
        ));
        pipeline.shutdown().await;
    }
}
