use super::{Job, Shared};
use crate::classifier::ClassificationResult;
use crate::complaints::Actor;
use crate::error::CivicError;
use crate::ledger::{Action, BlockPayload};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;

/// Result of one classification attempt
#[derive(Debug, Clone)]
pub enum ClassificationOutcome {
    Classified(ClassificationResult),
    /// Error, timeout, unparsable output or no queue capacity
    Failed(String),
}

/// Where a complaint ended up once its classification settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Ambiguous, classified: VERIFIED block
    Verified,
    /// Specific, classified into another department: REASSIGNED block
    Reassigned,
    /// Specific, classifier agreed with the heuristic: no block
    Confirmed,
    /// Ambiguous, classification failed: FALLBACK block
    Fallback,
    /// Specific, classification failed: no further write
    Unchanged,
    /// Specific complaint deleted before settling; its DELETED block covers it
    Dropped,
}

pub(super) fn settle(shared: &Shared, job: &Job, outcome: ClassificationOutcome) -> Transition {
    let complaint = &job.complaint;

    let result = match outcome {
        ClassificationOutcome::Classified(result) => result,
        ClassificationOutcome::Failed(reason) => {
            tracing::warn!(
                "Classification failed for complaint #{}: {}",
                complaint.id,
                reason
            );

            if !job.ambiguous {
                return Transition::Unchanged;
            }

            let payload = BlockPayload {
                reason: Some(reason),
                ..BlockPayload::for_complaint(Action::Fallback, complaint)
            }
            .by(complaint.user_id.as_str())
            .department(job.heuristic.clone());
            shared.record(payload);
            return Transition::Fallback;
        }
    };

    // The stored row is updated opportunistically; the ledger decision below
    // does not depend on it.
    if let Err(e) = shared.complaints.apply_classification(
        complaint.id,
        &result.department,
        result.priority,
        &result.tags,
    ) {
        match e {
            CivicError::ComplaintNotFound { id } if !job.ambiguous => {
                tracing::info!("Complaint #{} was deleted before classification settled", id);
                return Transition::Dropped;
            }
            CivicError::ComplaintNotFound { id } => {
                tracing::info!(
                    "Complaint #{} was deleted before classification settled, recording it anyway",
                    id
                );
            }
            e => {
                shared.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Failed to store classification for complaint #{}: {}",
                    complaint.id,
                    e
                );
            }
        }
    }

    tracing::info!(
        "Complaint #{} classified as {} ({}, confidence {:.2})",
        complaint.id,
        result.department,
        result.priority,
        result.confidence
    );

    if job.ambiguous {
        let payload = BlockPayload {
            ai_tags: Some(result.tags.clone()),
            ..BlockPayload::for_complaint(Action::Verified, complaint)
        }
        .by(complaint.user_id.as_str())
        .department(result.department);
        shared.record(payload);
        return Transition::Verified;
    }

    if result.department == job.heuristic {
        return Transition::Confirmed;
    }

    let payload = BlockPayload {
        previous_dept: Some(job.heuristic.clone()),
        description: Some(format!(
            "Reassigned from {} to {}",
            job.heuristic, result.department
        )),
        ..BlockPayload::for_complaint(Action::Reassigned, complaint)
    }
    .by(Actor::system_ai().id)
    .department(result.department);
    shared.record(payload);
    Transition::Reassigned
}
