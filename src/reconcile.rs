//! Ledger reconciliation
//!
//! Finds complaints that no block mentions and backfills a `LEGACY_SYNC`
//! block for each. Safe to run at any time, from any process: every append
//! takes its own write lock, and nothing is held across the batch.

use crate::complaints::ComplaintStore;
use crate::department::Department;
use crate::error::Result;
use crate::ledger::{Action, BlockPayload, LedgerStore};
use serde::{Deserialize, Serialize};

/// One complaint whose backfill failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairFailure {
    pub complaint_id: i64,
    pub error: String,
}

/// Outcome of a repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    /// Complaints examined
    pub scanned: usize,
    pub blocks_added: usize,
    pub failed: Vec<RepairFailure>,
}

/// Backfill a block for every complaint the ledger does not cover.
///
/// Complaints without a department are filed under `default_department`.
/// Only the snapshot reads fail the call. Individual appends that fail are
/// reported in [`RepairReport::failed`] and the batch continues.
pub fn repair(
    complaints: &ComplaintStore,
    ledger: &LedgerStore,
    default_department: &Department,
) -> Result<RepairReport> {
    let snapshot = complaints.list()?;
    let covered = ledger.covered_complaint_ids()?;

    let mut report = RepairReport {
        scanned: snapshot.len(),
        ..Default::default()
    };

    // Oldest first so backfilled blocks follow filing order
    for complaint in snapshot.iter().rev() {
        if covered.contains(&complaint.id) {
            continue;
        }

        let department = complaint
            .assigned_dept
            .clone()
            .unwrap_or_else(|| default_department.clone());
        let payload = BlockPayload {
            status: Some(complaint.status),
            timestamp: Some(complaint.created_at),
            ..BlockPayload::for_complaint(Action::LegacySync, complaint)
        }
        .department(department);

        match ledger.append(&payload, payload.department_label()) {
            Ok(receipt) => {
                tracing::debug!(
                    "Backfilled complaint #{} as block #{}",
                    complaint.id,
                    receipt.index
                );
                report.blocks_added += 1;
            }
            Err(e) => {
                tracing::error!("Failed to backfill complaint #{}: {}", complaint.id, e);
                report.failed.push(RepairFailure {
                    complaint_id: complaint.id,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Ledger sync complete: scanned {}, added {} missing blocks, {} failed",
        report.scanned,
        report.blocks_added,
        report.failed.len()
    );

    Ok(report)
}
