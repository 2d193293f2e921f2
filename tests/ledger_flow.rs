use civic_ledger::classifier::DisabledClassifier;
use civic_ledger::clustering;
use civic_ledger::complaints::{Actor, ComplaintStatus, GeoPoint, NewComplaint};
use civic_ledger::department::Department;
use civic_ledger::ledger::{Action, Order};
use civic_ledger::pipeline::{Pipeline, PipelineSettings};
use civic_ledger::reconcile;
use civic_ledger::storage::StorageManager;
use civic_ledger::CivicError;
use std::sync::Arc;
use tempfile::TempDir;

fn pipeline(storage: &StorageManager) -> Pipeline {
    Pipeline::new(
        storage.complaints.clone(),
        storage.ledger.clone(),
        Arc::new(DisabledClassifier),
        PipelineSettings::default(),
    )
}

#[tokio::test]
async fn test_complaint_lifecycle_is_fully_audited() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
    let pipeline = pipeline(&storage);
    let handle = pipeline.handle();
    let admin = Actor::new("admin").with_role("admin");

    let filed = handle
        .submit(
            &Actor::new("42"),
            NewComplaint::new("Water Leak", "pipe burst outside the school"),
        )
        .unwrap();
    let id = filed.complaint.id;
    assert_eq!(
        filed.complaint.assigned_dept,
        Some(Department::WaterAuthority)
    );

    let ambiguous = handle
        .submit(
            &Actor::new("43"),
            NewComplaint::new("Others", "stray cattle on the road"),
        )
        .unwrap();

    handle
        .update_status(&admin, id, ComplaintStatus::InProgress)
        .unwrap();
    handle
        .assign_department(&admin, id, Department::Corporation)
        .unwrap();
    handle.delete(&admin, id).unwrap();

    let stats = pipeline.shutdown().await;
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.fallback, 1);
    assert_eq!(stats.unchanged, 1);

    // The complaint is gone but its history is not
    assert!(storage.complaints.get(id).unwrap().is_none());
    let actions: Vec<Action> = storage
        .ledger
        .blocks_for_complaint(id)
        .unwrap()
        .into_iter()
        .map(|b| b.payload.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            Action::Filed,
            Action::StatusUpdate,
            Action::DeptAssigned,
            Action::Deleted
        ]
    );

    let fallback = storage
        .ledger
        .blocks_for_complaint(ambiguous.complaint.id)
        .unwrap();
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].payload.action, Action::Fallback);
    assert!(fallback[0].payload.reason.is_some());

    let report = storage.ledger.verify().unwrap();
    assert_eq!(report.blocks_checked, storage.ledger.len().unwrap());
}

#[tokio::test]
async fn test_repair_then_verify_after_direct_inserts() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();

    // Complaints written without going through the pipeline have no blocks
    for i in 0..3 {
        storage
            .complaints
            .insert(
                "legacy",
                &NewComplaint::new("Garbage", format!("overflowing bin {}", i)),
                &Department::Corporation,
            )
            .unwrap();
    }
    assert_eq!(storage.ledger.len().unwrap(), 1);

    let report = reconcile::repair(&storage.complaints, &storage.ledger, &Department::DEFAULT).unwrap();
    assert_eq!(report.blocks_added, 3);
    assert_eq!(storage.ledger.len().unwrap(), 4);

    let again = reconcile::repair(&storage.complaints, &storage.ledger, &Department::DEFAULT).unwrap();
    assert_eq!(again.blocks_added, 0);

    let synced = storage
        .ledger
        .list_for_department("Corporation", Order::Ascending)
        .unwrap();
    assert_eq!(synced.len(), 3);
    assert!(synced
        .iter()
        .all(|b| b.payload.action == Action::LegacySync));

    assert!(storage.ledger.is_intact().unwrap());
}

#[tokio::test]
async fn test_tampering_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
    let pipeline = pipeline(&storage);
    let handle = pipeline.handle();

    for description in ["dark street", "fallen pole", "flickering streetlight"] {
        handle
            .submit(&Actor::new("9"), NewComplaint::new("Streetlight", description))
            .unwrap();
    }
    pipeline.shutdown().await;
    assert!(storage.ledger.is_intact().unwrap());

    // Bypass the append-only triggers the way an attacker with file access would
    {
        let conn = storage.database.get_conn().unwrap();
        conn.execute_batch(
            "DROP TRIGGER IF EXISTS blocks_no_update;
             UPDATE blocks SET data = replace(data, 'dark street', 'lit street')
             WHERE block_index = 1;",
        )
        .unwrap();
    }

    match storage.ledger.verify() {
        Err(CivicError::HashChainBroken { index, .. }) => assert_eq!(index, 1),
        other => panic!("expected a broken chain, got {:?}", other),
    }
}

#[tokio::test]
async fn test_hotspots_over_submitted_complaints() {
    let temp_dir = TempDir::new().unwrap();
    let storage = StorageManager::new(temp_dir.path().to_path_buf()).unwrap();
    let pipeline = pipeline(&storage);
    let handle = pipeline.handle();

    let near = [(8.52410, 76.93660), (8.52415, 76.93665), (8.52412, 76.93658)];
    for (lat, lng) in near {
        handle
            .submit(
                &Actor::new("5"),
                NewComplaint::new("Pothole", "crater").at(GeoPoint::new(lat, lng).unwrap()),
            )
            .unwrap();
    }
    handle
        .submit(
            &Actor::new("5"),
            NewComplaint::new("Pothole", "far away").at(GeoPoint::new(10.0, 76.0).unwrap()),
        )
        .unwrap();
    handle
        .submit(&Actor::new("5"), NewComplaint::new("Pothole", "no location"))
        .unwrap();
    pipeline.shutdown().await;

    let located = storage.complaints.list_located().unwrap();
    assert_eq!(located.len(), 4);

    let groups = clustering::group(&located, clustering::HOTSPOT_THRESHOLD_DEGREES);
    let mut sizes: Vec<usize> = groups.iter().map(|g| g.count).collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 3]);
    assert_eq!(groups.iter().filter(|g| g.is_group).count(), 1);
}
