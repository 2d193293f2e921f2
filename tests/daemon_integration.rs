use civic_ledger::complaints::{Actor, GeoPoint, NewComplaint};
use civic_ledger::config::Config;
use civic_ledger::daemon::{Daemon, DaemonInfo, IpcClient, IpcMessage, ProcessManager};
use civic_ledger::ledger::{Action, Block, ChainReport, LedgerQuery};
use civic_ledger::pipeline::Submission;
use civic_ledger::storage::StorageManager;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(base_path: &Path, classifier_endpoint: Option<String>) -> Config {
    let mut config = Config::default();
    config.daemon.socket_path = base_path.join("civic.sock");
    config.daemon.pid_file = base_path.join("civic.pid");
    config.daemon.log_file = base_path.join("logs").join("daemon.log");
    config.storage.data_dir = base_path.join("data");
    config.classifier.timeout = "2s".to_string();
    match classifier_endpoint {
        Some(endpoint) => {
            config.classifier.enabled = true;
            config.classifier.endpoint = endpoint;
        }
        None => config.classifier.enabled = false,
    }
    config
}

async fn wait_for_socket(path: &Path) {
    for _ in 0..50 {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("daemon socket never appeared at {:?}", path);
}

#[tokio::test]
async fn test_daemon_submit_classify_and_stop() {
    let temp_dir = TempDir::new().unwrap();
    let base_path = temp_dir.path().to_path_buf();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": r#"{"department":"PWD","priority":"High","tags":"road, hazard","confidence":0.9}"#
        })))
        .mount(&server)
        .await;

    let config = test_config(&base_path, Some(format!("{}/api/generate", server.uri())));
    let socket_path = config.daemon.socket_path.clone();
    let data_dir = config.storage.data_dir.clone();

    let mut daemon = Daemon::new(config).unwrap();
    let daemon_handle = tokio::spawn(async move { daemon.run_foreground().await });
    wait_for_socket(&socket_path).await;

    let client = IpcClient::new(socket_path.clone());

    let response = client.send(&IpcMessage::Status).await.unwrap();
    assert!(response.success, "Status request should succeed");
    let info: DaemonInfo = response.data_as().unwrap();
    assert_eq!(info.storage.block_count, 1);

    // Specific category: filed at once
    let response = client
        .send(&IpcMessage::Submit {
            actor: Actor::new("citizen-1"),
            complaint: NewComplaint::new("Pothole", "deep pothole on the main road")
                .at(GeoPoint::new(8.5241, 76.9366).unwrap()),
        })
        .await
        .unwrap();
    assert!(response.success);
    let pothole: Submission = response.data_as().unwrap();
    assert!(pothole.filed.is_some());

    // Ambiguous category: recorded once the classifier answers
    let response = client
        .send(&IpcMessage::Submit {
            actor: Actor::new("citizen-2"),
            complaint: NewComplaint::new("Others", "something odd near the junction"),
        })
        .await
        .unwrap();
    let other: Submission = response.data_as().unwrap();
    assert!(other.filed.is_none());
    assert!(other.awaiting_classification);

    let mut verified = None;
    for _ in 0..50 {
        let response = client
            .send(&IpcMessage::Ledger {
                query: LedgerQuery {
                    complaint_id: Some(other.complaint.id),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        let blocks: Vec<Block> = response.data_as().unwrap();
        if let Some(block) = blocks.into_iter().next() {
            verified = Some(block);
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    let verified = verified.expect("classification never reached the ledger");
    assert_eq!(verified.payload.action, Action::Verified);
    assert_eq!(verified.department, "PWD");

    let response = client.send(&IpcMessage::Verify).await.unwrap();
    let report: ChainReport = response.data_as().unwrap();
    assert!(report.blocks_checked >= 3);

    let response = client.send(&IpcMessage::Stop).await.unwrap();
    assert!(response.success);

    let result = tokio::time::timeout(Duration::from_secs(10), daemon_handle)
        .await
        .expect("daemon did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(!socket_path.exists(), "socket should be removed on shutdown");

    // Everything the daemon wrote is still there and still verifies
    let storage = StorageManager::new(data_dir).unwrap();
    assert_eq!(storage.complaints.list().unwrap().len(), 2);
    assert!(storage.ledger.is_intact().unwrap());
}

#[tokio::test]
async fn test_daemon_rejects_second_instance() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path(), None);
    let socket_path = config.daemon.socket_path.clone();

    let mut first = Daemon::new(config.clone()).unwrap();
    let handle = tokio::spawn(async move { first.run_foreground().await });
    wait_for_socket(&socket_path).await;

    let mut second = Daemon::new(config).unwrap();
    assert!(second.run_foreground().await.is_err());

    let client = IpcClient::new(socket_path);
    let response = client
        .send(&IpcMessage::Submit {
            actor: Actor::new("7"),
            complaint: NewComplaint::new("", "missing category"),
        })
        .await
        .unwrap();
    assert!(!response.success, "Invalid input should be an error response");

    client.send(&IpcMessage::Stop).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[test]
fn test_process_manager() {
    let temp_dir = TempDir::new().unwrap();
    let pid_file = temp_dir.path().join("test.pid");
    let pm = ProcessManager::new(pid_file.clone());

    assert!(!pm.is_running(), "Should not be running initially");

    pm.acquire().unwrap();
    assert!(pid_file.exists(), "PID file should exist");
    assert!(pm.is_running(), "Should be running after acquire");

    let pm2 = ProcessManager::new(pid_file.clone());
    assert!(
        pm2.acquire().is_err(),
        "Should not be able to acquire twice"
    );

    pm.release().unwrap();
    assert!(!pid_file.exists(), "PID file should be removed");
    assert!(!pm.is_running(), "Should not be running after release");
}
