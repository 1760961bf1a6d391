//! End-to-end workflow through the `CiBridge` facade.
//!
//! Trigger `demo/build` with `BRANCH=main`, follow it to build 17, sync it
//! to SUCCESS, page its log, list and fetch its artifacts, and check that
//! a second process sees the same ledger.

use std::sync::Arc;
use std::time::Duration;

use cibridge_core::{parameters_from_json, BridgeConfig, CiBridge, TriggerStatus};
use cibridge_gateway::fakes::MemoryGateway;
use cibridge_gateway::{BuildResult, ParameterDefinition};
use serde_json::json;

const JOB: &str = "demo/build";

fn config(dir: &tempfile::TempDir) -> BridgeConfig {
    let mut config = BridgeConfig::with_store_path(dir.path().join("triggered_jobs.json"));
    config.resolve.timeout = Duration::from_secs(5);
    config.resolve.poll_interval = Duration::from_millis(10);
    config.resolve.max_poll_interval = Duration::from_millis(50);
    config
}

fn console() -> String {
    (1..=40).map(|i| format!("[demo] step {i}\n")).collect()
}

#[tokio::test]
async fn test_demo_build_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.add_job_with(JOB, Some(1), Vec::new());
    gateway.set_next_build_number(JOB, 17);

    let bridge = CiBridge::open(gateway.clone(), &config(&dir)).unwrap();
    let parameters = parameters_from_json(&json!({"BRANCH": "main"})).unwrap();

    let record = bridge.trigger(JOB, parameters).await.unwrap();
    assert_eq!(record.build_number, Some(17));
    assert_eq!(record.status, TriggerStatus::Running);
    assert_eq!(record.parameters["BRANCH"], "main");

    gateway.append_console(JOB, 17, &console());
    gateway.add_artifact(JOB, 17, "out/report.txt", b"all green\n");
    gateway.add_artifact(JOB, 17, "out/app.tar.gz", &[0x1f, 0x8b, 0x08, 0x00]);
    gateway.complete_build(JOB, 17, BuildResult::Success);

    let synced = bridge.status(&record.trigger_id).await.unwrap();
    assert_eq!(synced.status, TriggerStatus::Success);
    assert_eq!(synced.build_number, Some(17));

    let window = bridge.read_log(JOB, 17, 0, 10, false).await.unwrap();
    let expected: Vec<String> = (1..=10).map(|i| format!("[demo] step {i}")).collect();
    assert_eq!(window.lines, expected);
    assert_eq!(window.start_line, 0);
    assert_eq!(window.total_lines_known, 40);
    assert!(!window.is_complete);

    let artifacts = bridge.list_artifacts(JOB, 17).await.unwrap();
    let paths: Vec<_> = artifacts.iter().map(|a| a.path.clone()).collect();
    assert_eq!(paths, vec!["out/app.tar.gz", "out/report.txt"]);

    let archive = bridge.fetch_artifact(JOB, 17, "out/app.tar.gz").await.unwrap();
    assert_eq!(archive.bytes, vec![0x1f, 0x8b, 0x08, 0x00]);
    assert_eq!(archive.content_type.as_deref(), Some("application/gzip"));

    // A fresh process reads the same ledger from disk.
    let later = CiBridge::open(gateway.clone(), &config(&dir)).unwrap();
    let listed = later.list_triggers();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], synced);
}

#[tokio::test]
async fn test_build_status_and_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.add_job_with(
        JOB,
        Some(0),
        vec![ParameterDefinition {
            name: "BRANCH".to_string(),
            kind: "StringParameterDefinition".to_string(),
            description: "branch to build".to_string(),
            default_value: Some(json!("main")),
            choices: None,
        }],
    );
    gateway.add_job("empty");
    let bridge = CiBridge::open(gateway.clone(), &config(&dir)).unwrap();

    assert!(bridge.build_status("empty", None).await.unwrap().is_none());
    assert!(bridge.build_status("missing", None).await.unwrap_err().is_not_found());

    gateway.add_build(JOB, 4, Some(BuildResult::Success));
    gateway.add_build(JOB, 5, None);
    let latest = bridge.build_status(JOB, None).await.unwrap().unwrap();
    assert_eq!(latest.number, 5);
    assert!(latest.building);

    let fourth = bridge.build_status(JOB, Some(4)).await.unwrap().unwrap();
    assert_eq!(fourth.result, Some(BuildResult::Success));

    let definitions = bridge.job_parameters(JOB).await.unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].name, "BRANCH");
}

#[tokio::test]
async fn test_cancel_trigger_in_queue_and_running() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.add_job_with("held", None, Vec::new());
    gateway.add_job("fast");
    let mut config = config(&dir);
    config.resolve.timeout = Duration::from_millis(30);
    let bridge = CiBridge::open(gateway.clone(), &config).unwrap();

    let queued = bridge
        .trigger("held", Default::default())
        .await
        .unwrap();
    assert_eq!(queued.status, TriggerStatus::Queued);
    let cancelled = bridge.cancel_trigger(&queued.trigger_id).await.unwrap();
    assert_eq!(cancelled.status, TriggerStatus::QueueCancelled);

    let running = bridge.trigger("fast", Default::default()).await.unwrap();
    assert_eq!(running.status, TriggerStatus::Running);
    let aborted = bridge.cancel_trigger(&running.trigger_id).await.unwrap();
    assert_eq!(aborted.status, TriggerStatus::Aborted);

    let again = bridge.cancel_trigger(&running.trigger_id).await.unwrap();
    assert_eq!(again, aborted);
}

#[tokio::test]
async fn test_status_all_reports_every_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(MemoryGateway::new());
    gateway.add_job("a");
    gateway.add_job("b");
    let bridge = CiBridge::open(gateway.clone(), &config(&dir)).unwrap();

    let a = bridge.trigger("a", Default::default()).await.unwrap();
    let b = bridge.trigger("b", Default::default()).await.unwrap();
    gateway.complete_build("a", 1, BuildResult::Success);

    let report = bridge.status_all().await;
    assert!(report.is_clean());
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].trigger_id, a.trigger_id);
    assert_eq!(report.records[0].status, TriggerStatus::Success);
    assert_eq!(report.records[1].trigger_id, b.trigger_id);
    assert_eq!(report.records[1].status, TriggerStatus::Running);
}
