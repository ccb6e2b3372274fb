//! Runner integration tests: failure aggregation, halt-vs-continue
//! semantics, wait-timeout resolution, and report output, all run against
//! an in-process transport proxy and a scripted dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use windlass_common::{Command, CommandResult, Error, Result, Settings};
use windlass_proxy::{Dispatcher, ProxyHandle, ProxyServer};
use windlass_rpc::RpcClient;
use windlass_runner::{SessionTotals, TestRunner, TestSuite};

/// Clicks succeed only on id=present; page loads never finish
struct ScriptedDispatcher;

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, command: Command) -> Result<CommandResult> {
        match command.method.as_str() {
            "open" => Ok(CommandResult::of_bool(true)),
            "click" => {
                let found = command.params.get("id").and_then(|v| v.as_str()) == Some("present");
                Ok(CommandResult::of_bool(found))
            }
            "waits.forPageLoad" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(CommandResult::of_bool(true))
            }
            other => Err(Error::RpcFault {
                code: 100,
                message: format!("unknown method: {}", other),
            }),
        }
    }
}

async fn spawn_bridge() -> ProxyHandle {
    let mut settings = Settings::default();
    settings.proxy_port = 0;
    ProxyServer::bind(Arc::new(settings))
        .await
        .expect("bind proxy")
        .with_dispatcher(Arc::new(ScriptedDispatcher))
        .spawn()
        .expect("spawn proxy")
}

fn runner_for(proxy: &ProxyHandle, continue_on_failure: bool) -> TestRunner {
    let mut settings = Settings::default();
    settings.test_url = "http://test.example".to_string();
    settings.rpc.proxy_addr = Some(proxy.url());
    settings.timeouts.wait_grace_ms = 500;
    settings.continue_on_failure = continue_on_failure;
    let settings = Arc::new(settings);
    let client = RpcClient::new(&settings).expect("build client");
    TestRunner::new(client, settings)
}

fn suite(yaml: &str) -> TestSuite {
    TestSuite::from_yaml(yaml).expect("parse suite")
}

const MIXED_SUITE: &str = r#"
name: mixed
steps:
  - action: open
    url: http://test.example/page
  - action: click
    id: present
  - action: click
    id: missing
  - action: click
    id: present
"#;

#[tokio::test]
async fn test_failure_halts_run_by_default() {
    let proxy = spawn_bridge().await;
    let runner = runner_for(&proxy, false);

    let report = runner.run_suite(&suite(MIXED_SUITE)).await.unwrap();

    // Step four never runs: the missing click stops the suite
    assert_eq!(report.aggregate.pass, 2);
    assert_eq!(report.aggregate.fail, 1);
    assert_eq!(report.aggregate.total(), 3);
    assert!(report.aggregate.completed);
    assert!(!report.success());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].method, "click");

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_continue_on_failure_runs_every_step() {
    let proxy = spawn_bridge().await;
    let runner = runner_for(&proxy, true);

    let report = runner.run_suite(&suite(MIXED_SUITE)).await.unwrap();

    assert_eq!(report.aggregate.pass, 3);
    assert_eq!(report.aggregate.fail, 1);
    assert_eq!(report.aggregate.total(), 4);
    assert_eq!(report.failures.len(), 1);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_hung_wait_is_a_recorded_failure_not_a_hang() {
    let proxy = spawn_bridge().await;
    let runner = runner_for(&proxy, false);

    let yaml = r#"
name: hung-wait
steps:
  - action: wait_for_page_load
    timeout_ms: 1000
"#;

    let start = Instant::now();
    let report = runner.run_suite(&suite(yaml)).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.aggregate.fail, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(
        report.failures[0].reason.contains("timed out"),
        "reason: {}",
        report.failures[0].reason
    );
    // Bound is 1000ms + 500ms grace, far short of the dispatcher's 30s sleep
    assert!(elapsed >= Duration::from_millis(1000), "too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "too late: {:?}", elapsed);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fault_counts_as_failure() {
    let proxy = spawn_bridge().await;
    let runner = runner_for(&proxy, true);

    // wait_for_element marshals to waits.forElement, which the dispatcher
    // rejects with a fault
    let yaml = r#"
name: faulting
steps:
  - action: open
    url: http://test.example/page
  - action: wait_for_element
    id: whatever
    timeout_ms: 1000
"#;

    let report = runner.run_suite(&suite(yaml)).await.unwrap();
    assert_eq!(report.aggregate.pass, 1);
    assert_eq!(report.aggregate.fail, 1);
    assert!(report.failures[0].reason.contains("unknown method"));

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_suites_folds_into_session_totals() {
    let proxy = spawn_bridge().await;
    let runner = runner_for(&proxy, true);

    let suites = vec![
        suite("name: a\nsteps:\n  - action: open\n    url: http://test.example/\n"),
        suite(MIXED_SUITE),
    ];

    let totals = SessionTotals::new();
    let reports = runner.run_suites(&suites, &totals).await.unwrap();
    assert_eq!(reports.len(), 2);

    let snapshot = totals.snapshot();
    assert_eq!(snapshot.pass, 4);
    assert_eq!(snapshot.fail, 1);
    assert_eq!(
        snapshot.total(),
        reports.iter().map(|r| r.aggregate.total()).sum::<usize>()
    );
    assert!(snapshot.completed);

    proxy.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_report_written_as_json() {
    let proxy = spawn_bridge().await;

    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.test_url = "http://test.example".to_string();
    settings.rpc.proxy_addr = Some(proxy.url());
    settings.report_dir = dir.path().to_path_buf();
    let settings = Arc::new(settings);
    let client = RpcClient::new(&settings).unwrap();
    let runner = TestRunner::new(client, settings);

    let report = runner
        .run_suite(&suite(
            "name: smoke\nsteps:\n  - action: open\n    url: http://test.example/\n",
        ))
        .await
        .unwrap();
    let path = runner.write_report(&report).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["suite"], "smoke");
    assert_eq!(written["aggregate"]["pass"], 1);
    assert_eq!(written["aggregate"]["fail"], 0);

    proxy.shutdown().await.unwrap();
}
