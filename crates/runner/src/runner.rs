//! Suite sequencing and result aggregation
//!
//! Commands run strictly one at a time; a falsy result, an RPC fault, or a
//! timeout is a recorded failure, never a crash. Whether the suite keeps
//! going after a failure is the `continue_on_failure` setting.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use windlass_common::{Result, Settings};
use windlass_rpc::RpcClient;

use crate::suite::TestSuite;

/// Pass/fail counters for one run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunAggregate {
    pub pass: usize,
    pub fail: usize,
    pub completed: bool,
}

impl RunAggregate {
    /// Total commands asserted
    pub fn total(&self) -> usize {
        self.pass + self.fail
    }

    /// Fold another aggregate into this one
    pub fn merge(&mut self, other: &RunAggregate) {
        self.pass += other.pass;
        self.fail += other.fail;
    }
}

/// One recorded command failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFailure {
    pub method: String,
    pub params: serde_json::Value,
    pub reason: String,
}

/// Outcome of one suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub suite: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub aggregate: RunAggregate,
    pub failures: Vec<CommandFailure>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.aggregate.fail == 0 && self.aggregate.completed
    }
}

/// Sequences suites over the RPC client
pub struct TestRunner {
    client: RpcClient,
    settings: Arc<Settings>,
}

impl TestRunner {
    pub fn new(client: RpcClient, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Run one suite to completion.
    ///
    /// Returns `Err` only for suite-level configuration problems (for
    /// example an invalid locator); command failures land in the report.
    pub async fn run_suite(&self, suite: &TestSuite) -> Result<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut aggregate = RunAggregate::default();
        let mut failures = Vec::new();

        info!("running suite {} ({} steps)", suite.name, suite.steps.len());

        for step in &suite.steps {
            let command = step.to_command(&self.settings)?;
            debug!("step: {}", command);

            match self.client.call(&command).await {
                Ok(result) if result.is_pass() => {
                    aggregate.pass += 1;
                }
                Ok(result) => {
                    aggregate.fail += 1;
                    let failure = CommandFailure {
                        method: command.method.clone(),
                        params: serde_json::Value::Object(command.params.clone()),
                        reason: format!("result was falsy: {}", result.result),
                    };
                    error!("✗ {} - {}", command, failure.reason);
                    failures.push(failure);
                    if !self.settings.continue_on_failure {
                        break;
                    }
                }
                Err(e) if e.is_command_failure() => {
                    aggregate.fail += 1;
                    let failure = CommandFailure {
                        method: command.method.clone(),
                        params: serde_json::Value::Object(command.params.clone()),
                        reason: e.to_string(),
                    };
                    error!("✗ {} - {}", command, failure.reason);
                    failures.push(failure);
                    if !self.settings.continue_on_failure {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        aggregate.completed = true;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "suite {} done: {} passed, {} failed ({} ms)",
            suite.name, aggregate.pass, aggregate.fail, duration_ms
        );

        Ok(RunReport {
            suite: suite.name.clone(),
            run_id: Uuid::new_v4(),
            started_at,
            duration_ms,
            aggregate,
            failures,
        })
    }

    /// Run a list of suites in order, folding each run into the totals
    pub async fn run_suites(
        &self,
        suites: &[TestSuite],
        totals: &SessionTotals,
    ) -> Result<Vec<RunReport>> {
        let mut reports = Vec::new();
        for suite in suites {
            let report = self.run_suite(suite).await?;
            totals.record(&report);
            reports.push(report);
        }
        totals.complete();
        Ok(reports)
    }

    /// Write a report as JSON under the configured report directory
    pub fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.settings.report_dir)?;
        let path = self
            .settings
            .report_dir
            .join(format!("{}.json", report.suite));
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json)?;
        debug!("report written to {}", path.display());
        Ok(path)
    }
}

/// Session-level totals across suite runs.
///
/// All mutation goes through the one mutex here, so concurrent observers
/// never see lost updates.
#[derive(Default)]
pub struct SessionTotals {
    inner: Mutex<RunAggregate>,
}

impl SessionTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one run's aggregate into the session totals
    pub fn record(&self, report: &RunReport) {
        self.inner.lock().merge(&report.aggregate);
    }

    /// Mark the session finished
    pub fn complete(&self) {
        self.inner.lock().completed = true;
    }

    /// Current snapshot of the totals
    pub fn snapshot(&self) -> RunAggregate {
        *self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(pass: usize, fail: usize) -> RunReport {
        RunReport {
            suite: "s".into(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 1,
            aggregate: RunAggregate {
                pass,
                fail,
                completed: true,
            },
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_totals_accumulate_and_complete() {
        let totals = SessionTotals::new();
        totals.record(&report_with(3, 1));
        totals.record(&report_with(2, 0));

        let snapshot = totals.snapshot();
        assert_eq!(snapshot.pass, 5);
        assert_eq!(snapshot.fail, 1);
        assert_eq!(snapshot.total(), 6);
        assert!(!snapshot.completed);

        totals.complete();
        assert!(totals.snapshot().completed);
    }

    #[test]
    fn test_report_success_requires_completion_and_no_failures() {
        let mut report = report_with(2, 0);
        assert!(report.success());
        report.aggregate.fail = 1;
        assert!(!report.success());
        report.aggregate.fail = 0;
        report.aggregate.completed = false;
        assert!(!report.success());
    }
}
