//! Test Report
//!
//! Collects per-check outcomes with their timing and captured output,
//! and renders them as a terminal summary or JSON.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use colored::Colorize;
use serde::Serialize;

use super::command::CommandOutput;
use super::plan::{Check, CheckKind, TestPlan};
use crate::environment::platform::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub id: usize,
    pub kind: CheckKind,
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn new(check: &Check, status: Status, started_at: DateTime<Local>, duration: Duration) -> Self {
        Self {
            id: check.id,
            kind: check.kind,
            name: check.name.clone(),
            status,
            reason: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            started_at,
            duration_ms: duration.as_millis() as u64,
        }
    }

    pub fn skipped(check: &Check, reason: impl Into<String>) -> Self {
        Self::new(check, Status::Skipped, Local::now(), Duration::ZERO).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_output(mut self, output: CommandOutput) -> Self {
        self.exit_code = output.exit_code;
        self.stdout = output.stdout;
        self.stderr = output.stderr;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == Status::Failed
    }
}

/// Results of one harness run.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub package: String,
    pub version: String,
    pub platform: Platform,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<PathBuf>,
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
    pub results: Vec<CheckResult>,
}

impl TestReport {
    pub fn new(plan: &TestPlan, platform: Platform, prefix: Option<&Path>, dry_run: bool) -> Self {
        Self {
            package: plan.package.clone(),
            version: plan.version.clone(),
            platform,
            prefix: prefix.map(Path::to_path_buf),
            dry_run,
            started_at: Local::now(),
            duration_ms: 0,
            results: Vec::with_capacity(plan.len()),
        }
    }

    pub fn record(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    /// Stamps the total time and puts results back in plan order.
    pub fn finish(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self.results.sort_by_key(|r| r.id);
        self
    }

    fn count(&self, status: Status) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(Status::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(Status::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(Status::Skipped)
    }

    /// False if any check failed. Skipped checks do not count against it.
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary, one line per check.
    pub fn summary(&self) -> String {
        let mut output = format!(
            "\nTest results for {} {} ({}):\n\n",
            self.package, self.version, self.platform
        );

        for result in &self.results {
            let label = match result.status {
                Status::Passed => "PASS".green().bold(),
                Status::Failed => "FAIL".red().bold(),
                Status::Skipped => "SKIP".yellow(),
            };
            output.push_str(&format!(
                "  {}  [{}] {} ({} ms)\n",
                label, result.kind, result.name, result.duration_ms
            ));
            if let Some(reason) = &result.reason {
                output.push_str(&format!("        {}\n", reason));
            }
            if result.is_failure() {
                for line in result.stderr.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev() {
                    output.push_str(&format!("        | {}\n", line));
                }
            }
        }

        let verdict = if self.success() {
            "OK".green().bold()
        } else {
            "FAILED".red().bold()
        };
        output.push_str(&format!(
            "\n{}: {} checks, {} passed, {} failed, {} skipped in {:.2?}\n",
            verdict,
            self.results.len(),
            self.passed(),
            self.failed(),
            self.skipped(),
            Duration::from_millis(self.duration_ms)
        ));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::plan::{Action, Expectation};

    fn check(id: usize, name: &str) -> Check {
        Check {
            id,
            kind: CheckKind::Commands,
            name: name.to_string(),
            action: Action::Shell {
                command: name.to_string(),
                expectation: Expectation::ExitZero,
            },
        }
    }

    fn plan() -> TestPlan {
        TestPlan {
            package: "conda".to_string(),
            version: "4.3.21".to_string(),
            checks: vec![check(0, "conda --version"), check(1, "conda info"), check(2, "true")],
        }
    }

    fn report() -> TestReport {
        let plan = plan();
        let mut report = TestReport::new(&plan, Platform::Linux64, Some(Path::new("/opt/env")), false);
        report.record(CheckResult::skipped(&plan.checks[2], "skipped after earlier failure"));
        report.record(
            CheckResult::new(&plan.checks[1], Status::Failed, Local::now(), Duration::from_millis(12))
                .with_reason("exited with status 1")
                .with_output(CommandOutput {
                    exit_code: Some(1),
                    stderr: "boom\n".to_string(),
                    ..Default::default()
                }),
        );
        report.record(CheckResult::new(
            &plan.checks[0],
            Status::Passed,
            Local::now(),
            Duration::from_millis(3),
        ));
        report.finish(Duration::from_millis(20))
    }

    #[test]
    fn test_counts_and_order() {
        let report = report();
        assert_eq!(report.passed(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert!(!report.success());
        let ids: Vec<usize> = report.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(report.duration_ms, 20);
    }

    #[test]
    fn test_summary_lists_checks() {
        let summary = report().summary();
        assert!(summary.contains("conda 4.3.21 (linux-64)"));
        assert!(summary.contains("[commands] conda info (12 ms)"));
        assert!(summary.contains("exited with status 1"));
        assert!(summary.contains("| boom"));
        assert!(summary.contains("3 checks, 1 passed, 1 failed, 1 skipped"));
    }

    #[test]
    fn test_json_output() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["package"], "conda");
        assert_eq!(json["platform"], "linux-64");
        assert_eq!(json["prefix"], "/opt/env");
        assert_eq!(json["results"][1]["status"], "failed");
        assert_eq!(json["results"][1]["kind"], "commands");
        assert_eq!(json["results"][1]["exit_code"], 1);
        assert!(json["results"][0].get("stdout").is_none());
        assert!(json["results"][0]["started_at"].is_string());
    }

    #[test]
    fn test_empty_report_succeeds() {
        let plan = TestPlan {
            package: "a".to_string(),
            version: "1".to_string(),
            checks: Vec::new(),
        };
        let report = TestReport::new(&plan, Platform::Win64, None, true).finish(Duration::ZERO);
        assert!(report.success());
        assert!(report.summary().contains("0 checks"));
    }
}
