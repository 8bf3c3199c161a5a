//! Test Harness Engine
//!
//! Runs a [`TestPlan`] against an install prefix:
//! - File and requirement checks are evaluated in place
//! - Import and command checks run on worker threads, up to `max_parallel`
//! - Workers report back over a channel as they finish
//! - `fail_fast` stops scheduling after the first failure

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info, warn};

use super::command::{evaluate, run_import, run_shell, CommandOutput, ExecContext};
use super::plan::{Action, Check, Expectation, TestPlan};
use super::report::{CheckResult, Status, TestReport};
use super::HarnessError;
use crate::environment::platform::Platform;
use crate::environment::prefix::{PackageRecord, Prefix};

const NO_CONDA_META: &str = "prefix has no conda-meta directory";

/// Post-install test runner.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use condarecipe::environment::platform::RenderContext;
/// use condarecipe::environment::prefix::Prefix;
/// use condarecipe::harness::{Harness, TestPlan};
/// use condarecipe::recipe::{load_recipe, TemplateContext};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ctx = RenderContext::current();
///     let recipe = load_recipe(Path::new("recipe"), &TemplateContext::from_env(), &ctx)?;
///     let prefix = Prefix::new("/opt/conda");
///
///     let mut harness = Harness::new(TestPlan::from_recipe(&recipe, Some(&prefix))?);
///     harness.set_prefix(prefix);
///     harness.set_max_parallel(4);
///
///     let report = harness.run()?;
///     println!("{}", report.summary());
///     Ok(())
/// }
/// ```
pub struct Harness {
    plan: TestPlan,
    prefix: Option<Prefix>,
    platform: Platform,
    max_parallel: usize,
    timeout: Option<Duration>,
    dry_run: bool,
    fail_fast: bool,
    working_dir: Option<PathBuf>,
}

impl Harness {
    pub fn new(plan: TestPlan) -> Self {
        Self {
            plan,
            prefix: None,
            platform: Platform::current(),
            max_parallel: 1,
            timeout: None,
            dry_run: false,
            fail_fast: false,
            working_dir: None,
        }
    }

    pub fn set_prefix(&mut self, prefix: Prefix) {
        self.prefix = Some(prefix);
    }

    /// Sets the shell family used for commands.
    pub fn set_platform(&mut self, platform: Platform) {
        self.platform = platform;
    }

    /// Sets the maximum number of concurrent checks, capped at the CPU count.
    pub fn set_max_parallel(&mut self, max: usize) {
        let cpus = num_cpus::get().max(1);
        if max > cpus {
            info!("Limiting parallel checks to {} (requested {})", cpus, max);
        }
        self.max_parallel = max.clamp(1, cpus);
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Per-check time limit; checks running longer are killed.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.fail_fast = fail_fast;
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Runs every check and returns the report. Check failures end up in
    /// the report; `Err` is reserved for a harness that cannot start.
    pub fn run(&self) -> Result<TestReport, HarnessError> {
        let start_time = Instant::now();

        if let Some(prefix) = &self.prefix {
            if !prefix.exists() {
                return Err(HarnessError::MissingPrefix(prefix.root().to_path_buf()));
            }
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(HarnessError::MissingWorkingDir(dir.clone()));
            }
        }

        let mut report = TestReport::new(
            &self.plan,
            self.platform,
            self.prefix.as_ref().map(Prefix::root),
            self.dry_run,
        );

        info!(
            "Testing {} {}: {} checks (max parallel: {}, dry run: {})",
            self.plan.package,
            self.plan.version,
            self.plan.len(),
            self.max_parallel,
            self.dry_run
        );

        if self.dry_run {
            for check in &self.plan.checks {
                print_dry_run(check);
                report.record(CheckResult::skipped(check, "dry run"));
            }
            return Ok(report.finish(start_time.elapsed()));
        }

        let ctx = self.exec_context()?;
        let records = self.installed_records();

        let (tx, rx): (Sender<CheckResult>, Receiver<CheckResult>) = channel();

        let mut pending: VecDeque<&Check> = self.plan.checks.iter().collect();
        let mut running_count = 0;
        let mut stopped = false;

        loop {
            while running_count < self.max_parallel && !stopped {
                let Some(check) = pending.pop_front() else {
                    break;
                };

                info!("Starting check: {}", check);

                if !check.kind.spawns_process() {
                    let result = run_check(check, &ctx, records.as_deref());
                    stopped = self.after(&result);
                    report.record(result);
                    continue;
                }

                let tx = tx.clone();
                let check_clone = check.clone();
                let ctx_clone = ctx.clone();

                thread::spawn(move || {
                    let result = run_check(&check_clone, &ctx_clone, None);
                    if let Err(e) = tx.send(result) {
                        error!("Failed to send check result: {}", e);
                    }
                });

                running_count += 1;
            }

            if running_count == 0 {
                break;
            }

            let result = rx
                .recv()
                .map_err(|e| HarnessError::Channel(e.to_string()))?;
            running_count -= 1;

            if self.after(&result) {
                stopped = true;
            }
            report.record(result);
        }

        for check in pending {
            report.record(CheckResult::skipped(check, "skipped after an earlier failure"));
        }

        let report = report.finish(start_time.elapsed());
        info!(
            "Finished {} checks in {:.2?}: {} passed, {} failed, {} skipped",
            report.results.len(),
            start_time.elapsed(),
            report.passed(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Logs a finished check; true when the run should stop.
    fn after(&self, result: &CheckResult) -> bool {
        let reason = result.reason.as_deref().unwrap_or_default();
        match result.status {
            Status::Passed => info!("Check '{}' passed", result.name),
            Status::Skipped => warn!("Check '{}' skipped: {}", result.name, reason),
            Status::Failed => {
                error!("Check '{}' failed: {}", result.name, reason);
                if !result.stderr.trim().is_empty() {
                    error!("stderr:\n{}", result.stderr.trim_end());
                }
                return self.fail_fast;
            }
        }
        false
    }

    /// Child environment: prefix first on `PATH` plus the package
    /// variables build scripts expect.
    fn exec_context(&self) -> Result<ExecContext, HarnessError> {
        let mut ctx = ExecContext::new(self.platform);
        ctx.timeout = self.timeout;
        ctx.working_dir = self.working_dir.clone();
        ctx.vars.push(("PKG_NAME".to_string(), self.plan.package.clone().into()));
        ctx.vars.push(("PKG_VERSION".to_string(), self.plan.version.clone().into()));

        if let Some(prefix) = &self.prefix {
            let path = prefix.path_with_prefix(self.platform).map_err(|e| {
                HarnessError::Environment(format!(
                    "cannot build PATH for {}: {}",
                    prefix.root().display(),
                    e
                ))
            })?;
            ctx.path = Some(path);

            let root = prefix.root().as_os_str().to_os_string();
            ctx.vars.push(("PREFIX".to_string(), root.clone()));
            ctx.vars.push(("CONDA_PREFIX".to_string(), root));

            let python = prefix.python_executable(self.platform);
            if python.is_file() {
                ctx.python = python;
            }
        }

        Ok(ctx)
    }

    /// Installed records, or `None` when requirement checks cannot run.
    fn installed_records(&self) -> Option<Vec<PackageRecord>> {
        let prefix = self.prefix.as_ref()?;
        if !prefix.has_conda_meta() {
            if self.plan.checks.iter().any(|c| matches!(c.action, Action::Requirement(_))) {
                warn!(
                    "{} has no conda-meta directory; skipping requirement checks",
                    prefix.root().display()
                );
            }
            return None;
        }
        match prefix.installed_packages() {
            Ok(records) => Some(records),
            Err(e) => {
                warn!("Cannot read installed packages: {}", e);
                None
            }
        }
    }
}

/// Runs one check to completion.
fn run_check(check: &Check, ctx: &ExecContext, records: Option<&[PackageRecord]>) -> CheckResult {
    let started_at = Local::now();
    let timer = Instant::now();
    let done = |status: Status| CheckResult::new(check, status, started_at, timer.elapsed());

    match &check.action {
        Action::FileExists(path) => {
            if path.exists() {
                done(Status::Passed)
            } else {
                done(Status::Failed).with_reason(format!("missing {}", path.display()))
            }
        }
        Action::Requirement(spec) => {
            let Some(records) = records else {
                return CheckResult::skipped(check, NO_CONDA_META);
            };
            match Prefix::find_installed(records, spec) {
                Some(record) => done(Status::Passed).with_reason(format!(
                    "installed {} {} {}",
                    record.name, record.version, record.build
                )),
                None => {
                    let installed: Vec<String> = records
                        .iter()
                        .filter(|r| r.name.eq_ignore_ascii_case(&spec.name))
                        .map(|r| r.version.clone())
                        .collect();
                    let reason = if installed.is_empty() {
                        format!("{} is not installed", spec.name)
                    } else {
                        format!("unsatisfied, installed: {}", installed.join(", "))
                    };
                    done(Status::Failed).with_reason(reason)
                }
            }
        }
        Action::Import(module) => finish(check, run_import(module, ctx), &Expectation::ExitZero, ctx, done),
        Action::Shell {
            command,
            expectation,
        } => finish(check, run_shell(check.id, command, ctx), expectation, ctx, done),
    }
}

fn finish(
    check: &Check,
    output: Result<CommandOutput, HarnessError>,
    expectation: &Expectation,
    ctx: &ExecContext,
    done: impl Fn(Status) -> CheckResult,
) -> CheckResult {
    let output = match output {
        Ok(output) => output,
        Err(e) => return done(Status::Failed).with_reason(e.to_string()),
    };

    match evaluate(expectation, &output, ctx.timeout) {
        Ok(()) => done(Status::Passed).with_output(output),
        Err(reason) => {
            debug!("Check '{}' output:\n{}", check.name, output.stdout);
            done(Status::Failed).with_reason(reason).with_output(output)
        }
    }
}

/// Prints what a check would do.
fn print_dry_run(check: &Check) {
    println!();
    println!("[DRY RUN] Check: {}", check);
    match &check.action {
        Action::FileExists(path) => println!("  Expect file: {}", path.display()),
        Action::Requirement(spec) => println!("  Expect installed: {}", spec),
        Action::Import(module) => println!("  Run: python -c \"import {}\"", module),
        Action::Shell {
            command,
            expectation,
        } => {
            println!("  Run: {}", command);
            match expectation {
                Expectation::ExitZero => {}
                Expectation::VersionOutput(version) => println!("  Expect version: {}", version),
                Expectation::NonEmptyOutput => println!("  Expect output"),
            }
        }
    }
}
