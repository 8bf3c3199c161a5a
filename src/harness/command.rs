//! Check Execution
//!
//! Runs the process-backed checks: test commands through the platform
//! shell and import checks through the prefix interpreter. Output is
//! captured on reader threads so a chatty child cannot block on a full
//! pipe while we wait for it.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use wait_timeout::ChildExt;

use super::plan::Expectation;
use super::HarnessError;
use crate::environment::platform::Platform;
use crate::recipe::version::Version;

/// Version-looking tokens in command output.
static VERSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9][0-9A-Za-z.+!_-]*").expect("version token regex is valid")
});

/// Keeps script names unique across concurrent runs in one process.
static SCRIPT_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Everything a child process needs besides its command line.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub platform: Platform,
    /// Replacement `PATH`; the inherited one is kept when `None`.
    pub path: Option<OsString>,
    pub vars: Vec<(String, OsString)>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub python: PathBuf,
}

impl ExecContext {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            path: None,
            vars: Vec::new(),
            working_dir: None,
            timeout: None,
            python: PathBuf::from("python"),
        }
    }
}

/// Captured result of one child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a test command through the platform shell.
pub fn run_shell(id: usize, command: &str, ctx: &ExecContext) -> Result<CommandOutput, HarnessError> {
    if ctx.platform.is_win() {
        let mut cmd = Command::new("cmd");
        cmd.args(["/d", "/c", command]);
        return execute(cmd, command, ctx);
    }

    let script_path = create_check_script(id, command).map_err(|source| HarnessError::Script {
        check: command.to_string(),
        source,
    })?;

    let mut cmd = Command::new("bash");
    cmd.arg(&script_path);
    let result = execute(cmd, command, ctx);

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("Failed to clean up script {}: {}", script_path.display(), e);
    }

    result
}

/// Runs `python -c "import <module>"`.
pub fn run_import(module: &str, ctx: &ExecContext) -> Result<CommandOutput, HarnessError> {
    let mut cmd = Command::new(&ctx.python);
    cmd.arg("-c").arg(format!("import {}", module));
    execute(cmd, &format!("import {}", module), ctx)
}

/// Writes a `set -e` bash script for one command.
fn create_check_script(id: usize, command: &str) -> std::io::Result<PathBuf> {
    let script_dir = std::env::temp_dir().join("condarecipe_scripts");
    fs::create_dir_all(&script_dir)?;

    let seq = SCRIPT_SEQ.fetch_add(1, Ordering::Relaxed);
    let script_path = script_dir.join(format!("check_{}_{}_{}.sh", std::process::id(), seq, id));
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

fn execute(mut cmd: Command, name: &str, ctx: &ExecContext) -> Result<CommandOutput, HarnessError> {
    if let Some(path) = &ctx.path {
        cmd.env("PATH", path);
    }
    for (key, value) in &ctx.vars {
        cmd.env(key, value);
    }
    if let Some(dir) = &ctx.working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if ctx.timeout.is_some() {
        own_process_group(&mut cmd);
    }

    let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
        check: name.to_string(),
        source,
    })?;

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());

    let (exit_code, timed_out) = wait(&mut child, ctx.timeout).map_err(|source| HarnessError::Spawn {
        check: name.to_string(),
        source,
    })?;

    if timed_out {
        warn!("'{}' timed out and was killed", name);
    }

    Ok(CommandOutput {
        exit_code,
        stdout: collect(stdout),
        stderr: collect(stderr),
        timed_out,
    })
}

/// Waits for the child, killing it once `timeout` has passed.
fn wait(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<(Option<i32>, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait()?.code(), false));
    };

    match child.wait_timeout(timeout)? {
        Some(status) => Ok((status.code(), false)),
        None => {
            kill_tree(child)?;
            child.wait()?;
            Ok((None, true))
        }
    }
}

/// Puts the child at the head of a new process group so a timeout can take
/// down everything it started.
#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kills the child and, on unix, every process in its group. Grandchildren
/// would otherwise hold the output pipes open past the timeout.
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: plain syscall; a negative pid addresses the group led by the child.
        if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
            return Ok(());
        }
        debug!("Process group {} could not be signalled: {}", pgid, std::io::Error::last_os_error());
    }
    child.kill()
}

fn capture<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buffer) {
                debug!("Output capture stopped early: {}", e);
            }
            buffer
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Checks a finished command against its expectation. `Err` carries the
/// failure reason.
pub fn evaluate(expectation: &Expectation, output: &CommandOutput, timeout: Option<Duration>) -> Result<(), String> {
    if output.timed_out {
        let limit = timeout.map(|t| format!(" after {:.1?}", t)).unwrap_or_default();
        return Err(format!("timed out{}", limit));
    }
    match output.exit_code {
        Some(0) => {}
        Some(code) => return Err(format!("exited with status {}", code)),
        None => return Err("terminated by a signal".to_string()),
    }

    match expectation {
        Expectation::ExitZero => Ok(()),
        Expectation::NonEmptyOutput => {
            if output.stdout.trim().is_empty() && output.stderr.trim().is_empty() {
                Err("printed no output".to_string())
            } else {
                Ok(())
            }
        }
        Expectation::VersionOutput(version) => {
            let text = format!("{}\n{}", output.stdout, output.stderr);
            if output_mentions_version(&text, version) {
                Ok(())
            } else {
                let shown = text.trim();
                Err(format!(
                    "expected version {} in output, got '{}'",
                    version,
                    shown.lines().next().unwrap_or_default()
                ))
            }
        }
    }
}

/// True if a version-like token in `output` is `version`, either literally
/// or under version ordering (`4.3.21` matches `4.3.21.0`).
pub fn output_mentions_version(output: &str, version: &str) -> bool {
    let declared = Version::parse(version).ok();

    VERSION_TOKEN.find_iter(output).any(|m| {
        let token = m.as_str().trim_end_matches(['.', '-', '_', '+', '!']);
        if token.eq_ignore_ascii_case(version) {
            return true;
        }
        match (&declared, Version::parse(token)) {
            (Some(declared), Ok(found)) => *declared == found,
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mentions_version() {
        assert!(output_mentions_version("conda 4.3.21\n", "4.3.21"));
        assert!(output_mentions_version("conda v4.3.21", "4.3.21"));
        assert!(output_mentions_version("tool 4.3.21.0", "4.3.21"));
        assert!(output_mentions_version("version 1.0rc1.", "1.0rc1"));
        assert!(!output_mentions_version("conda 4.3.210", "4.3.21"));
        assert!(!output_mentions_version("conda 4.3.2", "4.3.21"));
        assert!(!output_mentions_version("", "4.3.21"));
    }

    #[test]
    fn test_evaluate_expectations() {
        let ok = CommandOutput {
            exit_code: Some(0),
            stdout: "conda 4.3.21\n".to_string(),
            ..Default::default()
        };
        assert!(evaluate(&Expectation::ExitZero, &ok, None).is_ok());
        assert!(evaluate(&Expectation::NonEmptyOutput, &ok, None).is_ok());
        assert!(evaluate(&Expectation::VersionOutput("4.3.21".to_string()), &ok, None).is_ok());

        let wrong = evaluate(&Expectation::VersionOutput("4.3.22".to_string()), &ok, None).unwrap_err();
        assert!(wrong.contains("expected version 4.3.22"));

        let silent = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&Expectation::NonEmptyOutput, &silent, None).unwrap_err(),
            "printed no output"
        );

        let failed = CommandOutput {
            exit_code: Some(2),
            ..Default::default()
        };
        assert_eq!(
            evaluate(&Expectation::ExitZero, &failed, None).unwrap_err(),
            "exited with status 2"
        );

        let timed_out = CommandOutput {
            timed_out: true,
            ..Default::default()
        };
        assert!(evaluate(&Expectation::ExitZero, &timed_out, Some(Duration::from_secs(1)))
            .unwrap_err()
            .starts_with("timed out"));
    }

    #[test]
    fn test_version_on_stderr() {
        let output = CommandOutput {
            exit_code: Some(0),
            stderr: "Python 3.6.1".to_string(),
            ..Default::default()
        };
        assert!(evaluate(&Expectation::VersionOutput("3.6.1".to_string()), &output, None).is_ok());
    }

    #[cfg(unix)]
    mod shell {
        use super::*;
        use std::time::Instant;
        use tempfile::tempdir;

        fn ctx() -> ExecContext {
            ExecContext::new(Platform::Linux64)
        }

        #[test]
        fn test_run_shell_captures_output() {
            let output = run_shell(1, "echo hello; echo oops >&2", &ctx()).unwrap();
            assert!(output.success());
            assert_eq!(output.stdout, "hello\n");
            assert_eq!(output.stderr, "oops\n");
        }

        #[test]
        fn test_run_shell_exit_code() {
            let output = run_shell(2, "exit 3", &ctx()).unwrap();
            assert_eq!(output.exit_code, Some(3));
            assert!(!output.success());
        }

        #[test]
        fn test_run_shell_stops_on_first_failure() {
            let output = run_shell(3, "false\necho after", &ctx()).unwrap();
            assert!(!output.success());
            assert!(output.stdout.is_empty());
        }

        #[test]
        fn test_run_shell_environment_and_working_dir() {
            let temp_dir = tempdir().unwrap();
            fs::write(temp_dir.path().join("marker.txt"), "here").unwrap();

            let mut ctx = ctx();
            ctx.vars.push(("PKG_NAME".to_string(), OsString::from("conda")));
            ctx.working_dir = Some(temp_dir.path().to_path_buf());

            let output = run_shell(4, "echo $PKG_NAME; cat marker.txt", &ctx).unwrap();
            assert!(output.success());
            assert_eq!(output.stdout, "conda\nhere");
        }

        #[test]
        fn test_run_shell_timeout() {
            let mut ctx = ctx();
            ctx.timeout = Some(Duration::from_millis(200));
            let output = run_shell(5, "sleep 2", &ctx).unwrap();
            assert!(output.timed_out);
            assert!(!output.success());
        }

        #[test]
        fn test_timeout_kills_grandchildren() {
            let mut ctx = ctx();
            ctx.timeout = Some(Duration::from_millis(200));

            let started = Instant::now();
            let output = run_shell(6, "sleep 5 | cat\necho done", &ctx).unwrap();
            let elapsed = started.elapsed();

            assert!(output.timed_out);
            assert!(!output.stdout.contains("done"));
            assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
        }

        #[test]
        fn test_missing_interpreter() {
            let mut ctx = ctx();
            ctx.python = PathBuf::from("/nonexistent/bin/python");
            let err = run_import("os", &ctx).unwrap_err();
            assert!(matches!(err, HarnessError::Spawn { .. }));
        }
    }
}
