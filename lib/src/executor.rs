//! The single point of external-process invocation.
//!
//! Every inspector and the baseline resolver shells out through an
//! [`Executor`] rather than calling [`std::process::Command`] directly. This
//! keeps the core deterministically testable from fixtures: production code
//! uses [`ProcessExecutor`], tests substitute [`FakeExecutor`].

use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;

/// The result of running a command. Never constructed to represent a failure
/// to *launch* the process being a hard error for callers -- see
/// [`ExecOutput::exec_error`] for that case; everything else is surfaced as a
/// nonzero exit code so inspectors can handle failures uniformly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Synthesize a result for a command that could not even be spawned
    /// (binary missing, permission denied, etc).
    fn exec_error(err: std::io::Error) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: format!("failed to execute: {err}"),
            exit_code: 127,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout_string()
            .lines()
            .map(|l| l.to_owned())
            .collect()
    }
}

/// Single point of external-process invocation. Given an argument vector and
/// optional working directory, returns an [`ExecOutput`] without ever
/// raising on a nonzero exit code.
pub trait Executor: std::fmt::Debug + Send + Sync {
    fn run(&self, argv: &[&str], cwd: Option<&Utf8Path>) -> ExecOutput;
}

/// Production executor: spawns the command directly on this host (or, when
/// the argv is prefixed by a namespace-entry command such as `nsenter`,
/// indirectly on the target host).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn run(&self, argv: &[&str], cwd: Option<&Utf8Path>) -> ExecOutput {
        let Some((exe, args)) = argv.split_first() else {
            return ExecOutput {
                stdout: Vec::new(),
                stderr: "empty argument vector".to_owned(),
                exit_code: 127,
            };
        };
        let mut cmd = Command::new(exe);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        tracing::debug!("exec: {argv:?}");
        match cmd.output() {
            Ok(output) => ExecOutput {
                stdout: output.stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Err(err) => ExecOutput::exec_error(err),
        }
    }
}

type FakeFn = dyn Fn(&[&str], Option<&Utf8Path>) -> ExecOutput + Send + Sync;

/// Test executor backed by a closure. Also records every invocation so
/// tests can assert on what was run.
pub struct FakeExecutor {
    f: Box<FakeFn>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl std::fmt::Debug for FakeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeExecutor").finish_non_exhaustive()
    }
}

impl FakeExecutor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[&str], Option<&Utf8Path>) -> ExecOutput + Send + Sync + 'static,
    {
        Self {
            f: Box::new(f),
            calls: Default::default(),
        }
    }

    /// Convenience constructor: always return the same output regardless of argv.
    pub fn constant(output: ExecOutput) -> Self {
        Self::new(move |_, _| output.clone())
    }

    /// Convenience constructor: pretend every invocation fails to launch.
    pub fn always_missing() -> Self {
        Self::new(|_, _| ExecOutput {
            stdout: Vec::new(),
            stderr: "command not found".to_owned(),
            exit_code: 127,
        })
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl Executor for FakeExecutor {
    fn run(&self, argv: &[&str], cwd: Option<&Utf8Path>) -> ExecOutput {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        (self.f)(argv, cwd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_executor_missing_binary() {
        let exec = ProcessExecutor;
        let out = exec.run(&["/nonexistent/definitely-not-a-binary"], None);
        assert!(!out.success());
        assert_eq!(out.exit_code, 127);
    }

    #[test]
    fn process_executor_true_false() {
        let exec = ProcessExecutor;
        assert!(exec.run(&["true"], None).success());
        assert!(!exec.run(&["false"], None).success());
    }

    #[test]
    fn fake_executor_records_calls() {
        let fake = FakeExecutor::new(|argv, _| ExecOutput {
            stdout: argv.join(" ").into_bytes(),
            stderr: String::new(),
            exit_code: 0,
        });
        let out = fake.run(&["rpm", "-qa"], None);
        assert_eq!(out.stdout_string(), "rpm -qa");
        assert_eq!(fake.calls(), vec![vec!["rpm".to_string(), "-qa".to_string()]]);
    }
}
