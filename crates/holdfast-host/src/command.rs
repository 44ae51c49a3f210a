//! Execution wrapper for host commands.
//!
//! Keeps process handling and diagnostic parsing in one place so the service
//! layer can be tested with plain `sh -c` scripts.

use holdfast_provider::{ActuatorError, ObserverError, TargetId};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Exit code a lookup command uses to say "no record for this identity".
pub(crate) const NO_RECORD_EXIT: i32 = 3;

const EX_DATAERR: i32 = 65;
const EX_TEMPFAIL: i32 = 75;
const EX_NOPERM: i32 = 77;

#[derive(Debug, Error)]
pub(crate) enum RunError {
    #[error("command template is empty")]
    Empty,
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Output {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) status: i32,
}

impl Output {
    /// First non-empty stdout line, which is all lookups ever print.
    pub(crate) fn first_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    /// stderr when present, stdout otherwise.
    pub(crate) fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        if !stderr.is_empty() {
            stderr.to_string()
        } else {
            stdout.to_string()
        }
    }
}

/// argv template with `{placeholder}` substitution and a hard timeout.
#[derive(Debug, Clone)]
pub(crate) struct HostCommand {
    argv: Vec<String>,
    timeout: Duration,
}

impl HostCommand {
    /// `None` when the template has no program to run.
    pub(crate) fn new(argv: &[String], timeout: Duration) -> Option<Self> {
        let argv: Vec<String> = argv.to_vec();
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            return None;
        }
        Some(Self { argv, timeout })
    }

    /// Command line as written in the config, for logs and probe reports.
    pub(crate) fn display(&self) -> String {
        self.argv.join(" ")
    }

    pub(crate) async fn run(&self, substitutions: &[(&str, &str)]) -> Result<Output, RunError> {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| substitute(arg, substitutions))
            .collect();
        let (program, args) = argv.split_first().ok_or(RunError::Empty)?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| RunError::Spawn {
            command: argv.join(" "),
            source,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| RunError::Spawn {
                command: argv.join(" "),
                source,
            })?,
            Err(_) => {
                return Err(RunError::TimedOut {
                    command: argv.join(" "),
                    timeout: self.timeout,
                })
            }
        };

        Ok(Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

fn substitute(arg: &str, substitutions: &[(&str, &str)]) -> String {
    substitutions
        .iter()
        .fold(arg.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}

/// Map a failed attach run onto the actuator error kinds.
pub(crate) fn classify_run_error(target: &TargetId, err: RunError) -> ActuatorError {
    match err {
        RunError::TimedOut { .. } => ActuatorError::Transient(format!("attach to {target}: {err}")),
        RunError::Empty | RunError::Spawn { .. } => {
            ActuatorError::Rejected(format!("attach to {target}: {err}"))
        }
    }
}

pub(crate) fn classify_attach_failure(target: &TargetId, output: &Output) -> ActuatorError {
    let trimmed = output.diagnostic();
    let lower = trimmed.to_ascii_lowercase();
    let diagnostic = if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed
    };
    let message = format!(
        "attach to {target} failed: {diagnostic} (exit code {})",
        output.status
    );

    // Shell could not find or execute the helper.
    if output.status == 126 || output.status == 127 {
        return ActuatorError::Rejected(message);
    }

    if output.status == EX_TEMPFAIL
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("try again")
        || lower.contains("temporarily")
        || lower.contains("rate limit")
        || lower.contains("connection reset")
    {
        return ActuatorError::Transient(message);
    }

    if output.status == EX_DATAERR
        || lower.contains("unknown channel")
        || lower.contains("unknown target")
        || lower.contains("no such channel")
        || lower.contains("invalid target")
        || lower.contains("not found")
    {
        return ActuatorError::InvalidTarget(message);
    }

    if output.status == EX_NOPERM
        || lower.contains("permission denied")
        || lower.contains("not permitted")
        || lower.contains("forbidden")
        || lower.contains("missing access")
    {
        return ActuatorError::Rejected(message);
    }

    ActuatorError::Rejected(message)
}

pub(crate) fn lookup_failure(what: &str, output: &Output) -> ObserverError {
    let diagnostic = output.diagnostic();
    if diagnostic.is_empty() {
        ObserverError::Lookup(format!("{what} failed (exit code {})", output.status))
    } else {
        ObserverError::Lookup(format!(
            "{what} failed: {diagnostic} (exit code {})",
            output.status
        ))
    }
}
