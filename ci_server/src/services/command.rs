//! Shell command runner for build execution, and the mapping from an
//! execution outcome to a build status.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

use crate::models::build::BuildStatus;

/// Largest stderr tail kept on a failed command.
const MAX_STDERR_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("command exited with {return_code}: {stderr}")]
    Failed { return_code: i32, stderr: String },
}

/// How a build's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Passed,
    TestsFailed,
    /// The build could not be executed to completion.
    Errored,
}

impl BuildStatus {
    pub fn from_outcome(outcome: ExecutionOutcome) -> BuildStatus {
        match outcome {
            ExecutionOutcome::Passed => BuildStatus::Success,
            ExecutionOutcome::TestsFailed => BuildStatus::Fail,
            ExecutionOutcome::Errored => BuildStatus::Error,
        }
    }
}

/// Run `script` with `bash -c` in `work_dir` and return its stdout.
pub async fn run_command(
    script: &str,
    work_dir: &Path,
    env: &[(&str, &str)],
) -> Result<String, CommandError> {
    tracing::debug!(command = %script, dir = %work_dir.display(), "Running command");

    let output = Command::new("bash")
        .args(["-c", script])
        .current_dir(work_dir)
        .env("CI", "true")
        .envs(env.iter().copied())
        .output()
        .await?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = match stderr.len().checked_sub(MAX_STDERR_BYTES) {
        Some(skip) if skip > 0 => {
            let start = (skip..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            format!("...truncated...\n{}", &stderr[start..])
        }
        _ => stderr.into_owned(),
    };

    Err(CommandError::Failed {
        return_code: output.status.code().unwrap_or(-1),
        stderr,
    })
}

/// Classify a test command's result.
///
/// A non-zero exit is a test failure. A command that could not be started is
/// an execution error.
pub fn test_outcome<T>(result: &Result<T, CommandError>) -> ExecutionOutcome {
    match result {
        Ok(_) => ExecutionOutcome::Passed,
        Err(CommandError::Failed { .. }) => ExecutionOutcome::TestsFailed,
        Err(CommandError::Spawn(_)) => ExecutionOutcome::Errored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let dir = std::env::temp_dir();
        let out = run_command("echo \"$CI:$CI_BUILD_ID\"", &dir, &[("CI_BUILD_ID", "7")])
            .await
            .unwrap();
        assert_eq!(out.trim(), "true:7");
    }

    #[tokio::test]
    async fn failing_command_reports_code_and_stderr() {
        let dir = std::env::temp_dir();
        let err = run_command("echo broken >&2; exit 3", &dir, &[])
            .await
            .unwrap_err();
        match err {
            CommandError::Failed {
                return_code,
                stderr,
            } => {
                assert_eq!(return_code, 3);
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_work_dir_is_a_spawn_error() {
        let result = run_command("true", Path::new("/nonexistent/ci-dashboard"), &[]).await;
        assert!(matches!(result, Err(CommandError::Spawn(_))));
        assert_eq!(test_outcome(&result), ExecutionOutcome::Errored);
    }

    #[test]
    fn outcomes_map_to_distinct_statuses() {
        let failed: Result<(), CommandError> = Err(CommandError::Failed {
            return_code: 1,
            stderr: String::new(),
        });
        assert_eq!(
            BuildStatus::from_outcome(test_outcome(&failed)),
            BuildStatus::Fail
        );
        assert_eq!(
            BuildStatus::from_outcome(test_outcome(&Ok::<(), CommandError>(()))),
            BuildStatus::Success
        );
    }
}
