//! Runs the external executable for one attempt.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::error::ExecutionError;

/// Everything needed to launch the executable.
pub struct Invocation<'a> {
    /// Program first, then its arguments.
    pub command: &'a [String],
    /// The complete child environment.
    pub env: &'a BTreeMap<String, String>,
    pub current_dir: &'a Path,
    /// Receives both stdout and stderr.
    pub log_path: &'a Path,
    pub timeout: Duration,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Runs the command to completion. The child is killed when the timeout
/// elapses or `cancel` fires.
pub async fn run(invocation: Invocation<'_>, cancel: &CancellationToken) -> Result<(), ExecutionError> {
    let log_error = |source| ExecutionError::LogFile {
        path: invocation.log_path.to_path_buf(),
        source,
    };
    let mut log = File::create(invocation.log_path).map_err(log_error)?;
    let stdout = log.try_clone().map_err(log_error)?;
    let stderr = log.try_clone().map_err(log_error)?;

    let Some((program, args)) = invocation.command.split_first() else {
        return Err(ExecutionError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    let spawned = Command::new(program)
        .args(args)
        .env_clear()
        .envs(invocation.env)
        .current_dir(invocation.current_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => {
            let _ = writeln!(log, "failed to spawn '{}': {}", program, source);
            return Err(ExecutionError::Spawn {
                program: program.clone(),
                source,
            });
        }
    };
    tracing::debug!(pid = child.id(), program = %program, "Spawned executable");

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = cancel.cancelled() => Outcome::Cancelled,
        _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
    };

    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => Ok(()),
        Outcome::Exited(Ok(status)) => Err(ExecutionError::Exit {
            code: status.code(),
        }),
        Outcome::Exited(Err(e)) => Err(ExecutionError::Wait(e)),
        Outcome::Cancelled => {
            kill(&mut child).await;
            let _ = writeln!(log, "cancelled");
            Err(ExecutionError::Cancelled)
        }
        Outcome::TimedOut => {
            kill(&mut child).await;
            let _ = writeln!(log, "timed out after {:?}", invocation.timeout);
            Err(ExecutionError::TimedOut(invocation.timeout))
        }
    }
}

async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill executable");
    }
}
