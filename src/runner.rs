//! Command Runner: executes a shell command, captures combined
//! stdout+stderr to a temp file, then forwards it to the Evidence
//! Ledger.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::error;

use crate::ledger::{self, CaptureOutcome};

/// Reserved for evidence-capture failure, distinct from any real command
/// exit code.
pub const CAPTURE_FAILURE_EXIT_CODE: i32 = 2;

pub struct RunOutcome {
    pub exit_code: i32,
    pub capture: Option<CaptureOutcome>,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_and_capture(
    command: &str,
    actor: &str,
    phase: &str,
    task_id: &str,
    ledger_path: &Path,
    evidence_dir: &Path,
) -> RunOutcome {
    let shell = if cfg!(windows) { "cmd" } else { "sh" };
    let shell_flag = if cfg!(windows) { "/C" } else { "-c" };

    let output = Command::new(shell)
        .arg(shell_flag)
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let (combined, exit_code) = match output {
        Ok(out) => {
            let mut combined = out.stdout;
            combined.extend_from_slice(&out.stderr);
            (combined, out.status.code().unwrap_or(-1))
        }
        Err(e) => {
            error!("failed to spawn command {command:?}: {e}");
            return RunOutcome { exit_code: CAPTURE_FAILURE_EXIT_CODE, capture: None };
        }
    };

    let tmp_path = temp_path();
    if let Err(e) = write_temp(&tmp_path, &combined).await {
        error!("failed to write captured output to temp file: {e}");
        return RunOutcome { exit_code: CAPTURE_FAILURE_EXIT_CODE, capture: None };
    }

    match ledger::capture(&tmp_path, command, exit_code, actor, phase, task_id, ledger_path, evidence_dir) {
        Ok(outcome) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            RunOutcome { exit_code, capture: Some(outcome) }
        }
        Err(e) => {
            error!("evidence capture failed: {e}");
            RunOutcome { exit_code: CAPTURE_FAILURE_EXIT_CODE, capture: None }
        }
    }
}

fn temp_path() -> PathBuf {
    std::env::temp_dir().join(format!("swarm_cmd_{}_{}.log", std::process::id(), now_nanos()))
}

fn now_nanos() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

async fn write_temp(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = tokio::fs::File::create(path).await?;
    f.write_all(bytes).await?;
    f.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_returns_its_exit_code() {
        let dir = std::env::temp_dir().join(format!("swarm_runner_test_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let ledger_path = dir.join("CI_LOGS.md");
        let evidence_dir = dir.join("evidence");

        let outcome = run_and_capture("echo hello", "orchestrator", "BACKEND", "T1", &ledger_path, &evidence_dir).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.capture.is_some());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn nonzero_command_exit_code_is_preserved_not_reserved_code() {
        let dir = std::env::temp_dir().join(format!("swarm_runner_test2_{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let ledger_path = dir.join("CI_LOGS.md");
        let evidence_dir = dir.join("evidence");

        let outcome = run_and_capture("exit 7", "orchestrator", "BACKEND", "T1", &ledger_path, &evidence_dir).await;
        assert_eq!(outcome.exit_code, 7);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
