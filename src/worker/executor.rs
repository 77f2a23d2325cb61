use std::process::Stdio;

use tokio::process::Command;

/// Result of one harness command run under a lease.
#[derive(Debug)]
pub struct ExecutionResult {
    pub id: u64,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// Runs job commands through the shell and captures their output.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Build the command for a job, stdout/stderr piped for capture.
    pub fn command(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Execute a job command to completion.
    pub async fn execute(&self, id: u64, command: &str) -> ExecutionResult {
        tracing::info!(id, command, "executing job");
        let result = self.command(command).output().await;
        Self::process_output(id, result)
    }

    pub fn process_output(
        id: u64,
        result: Result<std::process::Output, std::io::Error>,
    ) -> ExecutionResult {
        match result {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();
                let success = output.status.success();

                let error = if success {
                    None
                } else if stderr.is_empty() {
                    Some(format!("exit code: {:?}", exit_code))
                } else {
                    Some(stderr)
                };

                tracing::info!(id, success, exit_code = ?exit_code, "job finished");

                ExecutionResult {
                    id,
                    success,
                    exit_code,
                    output: if stdout.is_empty() { None } else { Some(stdout) },
                    error,
                }
            }
            Err(e) => {
                tracing::error!(id, error = %e, "job could not be executed");
                ExecutionResult {
                    id,
                    success: false,
                    exit_code: None,
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
