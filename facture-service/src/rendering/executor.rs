use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0} is not installed or not on PATH")]
    NotFound(String),

    #[error("Command timed out after {0} seconds")]
    TimedOut(u64),

    #[error("Command failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs external programs with a hard deadline. The child is killed when
/// the deadline passes.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn execute(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
    ) -> Result<Output, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        tracing::debug!(
            program = %program,
            args = ?args,
            timeout_secs = %self.timeout.as_secs(),
            "Executing command"
        );

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(CommandError::TimedOut(self.timeout.as_secs())),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CommandError::NotFound(program.to_string()))
            }
            Ok(result) => result?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                program = %program,
                stderr = %stderr,
                "Command failed"
            );
            return Err(CommandError::Failed(stderr.trim().to_string()));
        }

        tracing::debug!(
            program = %program,
            output_size = output.stdout.len(),
            "Command succeeded"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let err = executor
            .execute("definitely-not-a-real-binary-4242", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }
}
