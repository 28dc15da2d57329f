use crate::{PackError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command in `cwd` and captures its output. A non-zero exit status is
/// reported as `PackError::ToolFailed` carrying both captured streams.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<ProcessOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

#[async_trait]
impl Executor for SystemExecutor {
    async fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<ProcessOutput> {
        tracing::debug!(target: "fnpack", "running `{}` in {}", command, cwd.display());

        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|error| PackError::ToolSpawn {
                command: command.to_string(),
                reason: error.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if output.status.success() {
            Ok(ProcessOutput { stdout, stderr })
        } else {
            Err(PackError::ToolFailed {
                command: command.to_string(),
                code: output.status.code().unwrap_or(1),
                stdout,
                stderr,
            })
        }
    }
}

/// Package manager binaries are batch shims on Windows.
pub fn tool_program(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.cmd", name)
    } else {
        name.to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_program_and_arguments() {
        let spec = CommandSpec::new("npm", ["ls", "--json"]);
        assert_eq!(spec.to_string(), "npm ls --json");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn system_executor_reports_exit_code_and_streams() {
        let executor = SystemExecutor;
        let cwd = std::env::temp_dir();
        let spec = CommandSpec::new("sh", ["-c", "echo partial; echo broken >&2; exit 3"]);

        match executor.run(&spec, &cwd).await {
            Err(PackError::ToolFailed {
                code,
                stdout,
                stderr,
                ..
            }) => {
                assert_eq!(code, 3);
                assert_eq!(stdout.trim(), "partial");
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
