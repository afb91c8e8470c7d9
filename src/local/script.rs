use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::Result;

/// Result of a local verification or security run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutput {
    pub ok: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

impl CheckOutput {
    /// Last `lines` lines of output, for error messages.
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output.trim_end().lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

#[async_trait]
pub trait LocalCheck: Send + Sync {
    /// Human-readable label, e.g. the command line.
    fn label(&self) -> &str;

    async fn run(&self) -> Result<CheckOutput>;
}

/// Runs a shell command in the repository root.
pub struct ShellCheck {
    command: String,
    workdir: PathBuf,
}

impl ShellCheck {
    pub fn new(command: &str, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl LocalCheck for ShellCheck {
    fn label(&self) -> &str {
        &self.command
    }

    async fn run(&self) -> Result<CheckOutput> {
        tracing::info!(command = %self.command, "Running local script");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        tracing::debug!(
            command = %self.command,
            status = ?output.status.code(),
            "Local script finished"
        );

        Ok(CheckOutput {
            ok: output.status.success(),
            output: combined,
        })
    }
}
