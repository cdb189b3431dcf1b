//! Build verification.
//!
//! A cheap check command is retried on failure; if it keeps failing a full
//! build is run exactly once as the definitive answer. The diagnostic text of
//! whichever command ran last is kept so it can be fed into a fix prompt.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::LoopConfig;
use crate::error::{LoopError, Result};
use crate::retry::RetryExecutor;

/// File in the capture directory holding the latest diagnostic text.
pub const BUILD_LOG_FILE: &str = "build.log";

/// Result of one verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub passed: bool,
    pub diagnostic_text: String,
}

impl BuildOutcome {
    pub fn pass(diagnostic_text: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostic_text: diagnostic_text.into(),
        }
    }

    pub fn fail(diagnostic_text: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic_text: diagnostic_text.into(),
        }
    }
}

/// Reports whether the project currently builds.
#[async_trait]
pub trait BuildVerifier: Send + Sync {
    async fn verify(&self) -> BuildOutcome;
}

/// Exit status and combined output of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
}

/// Runs a command line and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<CommandOutput>;
}

/// Runs commands split with shell-word rules, without a shell.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
}

impl ShellRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let parts = shell_words::split(command)
            .map_err(|e| LoopError::Config(format!("cannot parse command `{}`: {}", command, e)))?;
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| LoopError::Config("command cannot be empty".to_string()))?;

        debug!(command, "running build command");
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LoopError::ProcessFailure(format!("failed to run `{}`: {}", command, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&stderr);
        }

        Ok(CommandOutput {
            success: output.status.success(),
            output: text,
        })
    }
}

/// Fast-check-then-full-build verifier.
pub struct CommandVerifier<R> {
    runner: R,
    fast_check: String,
    full_build: String,
    retry: RetryExecutor,
    capture_dir: Option<PathBuf>,
}

impl CommandVerifier<ShellRunner> {
    pub fn from_config(config: &LoopConfig, retry: RetryExecutor) -> Self {
        Self::new(
            ShellRunner::new(&config.working_dir),
            &config.fast_check_command,
            &config.full_build_command,
            retry,
        )
    }
}

impl<R: CommandRunner> CommandVerifier<R> {
    pub fn new(
        runner: R,
        fast_check: impl Into<String>,
        full_build: impl Into<String>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            runner,
            fast_check: fast_check.into(),
            full_build: full_build.into(),
            retry,
            capture_dir: None,
        }
    }

    /// Write the latest diagnostic text to [`BUILD_LOG_FILE`] in `dir`.
    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = Some(dir.into());
        self
    }

    async fn fast_check(&self) -> Result<CommandOutput> {
        let runner = &self.runner;
        let command = self.fast_check.as_str();
        self.retry
            .execute("fast check", move || async move {
                let out = runner.run(command).await?;
                if out.success {
                    Ok(out)
                } else {
                    Err(LoopError::BuildFailed {
                        diagnostic: out.output,
                    })
                }
            })
            .await
    }

    async fn full_build(&self) -> BuildOutcome {
        match self.runner.run(&self.full_build).await {
            Ok(out) if out.success => {
                info!(command = %self.full_build, "full build passed");
                BuildOutcome::pass(out.output)
            }
            Ok(out) => {
                warn!(command = %self.full_build, "full build failed");
                BuildOutcome::fail(out.output)
            }
            Err(err) => {
                warn!(command = %self.full_build, error = %err, "full build could not run");
                BuildOutcome::fail(err.to_string())
            }
        }
    }

    fn capture(&self, outcome: &BuildOutcome) {
        if let Some(dir) = &self.capture_dir {
            let path = dir.join(BUILD_LOG_FILE);
            if let Err(e) = std::fs::write(&path, &outcome.diagnostic_text) {
                warn!(path = %path.display(), error = %e, "failed to capture build output");
            }
        }
    }
}

#[async_trait]
impl<R: CommandRunner> BuildVerifier for CommandVerifier<R> {
    async fn verify(&self) -> BuildOutcome {
        let outcome = match self.fast_check().await {
            Ok(out) => {
                info!(command = %self.fast_check, "fast check passed");
                BuildOutcome::pass(out.output)
            }
            Err(err) => {
                warn!(command = %self.fast_check, error = %err, "fast check failed, running full build");
                self.full_build().await
            }
        };
        self.capture(&outcome);
        outcome
    }
}
