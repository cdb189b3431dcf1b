//! Agent invocation.
//!
//! The loop treats the AI pair-programming CLI as an opaque subprocess that
//! takes a model identifier and a message and returns text. [`ProcessInvoker`]
//! is that contract; [`AgentInvoker`] implements it with `tokio::process`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::{LoopConfig, ModelRole, ModelSet};
use crate::error::{LoopError, Result};
use crate::retry::RetryExecutor;

/// Number of trailing stderr characters kept in a failure message.
const STDERR_TAIL_CHARS: usize = 2000;

/// Sends one message to one model and returns the captured reply.
///
/// Implementations must be safe to call again after a failure: the loop
/// retries failed invocations and assumes nothing from the failed attempt
/// persists.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    async fn invoke(&self, model: &str, message: &str) -> Result<String>;
}

/// Runs the configured agent CLI once per invocation.
#[derive(Debug, Clone)]
pub struct AgentInvoker {
    program: String,
    args: Vec<String>,
    model_flag: String,
    message_flag: String,
    working_dir: PathBuf,
    timeout: Duration,
    context_files: Vec<PathBuf>,
}

impl AgentInvoker {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        let defaults = LoopConfig::default();
        let timeout = defaults.agent_timeout();
        Self {
            program: program.into(),
            args: Vec::new(),
            model_flag: defaults.model_flag,
            message_flag: defaults.message_flag,
            working_dir: working_dir.into(),
            timeout,
            context_files: Vec::new(),
        }
    }

    pub fn from_config(config: &LoopConfig) -> Self {
        Self {
            program: config.agent_program.clone(),
            args: config.agent_args.clone(),
            model_flag: config.model_flag.clone(),
            message_flag: config.message_flag.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.agent_timeout(),
            context_files: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Files handed to the agent as chat context on every invocation.
    pub fn with_context_files(mut self, files: Vec<PathBuf>) -> Self {
        self.context_files = files;
        self
    }

    /// Full argument vector for one invocation.
    pub fn command_args(&self, model: &str, message: &str) -> Vec<String> {
        let mut args = self.args.clone();
        if !self.model_flag.is_empty() {
            args.push(self.model_flag.clone());
        }
        args.push(model.to_string());
        if !self.message_flag.is_empty() {
            args.push(self.message_flag.clone());
        }
        args.push(message.to_string());
        args.extend(
            self.context_files
                .iter()
                .map(|f| f.to_string_lossy().into_owned()),
        );
        args
    }
}

#[async_trait]
impl ProcessInvoker for AgentInvoker {
    async fn invoke(&self, model: &str, message: &str) -> Result<String> {
        debug!(program = %self.program, model, chars = message.len(), "invoking agent");

        let child = tokio::process::Command::new(&self.program)
            .args(self.command_args(model, message))
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                LoopError::ProcessFailure(format!("failed to start {}: {}", self.program, e))
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                LoopError::ProcessFailure(format!("failed to wait for {}: {}", self.program, e))
            })?,
            Err(_) => {
                warn!(program = %self.program, model, timeout_secs = self.timeout.as_secs(), "agent timed out");
                return Err(LoopError::Timeout(self.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(model, output = %stdout, "agent output");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LoopError::ProcessFailure(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }

        info!(program = %self.program, model, "agent invocation finished");
        Ok(stdout)
    }
}

/// Sends `message` to the validator model, falling back to the fallback
/// model when the validator exhausts its retries.
pub async fn ask_validator(
    retry: &RetryExecutor,
    invoker: &dyn ProcessInvoker,
    models: &ModelSet,
    message: &str,
) -> Result<String> {
    let primary = models.get(ModelRole::Validator);
    match retry
        .execute("validator", move || invoker.invoke(primary, message))
        .await
    {
        Ok(text) => return Ok(text),
        Err(err) => {
            warn!(model = primary, error = %err, "validator failed, trying fallback model");
        }
    }

    let fallback = models.get(ModelRole::ValidatorFallback);
    retry
        .execute("validator-fallback", move || invoker.invoke(fallback, message))
        .await
        .map_err(|err| {
            warn!(model = fallback, error = %err, "fallback validator failed");
            LoopError::ValidatorUnavailable {
                primary: primary.to_string(),
                fallback: fallback.to_string(),
            }
        })
}

/// Checks whether `program` can be launched.
///
/// Paths are checked directly; bare names are looked up on `PATH`.
pub fn agent_available(program: &str) -> bool {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file();
    }

    #[cfg(target_os = "windows")]
    let check_cmd = "where";
    #[cfg(not(target_os = "windows"))]
    let check_cmd = "which";

    Command::new(check_cmd)
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Returns true when `dir` is inside a git work tree.
pub fn in_git_work_tree(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Last `max_chars` characters of `text`, on a char boundary.
pub fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[start..]
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted invoker shared by the unit tests of dependent modules.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies and records every call.
    #[derive(Default)]
    pub struct ScriptedInvoker {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedInvoker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, text: &str) -> Self {
            self.replies.lock().unwrap().push_back(Ok(text.to_string()));
            self
        }

        pub fn fail(self, times: usize) -> Self {
            {
                let mut replies = self.replies.lock().unwrap();
                for _ in 0..times {
                    replies.push_back(Err(LoopError::ProcessFailure("scripted failure".into())));
                }
            }
            self
        }

        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_to(&self, model: &str) -> usize {
            self.calls().iter().filter(|(m, _)| m == model).count()
        }
    }

    #[async_trait]
    impl ProcessInvoker for ScriptedInvoker {
        async fn invoke(&self, model: &str, message: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), message.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }
}
