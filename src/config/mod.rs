//! Loop configuration.
//!
//! A single immutable [`LoopConfig`] is assembled at startup from built-in
//! defaults, an optional TOML file and `PAIRLOOP_`-prefixed environment
//! variables. CLI flags are applied on top by the binary. Components receive
//! the finished struct and never consult the environment themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::classify::MarkerPriority;
use crate::error::{LoopError, Result};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pairloop.toml";

/// The role a model plays in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// Writes and fixes code.
    Coder,
    /// Judges whether the work is complete.
    Validator,
    /// Stands in for the validator when it fails.
    ValidatorFallback,
}

impl std::fmt::Display for ModelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelRole::Coder => write!(f, "coder"),
            ModelRole::Validator => write!(f, "validator"),
            ModelRole::ValidatorFallback => write!(f, "validator-fallback"),
        }
    }
}

/// Model identifiers bound to each [`ModelRole`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSet {
    pub coder: String,
    pub validator: String,
    pub validator_fallback: String,
}

impl ModelSet {
    pub fn get(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Coder => &self.coder,
            ModelRole::Validator => &self.validator,
            ModelRole::ValidatorFallback => &self.validator_fallback,
        }
    }
}

/// Configuration for a whole run.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Model used for progress and fix prompts
    pub coder_model: String,
    /// Model asked whether the work is complete
    pub validator_model: String,
    /// Model used when the validator fails
    pub validator_fallback_model: String,
    /// Fix rounds allowed per cycle before the run aborts
    pub max_fix_attempts: u32,
    /// Attempts allowed for each subprocess call
    pub max_retries: u32,
    /// Base delay of the linear retry backoff, in seconds
    pub retry_base_delay_secs: u64,
    /// Upper bound on a single agent invocation, in seconds
    pub agent_timeout_secs: u64,
    /// Cheap syntax/type check, retried on failure
    pub fast_check_command: String,
    /// Definitive build, run once when the fast check keeps failing
    pub full_build_command: String,
    /// The AI pair-programming CLI to drive
    pub agent_program: String,
    /// Fixed arguments passed to every agent invocation
    pub agent_args: Vec<String>,
    pub model_flag: String,
    pub message_flag: String,
    /// Directory the agent and build commands run in
    pub working_dir: PathBuf,
    /// Parent of the per-run scratch directory (system temp dir if unset)
    pub scratch_root: Option<PathBuf>,
    /// Append-only log sink in addition to stderr
    pub log_file: Option<PathBuf>,
    /// Diagnostic text embedded in a fix prompt is cut to this many trailing chars
    pub max_diagnostic_chars: usize,
    /// Which marker wins when a reply contains both
    pub marker_priority: MarkerPriority,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            coder_model: "sonnet".to_string(),
            validator_model: "o3-mini".to_string(),
            validator_fallback_model: "gpt-4o".to_string(),
            max_fix_attempts: 5,
            max_retries: 3,
            retry_base_delay_secs: 2,
            agent_timeout_secs: 300,
            fast_check_command: "cargo check".to_string(),
            full_build_command: "cargo build".to_string(),
            agent_program: "aider".to_string(),
            agent_args: vec![
                "--yes-always".to_string(),
                "--no-pretty".to_string(),
                "--no-stream".to_string(),
                "--no-auto-commits".to_string(),
            ],
            model_flag: "--model".to_string(),
            message_flag: "--message".to_string(),
            working_dir: PathBuf::from("."),
            scratch_root: None,
            log_file: None,
            max_diagnostic_chars: 8000,
            marker_priority: MarkerPriority::default(),
        }
    }
}

impl LoopConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// When `path` is given the file must exist. Otherwise
    /// [`DEFAULT_CONFIG_FILE`] is read from `search_dir` if present.
    ///
    /// # Environment Variable Overrides
    ///
    /// Variables use the `PAIRLOOP_` prefix with `__` between nested keys,
    /// e.g. `PAIRLOOP_CODER_MODEL=gpt-4o` or `PAIRLOOP_MAX_RETRIES=5`.
    /// `PAIRLOOP_AGENT_ARGS` is split on spaces.
    pub fn load(path: Option<&Path>, search_dir: &Path) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(LoopError::InputMissing(path.to_path_buf()));
                }
                (path.to_path_buf(), true)
            }
            None => (search_dir.join(DEFAULT_CONFIG_FILE), false),
        };
        let path_str = path
            .to_str()
            .ok_or_else(|| LoopError::Config(format!("invalid path: {:?}", path)))?;
        let file_source = File::new(path_str, FileFormat::Toml).required(required);

        let loaded: LoopConfig = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("PAIRLOOP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("agent_args")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject budgets and commands the loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(LoopError::Config("max_retries must be at least 1".into()));
        }
        if self.max_fix_attempts == 0 {
            return Err(LoopError::Config(
                "max_fix_attempts must be at least 1".into(),
            ));
        }
        if self.agent_timeout_secs == 0 {
            return Err(LoopError::Config(
                "agent_timeout_secs must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("fast_check_command", &self.fast_check_command),
            ("full_build_command", &self.full_build_command),
            ("agent_program", &self.agent_program),
        ] {
            if value.trim().is_empty() {
                return Err(LoopError::Config(format!("{} must not be empty", name)));
            }
        }
        for (name, value) in [
            ("fast_check_command", &self.fast_check_command),
            ("full_build_command", &self.full_build_command),
        ] {
            shell_words::split(value).map_err(|e| {
                LoopError::Config(format!("{} cannot be parsed: {}", name, e))
            })?;
        }
        Ok(())
    }

    pub fn models(&self) -> ModelSet {
        ModelSet {
            coder: self.coder_model.clone(),
            validator: self.validator_model.clone(),
            validator_fallback: self.validator_fallback_model.clone(),
        }
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_secs(self.retry_base_delay_secs)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}
