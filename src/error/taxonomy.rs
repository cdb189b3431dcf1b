//! Error taxonomy for the build-fix-validate loop.
//!
//! Errors fall into two groups: locally recoverable ones that the owning
//! component retries within its budget, and fatal ones that abort the whole
//! run. Every fatal error surfaces to the CLI as exit code 1.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced by the loop and its collaborators.
#[derive(Debug, Error)]
pub enum LoopError {
    /// A required input file or argument is absent.
    #[error("required input missing: {}", .0.display())]
    InputMissing(PathBuf),

    /// An argument was present but unusable (empty prompt, zero budget).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The subprocess could not be started or exited unsuccessfully.
    #[error("process failure: {0}")]
    ProcessFailure(String),

    /// The subprocess ran longer than its allowed time.
    #[error("process timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// An operation failed on every attempt of its retry budget.
    #[error("{label} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        label: String,
        attempts: u32,
        last: Box<LoopError>,
    },

    /// A build command failed; the diagnostic feeds the next fix prompt.
    #[error("build failed")]
    BuildFailed { diagnostic: String },

    /// The build still fails after the whole fix budget was spent.
    #[error("build still failing after {attempts} fix attempt(s)")]
    FixBudgetExhausted { attempts: u32, diagnostic: String },

    /// Neither the validator nor its fallback model produced a response.
    #[error("validator unavailable: primary ({primary}) and fallback ({fallback}) both failed")]
    ValidatorUnavailable { primary: String, fallback: String },

    /// The configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoopError {
    /// Returns true for kinds that are retried by their owning component
    /// before being surfaced.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoopError::ProcessFailure(_) | LoopError::Timeout(_) | LoopError::BuildFailed { .. }
        )
    }

    /// Returns the innermost error, looking through retry wrappers.
    pub fn root_cause(&self) -> &LoopError {
        match self {
            LoopError::RetriesExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Process exit code for this error. All fatal kinds share code 1.
    pub fn exit_code(&self) -> u8 {
        crate::runner::EXIT_FAILURE
    }
}

impl From<config::ConfigError> for LoopError {
    fn from(err: config::ConfigError) -> Self {
        LoopError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(LoopError::ProcessFailure("exit 2".into()).is_retryable());
        assert!(LoopError::Timeout(Duration::from_secs(300)).is_retryable());
        assert!(LoopError::BuildFailed {
            diagnostic: "error[E0308]".into()
        }
        .is_retryable());
        assert!(!LoopError::InputMissing(PathBuf::from("plan.md")).is_retryable());
        assert!(!LoopError::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_root_cause_unwraps_nested_retries() {
        let err = LoopError::RetriesExhausted {
            label: "outer".into(),
            attempts: 3,
            last: Box::new(LoopError::RetriesExhausted {
                label: "inner".into(),
                attempts: 2,
                last: Box::new(LoopError::Timeout(Duration::from_secs(5))),
            }),
        };
        assert!(matches!(err.root_cause(), LoopError::Timeout(_)));
    }

    #[test]
    fn test_display_messages() {
        let err = LoopError::InputMissing(PathBuf::from("files.txt"));
        assert_eq!(err.to_string(), "required input missing: files.txt");

        let err = LoopError::RetriesExhausted {
            label: "coder".into(),
            attempts: 3,
            last: Box::new(LoopError::ProcessFailure("exit status 1".into())),
        };
        assert_eq!(
            err.to_string(),
            "coder failed after 3 attempt(s): process failure: exit status 1"
        );

        let err = LoopError::Timeout(Duration::from_secs(300));
        assert_eq!(err.to_string(), "process timed out after 300s");
    }

    #[test]
    fn test_every_error_exits_with_one() {
        assert_eq!(LoopError::InvalidInput("x".into()).exit_code(), 1);
        assert_eq!(
            LoopError::FixBudgetExhausted {
                attempts: 5,
                diagnostic: String::new()
            }
            .exit_code(),
            1
        );
    }
}
