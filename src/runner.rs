// Loop driver for pairloop
// Runs cycles until the validator says the work is ready, asks for a human,
// or the cycle budget runs out.

use std::process::ExitCode;

use tracing::{error, info, warn};

use crate::classify::CompletionState;
use crate::cycle::{Cycle, CycleRunner, Task};
use crate::error::LoopError;

/// Exit code when the work is confirmed ready.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for any failure.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code when a human has to answer questions before work can go on.
pub const EXIT_NEEDS_INPUT: u8 = 42;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    NeedsHumanInput,
    Failure,
}

impl ExitStatus {
    /// Process exit code: 0, 42 or 1
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitStatus::Success => EXIT_SUCCESS,
            ExitStatus::NeedsHumanInput => EXIT_NEEDS_INPUT,
            ExitStatus::Failure => EXIT_FAILURE,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.exit_code())
    }
}

/// Result of a whole run
#[derive(Debug)]
pub struct RunReport {
    /// How the run ended
    pub status: ExitStatus,
    /// Number of cycles started
    pub cycles_run: u32,
    /// Fatal error or exhaustion message, if the run failed
    pub error: Option<String>,
}

impl RunReport {
    fn finished(status: ExitStatus, cycles_run: u32) -> Self {
        Self {
            status,
            cycles_run,
            error: None,
        }
    }

    fn failed(cycles_run: u32, error: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::Failure,
            cycles_run,
            error: Some(error.into()),
        }
    }
}

/// Drives cycles of a task up to its cycle budget
#[derive(Debug, Default)]
pub struct LoopDriver;

impl LoopDriver {
    pub fn new() -> Self {
        Self
    }

    /// Run cycles until a terminal completion state, a fatal error, or
    /// `task.max_cycles()` cycles without completion.
    pub async fn run(&self, task: &Task, cycles: &dyn CycleRunner) -> RunReport {
        let mut index: u32 = 0;

        while index < task.max_cycles() {
            index += 1;
            let mut cycle = Cycle::new(index);
            info!(cycle = index, max = task.max_cycles(), "starting cycle");

            match cycles.run_cycle(task, &mut cycle).await {
                Err(err) => {
                    log_fatal(index, &err);
                    return RunReport::failed(index, err.to_string());
                }
                Ok(result) if result.failed => {
                    error!(cycle = index, "cycle reported failure");
                    return RunReport::failed(index, format!("cycle {} failed", index));
                }
                Ok(result) if result.completion.is_terminal() => {
                    let status = match result.completion {
                        CompletionState::NeedsInput => {
                            info!(cycle = index, "validator needs human input");
                            ExitStatus::NeedsHumanInput
                        }
                        _ => {
                            info!(cycle = index, "work is ready for testing");
                            ExitStatus::Success
                        }
                    };
                    return RunReport::finished(status, index);
                }
                Ok(result) => {
                    info!(
                        cycle = index,
                        fix_attempts = result.fix_attempts,
                        "completion unclear, continuing"
                    );
                }
            }
        }

        warn!(max = task.max_cycles(), "max cycles exceeded without completion");
        RunReport::failed(
            index,
            format!(
                "max cycles ({}) exceeded without completion",
                task.max_cycles()
            ),
        )
    }
}

fn log_fatal(cycle: u32, err: &LoopError) {
    match err.root_cause() {
        LoopError::FixBudgetExhausted { diagnostic, .. } => {
            error!(cycle, error = %err, last_build_output = %diagnostic, "aborting run");
        }
        _ => error!(cycle, error = %err, "aborting run"),
    }
}
