//! One iteration of the loop: progress prompt, build-fix, completion check.
//!
//! Every step can abort the whole run. A failed progress prompt, a build
//! that still fails after the fix budget, or an unreachable validator is
//! returned as an error and never turned into a "try again next cycle".

use async_trait::async_trait;
use tracing::{info, warn};

use crate::classify::{CompletionState, MarkerSet};
use crate::config::{LoopConfig, ModelRole, ModelSet};
use crate::error::{LoopError, Result};
use crate::invoker::{ask_validator, tail, ProcessInvoker};
use crate::retry::RetryExecutor;
use crate::verify::BuildVerifier;

/// The task being worked on, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    prompt: String,
    max_cycles: u32,
}

impl Task {
    pub fn new(prompt: impl Into<String>, max_cycles: u32) -> Result<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(LoopError::InvalidInput("task prompt is empty".into()));
        }
        if max_cycles == 0 {
            return Err(LoopError::InvalidInput(
                "max cycles must be a positive integer".into(),
            ));
        }
        Ok(Self { prompt, max_cycles })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }
}

/// Per-iteration counters. `fix_attempts` starts at zero every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub index: u32,
    pub fix_attempts: u32,
}

impl Cycle {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            fix_attempts: 0,
        }
    }
}

/// Outcome of a completed cycle.
///
/// Fatal aborts are reported as `Err` by [`CycleRunner::run_cycle`], so a
/// returned result always has `failed == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    pub completion: CompletionState,
    pub fix_attempts: u32,
    pub failed: bool,
}

/// Runs one cycle of a task.
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self, task: &Task, cycle: &mut Cycle) -> Result<CycleResult>;
}

/// Message asking the coder to make progress on the task.
pub fn progress_message(task: &Task, cycle: &Cycle) -> String {
    if cycle.index == 1 {
        format!(
            "Work on the following task. Make as much concrete progress as you can, \
             editing files directly.\n\n## Task\n{}\n",
            task.prompt()
        )
    } else {
        format!(
            "Continue working on the task below (cycle {} of {}). Pick up where the \
             previous cycle left off and keep making progress.\n\n## Task\n{}\n",
            cycle.index,
            task.max_cycles(),
            task.prompt()
        )
    }
}

/// Message asking the coder to fix a failing build.
pub fn fix_message(task: &Task, diagnostic: &str, attempt: u32, max_attempts: u32) -> String {
    format!(
        "The build is failing (fix attempt {} of {}). Fix the errors below without \
         abandoning the task.\n\n## Task\n{}\n\n## Build output\n```\n{}\n```\n",
        attempt,
        max_attempts,
        task.prompt(),
        diagnostic.trim_end()
    )
}

/// Message asking the validator whether the work is finished.
pub fn completion_query(markers: &MarkerSet) -> String {
    format!(
        "Review the current state of the code against the task. If the work is complete \
         and ready to be tested, reply with the exact phrase \"{}\". If you need \
         information from a human to continue, reply with \"{}\" followed by a numbered \
         list of your questions. Otherwise, describe what is still missing.",
        markers.ready(),
        markers.needs_input()
    )
}

/// Orchestrates one cycle against an invoker and a verifier.
pub struct CycleController<'a> {
    invoker: &'a dyn ProcessInvoker,
    verifier: &'a dyn BuildVerifier,
    markers: MarkerSet,
    models: ModelSet,
    retry: RetryExecutor,
    max_fix_attempts: u32,
    max_diagnostic_chars: usize,
}

impl<'a> CycleController<'a> {
    pub fn new(
        invoker: &'a dyn ProcessInvoker,
        verifier: &'a dyn BuildVerifier,
        models: ModelSet,
        retry: RetryExecutor,
    ) -> Self {
        let defaults = LoopConfig::default();
        Self {
            invoker,
            verifier,
            markers: MarkerSet::execution(),
            models,
            retry,
            max_fix_attempts: defaults.max_fix_attempts,
            max_diagnostic_chars: defaults.max_diagnostic_chars,
        }
    }

    pub fn from_config(
        config: &LoopConfig,
        invoker: &'a dyn ProcessInvoker,
        verifier: &'a dyn BuildVerifier,
        retry: RetryExecutor,
    ) -> Self {
        Self::new(invoker, verifier, config.models(), retry)
            .with_markers(MarkerSet::execution().with_priority(config.marker_priority))
            .with_max_fix_attempts(config.max_fix_attempts)
            .with_max_diagnostic_chars(config.max_diagnostic_chars)
    }

    pub fn with_markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_max_fix_attempts(mut self, max: u32) -> Self {
        self.max_fix_attempts = max;
        self
    }

    pub fn with_max_diagnostic_chars(mut self, max: usize) -> Self {
        self.max_diagnostic_chars = max;
        self
    }

    async fn ask_coder(&self, label: &str, message: &str) -> Result<String> {
        let invoker = self.invoker;
        let model = self.models.get(ModelRole::Coder);
        self.retry
            .execute(label, move || invoker.invoke(model, message))
            .await
    }

    /// Verify the build, prompting the coder to fix it until it passes or
    /// the fix budget is spent.
    async fn build_fix_loop(&self, task: &Task, cycle: &mut Cycle) -> Result<()> {
        let mut outcome = self.verifier.verify().await;
        while !outcome.passed {
            if cycle.fix_attempts >= self.max_fix_attempts {
                warn!(
                    cycle = cycle.index,
                    attempts = cycle.fix_attempts,
                    "build still failing, fix budget exhausted"
                );
                return Err(LoopError::FixBudgetExhausted {
                    attempts: cycle.fix_attempts,
                    diagnostic: outcome.diagnostic_text,
                });
            }
            cycle.fix_attempts += 1;
            info!(
                cycle = cycle.index,
                attempt = cycle.fix_attempts,
                max = self.max_fix_attempts,
                "build failed, requesting fix"
            );
            let message = fix_message(
                task,
                tail(&outcome.diagnostic_text, self.max_diagnostic_chars),
                cycle.fix_attempts,
                self.max_fix_attempts,
            );
            self.ask_coder("fix", &message).await?;
            outcome = self.verifier.verify().await;
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> CycleRunner for CycleController<'a> {
    async fn run_cycle(&self, task: &Task, cycle: &mut Cycle) -> Result<CycleResult> {
        info!(cycle = cycle.index, max = task.max_cycles(), "requesting progress");
        self.ask_coder("progress", &progress_message(task, cycle))
            .await?;

        self.build_fix_loop(task, cycle).await?;

        let response = ask_validator(
            &self.retry,
            self.invoker,
            &self.models,
            &completion_query(&self.markers),
        )
        .await?;
        let completion = self.markers.classify(&response);
        info!(cycle = cycle.index, %completion, "cycle classified");

        Ok(CycleResult {
            completion,
            fix_attempts: cycle.fix_attempts,
            failed: false,
        })
    }
}
