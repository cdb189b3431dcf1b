//! Seed-history tool.
//!
//! Sends a plan plus the list of files it touches to the validator model
//! once, writes the reply to a fresh history file, and classifies that file
//! with the `CONFIDENT` / `QUESTIONS` markers.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::classify::{CompletionState, MarkerSet};
use crate::config::ModelSet;
use crate::error::{LoopError, Result};
use crate::invoker::{ask_validator, ProcessInvoker};
use crate::retry::RetryExecutor;
use crate::runner::ExitStatus;

/// Default name of the history file written by the seed tool.
pub const DEFAULT_HISTORY_FILE: &str = "fresh_plan_history.md";

/// Inputs of one seeding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRequest {
    pub plan_file: PathBuf,
    pub files_list: PathBuf,
    pub output_history: PathBuf,
}

/// Plan text and normalized file list read from a [`SeedRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedInput {
    pub plan_text: String,
    pub files: Vec<String>,
}

impl SeedRequest {
    pub fn new(
        plan_file: impl Into<PathBuf>,
        files_list: impl Into<PathBuf>,
        output_history: Option<PathBuf>,
    ) -> Self {
        Self {
            plan_file: plan_file.into(),
            files_list: files_list.into(),
            output_history: output_history.unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE)),
        }
    }

    /// Read both inputs, failing with `InputMissing` if either is absent.
    pub fn load(&self) -> Result<SeedInput> {
        for path in [&self.plan_file, &self.files_list] {
            if !path.is_file() {
                return Err(LoopError::InputMissing(path.clone()));
            }
        }
        let plan_text = std::fs::read_to_string(&self.plan_file)?;
        let files = normalize_file_list(&std::fs::read_to_string(&self.files_list)?);
        Ok(SeedInput { plan_text, files })
    }
}

/// Split a comma- and/or newline-separated list into unique, trimmed entries
/// in their original order.
pub fn normalize_file_list(raw: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for entry in raw.split([',', '\r', '\n']) {
        let entry = entry.trim();
        if !entry.is_empty() && !files.iter().any(|f| f == entry) {
            files.push(entry.to_string());
        }
    }
    files
}

/// The single message sent to the validator.
pub fn build_seed_message(input: &SeedInput, markers: &MarkerSet) -> String {
    let mut message = String::from(
        "Read the implementation plan below together with the listed files. \
         Decide whether the plan is complete enough to implement without further input.\n\n",
    );
    message.push_str("## Plan\n");
    message.push_str(input.plan_text.trim_end());
    message.push_str("\n\n## Files\n");
    if input.files.is_empty() {
        message.push_str("(none)\n");
    }
    for file in &input.files {
        message.push_str(&format!("- {}\n", file));
    }
    message.push_str(&format!(
        "\nIf you understand the plan and can carry it out, start your reply with \"{}\". \
         If anything is ambiguous, start your reply with \"{}\" followed by a numbered list \
         of questions.\n",
        markers.ready(),
        markers.needs_input()
    ));
    message
}

/// Overwrite `path` with a timestamp header followed by the response.
pub fn write_history(path: &Path, response: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = format!(
        "<!-- pairloop seeded {} -->\n\n{}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        response.trim_end()
    );
    std::fs::write(path, content)?;
    Ok(())
}

/// Send the plan, write the history file and classify it with `markers`
/// (normally [`MarkerSet::seeding`]).
pub async fn seed_history(
    input: &SeedInput,
    output_history: &Path,
    markers: &MarkerSet,
    retry: &RetryExecutor,
    invoker: &dyn ProcessInvoker,
    models: &ModelSet,
) -> Result<CompletionState> {
    let message = build_seed_message(input, markers);
    info!(files = input.files.len(), "seeding plan history");

    let response = ask_validator(retry, invoker, models, &message).await?;
    write_history(output_history, &response)?;

    let written = std::fs::read_to_string(output_history)?;
    let state = markers.classify(&written);
    info!(path = %output_history.display(), %state, "plan history written");
    Ok(state)
}

/// Exit status for a seeding outcome: anything but the two markers fails.
pub fn seed_exit_status(state: CompletionState) -> ExitStatus {
    match state {
        CompletionState::Ready => ExitStatus::Success,
        CompletionState::NeedsInput => ExitStatus::NeedsHumanInput,
        CompletionState::Unclear => ExitStatus::Failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::MarkerPriority;
    use crate::invoker::testing::ScriptedInvoker;
    use std::time::Duration;
    use tempfile::TempDir;

    fn models() -> ModelSet {
        ModelSet {
            coder: "coder".into(),
            validator: "validator".into(),
            validator_fallback: "fallback".into(),
        }
    }

    fn write_inputs(dir: &TempDir, plan: &str, files: &str) -> SeedRequest {
        let plan_file = dir.path().join("plan.md");
        let files_list = dir.path().join("files.txt");
        std::fs::write(&plan_file, plan).unwrap();
        std::fs::write(&files_list, files).unwrap();
        SeedRequest::new(plan_file, files_list, Some(dir.path().join("history.md")))
    }

    #[test]
    fn test_normalize_file_list() {
        assert_eq!(
            normalize_file_list("src/a.rs, src/b.rs\nsrc/c.rs\r\n\n,src/a.rs ,"),
            vec!["src/a.rs", "src/b.rs", "src/c.rs"]
        );
        assert!(normalize_file_list(" , \n").is_empty());
    }

    #[test]
    fn test_default_history_file() {
        let request = SeedRequest::new("plan.md", "files.txt", None);
        assert_eq!(request.output_history, PathBuf::from(DEFAULT_HISTORY_FILE));
    }

    #[test]
    fn test_load_missing_plan() {
        let dir = TempDir::new().unwrap();
        let request = SeedRequest::new(dir.path().join("nope.md"), dir.path().join("f.txt"), None);
        match request.load().unwrap_err() {
            LoopError::InputMissing(path) => assert!(path.ends_with("nope.md")),
            other => panic!("expected InputMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_load_missing_files_list() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("plan.md");
        std::fs::write(&plan, "plan").unwrap();
        let request = SeedRequest::new(plan, dir.path().join("files.txt"), None);
        assert!(matches!(request.load(), Err(LoopError::InputMissing(_))));
    }

    #[test]
    fn test_build_seed_message() {
        let input = SeedInput {
            plan_text: "1. add parser\n".into(),
            files: vec!["src/parser.rs".into()],
        };
        let message = build_seed_message(&input, &MarkerSet::seeding());
        assert!(message.contains("## Plan\n1. add parser"));
        assert!(message.contains("- src/parser.rs"));
        assert!(message.contains("\"CONFIDENT\""));
        assert!(message.contains("\"QUESTIONS\""));
    }

    #[tokio::test]
    async fn test_seed_confident() {
        let dir = TempDir::new().unwrap();
        let request = write_inputs(&dir, "plan", "a.rs,b.rs");
        let input = request.load().unwrap();
        let invoker = ScriptedInvoker::new().reply("CONFIDENT: the plan is clear");

        let state = seed_history(
            &input,
            &request.output_history,
            &MarkerSet::seeding(),
            &RetryExecutor::new(2, Duration::ZERO),
            &invoker,
            &models(),
        )
        .await
        .unwrap();

        assert_eq!(state, CompletionState::Ready);
        assert_eq!(seed_exit_status(state).exit_code(), 0);
        let history = std::fs::read_to_string(&request.output_history).unwrap();
        assert!(history.contains("CONFIDENT: the plan is clear"));
        assert_eq!(invoker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_seed_questions_via_fallback() {
        let dir = TempDir::new().unwrap();
        let request = write_inputs(&dir, "plan", "a.rs");
        let input = request.load().unwrap();
        let invoker = ScriptedInvoker::new()
            .fail(2)
            .reply("QUESTIONS:\n1. which auth scheme?");

        let state = seed_history(
            &input,
            &request.output_history,
            &MarkerSet::seeding(),
            &RetryExecutor::new(2, Duration::ZERO),
            &invoker,
            &models(),
        )
        .await
        .unwrap();

        assert_eq!(state, CompletionState::NeedsInput);
        assert_eq!(seed_exit_status(state).exit_code(), 42);
        assert_eq!(invoker.calls_to("fallback"), 1);
    }

    #[tokio::test]
    async fn test_seed_unclear_reply_fails() {
        let dir = TempDir::new().unwrap();
        let request = write_inputs(&dir, "plan", "a.rs");
        let input = request.load().unwrap();
        let invoker = ScriptedInvoker::new().reply("Sure, sounds good.");

        let state = seed_history(
            &input,
            &request.output_history,
            &MarkerSet::seeding(),
            &RetryExecutor::new(2, Duration::ZERO),
            &invoker,
            &models(),
        )
        .await
        .unwrap();

        assert_eq!(state, CompletionState::Unclear);
        assert_eq!(seed_exit_status(state).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_seed_priority_decides_mixed_reply() {
        let dir = TempDir::new().unwrap();
        let request = write_inputs(&dir, "plan", "a.rs");
        let input = request.load().unwrap();
        let invoker = ScriptedInvoker::new().reply("CONFIDENT overall, but QUESTIONS remain");
        let markers = MarkerSet::seeding().with_priority(MarkerPriority::NeedsInputFirst);

        let state = seed_history(
            &input,
            &request.output_history,
            &markers,
            &RetryExecutor::new(2, Duration::ZERO),
            &invoker,
            &models(),
        )
        .await
        .unwrap();

        assert_eq!(state, CompletionState::NeedsInput);
    }

    #[test]
    fn test_write_history_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/history.md");
        write_history(&path, "first").unwrap();
        write_history(&path, "second").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("second"));
        assert!(!content.contains("first"));
    }
}
