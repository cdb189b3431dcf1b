//! Completion classification.
//!
//! A response from the validator model is mapped to a [`CompletionState`] by
//! looking for two marker phrases, case-insensitively, in a fixed priority
//! order. Each call site carries its own [`MarkerSet`].

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// Outcome of classifying a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    /// The work is done.
    Ready,
    /// The model needs answers from a human.
    NeedsInput,
    /// Neither marker was found; keep going.
    Unclear,
}

impl CompletionState {
    /// Ready and NeedsInput end the loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CompletionState::Unclear)
    }
}

impl std::fmt::Display for CompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionState::Ready => write!(f, "ready"),
            CompletionState::NeedsInput => write!(f, "needs input"),
            CompletionState::Unclear => write!(f, "unclear"),
        }
    }
}

/// Which marker wins when a response contains both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPriority {
    #[default]
    ReadyFirst,
    NeedsInputFirst,
}

/// A pair of marker phrases plus the order they are checked in.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    ready: String,
    needs_input: String,
    priority: MarkerPriority,
    ready_re: Option<Regex>,
    needs_input_re: Option<Regex>,
}

impl MarkerSet {
    /// Builds a marker set. Empty phrases never match.
    pub fn new(ready: impl Into<String>, needs_input: impl Into<String>) -> Self {
        let ready = ready.into();
        let needs_input = needs_input.into();
        Self {
            ready_re: literal_matcher(&ready),
            needs_input_re: literal_matcher(&needs_input),
            ready,
            needs_input,
            priority: MarkerPriority::default(),
        }
    }

    pub fn with_priority(mut self, priority: MarkerPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Markers used when seeding plan history.
    pub fn seeding() -> Self {
        Self::new("CONFIDENT", "QUESTIONS")
    }

    /// Markers used by the validator inside the execution loop.
    pub fn execution() -> Self {
        Self::new("READY FOR TESTING", "QUESTIONS TO ANSWER")
    }

    pub fn ready(&self) -> &str {
        &self.ready
    }

    pub fn needs_input(&self) -> &str {
        &self.needs_input
    }

    pub fn priority(&self) -> MarkerPriority {
        self.priority
    }

    /// Classifies `text`. Empty or whitespace-only text is `Unclear`.
    pub fn classify(&self, text: &str) -> CompletionState {
        if text.trim().is_empty() {
            return CompletionState::Unclear;
        }

        let ready = matches(&self.ready_re, text);
        let needs_input = matches(&self.needs_input_re, text);

        match self.priority {
            MarkerPriority::ReadyFirst if ready => CompletionState::Ready,
            MarkerPriority::ReadyFirst if needs_input => CompletionState::NeedsInput,
            MarkerPriority::NeedsInputFirst if needs_input => CompletionState::NeedsInput,
            MarkerPriority::NeedsInputFirst if ready => CompletionState::Ready,
            _ => CompletionState::Unclear,
        }
    }
}

fn literal_matcher(phrase: &str) -> Option<Regex> {
    if phrase.trim().is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(phrase))
        .case_insensitive(true)
        .build()
        .ok()
}

fn matches(re: &Option<Regex>, text: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeding_markers() {
        let markers = MarkerSet::seeding();
        assert_eq!(markers.classify("CONFIDENT: looks good"), CompletionState::Ready);
        assert_eq!(
            markers.classify("QUESTIONS: 1. what auth scheme?"),
            CompletionState::NeedsInput
        );
        assert_eq!(markers.classify(""), CompletionState::Unclear);
    }

    #[test]
    fn test_case_insensitive() {
        let markers = MarkerSet::execution();
        assert_eq!(
            markers.classify("All done, this is ready for testing."),
            CompletionState::Ready
        );
        assert_eq!(
            markers.classify("Questions To Answer:\n- which database?"),
            CompletionState::NeedsInput
        );
    }

    #[test]
    fn test_neither_marker_is_unclear() {
        let markers = MarkerSet::execution();
        assert_eq!(
            markers.classify("I refactored the parser and added tests."),
            CompletionState::Unclear
        );
        assert_eq!(markers.classify("   \n\t "), CompletionState::Unclear);
    }

    #[test]
    fn test_both_markers_follow_priority() {
        let text = "QUESTIONS TO ANSWER: none.\nREADY FOR TESTING";
        assert_eq!(MarkerSet::execution().classify(text), CompletionState::Ready);
        assert_eq!(
            MarkerSet::execution()
                .with_priority(MarkerPriority::NeedsInputFirst)
                .classify(text),
            CompletionState::NeedsInput
        );
    }

    #[test]
    fn test_markers_are_literal() {
        let markers = MarkerSet::new("DONE (v1.0)", "HELP?");
        assert_eq!(markers.classify("status: done (v1.0)"), CompletionState::Ready);
        assert_eq!(markers.classify("DONE v1.0"), CompletionState::Unclear);
        assert_eq!(markers.classify("need HELP? yes"), CompletionState::NeedsInput);
    }

    #[test]
    fn test_empty_marker_never_matches() {
        let markers = MarkerSet::new("", "QUESTIONS");
        assert_eq!(markers.classify("anything at all"), CompletionState::Unclear);
        assert_eq!(markers.classify("QUESTIONS: one"), CompletionState::NeedsInput);
    }

    #[test]
    fn test_partial_marker_does_not_match() {
        let markers = MarkerSet::execution();
        assert_eq!(markers.classify("READY FOR TEST"), CompletionState::Unclear);
    }

    #[test]
    fn test_terminal_states() {
        assert!(CompletionState::Ready.is_terminal());
        assert!(CompletionState::NeedsInput.is_terminal());
        assert!(!CompletionState::Unclear.is_terminal());
    }
}
