//! Error handling module
//!
//! Errors are either recovered locally by the component that owns them
//! (subprocess failures within the retry budget, build failures within the
//! fix budget) or abort the whole run.

pub mod taxonomy;

pub use taxonomy::{LoopError, Result};
