//! pairloop - build-fix-validate loop around an AI pair-programming CLI
//!
//! The library holds the loop core so the binary's two entry points
//! (`seed` and `run`) stay thin and the pieces can be tested in isolation.

pub mod classify;
pub mod config;
pub mod cycle;
pub mod error;
pub mod interrupt;
pub mod invoker;
pub mod logging;
pub mod retry;
pub mod runner;
pub mod scratch;
pub mod seed;
pub mod verify;
