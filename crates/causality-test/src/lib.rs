//! Causality Test Harness - Scenarios and fuzzing
//!
//! This crate provides:
//! - Scenario harness recording every dispatched event
//! - Cause stack fuzzing
//! - Tick fuzzing of random scheduled actions

pub mod scenario;
pub mod stack_fuzzer;
pub mod tick_fuzzer;

pub use scenario::*;
pub use stack_fuzzer::*;
pub use tick_fuzzer::*;
