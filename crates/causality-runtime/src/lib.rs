//! Causality Runtime - Server orchestration and tick loop
//!
//! Each tick runs the scheduled actions in order:
//! 1. Resolve the action's phase and build its context
//! 2. Switch to the phase and perform the mutations (captured)
//! 3. Complete the phase: unwind, dispatch batched events, post-dispatch
//! 4. Fold the unwind report into the runtime stats
//!
//! and then checks the tick boundary: any phase or cause frame still open is
//! logged, force-unwound and counted as a recovery.

pub mod server;
pub mod telemetry;

pub use server::*;
