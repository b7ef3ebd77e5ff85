//! Causality Stack - the cause stack manager
//!
//! This crate implements the process-lifetime cause stack:
//! - Cause push/pop with duplicate suppression
//! - Event context with per-frame restoration
//! - Pooled stack frames behind scope guards
//! - Corruption detection and forced recovery
//! - Lazily materialized frame providers

mod state;

pub mod frame;
pub mod pool;
pub mod manager;
pub mod guard;

pub use frame::*;
pub use pool::*;
pub use manager::*;
pub use guard::*;
pub use state::FrameBuilder;
