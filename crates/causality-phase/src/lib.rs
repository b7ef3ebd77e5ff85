//! Causality Phase - phase tracking and batched side effects
//!
//! This crate implements the phase engine:
//! - Phase states with capability flags and typed contexts
//! - Capture collections for deferred and eagerly applied mutations
//! - Unwind into cancellable batched events, with transactional revert
//! - Bounded post-dispatch for second-order effects
//! - The event bus and the narrow world interface mutations go through

pub mod capture;
pub mod context;
pub mod state;
pub mod event;
pub mod world;
pub mod env;
pub mod unwind;
pub mod tracker;
pub mod phases;

pub use capture::*;
pub use context::*;
pub use state::*;
pub use event::*;
pub use world::*;
pub use env::*;
pub use unwind::*;
pub use tracker::*;
