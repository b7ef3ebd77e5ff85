//! Causality Core - Fundamental types and primitives
//!
//! This crate defines the types shared by the cause stack and the phase engine:
//! - Identifiers and world value types (EntityId, BlockPos, BlockState, ItemStack)
//! - Causes and the immutable cause chain snapshot
//! - Typed event context keys and values
//! - Thread affinity guard
//! - Configuration and the error taxonomy

pub mod id;
pub mod types;
pub mod cause;
pub mod context;
pub mod chain;
pub mod thread;
pub mod config;
pub mod error;

pub use id::*;
pub use types::*;
pub use cause::*;
pub use context::*;
pub use chain::*;
pub use thread::*;
pub use config::*;
pub use error::*;
