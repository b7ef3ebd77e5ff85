//! Thread affinity
//!
//! The cause stack and phase tracker are only valid on the one thread that
//! drives the simulation. Every public entry point checks the caller against
//! the designated thread before touching state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::{CausalityError, CausalityResult};

/// Guard bound to the designated execution thread
#[derive(Clone, Debug)]
pub struct ThreadGuard {
    designated: ThreadId,
    name: String,
    shutting_down: Arc<AtomicBool>,
}

impl ThreadGuard {
    /// Bind to the calling thread
    pub fn current() -> Self {
        let current = thread::current();
        ThreadGuard {
            designated: current.id(),
            name: describe(&current),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn designated(&self) -> ThreadId {
        self.designated
    }

    pub fn is_designated(&self) -> bool {
        thread::current().id() == self.designated
    }

    /// Reject calls from any thread but the designated one
    pub fn check(&self, operation: &'static str) -> CausalityResult<()> {
        if self.is_designated() {
            return Ok(());
        }
        let current = thread::current();
        Err(CausalityError::OffThread {
            operation,
            current: describe(&current),
            expected: self.name.clone(),
        })
    }

    /// Like `check`, but read-only queries are let through once shutdown began
    pub fn check_read(&self, operation: &'static str) -> CausalityResult<()> {
        if self.shutting_down.load(Ordering::Acquire) && !self.is_designated() {
            tracing::trace!(operation, "off-thread read permitted during shutdown");
            return Ok(());
        }
        self.check(operation)
    }

    /// Open the shutdown window; shared by every clone of this guard
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }
}

fn describe(thread: &thread::Thread) -> String {
    match thread.name() {
        Some(name) => format!("{} ({:?})", name, thread.id()),
        None => format!("{:?}", thread.id()),
    }
}
