//! Scope guards for cause frames
//!
//! Dropping a guard closes its frame. Guards released in reverse order of
//! creation take the normal path; anything else goes through the manager's
//! corruption recovery.

use std::sync::Arc;

use causality_core::{CausalityResult, Cause, ContextKey, ContextType};

use crate::{CauseStackManager, FrameId};

/// How a frame close was resolved
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameClose {
    /// The frame was on top of the frame stack
    Clean,
    /// The frame was buried; `forced` frames above it were closed first
    Recovered { forced: usize },
    /// The frame had already been force-closed by an earlier recovery
    AlreadyForced,
}

/// Guard for a frame opened with `CauseStackManager::push_cause_frame`
#[must_use = "dropping the guard immediately closes the frame"]
pub struct CauseStackFrame<'a> {
    manager: &'a CauseStackManager,
    id: FrameId,
    /// Creation site, kept for diagnostics when debug frames are on
    trace: Option<Arc<str>>,
    closed: bool,
}

impl<'a> CauseStackFrame<'a> {
    pub(crate) fn new(
        manager: &'a CauseStackManager,
        id: FrameId,
        trace: Option<Arc<str>>,
    ) -> Self {
        CauseStackFrame {
            manager,
            id,
            trace,
            closed: false,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn push_cause(&self, cause: impl Into<Cause>) -> CausalityResult<&Self> {
        self.manager.push_cause(cause)?;
        Ok(self)
    }

    pub fn add_context<T: ContextType>(&self, key: &ContextKey<T>, value: T) -> CausalityResult<&Self> {
        self.manager.add_context(key, value)?;
        Ok(self)
    }

    /// Close explicitly and observe how the close was resolved
    pub fn close(mut self) -> CausalityResult<FrameClose> {
        self.closed = true;
        self.manager.close_frame(self.id, self.trace.as_ref())
    }
}

impl Drop for CauseStackFrame<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.manager.close_frame(self.id, self.trace.as_ref()) {
            tracing::error!(frame = %self.id, error = %err, "failed to close cause frame on drop");
        }
    }
}

/// Guard for a frame registered with `CauseStackManager::push_lazy_frame`
#[must_use = "dropping the guard immediately discards the provider"]
pub struct LazyCauseFrame<'a> {
    manager: &'a CauseStackManager,
    id: FrameId,
    /// Creation site, kept for diagnostics when debug frames are on
    trace: Option<Arc<str>>,
    closed: bool,
}

impl<'a> LazyCauseFrame<'a> {
    pub(crate) fn new(
        manager: &'a CauseStackManager,
        id: FrameId,
        trace: Option<Arc<str>>,
    ) -> Self {
        LazyCauseFrame {
            manager,
            id,
            trace,
            closed: false,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn close(mut self) -> CausalityResult<FrameClose> {
        self.closed = true;
        self.manager.close_lazy_frame(self.id, self.trace.as_ref())
    }
}

impl Drop for LazyCauseFrame<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.manager.close_lazy_frame(self.id, self.trace.as_ref()) {
            tracing::error!(frame = %self.id, error = %err, "failed to close lazy cause frame on drop");
        }
    }
}
