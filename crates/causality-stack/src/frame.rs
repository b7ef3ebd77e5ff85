//! Stack frames - scoped checkpoints of cause depth and context

use std::fmt;
use std::sync::Arc;

use causality_core::{ContextValue, EventContext};

/// Generation id of a frame checkout; never reused
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}", self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Checkpoint recorded when a frame is pushed
///
/// Frames are recycled through the `FramePool`; `clear` resets every field
/// but keeps the delta buffer's allocation.
#[derive(Debug, Default)]
pub struct StackFrame {
    pub(crate) id: Option<FrameId>,
    /// Minimum depth enforced by the enclosing frame
    pub(crate) old_min_depth: usize,
    /// Cause stack depth when this frame opened
    pub(crate) base_depth: usize,
    /// Duplicate suppressions at `base_depth` when this frame opened
    pub(crate) prior_duplicate_count: usize,
    /// First prior value of every context key touched inside this frame
    pub(crate) context_delta: Vec<(&'static str, Option<ContextValue>)>,
    pub(crate) trace: Option<Arc<str>>,
}

impl StackFrame {
    pub(crate) fn empty() -> Self {
        StackFrame::default()
    }

    pub(crate) fn begin(
        &mut self,
        id: FrameId,
        old_min_depth: usize,
        base_depth: usize,
        prior_duplicate_count: usize,
        trace: Option<Arc<str>>,
    ) {
        self.id = Some(id);
        self.old_min_depth = old_min_depth;
        self.base_depth = base_depth;
        self.prior_duplicate_count = prior_duplicate_count;
        self.trace = trace;
    }

    pub fn id(&self) -> Option<FrameId> {
        self.id
    }

    pub fn base_depth(&self) -> usize {
        self.base_depth
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    /// Record the prior value of `key`, once per frame
    pub(crate) fn record_delta(&mut self, key: &'static str, context: &EventContext) {
        if self.context_delta.iter().any(|(k, _)| *k == key) {
            return;
        }
        self.context_delta.push((key, context.get_raw(key).cloned()));
    }

    /// Undo every recorded context change, newest first
    pub(crate) fn restore_context(&mut self, context: &mut EventContext) {
        for (key, prior) in self.context_delta.drain(..).rev() {
            match prior {
                Some(value) => {
                    context.insert_raw(key, value);
                }
                None => {
                    context.remove_raw(key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.id = None;
        self.old_min_depth = 0;
        self.base_depth = 0;
        self.prior_duplicate_count = 0;
        self.context_delta.clear();
        self.trace = None;
    }
}
