//! Unsynchronized cause stack state
//!
//! Everything here assumes the caller already holds the manager's lock and
//! passed the thread check.

use std::collections::HashSet;
use std::sync::Arc;

use causality_core::{
    CausalityError, CausalityResult, Cause, CauseChain, ContextKey, ContextType, EventContext,
};

use crate::{FrameClose, FrameId, FramePool, StackFrame};

pub(crate) type FrameProvider = Box<dyn FnOnce(&mut FrameBuilder<'_>) + Send>;

pub(crate) struct PendingFrame {
    pub(crate) id: FrameId,
    pub(crate) provider: FrameProvider,
    pub(crate) trace: Option<Arc<str>>,
}

pub(crate) struct StackState {
    /// Bottom first; the top of the stack is the last element
    pub(crate) causes: Vec<Cause>,
    /// Suppressed duplicate pushes, indexed by stack depth
    pub(crate) duplicates: Vec<usize>,
    pub(crate) min_depth: usize,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) pool: FramePool,
    pub(crate) context: EventContext,
    pub(crate) cached: Option<Arc<CauseChain>>,
    /// Lazy providers in registration order, conceptually above every frame
    pub(crate) pending: Vec<PendingFrame>,
    /// Frames closed by the corruption path whose guards are still live;
    /// entries only survive until the next tick boundary
    pub(crate) force_closed: HashSet<FrameId>,
    pub(crate) next_frame: u64,
    pub(crate) debug_frames: bool,
}

impl StackState {
    pub(crate) fn new(pool: FramePool, debug_frames: bool) -> Self {
        StackState {
            causes: Vec::new(),
            duplicates: vec![0],
            min_depth: 0,
            frames: Vec::new(),
            pool,
            context: EventContext::new(),
            cached: None,
            pending: Vec::new(),
            force_closed: HashSet::new(),
            next_frame: 1,
            debug_frames,
        }
    }

    #[inline]
    fn invalidate(&mut self) {
        self.cached = None;
    }

    fn duplicates_at(&mut self, depth: usize) -> &mut usize {
        if self.duplicates.len() <= depth {
            self.duplicates.resize(depth + 1, 0);
        }
        &mut self.duplicates[depth]
    }

    pub(crate) fn push_cause(&mut self, cause: Cause) {
        self.invalidate();
        if self.causes.last() == Some(&cause) {
            let depth = self.causes.len();
            *self.duplicates_at(depth) += 1;
            return;
        }
        self.causes.push(cause);
        let depth = self.causes.len();
        *self.duplicates_at(depth) = 0;
    }

    pub(crate) fn pop_cause(&mut self) -> CausalityResult<Cause> {
        let depth = self.causes.len();
        let dupes = self.duplicates_at(depth);
        if *dupes > 0 {
            *dupes -= 1;
            return self
                .causes
                .last()
                .cloned()
                .ok_or(CausalityError::EmptyCauseStack);
        }
        if depth <= self.min_depth {
            if depth == 0 {
                return Err(CausalityError::EmptyCauseStack);
            }
            return Err(CausalityError::CauseUnderflow {
                depth,
                floor: self.min_depth,
            });
        }
        self.invalidate();
        self.causes.pop().ok_or(CausalityError::EmptyCauseStack)
    }

    pub(crate) fn add_context<T: ContextType>(&mut self, key: &ContextKey<T>, value: T) -> Option<T> {
        self.record_delta(key.id());
        self.invalidate();
        self.context.insert(key, value).and_then(|old| T::from_value(&old))
    }

    pub(crate) fn remove_context<T: ContextType>(&mut self, key: &ContextKey<T>) -> Option<T> {
        if !self.context.contains(key) {
            return None;
        }
        self.record_delta(key.id());
        self.invalidate();
        self.context.remove(key).and_then(|old| T::from_value(&old))
    }

    fn record_delta(&mut self, key: &'static str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.record_delta(key, &self.context);
        }
    }

    pub(crate) fn snapshot(&mut self) -> Arc<CauseChain> {
        if let Some(cached) = &self.cached {
            return Arc::clone(cached);
        }
        let causes = self.causes.iter().rev().cloned().collect();
        let chain = Arc::new(CauseChain::new(causes, self.context.clone()));
        self.cached = Some(Arc::clone(&chain));
        chain
    }

    pub(crate) fn allocate_id(&mut self) -> FrameId {
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        id
    }

    /// Creation site of a new frame, captured only with `debug_frames`
    pub(crate) fn creation_trace(&self) -> Option<Arc<str>> {
        self.debug_frames
            .then(|| Arc::from(std::backtrace::Backtrace::force_capture().to_string()))
    }

    pub(crate) fn push_frame(&mut self, id: FrameId, trace: Option<Arc<str>>) {
        let mut frame = self.pool.checkout();
        let base_depth = self.causes.len();
        let prior = std::mem::take(self.duplicates_at(base_depth));
        frame.begin(id, self.min_depth, base_depth, prior, trace);
        self.min_depth = base_depth;
        self.frames.push(frame);
        tracing::trace!(frame = %id, depth = base_depth, "cause frame pushed");
    }

    /// Close the frame identified by `id`, force-closing anything above it
    ///
    /// `trace` is the creation site the caller's guard carries; it is only
    /// attached to the error when the frame cannot be found.
    pub(crate) fn pop_frame(
        &mut self,
        id: FrameId,
        trace: Option<&Arc<str>>,
    ) -> CausalityResult<FrameClose> {
        if self.frames.last().and_then(StackFrame::id) == Some(id) {
            self.close_top();
            return Ok(FrameClose::Clean);
        }

        if let Some(index) = self.frames.iter().position(|f| f.id == Some(id)) {
            let forced = self.frames.len() - 1 - index;
            tracing::error!(
                frame = %id,
                forced,
                "cause frame closed out of order; force-closing intervening frames"
            );
            for _ in 0..forced {
                if let Some(top) = self.frames.last() {
                    tracing::error!(
                        frame = ?top.id,
                        trace = top.trace().unwrap_or("<enable debug_frames for creation traces>"),
                        "force-closing leaked cause frame"
                    );
                    if let Some(leaked) = top.id {
                        self.force_closed.insert(leaked);
                    }
                }
                self.close_top();
            }
            self.close_top();
            return Ok(FrameClose::Recovered { forced });
        }

        if self.force_closed.remove(&id) {
            tracing::warn!(frame = %id, "cause frame was already force-closed");
            return Ok(FrameClose::AlreadyForced);
        }

        tracing::error!(
            frame = %id,
            open_frames = self.frames.len(),
            trace = trace.map_or("<enable debug_frames for creation traces>", |t| &**t),
            "cause frame not found on the frame stack"
        );
        Err(CausalityError::UnknownFrame {
            frame: id.0,
            trace: trace.map(|t| t.to_string()),
        })
    }

    fn close_top(&mut self) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        frame.restore_context(&mut self.context);

        let base = frame.base_depth;
        while self.causes.len() > base {
            let depth = self.causes.len();
            *self.duplicates_at(depth) = 0;
            self.causes.pop();
        }
        *self.duplicates_at(base) = frame.prior_duplicate_count;
        self.min_depth = frame.old_min_depth;
        self.invalidate();

        tracing::trace!(frame = ?frame.id, depth = base, "cause frame popped");
        self.pool.give_back(frame);
    }

    /// Run every pending provider, oldest first
    pub(crate) fn materialize(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        for PendingFrame { id, provider, trace } in pending {
            self.push_frame(id, trace);
            let mut builder = FrameBuilder { state: &mut *self };
            provider(&mut builder);
        }
    }

    /// Close a lazy frame whether or not it was ever materialized
    ///
    /// A materialized frame with newer providers still pending is buried
    /// under them, so those are materialized first and force-closed by the
    /// usual recovery path.
    pub(crate) fn close_lazy(
        &mut self,
        id: FrameId,
        trace: Option<&Arc<str>>,
    ) -> CausalityResult<FrameClose> {
        if let Some(index) = self.pending.iter().position(|p| p.id == id) {
            if index + 1 != self.pending.len() {
                tracing::warn!(frame = %id, "lazy cause frame closed out of order");
            }
            self.pending.remove(index);
            return Ok(FrameClose::Clean);
        }
        self.materialize();
        self.pop_frame(id, trace)
    }

    /// Close every open frame and drop pending providers
    ///
    /// Ids recorded by earlier recoveries are forgotten first: their guards
    /// had a whole tick to close and were leaked.
    pub(crate) fn force_close_all(&mut self) -> usize {
        self.force_closed.clear();
        for pending in self.pending.drain(..) {
            self.force_closed.insert(pending.id);
        }
        let open = self.frames.len();
        while let Some(top) = self.frames.last() {
            if let Some(id) = top.id {
                self.force_closed.insert(id);
            }
            self.close_top();
        }
        open
    }
}

/// Restricted view of the stack handed to lazy frame providers
pub struct FrameBuilder<'s> {
    state: &'s mut StackState,
}

impl FrameBuilder<'_> {
    pub fn push_cause(&mut self, cause: impl Into<Cause>) -> &mut Self {
        self.state.push_cause(cause.into());
        self
    }

    pub fn add_context<T: ContextType>(&mut self, key: &ContextKey<T>, value: T) -> &mut Self {
        self.state.add_context(key, value);
        self
    }
}
