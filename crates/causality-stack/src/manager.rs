//! Cause stack manager
//!
//! Process-lifetime owner of the cause stack, the event context and the frame
//! pool. All state lives behind one lock that is never held while calling
//! back into user code, except for lazy providers, which only get a
//! restricted `FrameBuilder`.

use std::sync::Arc;

use parking_lot::Mutex;

use causality_core::{
    CausalityResult, Cause, CauseChain, CauseStackConfig, ContextKey, ContextType, EventContext,
    ThreadGuard,
};

use crate::state::{FrameBuilder, PendingFrame, StackState};
use crate::{CauseStackFrame, FrameClose, FrameId, FramePool, LazyCauseFrame};

/// Cause stack manager
pub struct CauseStackManager {
    guard: ThreadGuard,
    config: CauseStackConfig,
    state: Mutex<StackState>,
}

impl CauseStackManager {
    /// Create a manager bound to the calling thread with default configuration
    pub fn new() -> Self {
        Self::with_config(CauseStackConfig::default())
    }

    /// Create a manager bound to the calling thread
    pub fn with_config(config: CauseStackConfig) -> Self {
        Self::with_guard(config, ThreadGuard::current())
    }

    /// Create a manager sharing an existing thread guard
    pub fn with_guard(config: CauseStackConfig, guard: ThreadGuard) -> Self {
        let mut pool = FramePool::new(config.max_pool_size);
        pool.prewarm(config.prewarm);
        CauseStackManager {
            guard,
            state: Mutex::new(StackState::new(pool, config.debug_frames)),
            config,
        }
    }

    pub fn config(&self) -> &CauseStackConfig {
        &self.config
    }

    pub fn thread_guard(&self) -> &ThreadGuard {
        &self.guard
    }

    /// Push a cause; a repeat of the current top is counted, not stacked
    pub fn push_cause(&self, cause: impl Into<Cause>) -> CausalityResult<()> {
        self.guard.check("push_cause")?;
        let mut state = self.state.lock();
        state.materialize();
        state.push_cause(cause.into());
        Ok(())
    }

    /// Pop the top cause, consuming a duplicate suppression first if any
    pub fn pop_cause(&self) -> CausalityResult<Cause> {
        self.guard.check("pop_cause")?;
        let mut state = self.state.lock();
        state.materialize();
        state.pop_cause()
    }

    pub fn peek_cause(&self) -> CausalityResult<Option<Cause>> {
        self.guard.check_read("peek_cause")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.causes.last().cloned())
    }

    /// Snapshot of causes (nearest first) and context
    pub fn current_cause(&self) -> CausalityResult<Arc<CauseChain>> {
        self.guard.check_read("current_cause")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.snapshot())
    }

    pub fn current_context(&self) -> CausalityResult<EventContext> {
        Ok(self.current_cause()?.context().clone())
    }

    pub fn add_context<T: ContextType>(&self, key: &ContextKey<T>, value: T) -> CausalityResult<Option<T>> {
        self.guard.check("add_context")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.add_context(key, value))
    }

    pub fn remove_context<T: ContextType>(&self, key: &ContextKey<T>) -> CausalityResult<Option<T>> {
        self.guard.check("remove_context")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.remove_context(key))
    }

    /// Copy of the context map alone, without building a cause chain
    pub fn context_snapshot(&self) -> CausalityResult<EventContext> {
        self.guard.check_read("context_snapshot")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.context.clone())
    }

    pub fn get_context<T: ContextType>(&self, key: &ContextKey<T>) -> CausalityResult<Option<T>> {
        self.guard.check_read("get_context")?;
        let mut state = self.state.lock();
        state.materialize();
        Ok(state.context.get(key))
    }

    /// Open a frame; causes and context changes made inside it are undone
    /// when the returned guard is closed or dropped
    pub fn push_cause_frame(&self) -> CausalityResult<CauseStackFrame<'_>> {
        self.guard.check("push_cause_frame")?;
        let mut state = self.state.lock();
        state.materialize();
        let id = state.allocate_id();
        let trace = state.creation_trace();
        state.push_frame(id, trace.clone());
        Ok(CauseStackFrame::new(self, id, trace))
    }

    /// Explicit spelling of dropping the guard
    pub fn pop_cause_frame(&self, frame: CauseStackFrame<'_>) -> CausalityResult<FrameClose> {
        frame.close()
    }

    /// Register a frame whose causes are only built if someone looks
    ///
    /// The provider runs the first time the cause or context is observed or
    /// mutated while the returned guard is live.
    pub fn push_lazy_frame<F>(&self, provider: F) -> CausalityResult<LazyCauseFrame<'_>>
    where
        F: FnOnce(&mut FrameBuilder<'_>) + Send + 'static,
    {
        self.guard.check("push_lazy_frame")?;
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let trace = state.creation_trace();
        state.pending.push(PendingFrame {
            id,
            provider: Box::new(provider),
            trace: trace.clone(),
        });
        Ok(LazyCauseFrame::new(self, id, trace))
    }

    pub(crate) fn close_frame(
        &self,
        id: FrameId,
        trace: Option<&Arc<str>>,
    ) -> CausalityResult<FrameClose> {
        self.guard.check("pop_cause_frame")?;
        let mut state = self.state.lock();
        state.materialize();
        state.pop_frame(id, trace)
    }

    pub(crate) fn close_lazy_frame(
        &self,
        id: FrameId,
        trace: Option<&Arc<str>>,
    ) -> CausalityResult<FrameClose> {
        self.guard.check("pop_cause_frame")?;
        self.state.lock().close_lazy(id, trace)
    }

    /// Force-close every open frame; returns how many were still open
    ///
    /// Hosts call this at tick boundaries, where no frame may survive.
    pub fn ensure_balanced(&self) -> CausalityResult<usize> {
        self.guard.check("ensure_balanced")?;
        let mut state = self.state.lock();
        let pending = state.pending.len();
        let open = state.force_close_all();
        if open > 0 || pending > 0 {
            tracing::error!(
                open_frames = open,
                pending_providers = pending,
                "cause frames leaked past the tick boundary; force-closed"
            );
        }
        Ok(open)
    }

    // Diagnostics below skip the thread check and never materialize; they
    // only read counters and are safe from any thread.

    /// Materialized cause depth; does not run lazy providers
    pub fn depth(&self) -> usize {
        self.state.lock().causes.len()
    }

    pub fn frame_depth(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn pooled_frames(&self) -> usize {
        self.state.lock().pool.len()
    }

    pub fn pending_providers(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl Default for CauseStackManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causality_core::{keys, CausalityError, ContextValue, EntityId, ErrorKind, PlayerId};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn player(id: u64) -> Cause {
        Cause::Player(PlayerId(id))
    }

    #[test]
    fn test_duplicate_suppression() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        manager.push_cause(player(1)).unwrap();
        assert_eq!(manager.depth(), 1);

        assert_eq!(manager.pop_cause().unwrap(), player(1));
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.pop_cause().unwrap(), player(1));
        assert_eq!(manager.depth(), 0);
        assert_eq!(
            manager.pop_cause().unwrap_err(),
            causality_core::CausalityError::EmptyCauseStack
        );
    }

    #[test]
    fn test_empty_stack_reports_server_root() {
        let manager = CauseStackManager::new();
        let chain = manager.current_cause().unwrap();
        assert_eq!(chain.root(), &Cause::Server);
    }

    #[test]
    fn test_snapshot_cached_until_mutation() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        let a = manager.current_cause().unwrap();
        let b = manager.current_cause().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        manager.add_context(&keys::OWNER, PlayerId(1)).unwrap();
        let c = manager.current_cause().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.context_value(&keys::OWNER), Some(PlayerId(1)));
    }

    #[test]
    fn test_nearest_cause_first() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        manager.push_cause(EntityId(2)).unwrap();
        let chain = manager.current_cause().unwrap();
        assert_eq!(chain.causes(), &[Cause::Entity(EntityId(2)), player(1)]);
    }

    #[test]
    fn test_frame_scenario() {
        // push A; open frame; K=1; push B; pop (B); close -> [A], no K
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        {
            let frame = manager.push_cause_frame().unwrap();
            manager.add_context(&keys::OWNER, PlayerId(9)).unwrap();
            manager.push_cause(player(2)).unwrap();
            assert_eq!(manager.pop_cause().unwrap(), player(2));
            assert_eq!(frame.close().unwrap(), FrameClose::Clean);
        }
        let chain = manager.current_cause().unwrap();
        assert_eq!(chain.causes(), &[player(1)]);
        assert!(!chain.context().contains(&keys::OWNER));
    }

    #[test]
    fn test_pop_below_frame_floor_fails() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        let frame = manager.push_cause_frame().unwrap();
        let err = manager.pop_cause().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StackDiscipline);
        assert_eq!(manager.depth(), 1);
        drop(frame);
        assert_eq!(manager.pop_cause().unwrap(), player(1));
    }

    #[test]
    fn test_duplicates_outside_frame_survive_frame() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        manager.push_cause(player(1)).unwrap();
        {
            let _frame = manager.push_cause_frame().unwrap();
            manager.push_cause(player(1)).unwrap();
            assert_eq!(manager.pop_cause().unwrap(), player(1));
            // the outer duplicate is not reachable from inside the frame
            assert!(manager.pop_cause().is_err());
        }
        assert_eq!(manager.pop_cause().unwrap(), player(1));
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.pop_cause().unwrap(), player(1));
        assert_eq!(manager.depth(), 0);
    }

    #[test]
    fn test_frame_restores_overridden_and_removed_keys() {
        let manager = CauseStackManager::new();
        manager.add_context(&keys::OWNER, PlayerId(1)).unwrap();
        manager.add_context(&keys::NOTIFIER, PlayerId(2)).unwrap();
        let before = manager.current_context().unwrap();
        {
            let _frame = manager.push_cause_frame().unwrap();
            manager.add_context(&keys::OWNER, PlayerId(5)).unwrap();
            manager.add_context(&keys::OWNER, PlayerId(6)).unwrap();
            manager.remove_context(&keys::NOTIFIER).unwrap();
            manager.add_context(&keys::PLAYER, PlayerId(7)).unwrap();
        }
        assert_eq!(manager.current_context().unwrap(), before);
    }

    #[test]
    fn test_out_of_order_close_recovers() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();

        let f1 = manager.push_cause_frame().unwrap();
        manager.push_cause(player(2)).unwrap();
        manager.add_context(&keys::OWNER, PlayerId(2)).unwrap();
        let f2 = manager.push_cause_frame().unwrap();
        manager.push_cause(player(3)).unwrap();
        manager.add_context(&keys::OWNER, PlayerId(3)).unwrap();

        assert_eq!(f1.close().unwrap(), FrameClose::Recovered { forced: 1 });
        assert_eq!(manager.frame_depth(), 0);
        assert_eq!(f2.close().unwrap(), FrameClose::AlreadyForced);

        let chain = manager.current_cause().unwrap();
        assert_eq!(chain.causes(), &[player(1)]);
        assert!(chain.context().is_empty());
    }

    #[test]
    fn test_unknown_frame_is_reported() {
        let manager = CauseStackManager::new();
        let err = manager.close_frame(FrameId(999), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FrameCorruption);
    }

    #[test]
    fn test_pool_retains_at_most_max() {
        let manager = CauseStackManager::with_config(CauseStackConfig {
            max_pool_size: 4,
            debug_frames: false,
            prewarm: 2,
        });
        let frames: Vec<_> = (0..10).map(|_| manager.push_cause_frame().unwrap()).collect();
        assert_eq!(manager.pooled_frames(), 0);
        for frame in frames.into_iter().rev() {
            frame.close().unwrap();
        }
        assert_eq!(manager.pooled_frames(), 4);
    }

    #[test]
    fn test_unpooled_manager_functions() {
        let manager = CauseStackManager::with_config(CauseStackConfig::unpooled());
        for i in 0..5 {
            let frame = manager.push_cause_frame().unwrap();
            manager.push_cause(player(i)).unwrap();
            frame.close().unwrap();
        }
        assert_eq!(manager.pooled_frames(), 0);
        assert_eq!(manager.depth(), 0);
    }

    #[test]
    fn test_debug_frames_capture_trace() {
        let manager = CauseStackManager::with_config(CauseStackConfig::debug());
        let _frame = manager.push_cause_frame().unwrap();
        let state = manager.state.lock();
        assert!(state.frames[0].trace().is_some());
    }

    #[test]
    fn test_lazy_frame_not_built_unless_observed() {
        let manager = CauseStackManager::new();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let lazy = manager
            .push_lazy_frame(move |frame| {
                counter.fetch_add(1, Ordering::SeqCst);
                frame.push_cause(EntityId(5));
            })
            .unwrap();
        assert_eq!(manager.pending_providers(), 1);
        lazy.close().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(manager.pending_providers(), 0);
    }

    #[test]
    fn test_lazy_frames_materialize_bottom_up() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        let outer = manager
            .push_lazy_frame(|frame| {
                frame
                    .push_cause(EntityId(10))
                    .add_context(&keys::OWNER, PlayerId(1));
            })
            .unwrap();
        let inner = manager
            .push_lazy_frame(|frame| {
                frame.push_cause(EntityId(20));
            })
            .unwrap();

        let chain = manager.current_cause().unwrap();
        assert_eq!(
            chain.causes(),
            &[Cause::Entity(EntityId(20)), Cause::Entity(EntityId(10)), player(1)]
        );
        assert_eq!(manager.frame_depth(), 2);

        inner.close().unwrap();
        outer.close().unwrap();
        let chain = manager.current_cause().unwrap();
        assert_eq!(chain.causes(), &[player(1)]);
        assert!(chain.context().is_empty());
    }

    #[test]
    fn test_ensure_balanced_closes_leaks() {
        let manager = CauseStackManager::new();
        let frame = manager.push_cause_frame().unwrap();
        manager.push_cause(player(1)).unwrap();
        std::mem::forget(frame);
        assert_eq!(manager.ensure_balanced().unwrap(), 1);
        assert_eq!(manager.depth(), 0);
        assert_eq!(manager.frame_depth(), 0);
    }

    #[test]
    fn test_off_thread_push_leaves_stack_untouched() {
        let manager = Arc::new(CauseStackManager::new());
        manager.push_cause(player(1)).unwrap();
        let remote = Arc::clone(&manager);
        let err = std::thread::spawn(move || remote.push_cause(player(2)).unwrap_err())
            .join()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::OffThread);
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.peek_cause().unwrap(), Some(player(1)));
    }

    #[test]
    fn test_diagnostics_readable_off_thread() {
        let manager = Arc::new(CauseStackManager::new());
        manager.push_cause(player(1)).unwrap();
        let frame = manager.push_cause_frame().unwrap();
        let remote = Arc::clone(&manager);
        let seen = std::thread::spawn(move || {
            (remote.depth(), remote.frame_depth(), remote.pending_providers())
        })
        .join()
        .unwrap();
        assert_eq!(seen, (1, 1, 0));
        frame.close().unwrap();
    }

    #[test]
    fn test_lazy_close_under_pending_provider_recovers() {
        let manager = CauseStackManager::new();
        manager.push_cause(player(1)).unwrap();
        let older = manager
            .push_lazy_frame(|frame| {
                frame.push_cause(EntityId(10));
            })
            .unwrap();
        manager.current_cause().unwrap();
        let newer = manager
            .push_lazy_frame(|frame| {
                frame.push_cause(EntityId(20));
            })
            .unwrap();

        assert_eq!(older.close().unwrap(), FrameClose::Recovered { forced: 1 });
        assert_eq!(manager.current_cause().unwrap().causes(), &[player(1)]);
        assert_eq!(newer.close().unwrap(), FrameClose::AlreadyForced);
        assert_eq!(manager.frame_depth(), 0);
    }

    #[test]
    fn test_balanced_pending_lazy_frame_reports_already_forced() {
        let manager = CauseStackManager::with_config(CauseStackConfig::debug());
        let outer = manager
            .push_lazy_frame(|frame| {
                frame.push_cause(EntityId(1));
            })
            .unwrap();
        let eager = manager.push_cause_frame().unwrap();
        let inner = manager
            .push_lazy_frame(|frame| {
                frame.push_cause(EntityId(2));
            })
            .unwrap();

        assert_eq!(manager.ensure_balanced().unwrap(), 2);
        assert_eq!(manager.pending_providers(), 0);
        assert_eq!(inner.close().unwrap(), FrameClose::AlreadyForced);
        assert_eq!(eager.close().unwrap(), FrameClose::AlreadyForced);
        assert_eq!(outer.close().unwrap(), FrameClose::AlreadyForced);
        assert_eq!(manager.depth(), 0);
    }

    #[test]
    fn test_forced_ids_forgotten_at_next_boundary() {
        let manager = CauseStackManager::new();
        std::mem::forget(manager.push_cause_frame().unwrap());
        assert_eq!(manager.ensure_balanced().unwrap(), 1);
        assert_eq!(manager.state.lock().force_closed.len(), 1);
        assert_eq!(manager.ensure_balanced().unwrap(), 0);
        assert!(manager.state.lock().force_closed.is_empty());
    }

    #[test]
    fn test_stale_guard_reports_creation_trace() {
        let manager = CauseStackManager::with_config(CauseStackConfig::debug());
        let frame = manager.push_cause_frame().unwrap();
        manager.ensure_balanced().unwrap();
        manager.ensure_balanced().unwrap();
        match frame.close() {
            Err(CausalityError::UnknownFrame { trace, .. }) => assert!(trace.is_some()),
            other => panic!("unexpected close result: {:?}", other),
        }
    }

    #[derive(Clone, Debug)]
    enum Op {
        Push(u8),
        Pop,
        Context(u8, i64),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4).prop_map(Op::Push),
            Just(Op::Pop),
            (0u8..3, any::<i64>()).prop_map(|(k, v)| Op::Context(k, v)),
            (0u8..3).prop_map(Op::Remove),
        ]
    }

    const INT_KEYS: [ContextKey<i64>; 3] = [
        ContextKey::new("a"),
        ContextKey::new("b"),
        ContextKey::new("c"),
    ];

    fn apply(manager: &CauseStackManager, ops: &[Op]) {
        for op in ops {
            match op {
                Op::Push(id) => manager.push_cause(player(*id as u64)).unwrap(),
                Op::Pop => {
                    let _ = manager.pop_cause();
                }
                Op::Context(k, v) => {
                    manager.add_context(&INT_KEYS[*k as usize], *v).unwrap();
                }
                Op::Remove(k) => {
                    manager.remove_context(&INT_KEYS[*k as usize]).unwrap();
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_frame_restores_stack_and_context(
            before in prop::collection::vec(op(), 0..20),
            inside in prop::collection::vec(op(), 0..40),
        ) {
            let manager = CauseStackManager::new();
            apply(&manager, &before);
            let snapshot = manager.current_cause().unwrap();
            let depth = manager.depth();

            let frame = manager.push_cause_frame().unwrap();
            apply(&manager, &inside);
            prop_assert_eq!(frame.close().unwrap(), FrameClose::Clean);

            prop_assert_eq!(manager.depth(), depth);
            prop_assert_eq!(&*manager.current_cause().unwrap(), &*snapshot);
        }

        #[test]
        fn prop_balanced_push_pop_round_trip(ids in prop::collection::vec(0u8..3, 0..30)) {
            let manager = CauseStackManager::new();
            manager.push_cause(Cause::plugin("base")).unwrap();
            let snapshot = manager.current_cause().unwrap();

            for id in &ids {
                manager.push_cause(player(*id as u64)).unwrap();
            }
            for _ in &ids {
                manager.pop_cause().unwrap();
            }
            prop_assert_eq!(&*manager.current_cause().unwrap(), &*snapshot);
            prop_assert_eq!(manager.depth(), 1);
        }
    }

    #[test]
    fn test_context_value_types_are_checked() {
        let manager = CauseStackManager::new();
        manager.add_context(&keys::DAMAGE_TYPE, "lava".to_string()).unwrap();
        let ctx = manager.current_context().unwrap();
        assert_eq!(
            ctx.get_raw("damage_type"),
            Some(&ContextValue::Text(Arc::from("lava")))
        );
    }
}
