//! Cancellable batched events and the event bus

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use causality_core::{
    BlockPos, BlockState, CausalityError, CausalityResult, CauseChain, EntityId, ThreadGuard,
    Vector3,
};

use crate::{phases, EntitySpawn, ItemDrop, PhaseEnv, PhaseExtra, PhaseState, PhaseTracker};

/// Event category listeners subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChangeBlock,
    SpawnEntity,
    DropItem,
    MoveEntity,
}

/// Events a listener may veto
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
    fn set_cancelled(&mut self, cancelled: bool);
}

macro_rules! cancellable {
    ($($ty:ty),*) => {
        $(impl Cancellable for $ty {
            fn is_cancelled(&self) -> bool {
                self.cancelled
            }

            fn set_cancelled(&mut self, cancelled: bool) {
                self.cancelled = cancelled;
            }
        })*
    };
}

/// One block change inside a `ChangeBlockEvent`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockTransaction {
    pub pos: BlockPos,
    pub original: BlockState,
    pub replacement: BlockState,
    valid: bool,
}

impl BlockTransaction {
    pub fn new(pos: BlockPos, original: BlockState, replacement: BlockState) -> Self {
        BlockTransaction {
            pos,
            original,
            replacement,
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Revert this change alone, keeping the rest of the batch
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

#[derive(Clone, Debug)]
pub struct ChangeBlockEvent {
    pub cause: Arc<CauseChain>,
    pub transactions: Vec<BlockTransaction>,
    cancelled: bool,
}

impl ChangeBlockEvent {
    pub fn new(cause: Arc<CauseChain>, transactions: Vec<BlockTransaction>) -> Self {
        ChangeBlockEvent {
            cause,
            transactions,
            cancelled: false,
        }
    }
}

/// Listeners may remove entries to filter individual spawns
#[derive(Clone, Debug)]
pub struct SpawnEntityEvent {
    pub cause: Arc<CauseChain>,
    pub entities: Vec<EntitySpawn>,
    cancelled: bool,
}

impl SpawnEntityEvent {
    pub fn new(cause: Arc<CauseChain>, entities: Vec<EntitySpawn>) -> Self {
        SpawnEntityEvent {
            cause,
            entities,
            cancelled: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DropItemEvent {
    pub cause: Arc<CauseChain>,
    /// Producing entity when drops are tracked per entity
    pub entity: Option<EntityId>,
    pub drops: Vec<ItemDrop>,
    cancelled: bool,
}

impl DropItemEvent {
    pub fn new(cause: Arc<CauseChain>, entity: Option<EntityId>, drops: Vec<ItemDrop>) -> Self {
        DropItemEvent {
            cause,
            entity,
            drops,
            cancelled: false,
        }
    }
}

/// Listeners may rewrite `to`
#[derive(Clone, Debug)]
pub struct MoveEntityEvent {
    pub cause: Arc<CauseChain>,
    pub entity: EntityId,
    pub from: Vector3,
    pub to: Vector3,
    cancelled: bool,
}

impl MoveEntityEvent {
    pub fn new(cause: Arc<CauseChain>, entity: EntityId, from: Vector3, to: Vector3) -> Self {
        MoveEntityEvent {
            cause,
            entity,
            from,
            to,
            cancelled: false,
        }
    }
}

cancellable!(ChangeBlockEvent, SpawnEntityEvent, DropItemEvent, MoveEntityEvent);

#[derive(Clone, Debug)]
pub enum Event {
    ChangeBlock(ChangeBlockEvent),
    SpawnEntity(SpawnEntityEvent),
    DropItem(DropItemEvent),
    MoveEntity(MoveEntityEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ChangeBlock(_) => EventKind::ChangeBlock,
            Event::SpawnEntity(_) => EventKind::SpawnEntity,
            Event::DropItem(_) => EventKind::DropItem,
            Event::MoveEntity(_) => EventKind::MoveEntity,
        }
    }

    pub fn cause(&self) -> &Arc<CauseChain> {
        match self {
            Event::ChangeBlock(e) => &e.cause,
            Event::SpawnEntity(e) => &e.cause,
            Event::DropItem(e) => &e.cause,
            Event::MoveEntity(e) => &e.cause,
        }
    }

    fn as_cancellable(&self) -> &dyn Cancellable {
        match self {
            Event::ChangeBlock(e) => e,
            Event::SpawnEntity(e) => e,
            Event::DropItem(e) => e,
            Event::MoveEntity(e) => e,
        }
    }

    fn as_cancellable_mut(&mut self) -> &mut dyn Cancellable {
        match self {
            Event::ChangeBlock(e) => e,
            Event::SpawnEntity(e) => e,
            Event::DropItem(e) => e,
            Event::MoveEntity(e) => e,
        }
    }
}

impl Cancellable for Event {
    fn is_cancelled(&self) -> bool {
        self.as_cancellable().is_cancelled()
    }

    fn set_cancelled(&mut self, cancelled: bool) {
        self.as_cancellable_mut().set_cancelled(cancelled);
    }
}

/// Listener callback; runs inside the listener phase, where mutations apply
/// immediately
pub type Listener = dyn Fn(&mut Event, &mut PhaseEnv<'_>) -> CausalityResult<()> + Send + Sync;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

struct Registration {
    id: ListenerId,
    name: &'static str,
    kind: Option<EventKind>,
    listener: Arc<Listener>,
}

/// Event bus counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub posted: u64,
    pub cancelled: u64,
    pub listener_failures: u64,
}

#[derive(Default)]
struct BusInner {
    listeners: Vec<Registration>,
    next_id: u64,
    stats: BusStats,
}

/// Dispatches events to listeners in registration order
pub struct EventBus {
    guard: ThreadGuard,
    inner: Mutex<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_guard(ThreadGuard::current())
    }

    pub fn with_guard(guard: ThreadGuard) -> Self {
        EventBus {
            guard,
            inner: Mutex::new(BusInner::default()),
        }
    }

    /// Subscribe to one kind of event, or to all of them with `None`
    pub fn register<F>(
        &self,
        tracker: &PhaseTracker,
        name: &'static str,
        kind: Option<EventKind>,
        listener: F,
    ) -> CausalityResult<ListenerId>
    where
        F: Fn(&mut Event, &mut PhaseEnv<'_>) -> CausalityResult<()> + Send + Sync + 'static,
    {
        self.guard.check("register_listener")?;
        if let Some(state) = tracker.current_state()? {
            if state.capabilities().listener {
                tracing::error!(
                    listener = name,
                    phase = state.name(),
                    "listener registration attempted from inside a listener phase"
                );
                return Err(CausalityError::ListenerRegistration {
                    phase: state.name(),
                });
            }
        }

        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.push(Registration {
            id,
            name,
            kind,
            listener: Arc::new(listener),
        });
        tracing::debug!(listener = name, ?kind, "listener registered");
        Ok(id)
    }

    pub fn unregister(&self, id: ListenerId) -> CausalityResult<bool> {
        self.guard.check("unregister_listener")?;
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|r| r.id != id);
        Ok(inner.listeners.len() != before)
    }

    // Diagnostics; no thread check, they only read counters.

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn stats(&self) -> BusStats {
        self.inner.lock().stats
    }

    /// Run every matching listener; returns whether the event ended cancelled
    ///
    /// A failing listener is logged and skipped.
    pub fn post(&self, event: &mut Event, env: &mut PhaseEnv<'_>) -> CausalityResult<bool> {
        self.guard.check("post_event")?;
        let kind = event.kind();
        let listeners: Vec<(&'static str, Arc<Listener>)> = {
            let mut inner = self.inner.lock();
            inner.stats.posted += 1;
            inner
                .listeners
                .iter()
                .filter(|r| r.kind.map_or(true, |k| k == kind))
                .map(|r| (r.name, Arc::clone(&r.listener)))
                .collect()
        };

        if !listeners.is_empty() {
            let tracker = env.tracker;
            let context = phases::LISTENER
                .create_context()
                .with_extra(PhaseExtra::Listener { kind: Some(kind) })?;
            let (failures, _) = tracker.run(&phases::LISTENER, context, env, |env| {
                let mut failures = 0;
                for (name, listener) in &listeners {
                    if let Err(err) = listener(&mut *event, &mut *env) {
                        tracing::warn!(listener = *name, ?kind, error = %err, "listener failed");
                        failures += 1;
                    }
                }
                Ok(failures)
            })?;
            self.inner.lock().stats.listener_failures += failures;
        }

        let cancelled = event.is_cancelled();
        if cancelled {
            self.inner.lock().stats.cancelled += 1;
        }
        tracing::trace!(?kind, cancelled, "event posted");
        Ok(cancelled)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventBus")
            .field("listeners", &inner.listeners.len())
            .field("stats", &inner.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causality_core::{BlockState, Cause};

    #[test]
    fn test_event_cancellation_delegates() {
        let chain = Arc::new(CauseChain::new(vec![Cause::Server], Default::default()));
        let mut event = Event::ChangeBlock(ChangeBlockEvent::new(
            chain,
            vec![BlockTransaction::new(
                BlockPos::new(0, 0, 0),
                BlockState::STONE,
                BlockState::AIR,
            )],
        ));
        assert!(!event.is_cancelled());
        event.set_cancelled(true);
        assert!(event.is_cancelled());
        assert_eq!(event.kind(), EventKind::ChangeBlock);
    }

    #[test]
    fn test_transaction_invalidation() {
        let mut tx = BlockTransaction::new(BlockPos::new(0, 0, 0), BlockState::AIR, BlockState::STONE);
        assert!(tx.is_valid());
        tx.invalidate();
        assert!(!tx.is_valid());
    }
}
