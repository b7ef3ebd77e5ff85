//! Scenario harness
//!
//! Wraps a `Server` with one recording listener so end-to-end tests can
//! assert on exactly which batched events were dispatched, with which cause,
//! and whether they ended cancelled.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use causality_core::{
    BlockState, CausalityResult, Cause, CauseChain, EntityId, EntityKind, Vector3,
};
use causality_phase::{Cancellable, Event, EventKind, MemoryWorld};
use causality_runtime::{ScheduledAction, Server, ServerConfig};

/// One event as the scenario listener saw it
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub kind: EventKind,
    /// Transactions, entities or drops in the batch
    pub size: usize,
    pub cause: Arc<CauseChain>,
    pub cancelled: bool,
}

impl RecordedEvent {
    fn from_event(event: &Event) -> Self {
        let size = match event {
            Event::ChangeBlock(e) => e.transactions.len(),
            Event::SpawnEntity(e) => e.entities.len(),
            Event::DropItem(e) => e.drops.len(),
            Event::MoveEntity(_) => 1,
        };
        RecordedEvent {
            kind: event.kind(),
            size,
            cause: Arc::clone(event.cause()),
            cancelled: event.is_cancelled(),
        }
    }

    pub fn root(&self) -> &Cause {
        self.cause.root()
    }
}

#[derive(Default)]
struct Recorder {
    events: Vec<RecordedEvent>,
    cancel: HashSet<EventKind>,
}

/// A server on a flat stone floor with a recording listener installed
pub struct Scenario {
    server: Server,
    recorder: Arc<Mutex<Recorder>>,
}

impl Scenario {
    /// Stone floor at y=63 spanning -4..=4
    pub fn new() -> CausalityResult<Self> {
        Self::with_world(MemoryWorld::with_floor(63, 4, BlockState::STONE))
    }

    pub fn with_world(world: MemoryWorld) -> CausalityResult<Self> {
        let server = Server::with_world(ServerConfig::default(), world)?;
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let sink = Arc::clone(&recorder);
        server
            .bus()
            .register(server.tracker(), "scenario", None, move |event, _| {
                let mut recorder = sink.lock();
                if recorder.cancel.contains(&event.kind()) {
                    event.set_cancelled(true);
                }
                recorder.events.push(RecordedEvent::from_event(event));
                Ok(())
            })?;
        Ok(Scenario { server, recorder })
    }

    /// Cancel every event of `kind` from now on
    pub fn cancel(&mut self, kind: EventKind) -> &mut Self {
        self.recorder.lock().cancel.insert(kind);
        self
    }

    pub fn allow(&mut self, kind: EventKind) -> &mut Self {
        self.recorder.lock().cancel.remove(&kind);
        self
    }

    pub fn spawn(&mut self, kind: EntityKind, location: Vector3) -> EntityId {
        self.server.world_mut().place_entity(kind, location)
    }

    pub fn set_block(&mut self, pos: causality_core::BlockPos, state: BlockState) {
        causality_phase::WorldAccess::set_block_raw(self.server.world_mut(), pos, state);
    }

    pub fn schedule(&mut self, action: ScheduledAction) -> &mut Self {
        self.server.schedule(action);
        self
    }

    /// Run one tick; returns the events it dispatched
    pub fn tick(&mut self) -> CausalityResult<Vec<RecordedEvent>> {
        let before = self.recorder.lock().events.len();
        self.server.tick()?;
        Ok(self.recorder.lock().events[before..].to_vec())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.recorder.lock().events.clone()
    }

    pub fn events_of(&self, kind: EventKind) -> Vec<RecordedEvent> {
        self.recorder
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    pub fn world(&self) -> &MemoryWorld {
        self.server.world()
    }

    /// Whether both stacks are back at baseline with nothing recovered
    pub fn is_clean(&self) -> bool {
        self.server.tracker().depth() == 0
            && self.server.causes().depth() == 0
            && self.server.causes().frame_depth() == 0
            && self.server.stats().recoveries == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causality_core::{keys, BlockPos, ItemType, PacketKind, PlayerId};
    use causality_phase::WorldAccess;

    fn dig(player: u64, pos: BlockPos) -> ScheduledAction {
        ScheduledAction::Packet {
            player: PlayerId(player),
            kind: PacketKind::DIG,
            pos,
            state: BlockState::AIR,
        }
    }

    #[test]
    fn test_mob_death_batches_loot_apart_from_orb() {
        let mut scenario = Scenario::new().unwrap();
        let zombie = scenario.spawn(EntityKind::Mob, Vector3::new(0.5, 64.0, 0.5));
        scenario.schedule(ScheduledAction::EntityDeath {
            entity: zombie,
            damage: None,
        });
        let events = scenario.tick().unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!((events[0].kind, events[0].size), (EventKind::DropItem, 2));
        assert_eq!(events[0].root(), &Cause::Entity(zombie));
        assert_eq!((events[1].kind, events[1].size), (EventKind::SpawnEntity, 1));
        assert_eq!(scenario.world().items().len(), 2);
        assert!(scenario.is_clean());
    }

    #[test]
    fn test_cancelled_loot_leaves_no_items() {
        let mut scenario = Scenario::new().unwrap();
        let zombie = scenario.spawn(EntityKind::Mob, Vector3::new(0.5, 64.0, 0.5));
        scenario.cancel(EventKind::DropItem);
        scenario.schedule(ScheduledAction::EntityDeath {
            entity: zombie,
            damage: None,
        });
        let events = scenario.tick().unwrap();

        assert!(events[0].cancelled);
        assert!(scenario.world().items().is_empty());
        assert_eq!(
            scenario
                .world()
                .count_kind(|k| matches!(k, EntityKind::ExperienceOrb(_))),
            1
        );
    }

    #[test]
    fn test_unsupported_torch_breaks_in_post_dispatch() {
        let mut scenario = Scenario::new().unwrap();
        let floor = BlockPos::new(0, 63, 0);
        scenario.set_block(floor.up(), BlockState::TORCH);
        scenario.schedule(dig(5, floor));
        let events = scenario.tick().unwrap();

        let changes: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::ChangeBlock)
            .collect();
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|e| e.cause.first_player() == Some(PlayerId(5))));
        assert_eq!(scenario.world().block(floor.up()), BlockState::AIR);
        let torches = scenario
            .world()
            .items()
            .iter()
            .filter(|s| s.item == ItemType(BlockState::TORCH.0))
            .count();
        assert_eq!(torches, 1);
        assert!(scenario.is_clean());
    }

    #[test]
    fn test_cancelled_dig_keeps_torch() {
        let mut scenario = Scenario::new().unwrap();
        let floor = BlockPos::new(0, 63, 0);
        scenario.set_block(floor.up(), BlockState::TORCH);
        scenario.cancel(EventKind::ChangeBlock);
        scenario.schedule(dig(5, floor));
        let events = scenario.tick().unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(scenario.world().block(floor), BlockState::STONE);
        assert_eq!(scenario.world().block(floor.up()), BlockState::TORCH);
        assert!(scenario.world().items().is_empty());
    }

    #[test]
    fn test_events_carry_packet_context() {
        let mut scenario = Scenario::new().unwrap();
        scenario.schedule(ScheduledAction::Packet {
            player: PlayerId(3),
            kind: PacketKind::PLACE,
            pos: BlockPos::new(2, 64, 2),
            state: BlockState::DIRT,
        });
        let events = scenario.tick().unwrap();
        let context = events[0].cause.context();
        assert_eq!(context.get(&keys::PLAYER), Some(PlayerId(3)));
        assert_eq!(context.get(&keys::OWNER), Some(PlayerId(3)));
    }

    #[test]
    fn test_multiple_ticks_stay_clean() {
        let mut scenario = Scenario::new().unwrap();
        for x in -2..=2 {
            scenario.schedule(dig(1, BlockPos::new(x, 63, 0)));
            scenario.tick().unwrap();
        }
        assert_eq!(scenario.server().stats().ticks, 5);
        assert_eq!(scenario.world().items().len(), 5);
        assert!(scenario.is_clean());
    }
}
