//! Mutation call sites
//!
//! `PhaseEnv` is what collaborators mutate the world through. Each call asks
//! the current phase's capabilities whether to apply now or to buffer into
//! the phase context for batched dispatch at unwind.

use std::sync::Arc;

use causality_core::{
    BlockPos, BlockState, CausalityResult, EntityId, EntityKind, ItemStack, SpawnType, Vector3,
};
use causality_stack::CauseStackManager;

use crate::{
    BlockChange, EntitySpawn, Event, EventBus, ItemDrop, PhaseTracker, Reaction, TileUpdate,
    WorldAccess,
};

/// The engine singletons plus the world, borrowed for one operation
pub struct PhaseEnv<'a> {
    pub causes: &'a CauseStackManager,
    pub tracker: &'a PhaseTracker,
    pub bus: &'a EventBus,
    pub world: &'a mut dyn WorldAccess,
}

impl<'a> PhaseEnv<'a> {
    pub fn new(
        causes: &'a CauseStackManager,
        tracker: &'a PhaseTracker,
        bus: &'a EventBus,
        world: &'a mut dyn WorldAccess,
    ) -> Self {
        PhaseEnv {
            causes,
            tracker,
            bus,
            world,
        }
    }

    /// Change a block; returns the replaced state
    ///
    /// Under block capture the change is applied eagerly and its original
    /// state is kept so a cancelled batch can revert it.
    pub fn set_block(&mut self, pos: BlockPos, state: BlockState) -> CausalityResult<BlockState> {
        let policy = self.tracker.capture_policy()?;
        let original = self.world.set_block_raw(pos, state);
        if policy.map_or(false, |caps| caps.capture_blocks) && original != state {
            self.tracker.with_captures(|captures| {
                captures.push_block(BlockChange {
                    pos,
                    original,
                    replacement: state,
                })
            })?;
            tracing::trace!(?pos, ?original, replacement = ?state, "block change captured");
        }
        Ok(original)
    }

    /// Replace a block with air and drop its item at the block center
    pub fn break_block(&mut self, pos: BlockPos) -> CausalityResult<BlockState> {
        let original = self.set_block(pos, BlockState::AIR)?;
        if let Some(item) = original.drop_item() {
            let drop = ItemDrop {
                origin: Some(pos),
                ..ItemDrop::new(ItemStack::new(item, 1), pos.center())
            };
            self.capture_drop(None, drop)?;
        }
        Ok(original)
    }

    /// Spawn now, or defer until unwind; returns the id when spawned now
    pub fn spawn_entity(
        &mut self,
        kind: EntityKind,
        location: Vector3,
        spawn_type: SpawnType,
    ) -> CausalityResult<Option<EntityId>> {
        let policy = self.tracker.capture_policy()?;
        if policy.map_or(false, |caps| caps.capture_spawns) {
            self.tracker.with_captures(|captures| {
                captures.push_spawn(EntitySpawn {
                    kind,
                    location,
                    spawn_type,
                })
            })?;
            tracing::trace!(?kind, ?spawn_type, "entity spawn captured");
            return Ok(None);
        }
        self.world.spawn_entity_raw(kind, location).map(Some)
    }

    /// Drop an item, attributed to `entity` when the phase tracks drops per entity
    pub fn drop_item(
        &mut self,
        entity: Option<EntityId>,
        stack: ItemStack,
        location: Vector3,
    ) -> CausalityResult<Option<EntityId>> {
        self.capture_drop(entity, ItemDrop::new(stack, location))
    }

    fn capture_drop(&mut self, entity: Option<EntityId>, drop: ItemDrop) -> CausalityResult<Option<EntityId>> {
        let policy = self.tracker.capture_policy()?;
        match policy {
            Some(caps) if caps.capture_drops => {
                self.tracker.with_captures(|captures| match entity {
                    Some(entity) if caps.per_entity_drops => captures.push_entity_drop(entity, drop),
                    _ => captures.push_drop(drop),
                })?;
                tracing::trace!(?entity, stack = ?drop.stack, "item drop captured");
                Ok(None)
            }
            _ => self
                .world
                .spawn_entity_raw(EntityKind::Item(drop.stack), drop.location)
                .map(Some),
        }
    }

    pub fn update_tile(&mut self, pos: BlockPos, data: Option<Arc<str>>) -> CausalityResult<()> {
        let policy = self.tracker.capture_policy()?;
        if policy.map_or(false, |caps| caps.capture_tiles) {
            self.tracker
                .with_captures(|captures| captures.push_tile(TileUpdate { pos, data }))?;
            return Ok(());
        }
        self.world.set_tile_raw(pos, data)
    }

    /// Queue neighbor notifications for post-dispatch; observed only otherwise
    pub fn notify_neighbors(&mut self, pos: BlockPos) -> CausalityResult<()> {
        let policy = self.tracker.capture_policy()?;
        if policy.map_or(false, |caps| caps.capture_neighbors) {
            self.tracker
                .with_captures(|captures| captures.push_neighbors(pos))?;
        }
        Ok(())
    }

    pub fn apply_reaction(&mut self, reaction: Reaction) -> CausalityResult<()> {
        match reaction {
            Reaction::Set { pos, state } => {
                self.set_block(pos, state)?;
            }
            Reaction::Break { pos } => {
                self.break_block(pos)?;
            }
        }
        Ok(())
    }

    /// Run the world's block tick rule at `pos`; returns how many changes it made
    pub fn tick_block(&mut self, pos: BlockPos) -> CausalityResult<usize> {
        let reactions = self.world.block_tick(pos);
        for reaction in &reactions {
            self.apply_reaction(*reaction)?;
        }
        Ok(reactions.len())
    }

    /// Remove an entity and drop its loot; false when it did not exist
    pub fn kill_entity(&mut self, id: EntityId) -> CausalityResult<bool> {
        let location = self.world.entity_location(id);
        let (Some(kind), Some(location)) = (self.world.remove_entity(id), location) else {
            return Ok(false);
        };
        let loot = self.world.loot_for(kind);
        for stack in loot.items {
            self.drop_item(Some(id), stack, location)?;
        }
        if loot.experience > 0 {
            self.spawn_entity(
                EntityKind::ExperienceOrb(loot.experience),
                location,
                SpawnType::Experience,
            )?;
        }
        Ok(true)
    }

    /// Post an event on the bus; returns whether it ended cancelled
    pub fn post(&mut self, event: &mut Event) -> CausalityResult<bool> {
        let bus = self.bus;
        bus.post(event, self)
    }
}
