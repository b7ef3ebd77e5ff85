//! The narrow world interface and an in-memory reference world
//!
//! The engine never decides what a mutation means. The world applies raw
//! changes and reports the follow-up changes its rules want as `Reaction`s;
//! the phase engine routes those back through the active phase so they are
//! captured like any other mutation.

use std::collections::HashMap;
use std::sync::Arc;

use causality_core::{
    BlockPos, BlockState, CausalityError, CausalityResult, EntityId, EntityKind, ItemStack,
    ItemType, Vector3,
};

/// Follow-up change requested by a world rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reaction {
    /// Replace the block
    Set { pos: BlockPos, state: BlockState },
    /// Replace the block with air and drop its item
    Break { pos: BlockPos },
}

/// Loot produced when an entity dies
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Loot {
    pub items: Vec<ItemStack>,
    pub experience: u32,
}

/// Raw world access used by the phase engine
pub trait WorldAccess {
    fn block(&self, pos: BlockPos) -> BlockState;

    /// Apply a block change; returns the replaced state
    fn set_block_raw(&mut self, pos: BlockPos, state: BlockState) -> BlockState;

    fn spawn_entity_raw(&mut self, kind: EntityKind, location: Vector3) -> CausalityResult<EntityId>;

    fn remove_entity(&mut self, id: EntityId) -> Option<EntityKind>;

    fn entity_kind(&self, id: EntityId) -> Option<EntityKind>;

    fn entity_location(&self, id: EntityId) -> Option<Vector3>;

    fn move_entity_raw(&mut self, id: EntityId, to: Vector3) -> CausalityResult<()>;

    fn set_tile_raw(&mut self, pos: BlockPos, data: Option<Arc<str>>) -> CausalityResult<()>;

    /// Changes `pos` wants after its neighbor `source` changed
    fn neighbor_changed(&self, _pos: BlockPos, _source: BlockPos) -> Vec<Reaction> {
        Vec::new()
    }

    /// Changes a scheduled block tick at `pos` wants
    fn block_tick(&self, _pos: BlockPos) -> Vec<Reaction> {
        Vec::new()
    }

    fn loot_for(&self, _kind: EntityKind) -> Loot {
        Loot::default()
    }
}

/// Lowest y coordinate entities can exist at
pub const WORLD_FLOOR: f64 = -64.0;

/// Hash-map world with two reactive rules: blocks that need support break
/// when the block below them is not solid, and saplings grow into a log with
/// leaves on top when ticked
#[derive(Debug, Default)]
pub struct MemoryWorld {
    blocks: HashMap<BlockPos, BlockState>,
    entities: HashMap<EntityId, (EntityKind, Vector3)>,
    tiles: HashMap<BlockPos, Arc<str>>,
    next_entity: u64,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flat floor of `state` at height `y` spanning `-radius..=radius`
    pub fn with_floor(y: i32, radius: i32, state: BlockState) -> Self {
        let mut world = Self::new();
        for x in -radius..=radius {
            for z in -radius..=radius {
                world.blocks.insert(BlockPos::new(x, y, z), state);
            }
        }
        world
    }

    /// Place an entity directly, bypassing any phase
    pub fn place_entity(&mut self, kind: EntityKind, location: Vector3) -> EntityId {
        self.next_entity += 1;
        let id = EntityId(self.next_entity);
        self.entities.insert(id, (kind, location));
        id
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Item entities currently in the world
    pub fn items(&self) -> Vec<ItemStack> {
        let mut items: Vec<_> = self
            .entities
            .iter()
            .filter_map(|(id, (kind, _))| match kind {
                EntityKind::Item(stack) => Some((*id, *stack)),
                _ => None,
            })
            .collect();
        items.sort_by_key(|(id, _)| *id);
        items.into_iter().map(|(_, stack)| stack).collect()
    }

    pub fn count_kind(&self, matches: impl Fn(&EntityKind) -> bool) -> usize {
        self.entities.values().filter(|(kind, _)| matches(kind)).count()
    }

    pub fn tile(&self, pos: BlockPos) -> Option<&str> {
        self.tiles.get(&pos).map(|s| &**s)
    }

    /// Non-air blocks
    pub fn block_count(&self) -> usize {
        self.blocks.values().filter(|s| !s.is_air()).count()
    }
}

impl WorldAccess for MemoryWorld {
    fn block(&self, pos: BlockPos) -> BlockState {
        self.blocks.get(&pos).copied().unwrap_or(BlockState::AIR)
    }

    fn set_block_raw(&mut self, pos: BlockPos, state: BlockState) -> BlockState {
        let previous = if state.is_air() {
            self.tiles.remove(&pos);
            self.blocks.remove(&pos)
        } else {
            self.blocks.insert(pos, state)
        };
        previous.unwrap_or(BlockState::AIR)
    }

    fn spawn_entity_raw(&mut self, kind: EntityKind, location: Vector3) -> CausalityResult<EntityId> {
        if location.y < WORLD_FLOOR {
            return Err(CausalityError::capture(
                format!("{:?}", kind),
                format!("spawn location y={} is below the world", location.y),
            ));
        }
        Ok(self.place_entity(kind, location))
    }

    fn remove_entity(&mut self, id: EntityId) -> Option<EntityKind> {
        self.entities.remove(&id).map(|(kind, _)| kind)
    }

    fn entity_kind(&self, id: EntityId) -> Option<EntityKind> {
        self.entities.get(&id).map(|(kind, _)| *kind)
    }

    fn entity_location(&self, id: EntityId) -> Option<Vector3> {
        self.entities.get(&id).map(|(_, location)| *location)
    }

    fn move_entity_raw(&mut self, id: EntityId, to: Vector3) -> CausalityResult<()> {
        if to.y < WORLD_FLOOR {
            return Err(CausalityError::capture(
                format!("{:?}", id),
                format!("destination y={} is below the world", to.y),
            ));
        }
        match self.entities.get_mut(&id) {
            Some((_, location)) => {
                *location = to;
                Ok(())
            }
            None => Err(CausalityError::capture(format!("{:?}", id), "entity does not exist")),
        }
    }

    fn set_tile_raw(&mut self, pos: BlockPos, data: Option<Arc<str>>) -> CausalityResult<()> {
        match data {
            Some(data) => {
                if self.block(pos).is_air() {
                    return Err(CausalityError::capture(
                        format!("tile {:?}", pos),
                        "no block to hold tile data",
                    ));
                }
                self.tiles.insert(pos, data);
            }
            None => {
                self.tiles.remove(&pos);
            }
        }
        Ok(())
    }

    fn neighbor_changed(&self, pos: BlockPos, _source: BlockPos) -> Vec<Reaction> {
        let state = self.block(pos);
        if state.needs_support() && !self.block(pos.down()).is_solid() {
            return vec![Reaction::Break { pos }];
        }
        Vec::new()
    }

    fn block_tick(&self, pos: BlockPos) -> Vec<Reaction> {
        if self.block(pos) != BlockState::SAPLING || !self.block(pos.up()).is_air() {
            return Vec::new();
        }
        vec![
            Reaction::Set {
                pos,
                state: BlockState::LOG,
            },
            Reaction::Set {
                pos: pos.up(),
                state: BlockState::LEAVES,
            },
        ]
    }

    fn loot_for(&self, kind: EntityKind) -> Loot {
        match kind {
            EntityKind::Mob => Loot {
                items: vec![
                    ItemStack::new(ItemType::BONE, 2),
                    ItemStack::new(ItemType::ROTTEN_FLESH, 1),
                ],
                experience: 5,
            },
            EntityKind::Player => Loot {
                items: Vec::new(),
                experience: 10,
            },
            _ => Loot::default(),
        }
    }
}
