//! Capture collections
//!
//! Every collection is allocated on first use; most phases only ever touch one
//! or two of them.

use std::collections::BTreeMap;
use std::sync::Arc;

use causality_core::{BlockPos, BlockState, EntityId, EntityKind, ItemStack, SpawnType, Vector3};

/// A block change already applied to the world, with the state it replaced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockChange {
    pub pos: BlockPos,
    pub original: BlockState,
    pub replacement: BlockState,
}

/// A deferred entity spawn
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntitySpawn {
    pub kind: EntityKind,
    pub location: Vector3,
    pub spawn_type: SpawnType,
}

/// A deferred item drop
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemDrop {
    pub stack: ItemStack,
    pub location: Vector3,
    /// Block whose breaking produced the drop; discarded if that break is reverted
    pub origin: Option<BlockPos>,
}

impl ItemDrop {
    pub fn new(stack: ItemStack, location: Vector3) -> Self {
        ItemDrop {
            stack,
            location,
            origin: None,
        }
    }
}

/// A deferred tile data write; `None` clears the tile
#[derive(Clone, Debug, PartialEq)]
pub struct TileUpdate {
    pub pos: BlockPos,
    pub data: Option<Arc<str>>,
}

/// `target` must re-check itself because `source` changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NeighborNotification {
    pub source: BlockPos,
    pub target: BlockPos,
}

/// Mutations buffered by one phase context
#[derive(Debug, Default)]
pub struct CaptureLists {
    blocks: Option<Vec<BlockChange>>,
    spawns: Option<Vec<EntitySpawn>>,
    drops: Option<Vec<ItemDrop>>,
    entity_drops: Option<BTreeMap<EntityId, Vec<ItemDrop>>>,
    tiles: Option<Vec<TileUpdate>>,
    neighbors: Option<Vec<NeighborNotification>>,
}

impl CaptureLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_block(&mut self, change: BlockChange) {
        self.blocks.get_or_insert_with(Vec::new).push(change);
    }

    pub fn push_spawn(&mut self, spawn: EntitySpawn) {
        self.spawns.get_or_insert_with(Vec::new).push(spawn);
    }

    pub fn push_drop(&mut self, drop: ItemDrop) {
        self.drops.get_or_insert_with(Vec::new).push(drop);
    }

    /// Record a drop attributed to the entity that produced it
    pub fn push_entity_drop(&mut self, entity: EntityId, drop: ItemDrop) {
        self.entity_drops
            .get_or_insert_with(BTreeMap::new)
            .entry(entity)
            .or_default()
            .push(drop);
    }

    pub fn push_tile(&mut self, update: TileUpdate) {
        self.tiles.get_or_insert_with(Vec::new).push(update);
    }

    /// Queue a notification for every neighbor of `source`
    pub fn push_neighbors(&mut self, source: BlockPos) {
        let list = self.neighbors.get_or_insert_with(Vec::new);
        for target in source.neighbors() {
            let note = NeighborNotification { source, target };
            if !list.contains(&note) {
                list.push(note);
            }
        }
    }

    pub fn blocks(&self) -> &[BlockChange] {
        self.blocks.as_deref().unwrap_or(&[])
    }

    pub fn spawns(&self) -> &[EntitySpawn] {
        self.spawns.as_deref().unwrap_or(&[])
    }

    pub fn drops(&self) -> &[ItemDrop] {
        self.drops.as_deref().unwrap_or(&[])
    }

    pub fn entity_drops(&self, entity: EntityId) -> &[ItemDrop] {
        self.entity_drops
            .as_ref()
            .and_then(|map| map.get(&entity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tiles(&self) -> &[TileUpdate] {
        self.tiles.as_deref().unwrap_or(&[])
    }

    pub fn neighbors(&self) -> &[NeighborNotification] {
        self.neighbors.as_deref().unwrap_or(&[])
    }

    pub fn take_blocks(&mut self) -> Vec<BlockChange> {
        self.blocks.take().unwrap_or_default()
    }

    pub fn take_spawns(&mut self) -> Vec<EntitySpawn> {
        self.spawns.take().unwrap_or_default()
    }

    pub fn take_drops(&mut self) -> Vec<ItemDrop> {
        self.drops.take().unwrap_or_default()
    }

    /// Per-entity drops in entity id order
    pub fn take_entity_drops(&mut self) -> Vec<(EntityId, Vec<ItemDrop>)> {
        self.entity_drops
            .take()
            .map(|map| map.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn take_tiles(&mut self) -> Vec<TileUpdate> {
        self.tiles.take().unwrap_or_default()
    }

    pub fn take_neighbors(&mut self) -> Vec<NeighborNotification> {
        self.neighbors.take().unwrap_or_default()
    }

    /// Total buffered items across every collection
    pub fn len(&self) -> usize {
        self.blocks().len()
            + self.spawns().len()
            + self.drops().len()
            + self
                .entity_drops
                .as_ref()
                .map(|map| map.values().map(Vec::len).sum())
                .unwrap_or(0)
            + self.tiles().len()
            + self.neighbors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any collection was ever allocated
    pub fn is_allocated(&self) -> bool {
        self.blocks.is_some()
            || self.spawns.is_some()
            || self.drops.is_some()
            || self.entity_drops.is_some()
            || self.tiles.is_some()
            || self.neighbors.is_some()
    }

    pub fn clear(&mut self) {
        *self = CaptureLists::default();
    }
}
