//! World value types
//!
//! The engine does not define what a block or an entity *means*; these are the
//! minimal value shapes mutations are expressed in so they can be captured,
//! snapshotted and reverted.

use std::fmt;

/// Integer block coordinate
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        BlockPos { x, y, z }
    }

    #[inline]
    pub fn up(self) -> Self {
        BlockPos::new(self.x, self.y + 1, self.z)
    }

    #[inline]
    pub fn down(self) -> Self {
        BlockPos::new(self.x, self.y - 1, self.z)
    }

    /// The six face-adjacent positions
    pub fn neighbors(self) -> [BlockPos; 6] {
        [
            BlockPos::new(self.x + 1, self.y, self.z),
            BlockPos::new(self.x - 1, self.y, self.z),
            self.up(),
            self.down(),
            BlockPos::new(self.x, self.y, self.z + 1),
            BlockPos::new(self.x, self.y, self.z - 1),
        ]
    }

    /// Center of the block in world space
    pub fn center(self) -> Vector3 {
        Vector3::new(
            self.x as f64 + 0.5,
            self.y as f64 + 0.5,
            self.z as f64 + 0.5,
        )
    }

    pub fn distance_sq(self, other: BlockPos) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        let dz = (self.z - other.z) as i64;
        dx * dx + dy * dy + dz * dz
    }
}

impl fmt::Debug for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block state id
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockState(pub u32);

impl BlockState {
    pub const AIR: BlockState = BlockState(0);
    pub const STONE: BlockState = BlockState(1);
    pub const DIRT: BlockState = BlockState(2);
    /// Attached block: needs a solid block below it
    pub const TORCH: BlockState = BlockState(3);
    /// Grows on block tick
    pub const SAPLING: BlockState = BlockState(4);
    pub const LOG: BlockState = BlockState(5);
    pub const LEAVES: BlockState = BlockState(6);
    /// Bedrock cannot be broken by explosions
    pub const BEDROCK: BlockState = BlockState(7);

    #[inline]
    pub fn is_air(self) -> bool {
        self == BlockState::AIR
    }

    /// Attached blocks break when the block below them is removed
    #[inline]
    pub fn needs_support(self) -> bool {
        self == BlockState::TORCH || self == BlockState::SAPLING
    }

    #[inline]
    pub fn is_solid(self) -> bool {
        !self.is_air() && !self.needs_support()
    }

    /// Item dropped when this block is broken, if any
    pub fn drop_item(self) -> Option<ItemType> {
        if self.is_air() || self == BlockState::BEDROCK || self == BlockState::LEAVES {
            None
        } else {
            Some(ItemType(self.0))
        }
    }
}

impl fmt::Debug for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            BlockState::AIR => "air",
            BlockState::STONE => "stone",
            BlockState::DIRT => "dirt",
            BlockState::TORCH => "torch",
            BlockState::SAPLING => "sapling",
            BlockState::LOG => "log",
            BlockState::LEAVES => "leaves",
            BlockState::BEDROCK => "bedrock",
            BlockState(id) => return write!(f, "Block#{}", id),
        };
        f.write_str(name)
    }
}

/// A block state at a position, captured before or after a change
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BlockSnapshot {
    pub pos: BlockPos,
    pub state: BlockState,
}

impl BlockSnapshot {
    #[inline]
    pub fn new(pos: BlockPos, state: BlockState) -> Self {
        BlockSnapshot { pos, state }
    }
}

/// Item type id
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct ItemType(pub u32);

impl ItemType {
    pub const EXPERIENCE: ItemType = ItemType(1000);
    pub const BONE: ItemType = ItemType(1001);
    pub const ROTTEN_FLESH: ItemType = ItemType(1002);
}

/// A stack of items
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ItemStack {
    pub item: ItemType,
    pub quantity: u16,
}

impl ItemStack {
    #[inline]
    pub fn new(item: ItemType, quantity: u16) -> Self {
        ItemStack { item, quantity }
    }
}

/// World-space position
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3 { x, y, z }
    }

    pub fn block_pos(self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

/// How an entity came into existence
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SpawnType {
    Placement,
    DroppedItem,
    Experience,
    BlockSpawning,
    WorldSpawner,
    Plugin,
}

/// Why an entity moved discontinuously
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TeleportType {
    Entity,
    Portal,
    Command,
    Plugin,
}

/// Broad entity category
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EntityKind {
    Player,
    Mob,
    Item(ItemStack),
    ExperienceOrb(u32),
    Projectile,
}

impl EntityKind {
    pub fn is_item(&self) -> bool {
        matches!(self, EntityKind::Item(_))
    }
}
