//! Identity types
//!
//! Identifiers are plain 64-bit handles. The engine never interprets them;
//! it only compares them when attributing mutations.

use std::fmt;

/// Entity identity - any simulated actor or object in the world
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const ZERO: EntityId = EntityId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({:x})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Player identity - a connected user, distinct from the entity it controls
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PlayerId(pub u64);

impl PlayerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        PlayerId(id)
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player({:x})", self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Inbound packet kind, as assigned by the protocol layer
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PacketKind(pub u16);

impl PacketKind {
    pub const DIG: PacketKind = PacketKind(0x1a);
    pub const PLACE: PacketKind = PacketKind(0x2e);
    pub const USE_ITEM: PacketKind = PacketKind(0x2f);
    pub const MOVE: PacketKind = PacketKind(0x12);

    #[inline]
    pub fn new(id: u16) -> Self {
        PacketKind(id)
    }
}

impl fmt::Debug for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({:#04x})", self.0)
    }
}
