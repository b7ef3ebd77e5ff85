//! Cause definitions
//!
//! A cause is an object identified as (partially) responsible for an
//! in-flight mutation. Causes are compared by value so that repeated
//! re-entry by the same actor can be recognised and suppressed.

use std::fmt;
use std::sync::Arc;

use crate::{BlockSnapshot, EntityId, PacketKind, PlayerId};

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Cause {
    /// The server itself; the root cause when nothing else is responsible
    Server,
    /// A named plugin or subsystem acting on its own behalf
    Plugin(Arc<str>),
    Player(PlayerId),
    Entity(EntityId),
    Block(BlockSnapshot),
    /// An inbound packet being handled for a player
    Packet { kind: PacketKind, player: PlayerId },
    Custom(Arc<str>),
}

impl Cause {
    pub fn plugin(name: &str) -> Self {
        Cause::Plugin(Arc::from(name))
    }

    pub fn custom(label: &str) -> Self {
        Cause::Custom(Arc::from(label))
    }

    /// The player ultimately behind this cause, if any
    pub fn player(&self) -> Option<PlayerId> {
        match self {
            Cause::Player(p) => Some(*p),
            Cause::Packet { player, .. } => Some(*player),
            _ => None,
        }
    }

    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Cause::Entity(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self, Cause::Server)
    }
}

impl Default for Cause {
    fn default() -> Self {
        Cause::Server
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Server => f.write_str("Server"),
            Cause::Plugin(name) => write!(f, "Plugin({})", name),
            Cause::Player(p) => write!(f, "{:?}", p),
            Cause::Entity(e) => write!(f, "{:?}", e),
            Cause::Block(b) => write!(f, "Block({:?} @ {:?})", b.state, b.pos),
            Cause::Packet { kind, player } => write!(f, "{:?} from {:?}", kind, player),
            Cause::Custom(label) => write!(f, "Custom({})", label),
        }
    }
}

impl From<PlayerId> for Cause {
    fn from(p: PlayerId) -> Self {
        Cause::Player(p)
    }
}

impl From<EntityId> for Cause {
    fn from(e: EntityId) -> Self {
        Cause::Entity(e)
    }
}

impl From<BlockSnapshot> for Cause {
    fn from(b: BlockSnapshot) -> Self {
        Cause::Block(b)
    }
}
