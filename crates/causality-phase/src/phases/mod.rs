//! Concrete phases
//!
//! Each phase is a zero-sized state registered as a static; `ALL` lists
//! every phase the engine ships with.

mod entity;
mod listener;
mod packet;
mod tick;

pub use entity::{EntityDeathPhase, TeleportPhase};
pub use listener::{ListenerPhase, PostPhase};
pub use packet::PacketPhase;
pub use tick::{BlockTickPhase, ExplosionPhase};

use crate::PhaseState;

pub static PACKET: PacketPhase = PacketPhase;
pub static BLOCK_TICK: BlockTickPhase = BlockTickPhase;
pub static ENTITY_DEATH: EntityDeathPhase = EntityDeathPhase;
pub static TELEPORT: TeleportPhase = TeleportPhase;
pub static EXPLOSION: ExplosionPhase = ExplosionPhase;
pub static LISTENER: ListenerPhase = ListenerPhase;
pub static POST: PostPhase = PostPhase;

pub static ALL: [&'static dyn PhaseState; 7] = [
    &PACKET,
    &BLOCK_TICK,
    &ENTITY_DEATH,
    &TELEPORT,
    &EXPLOSION,
    &LISTENER,
    &POST,
];

/// Look up a shipped phase by name
pub fn by_name(name: &str) -> Option<&'static dyn PhaseState> {
    ALL.iter().copied().find(|p| p.name() == name)
}

/// Whether `next` is one of `allowed`
pub(crate) fn is_one_of(next: &dyn PhaseState, allowed: &[&'static dyn PhaseState]) -> bool {
    allowed.iter().any(|p| crate::same_phase(*p, next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_phase_names_unique() {
        let names: HashSet<_> = ALL.iter().map(|p| p.name()).collect();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_contexts_owned_by_creating_phase() {
        for phase in ALL.iter() {
            let context = phase.create_context();
            assert_eq!(context.owner(), phase.name());
            assert!(!context.is_completed());
            assert!(!context.captures().is_allocated());
        }
    }

    #[test]
    fn test_switch_rules() {
        assert!(PACKET.can_switch_to(&TELEPORT));
        assert!(PACKET.can_switch_to(&LISTENER));
        assert!(!PACKET.can_switch_to(&PACKET));
        assert!(BLOCK_TICK.can_switch_to(&EXPLOSION));
        assert!(EXPLOSION.can_switch_to(&ENTITY_DEATH));
        assert!(!TELEPORT.can_switch_to(&EXPLOSION));
        assert!(ALL.iter().all(|p| !LISTENER.can_switch_to(*p)));
        assert!(ALL.iter().all(|p| POST.can_switch_to(*p)));
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(by_name("teleport").map(|p| p.name()), Some("teleport"));
        assert!(by_name("missing").is_none());
    }
}
