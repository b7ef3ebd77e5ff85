use causality_core::{keys, CausalityResult, PacketKind, PlayerId};

use crate::{unwind, PhaseCapabilities, PhaseContext, PhaseEnv, PhaseExtra, PhaseState, UnwindReport};

use super::{is_one_of, ENTITY_DEATH, EXPLOSION, LISTENER, TELEPORT};

/// Handling one inbound player packet
#[derive(Debug)]
pub struct PacketPhase;

impl PhaseState for PacketPhase {
    fn name(&self) -> &'static str {
        "packet"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities::ALL
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(
            self.name(),
            PhaseExtra::Packet {
                kind: PacketKind::default(),
                player: PlayerId::default(),
            },
        )
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        is_one_of(next, &[&TELEPORT, &EXPLOSION, &ENTITY_DEATH, &LISTENER])
    }

    /// Everything the packet caused is attributed to its player; placed
    /// blocks are owned by them
    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let causes = env.causes;
        let frame = causes.push_cause_frame()?;
        if let Some((kind, player)) = context.packet() {
            causes.add_context(&keys::PLAYER, player)?;
            if kind == PacketKind::PLACE {
                causes.add_context(&keys::OWNER, player)?;
            }
        }
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)?;
        frame.close()?;
        Ok(())
    }
}
