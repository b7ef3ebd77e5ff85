use causality_core::{keys, CausalityResult, EntityId, Vector3};

use crate::{
    unwind, Event, MoveEntityEvent, PhaseCapabilities, PhaseContext, PhaseEnv, PhaseExtra,
    PhaseState, TeleportData, UnwindReport,
};

use super::{is_one_of, LISTENER};

/// An entity dying; its loot is tracked per entity
#[derive(Debug)]
pub struct EntityDeathPhase;

impl PhaseState for EntityDeathPhase {
    fn name(&self) -> &'static str {
        "entity_death"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities {
            per_entity_drops: true,
            ..PhaseCapabilities::ALL
        }
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(
            self.name(),
            PhaseExtra::EntityDeath {
                entity: EntityId::ZERO,
                damage: None,
            },
        )
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        is_one_of(next, &[&LISTENER])
    }

    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let causes = env.causes;
        let frame = causes.push_cause_frame()?;
        if let PhaseExtra::EntityDeath { entity, damage } = context.extra() {
            causes.push_cause(*entity)?;
            if let Some(damage) = damage {
                causes.add_context(&keys::DAMAGE_TYPE, damage.clone())?;
            }
        }
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)?;
        frame.close()?;
        Ok(())
    }
}

/// Moving an entity to a new location
///
/// The move itself is decided at unwind: a cancellable `MoveEntityEvent` is
/// posted and the outcome lands in `TeleportData::did_port`.
#[derive(Debug)]
pub struct TeleportPhase;

impl TeleportPhase {
    fn move_entity(
        data: &TeleportData,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<bool> {
        let Some(from) = data.origin.or_else(|| env.world.entity_location(data.entity)) else {
            tracing::debug!(entity = ?data.entity, "teleported entity no longer exists");
            return Ok(false);
        };

        let cause = env.causes.current_cause()?;
        let mut event = Event::MoveEntity(MoveEntityEvent::new(
            cause,
            data.entity,
            from,
            data.destination,
        ));
        report.events_posted += 1;
        let cancelled = match env.post(&mut event) {
            Ok(cancelled) => cancelled,
            Err(err) => {
                tracing::error!(entity = ?data.entity, error = %err, "posting teleport failed");
                report.failures += 1;
                return Ok(false);
            }
        };
        if cancelled {
            report.events_cancelled += 1;
            return Ok(false);
        }

        let to = match &event {
            Event::MoveEntity(e) => e.to,
            _ => data.destination,
        };
        match env.world.move_entity_raw(data.entity, to) {
            Ok(()) => {
                report.applied += 1;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(entity = ?data.entity, ?to, error = %err, "teleport failed");
                report.failures += 1;
                Ok(false)
            }
        }
    }
}

impl PhaseState for TeleportPhase {
    fn name(&self) -> &'static str {
        "teleport"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities::ALL
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(
            self.name(),
            PhaseExtra::Teleport(TeleportData::new(EntityId::ZERO, Vector3::default())),
        )
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        is_one_of(next, &[&LISTENER])
    }

    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let causes = env.causes;
        let frame = causes.push_cause_frame()?;
        if let Some(data) = context.teleport().cloned() {
            if let Some(agent) = data.agent.clone() {
                causes.push_cause(agent)?;
            }
            causes.add_context(&keys::TELEPORT_TYPE, data.teleport_type)?;
            let moved = Self::move_entity(&data, env, report)?;
            context.set_did_port(moved);
        }
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)?;
        frame.close()?;
        Ok(())
    }
}
