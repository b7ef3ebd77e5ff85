use causality_core::{BlockPos, BlockSnapshot, BlockState, CausalityResult, Vector3};

use crate::{unwind, PhaseCapabilities, PhaseContext, PhaseEnv, PhaseExtra, PhaseState, UnwindReport};

use super::{is_one_of, ENTITY_DEATH, EXPLOSION, LISTENER};

/// Scheduled tick of a single block
#[derive(Debug)]
pub struct BlockTickPhase;

impl PhaseState for BlockTickPhase {
    fn name(&self) -> &'static str {
        "block_tick"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities::ALL
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(
            self.name(),
            PhaseExtra::BlockTick {
                pos: BlockPos::default(),
                state: BlockState::AIR,
            },
        )
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        is_one_of(next, &[&EXPLOSION, &LISTENER])
    }

    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let causes = env.causes;
        let frame = causes.push_cause_frame()?;
        if let PhaseExtra::BlockTick { pos, state } = *context.extra() {
            causes.push_cause(BlockSnapshot::new(pos, state))?;
        }
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)?;
        frame.close()?;
        Ok(())
    }
}

/// An explosion breaking blocks and hurting entities around `center`
#[derive(Debug)]
pub struct ExplosionPhase;

impl ExplosionPhase {
    /// Solid, breakable positions within `radius` of `center`, nearest first
    pub fn affected_blocks(
        env: &PhaseEnv<'_>,
        center: Vector3,
        radius: f64,
    ) -> Vec<BlockPos> {
        let origin = center.block_pos();
        let reach = radius.ceil() as i32;
        let radius_sq = (radius * radius) as i64;
        let mut positions = Vec::new();
        for x in -reach..=reach {
            for y in -reach..=reach {
                for z in -reach..=reach {
                    let pos = BlockPos::new(origin.x + x, origin.y + y, origin.z + z);
                    let state = env.world.block(pos);
                    if pos.distance_sq(origin) <= radius_sq
                        && !state.is_air()
                        && state != BlockState::BEDROCK
                    {
                        positions.push(pos);
                    }
                }
            }
        }
        positions.sort_by_key(|pos| pos.distance_sq(origin));
        positions
    }
}

impl PhaseState for ExplosionPhase {
    fn name(&self) -> &'static str {
        "explosion"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities::ALL
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(
            self.name(),
            PhaseExtra::Explosion {
                center: Vector3::default(),
                radius: 0.0,
                breaks_blocks: true,
            },
        )
    }

    fn can_switch_to(&self, next: &dyn PhaseState) -> bool {
        is_one_of(next, &[&ENTITY_DEATH, &LISTENER])
    }

    /// A non-griefing explosion keeps its block changes out of the world
    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let breaks_blocks = match *context.extra() {
            PhaseExtra::Explosion { breaks_blocks, .. } => breaks_blocks,
            _ => true,
        };
        if !breaks_blocks {
            let blocks = context.captures_mut().take_blocks();
            report.reverted += unwind::revert_blocks(&blocks, env.world) as u32;
            let drops = context.captures_mut().take_drops();
            report.discarded += drops.len() as u32;
        }
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{phases, EventBus, MemoryWorld, PhaseTracker, WorldAccess};
    use causality_core::Cause;
    use causality_stack::CauseStackManager;
    use std::sync::Arc;

    #[test]
    fn test_block_tick_grows_sapling_attributed_to_block() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::with_floor(63, 2, BlockState::DIRT);
        let pos = BlockPos::new(0, 64, 0);
        world.set_block_raw(pos, BlockState::SAPLING);

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.register(&tracker, "watch", None, move |event, _| {
            sink.lock().push(event.cause().root().clone());
            Ok(())
        })
        .unwrap();

        let context = phases::BLOCK_TICK
            .create_context()
            .with_extra(PhaseExtra::BlockTick {
                pos,
                state: BlockState::SAPLING,
            })
            .unwrap();
        let mut env = crate::PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let (changed, report) = tracker
            .run(&phases::BLOCK_TICK, context, &mut env, |env| env.tick_block(pos))
            .unwrap();

        assert_eq!(changed, 2);
        assert_eq!(report.applied, 2);
        assert_eq!(world.block(pos), BlockState::LOG);
        assert_eq!(world.block(pos.up()), BlockState::LEAVES);
        assert_eq!(
            seen.lock()[0],
            Cause::Block(BlockSnapshot::new(pos, BlockState::SAPLING))
        );
    }

    #[test]
    fn test_non_griefing_explosion_keeps_blocks() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::with_floor(63, 3, BlockState::STONE);
        let before = world.block_count();
        let center = Vector3::new(0.5, 64.0, 0.5);

        let context = phases::EXPLOSION
            .create_context()
            .with_extra(PhaseExtra::Explosion {
                center,
                radius: 2.0,
                breaks_blocks: false,
            })
            .unwrap();
        let mut env = crate::PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let (broken, report) = tracker
            .run(&phases::EXPLOSION, context, &mut env, |env| {
                let targets = ExplosionPhase::affected_blocks(env, center, 2.0);
                for pos in &targets {
                    env.break_block(*pos)?;
                }
                Ok(targets.len())
            })
            .unwrap();

        assert!(broken > 0);
        assert_eq!(report.reverted as usize, broken);
        assert_eq!(report.events_posted, 0);
        assert_eq!(world.block_count(), before);
        assert!(world.items().is_empty());
    }

    #[test]
    fn test_explosion_skips_bedrock() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::with_floor(63, 1, BlockState::BEDROCK);
        world.set_block_raw(BlockPos::new(0, 64, 0), BlockState::DIRT);
        let env = crate::PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let targets = ExplosionPhase::affected_blocks(&env, Vector3::new(0.5, 64.5, 0.5), 1.5);
        assert_eq!(targets, vec![BlockPos::new(0, 64, 0)]);
    }
}
