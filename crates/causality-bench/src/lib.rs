//! Shared fixtures for the benchmark suite

use causality_core::{BlockPos, BlockState, CausalityResult, PacketKind, PlayerId};
use causality_phase::{
    phases, EventBus, MemoryWorld, PhaseContext, PhaseEnv, PhaseExtra, PhaseState, PhaseTracker,
    UnwindReport, WorldAccess,
};
use causality_stack::CauseStackManager;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Engine singletons and a world, owned together for benchmarking
pub struct BenchEngine {
    pub causes: CauseStackManager,
    pub tracker: PhaseTracker,
    pub bus: EventBus,
    pub world: MemoryWorld,
}

impl BenchEngine {
    /// Stone floor at y=63 spanning `-radius..=radius`
    pub fn new(radius: i32) -> Self {
        BenchEngine {
            causes: CauseStackManager::new(),
            tracker: PhaseTracker::new(),
            bus: EventBus::new(),
            world: MemoryWorld::with_floor(63, radius, BlockState::STONE),
        }
    }

    /// Place `positions` as one packet phase and restore the floor afterwards
    pub fn place_batch(&mut self, player: PlayerId, positions: &[BlockPos]) -> CausalityResult<UnwindReport> {
        let context = packet_context(player, PacketKind::PLACE)?;
        let mut env = PhaseEnv::new(&self.causes, &self.tracker, &self.bus, &mut self.world);
        let ((), report) = self.tracker.run(&phases::PACKET, context, &mut env, |env| {
            for pos in positions {
                env.set_block(*pos, BlockState::DIRT)?;
            }
            Ok(())
        })?;
        for pos in positions {
            self.world.set_block_raw(*pos, BlockState::AIR);
        }
        Ok(report)
    }
}

pub fn packet_context(player: PlayerId, kind: PacketKind) -> CausalityResult<PhaseContext> {
    phases::PACKET
        .create_context()
        .with_source(player)?
        .with_extra(PhaseExtra::Packet { kind, player })
}

/// Distinct positions one block above the floor, in seeded random order;
/// at most one per floor column
pub fn random_positions(count: usize, radius: i32, seed: u64) -> Vec<BlockPos> {
    let side = (2 * radius + 1) as usize;
    let count = count.min(side * side);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions = Vec::with_capacity(count);
    while positions.len() < count {
        let pos = BlockPos::new(rng.gen_range(-radius..=radius), 64, rng.gen_range(-radius..=radius));
        if !positions.contains(&pos) {
            positions.push(pos);
        }
    }
    positions
}
