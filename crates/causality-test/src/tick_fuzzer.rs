//! Tick Fuzzer - Random scheduled actions against a server
//!
//! Every tick runs a random batch of actions while a listener cancels a
//! random subset of event kinds. After each tick:
//! - No phase, cause or frame survives the tick boundary
//! - No action failed and no recovery was needed
//! - A cancelled block batch leaves the block count unchanged
//! - A cancelled drop batch adds no items

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use causality_core::{
    BlockPos, BlockState, Cause, EntityId, EntityKind, PacketKind, PlayerId, TeleportType,
    Vector3,
};
use causality_phase::{Cancellable, EventKind, MemoryWorld};
use causality_runtime::{ScheduledAction, Server, ServerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct TickFuzzerConfig {
    pub ticks: usize,
    pub actions_per_tick: usize,
    /// Probability each event kind is cancelled for a tick
    pub cancel_prob: f64,
    /// Mobs placed before the first tick
    pub mobs: usize,
    pub seed: u64,
}

impl Default for TickFuzzerConfig {
    fn default() -> Self {
        TickFuzzerConfig {
            ticks: 100,
            actions_per_tick: 8,
            cancel_prob: 0.2,
            mobs: 10,
            seed: 7,
        }
    }
}

impl TickFuzzerConfig {
    pub fn light() -> Self {
        TickFuzzerConfig {
            ticks: 20,
            actions_per_tick: 4,
            ..Self::default()
        }
    }

    /// Blocks only ever change when nobody is watching
    pub fn cancel_everything() -> Self {
        TickFuzzerConfig {
            cancel_prob: 1.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct TickFuzzResult {
    pub ticks: u64,
    pub actions: u64,
    pub events_posted: u64,
    pub events_cancelled: u64,
    pub violations: Vec<String>,
}

impl TickFuzzResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

pub struct TickFuzzer {
    config: TickFuzzerConfig,
    rng: StdRng,
    mobs: Vec<EntityId>,
}

impl TickFuzzer {
    pub fn new(config: TickFuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        TickFuzzer {
            config,
            rng,
            mobs: Vec::new(),
        }
    }

    fn random_pos(&mut self) -> BlockPos {
        BlockPos::new(
            self.rng.gen_range(-4..=4),
            self.rng.gen_range(63..=66),
            self.rng.gen_range(-4..=4),
        )
    }

    fn random_action(&mut self) -> ScheduledAction {
        match self.rng.gen_range(0..6) {
            0 | 1 => {
                let state = match self.rng.gen_range(0..5) {
                    0 => BlockState::DIRT,
                    1 => BlockState::TORCH,
                    2 => BlockState::SAPLING,
                    3 => BlockState::STONE,
                    _ => BlockState::AIR,
                };
                ScheduledAction::Packet {
                    player: PlayerId(self.rng.gen_range(1..4)),
                    kind: if state.is_air() {
                        PacketKind::DIG
                    } else {
                        PacketKind::PLACE
                    },
                    pos: self.random_pos(),
                    state,
                }
            }
            2 => ScheduledAction::BlockTick {
                pos: self.random_pos(),
            },
            3 if !self.mobs.is_empty() => {
                let index = self.rng.gen_range(0..self.mobs.len());
                ScheduledAction::EntityDeath {
                    entity: self.mobs.swap_remove(index),
                    damage: Some("fuzz".to_string()),
                }
            }
            4 if !self.mobs.is_empty() => {
                let entity = self.mobs[self.rng.gen_range(0..self.mobs.len())];
                let y = if self.rng.gen_bool(0.1) { -100.0 } else { 64.0 };
                ScheduledAction::Teleport {
                    entity,
                    destination: Vector3::new(self.rng.gen_range(-4.0..4.0), y, 0.5),
                    agent: Some(Cause::Player(PlayerId(1))),
                    teleport_type: TeleportType::Plugin,
                }
            }
            _ => ScheduledAction::Explosion {
                center: self.random_pos().center(),
                radius: self.rng.gen_range(0.5..2.5),
                breaks_blocks: self.rng.gen_bool(0.7),
                source: Some(Cause::custom("fuzz")),
            },
        }
    }

    pub fn run(&mut self) -> TickFuzzResult {
        let mut result = TickFuzzResult::default();
        let world = MemoryWorld::with_floor(63, 4, BlockState::STONE);
        let mut server = match Server::with_world(ServerConfig::default(), world) {
            Ok(server) => server,
            Err(err) => {
                result.violations.push(format!("server creation failed: {}", err));
                return result;
            }
        };
        for i in 0..self.config.mobs {
            let location = Vector3::new(i as f64 % 8.0 - 4.0, 64.0, 0.5);
            self.mobs.push(server.world_mut().place_entity(EntityKind::Mob, location));
        }

        let cancel: Arc<Mutex<HashSet<EventKind>>> = Arc::default();
        let rules = Arc::clone(&cancel);
        let registered = server
            .bus()
            .register(server.tracker(), "tick-fuzzer", None, move |event, _| {
                if rules.lock().contains(&event.kind()) {
                    event.set_cancelled(true);
                }
                Ok(())
            });
        if let Err(err) = registered {
            result.violations.push(format!("listener registration failed: {}", err));
            return result;
        }

        for tick in 0..self.config.ticks {
            let mut kinds = HashSet::new();
            for kind in [
                EventKind::ChangeBlock,
                EventKind::SpawnEntity,
                EventKind::DropItem,
                EventKind::MoveEntity,
            ] {
                if self.rng.gen_bool(self.config.cancel_prob) {
                    kinds.insert(kind);
                }
            }
            *cancel.lock() = kinds.clone();

            for _ in 0..self.config.actions_per_tick {
                let action = self.random_action();
                server.schedule(action);
                result.actions += 1;
            }

            let blocks = server.world().block_count();
            let items = server.world().items().len();
            if let Err(err) = server.tick() {
                result.violations.push(format!("tick {} failed: {}", tick, err));
                continue;
            }
            result.ticks += 1;
            self.check(&server, tick, &kinds, blocks, items, &mut result);
        }

        result.events_posted = server.stats().events_posted;
        result.events_cancelled = server.stats().events_cancelled;
        result
    }

    fn check(
        &self,
        server: &Server,
        tick: usize,
        cancelled: &HashSet<EventKind>,
        blocks: usize,
        items: usize,
        result: &mut TickFuzzResult,
    ) {
        let mut violation = |message: String| {
            tracing::error!(tick, %message, "tick fuzzer violation");
            result.violations.push(format!("tick {}: {}", tick, message));
        };
        if server.tracker().depth() != 0 {
            violation(format!("phases left: {:?}", server.tracker().phase_names()));
        }
        if server.causes().depth() != 0 || server.causes().frame_depth() != 0 {
            violation(format!(
                "cause stack left at depth {} with {} frames",
                server.causes().depth(),
                server.causes().frame_depth()
            ));
        }
        let stats = server.stats();
        if stats.recoveries != 0 || stats.actions_failed != 0 {
            violation(format!(
                "{} recoveries, {} failed actions",
                stats.recoveries, stats.actions_failed
            ));
        }
        if cancelled.contains(&EventKind::ChangeBlock) && server.world().block_count() != blocks {
            violation(format!(
                "block count moved {} -> {} with block changes cancelled",
                blocks,
                server.world().block_count()
            ));
        }
        if cancelled.contains(&EventKind::DropItem) && server.world().items().len() > items {
            violation("items appeared with drops cancelled".to_string());
        }
    }
}
