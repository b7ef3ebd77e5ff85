//! Causality Server - Tick loop implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use causality_core::{
    BlockPos, BlockState, CausalityError, CausalityResult, Cause, CauseStackConfig, EntityId,
    ErrorKind, PacketKind, PhaseConfig, PlayerId, TeleportType, ThreadGuard, Vector3,
};
use causality_phase::phases::{self, ExplosionPhase};
use causality_phase::{
    EventBus, MemoryWorld, PhaseContext, PhaseEnv, PhaseExtra, PhaseState, PhaseTracker,
    TeleportData, UnwindReport, WorldAccess,
};
use causality_stack::CauseStackManager;

/// Server configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub stack: CauseStackConfig,
    pub phase: PhaseConfig,
    /// Maximum actions waiting for the next tick
    pub max_scheduled_actions: usize,
    /// Log a one-line summary of every tick at info level
    pub log_tick_summary: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            stack: CauseStackConfig::default(),
            phase: PhaseConfig::default(),
            max_scheduled_actions: 1000,
            log_tick_summary: false,
        }
    }
}

impl ServerConfig {
    /// Frame creation traces and transition logging on
    pub fn debug() -> Self {
        ServerConfig {
            stack: CauseStackConfig::debug(),
            phase: PhaseConfig {
                debug_transitions: true,
                ..PhaseConfig::default()
            },
            log_tick_summary: true,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CausalityResult<()> {
        self.stack.validate()?;
        self.phase.validate()?;
        if self.max_scheduled_actions == 0 {
            return Err(CausalityError::InvalidConfig(
                "max_scheduled_actions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub actions_scheduled: u64,
    pub actions_dropped: u64,
    pub actions_run: u64,
    pub actions_failed: u64,
    pub events_posted: u64,
    pub events_cancelled: u64,
    pub reverted: u64,
    pub item_failures: u64,
    /// Tick boundaries that found leaked phases or frames
    pub recoveries: u64,
    pub last_tick_duration: Duration,
}

impl RuntimeStats {
    fn record(&mut self, report: &UnwindReport) {
        self.events_posted += u64::from(report.events_posted);
        self.events_cancelled += u64::from(report.events_cancelled);
        self.reverted += u64::from(report.reverted);
        self.item_failures += u64::from(report.failures);
    }
}

/// Work queued for the next tick, each run inside its own phase
#[derive(Clone, Debug, PartialEq)]
pub enum ScheduledAction {
    BlockTick {
        pos: BlockPos,
    },
    /// A player packet touching one block; air breaks it, anything else places it
    Packet {
        player: PlayerId,
        kind: PacketKind,
        pos: BlockPos,
        state: BlockState,
    },
    EntityDeath {
        entity: EntityId,
        damage: Option<String>,
    },
    Teleport {
        entity: EntityId,
        destination: Vector3,
        agent: Option<Cause>,
        teleport_type: TeleportType,
    },
    Explosion {
        center: Vector3,
        radius: f64,
        breaks_blocks: bool,
        source: Option<Cause>,
    },
}

impl ScheduledAction {
    pub fn phase(&self) -> &'static dyn PhaseState {
        match self {
            ScheduledAction::BlockTick { .. } => &phases::BLOCK_TICK,
            ScheduledAction::Packet { .. } => &phases::PACKET,
            ScheduledAction::EntityDeath { .. } => &phases::ENTITY_DEATH,
            ScheduledAction::Teleport { .. } => &phases::TELEPORT,
            ScheduledAction::Explosion { .. } => &phases::EXPLOSION,
        }
    }

    /// Build the configured, completed context for this action
    fn context(&self, world: &dyn WorldAccess) -> CausalityResult<PhaseContext> {
        let context = self.phase().create_context();
        let context = match self {
            ScheduledAction::BlockTick { pos } => context.with_extra(PhaseExtra::BlockTick {
                pos: *pos,
                state: world.block(*pos),
            })?,
            ScheduledAction::Packet {
                player, kind, ..
            } => context
                .with_source(*player)?
                .with_extra(PhaseExtra::Packet {
                    kind: *kind,
                    player: *player,
                })?,
            ScheduledAction::EntityDeath { entity, damage } => context
                .with_source(*entity)?
                .with_extra(PhaseExtra::EntityDeath {
                    entity: *entity,
                    damage: damage.clone(),
                })?,
            ScheduledAction::Teleport {
                entity,
                destination,
                agent,
                teleport_type,
            } => {
                let mut data = TeleportData::new(*entity, *destination).with_type(*teleport_type);
                data.agent = agent.clone();
                context
                    .with_source(*entity)?
                    .with_extra(PhaseExtra::Teleport(data))?
            }
            ScheduledAction::Explosion {
                center,
                radius,
                breaks_blocks,
                source,
            } => {
                let context = match source {
                    Some(source) => context.with_source(source.clone())?,
                    None => context,
                };
                context.with_extra(PhaseExtra::Explosion {
                    center: *center,
                    radius: *radius,
                    breaks_blocks: *breaks_blocks,
                })?
            }
        };
        context.complete()
    }

    /// The captured mutations; everything else happens at unwind
    fn perform(&self, env: &mut PhaseEnv<'_>) -> CausalityResult<()> {
        match self {
            ScheduledAction::BlockTick { pos } => {
                env.tick_block(*pos)?;
            }
            ScheduledAction::Packet { pos, state, .. } => {
                if state.is_air() {
                    env.break_block(*pos)?;
                } else {
                    env.set_block(*pos, *state)?;
                }
            }
            ScheduledAction::EntityDeath { entity, .. } => {
                if !env.kill_entity(*entity)? {
                    tracing::debug!(?entity, "dying entity already gone");
                }
            }
            ScheduledAction::Teleport { .. } => {}
            ScheduledAction::Explosion { center, radius, .. } => {
                for pos in ExplosionPhase::affected_blocks(env, *center, *radius) {
                    env.break_block(pos)?;
                }
            }
        }
        Ok(())
    }
}

/// Causality Server - owns the engine singletons and the world
pub struct Server {
    /// Shared by the stack, tracker and bus
    guard: ThreadGuard,
    causes: CauseStackManager,
    tracker: PhaseTracker,
    bus: EventBus,
    world: MemoryWorld,
    scheduled: VecDeque<ScheduledAction>,
    config: ServerConfig,
    stats: RuntimeStats,
}

impl Server {
    /// Create a server bound to the calling thread with an empty world
    pub fn new() -> Self {
        Self::build(ServerConfig::default(), MemoryWorld::new())
    }

    pub fn with_config(config: ServerConfig) -> CausalityResult<Self> {
        Self::with_world(config, MemoryWorld::new())
    }

    pub fn with_world(config: ServerConfig, world: MemoryWorld) -> CausalityResult<Self> {
        config.validate()?;
        Ok(Self::build(config, world))
    }

    fn build(config: ServerConfig, world: MemoryWorld) -> Self {
        let guard = ThreadGuard::current();
        Server {
            causes: CauseStackManager::with_guard(config.stack.clone(), guard.clone()),
            tracker: PhaseTracker::with_guard(config.phase.clone(), guard.clone()),
            bus: EventBus::with_guard(guard.clone()),
            guard,
            world,
            scheduled: VecDeque::new(),
            config,
            stats: RuntimeStats::default(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn causes(&self) -> &CauseStackManager {
        &self.causes
    }

    pub fn tracker(&self) -> &PhaseTracker {
        &self.tracker
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn world(&self) -> &MemoryWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut MemoryWorld {
        &mut self.world
    }

    pub fn pending_actions(&self) -> usize {
        self.scheduled.len()
    }

    /// Queue an action for the next tick; false when the queue is full
    pub fn schedule(&mut self, action: ScheduledAction) -> bool {
        if self.scheduled.len() >= self.config.max_scheduled_actions {
            self.stats.actions_dropped += 1;
            tracing::warn!(phase = action.phase().name(), "action queue full, dropping action");
            return false;
        }
        self.scheduled.push_back(action);
        self.stats.actions_scheduled += 1;
        true
    }

    /// Run one action inside its phase, outside the tick loop
    pub fn run_action(&mut self, action: &ScheduledAction) -> CausalityResult<UnwindReport> {
        let context = action.context(&self.world)?;
        let mut env = PhaseEnv::new(&self.causes, &self.tracker, &self.bus, &mut self.world);
        let ((), report) = self
            .tracker
            .run(action.phase(), context, &mut env, |env| action.perform(env))?;
        Ok(report)
    }

    /// Execute one tick: every scheduled action, then the boundary check
    pub fn tick(&mut self) -> CausalityResult<()> {
        self.guard.check("tick")?;
        let start = Instant::now();
        self.stats.ticks += 1;

        let actions: Vec<ScheduledAction> = self.scheduled.drain(..).collect();
        let mut events = 0u64;
        for action in &actions {
            match self.run_action(action) {
                Ok(report) => {
                    self.stats.actions_run += 1;
                    self.stats.record(&report);
                    events += u64::from(report.events_posted);
                }
                Err(err) if err.kind() == ErrorKind::OffThread => return Err(err),
                Err(err) => {
                    self.stats.actions_failed += 1;
                    tracing::error!(
                        phase = action.phase().name(),
                        error = %err,
                        recoverable = err.is_recoverable(),
                        "scheduled action failed"
                    );
                }
            }
        }

        self.check_tick_boundary()?;

        self.stats.last_tick_duration = start.elapsed();
        if self.config.log_tick_summary {
            tracing::info!(
                tick = self.stats.ticks,
                actions = actions.len(),
                events,
                elapsed = ?self.stats.last_tick_duration,
                "tick complete"
            );
        }
        Ok(())
    }

    /// Force both stacks back to baseline; true when anything had leaked
    fn check_tick_boundary(&mut self) -> CausalityResult<bool> {
        let mut leaked = false;
        match self.tracker.check_tick_boundary(&mut self.world) {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => leaked = true,
            Err(err) => return Err(err),
        }
        if self.causes.ensure_balanced()? > 0 {
            leaked = true;
        }
        if leaked {
            self.stats.recoveries += 1;
            tracing::warn!(tick = self.stats.ticks, "tick boundary recovered leaked state");
        }
        Ok(leaked)
    }

    /// Let other threads read the cause stack while shutting down
    pub fn begin_shutdown(&self) {
        self.guard.begin_shutdown();
        tracing::info!(pending = self.scheduled.len(), "server shutting down");
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causality_core::{keys, EntityKind, ItemType};
    use causality_phase::{Cancellable, Event, EventKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn flat_server() -> Server {
        let world = MemoryWorld::with_floor(63, 4, BlockState::STONE);
        Server::with_world(ServerConfig::default(), world).unwrap()
    }

    #[test]
    fn test_server_creation() {
        let server = Server::new();
        assert_eq!(server.pending_actions(), 0);
        assert_eq!(server.stats().ticks, 0);
        assert!(server.tracker().is_empty().unwrap());
    }

    #[test]
    fn test_empty_ticks() {
        let mut server = Server::new();
        server.tick().unwrap();
        server.tick().unwrap();
        server.tick().unwrap();
        assert_eq!(server.stats().ticks, 3);
        assert_eq!(server.stats().recoveries, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ServerConfig {
            max_scheduled_actions: 0,
            ..ServerConfig::default()
        };
        assert!(Server::with_config(config).is_err());
        assert!(ServerConfig::debug().validate().is_ok());
    }

    #[test]
    fn test_schedule_limit() {
        let config = ServerConfig {
            max_scheduled_actions: 1,
            ..ServerConfig::default()
        };
        let mut server = Server::with_config(config).unwrap();
        let tick = ScheduledAction::BlockTick {
            pos: BlockPos::new(0, 64, 0),
        };
        assert!(server.schedule(tick.clone()));
        assert!(!server.schedule(tick));
        assert_eq!(server.stats().actions_dropped, 1);
    }

    #[test]
    fn test_packet_dig_attributed_to_player() {
        let mut server = flat_server();
        let players = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&players);
        server
            .bus()
            .register(server.tracker(), "audit", Some(EventKind::ChangeBlock), move |event, _| {
                sink.lock().push(event.cause().context_value(&keys::PLAYER));
                Ok(())
            })
            .unwrap();

        server.schedule(ScheduledAction::Packet {
            player: PlayerId(7),
            kind: PacketKind::DIG,
            pos: BlockPos::new(0, 63, 0),
            state: BlockState::AIR,
        });
        server.tick().unwrap();

        assert_eq!(players.lock().as_slice(), &[Some(PlayerId(7))]);
        assert_eq!(server.world().block(BlockPos::new(0, 63, 0)), BlockState::AIR);
        assert_eq!(server.world().items().len(), 1);
        assert_eq!(server.stats().actions_run, 1);
        assert_eq!(server.causes().depth(), 0);
    }

    #[test]
    fn test_cancelled_place_reverts() {
        let mut server = flat_server();
        server
            .bus()
            .register(server.tracker(), "protect", Some(EventKind::ChangeBlock), |event, _| {
                event.set_cancelled(true);
                Ok(())
            })
            .unwrap();

        let pos = BlockPos::new(1, 64, 1);
        server.schedule(ScheduledAction::Packet {
            player: PlayerId(2),
            kind: PacketKind::PLACE,
            pos,
            state: BlockState::DIRT,
        });
        server.tick().unwrap();

        assert_eq!(server.world().block(pos), BlockState::AIR);
        assert_eq!(server.stats().events_cancelled, 1);
        assert_eq!(server.stats().reverted, 1);
    }

    #[test]
    fn test_death_and_teleport_in_one_tick() {
        let mut server = flat_server();
        let location = Vector3::new(0.5, 64.0, 0.5);
        let zombie = server.world_mut().place_entity(EntityKind::Mob, location);
        let player = server.world_mut().place_entity(EntityKind::Player, location);
        let destination = Vector3::new(2.5, 64.0, 2.5);

        server.schedule(ScheduledAction::EntityDeath {
            entity: zombie,
            damage: Some("player_attack".into()),
        });
        server.schedule(ScheduledAction::Teleport {
            entity: player,
            destination,
            agent: None,
            teleport_type: TeleportType::Command,
        });
        server.tick().unwrap();

        let bones = server
            .world()
            .items()
            .iter()
            .filter(|s| s.item == ItemType::BONE)
            .count();
        assert_eq!(bones, 1);
        assert_eq!(server.world().entity_location(player), Some(destination));
        assert_eq!(server.stats().actions_run, 2);
        assert_eq!(server.stats().actions_failed, 0);
    }

    #[test]
    fn test_explosion_destroys_blocks() {
        let mut server = flat_server();
        let before = server.world().block_count();
        server.schedule(ScheduledAction::Explosion {
            center: Vector3::new(0.5, 64.0, 0.5),
            radius: 1.5,
            breaks_blocks: true,
            source: Some(Cause::custom("tnt")),
        });
        server.tick().unwrap();
        assert!(server.world().block_count() < before);
        assert!(!server.world().items().is_empty());
    }

    #[test]
    fn test_tick_boundary_recovers_leaked_phase() {
        let mut server = flat_server();
        let context = phases::PACKET.create_context();
        server.tracker().switch_to(&phases::PACKET, context).unwrap();
        let frame = server.causes().push_cause_frame().unwrap();
        std::mem::forget(frame);

        server.tick().unwrap();

        assert_eq!(server.stats().recoveries, 1);
        assert!(server.tracker().is_empty().unwrap());
        assert_eq!(server.causes().frame_depth(), 0);

        server.tick().unwrap();
        assert_eq!(server.stats().recoveries, 1);
    }

    #[test]
    fn test_listener_failure_does_not_fail_action() {
        let mut server = flat_server();
        server
            .bus()
            .register(server.tracker(), "broken", None, |_event: &mut Event, _| {
                Err(CausalityError::capture("listener", "boom"))
            })
            .unwrap();
        server.schedule(ScheduledAction::Packet {
            player: PlayerId(1),
            kind: PacketKind::DIG,
            pos: BlockPos::new(0, 63, 0),
            state: BlockState::AIR,
        });
        server.tick().unwrap();
        assert_eq!(server.stats().actions_failed, 0);
        assert_eq!(server.bus().stats().listener_failures, 2);
    }

    #[test]
    fn test_off_thread_tick_rejected() {
        let server = Arc::new(Mutex::new(flat_server()));
        let shared = Arc::clone(&server);
        let err = std::thread::spawn(move || shared.lock().tick().unwrap_err())
            .join()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::OffThread);
    }
}
