//! Phase states
//!
//! A phase state is a stateless category of operation. Generic capture code
//! asks its `PhaseCapabilities` what to do with a mutation, so call sites
//! never match on concrete phases.

use std::fmt;

use causality_core::CausalityResult;

use crate::{unwind, NeighborNotification, PhaseContext, PhaseEnv, UnwindReport};

/// Capture policy of a phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseCapabilities {
    /// Block changes are applied eagerly and batched into one event
    pub capture_blocks: bool,
    /// Entity spawns are deferred until unwind
    pub capture_spawns: bool,
    /// Item drops are deferred until unwind
    pub capture_drops: bool,
    /// Drops are grouped per producing entity instead of one flat batch
    pub per_entity_drops: bool,
    /// Tile data writes are deferred until unwind
    pub capture_tiles: bool,
    /// Neighbor notifications are collected for post-dispatch
    pub capture_neighbors: bool,
    /// Listener phase; no new listeners may be registered inside it
    pub listener: bool,
    /// Post phase running second-order effects of another phase's unwind
    pub unwinding: bool,
}

impl PhaseCapabilities {
    /// Observe only: every mutation is applied immediately
    pub const NONE: PhaseCapabilities = PhaseCapabilities {
        capture_blocks: false,
        capture_spawns: false,
        capture_drops: false,
        per_entity_drops: false,
        capture_tiles: false,
        capture_neighbors: false,
        listener: false,
        unwinding: false,
    };

    /// Bulk capture of every kind of mutation
    pub const ALL: PhaseCapabilities = PhaseCapabilities {
        capture_blocks: true,
        capture_spawns: true,
        capture_drops: true,
        per_entity_drops: false,
        capture_tiles: true,
        capture_neighbors: true,
        listener: false,
        unwinding: false,
    };

    pub fn captures_anything(&self) -> bool {
        self.capture_blocks
            || self.capture_spawns
            || self.capture_drops
            || self.capture_tiles
            || self.capture_neighbors
    }
}

/// A category of in-flight operation
pub trait PhaseState: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> PhaseCapabilities;

    /// Fresh context carrying this phase's default typed fields
    fn create_context(&self) -> PhaseContext;

    /// Whether `next` may be pushed while this phase is current
    fn can_switch_to(&self, _next: &dyn PhaseState) -> bool {
        false
    }

    /// Turn everything captured during the phase into events and apply or
    /// revert it
    fn unwind(
        &self,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        unwind::dispatch_captures(context.captures_mut(), self.capabilities(), env, report)
    }

    /// Second-order effects of one post-dispatch round
    ///
    /// Anything this produces through `env` is captured by the post phase
    /// and dispatched before the next round.
    fn post_dispatch(
        &self,
        _unwinding: &PhaseContext,
        notifications: &[NeighborNotification],
        env: &mut PhaseEnv<'_>,
    ) -> CausalityResult<()> {
        unwind::react_to_neighbors(notifications, env)
    }
}

impl fmt::Debug for dyn PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase({})", self.name())
    }
}

/// Two phase references name the same phase
pub fn same_phase(a: &dyn PhaseState, b: &dyn PhaseState) -> bool {
    a.name() == b.name()
}
