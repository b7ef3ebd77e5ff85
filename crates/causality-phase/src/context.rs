//! Phase contexts
//!
//! A context is created by its phase, configured through the `with_*`
//! builders, completed, switched to, unwound once and dropped. Completion
//! seals the configuration; captures and runtime outcomes such as
//! `TeleportData::did_port` stay writable until the context is unwound.

use std::mem;

use causality_core::{
    BlockPos, BlockState, CausalityError, CausalityResult, Cause, EntityId, PacketKind, PlayerId,
    TeleportType, Vector3,
};

use crate::{CaptureLists, EventKind};

/// Teleport-specific fields
#[derive(Clone, Debug, PartialEq)]
pub struct TeleportData {
    pub entity: EntityId,
    /// Resolved from the world at unwind when not configured
    pub origin: Option<Vector3>,
    pub destination: Vector3,
    /// Responsible agent, pushed above the source cause while unwinding
    pub agent: Option<Cause>,
    pub teleport_type: TeleportType,
    pub did_port: bool,
}

impl TeleportData {
    pub fn new(entity: EntityId, destination: Vector3) -> Self {
        TeleportData {
            entity,
            origin: None,
            destination,
            agent: None,
            teleport_type: TeleportType::Entity,
            did_port: false,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<Cause>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_type(mut self, teleport_type: TeleportType) -> Self {
        self.teleport_type = teleport_type;
        self
    }
}

/// Phase-specific typed fields
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseExtra {
    None,
    Packet {
        kind: PacketKind,
        player: PlayerId,
    },
    BlockTick {
        pos: BlockPos,
        state: BlockState,
    },
    EntityDeath {
        entity: EntityId,
        damage: Option<String>,
    },
    Teleport(TeleportData),
    Explosion {
        center: Vector3,
        radius: f64,
        breaks_blocks: bool,
    },
    Listener {
        kind: Option<EventKind>,
    },
    /// Context of the post phase; names the phase being unwound
    Unwinding {
        phase: &'static str,
    },
}

impl PhaseExtra {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseExtra::None => "none",
            PhaseExtra::Packet { .. } => "packet",
            PhaseExtra::BlockTick { .. } => "block_tick",
            PhaseExtra::EntityDeath { .. } => "entity_death",
            PhaseExtra::Teleport(_) => "teleport",
            PhaseExtra::Explosion { .. } => "explosion",
            PhaseExtra::Listener { .. } => "listener",
            PhaseExtra::Unwinding { .. } => "unwinding",
        }
    }
}

/// Per-operation record owned by exactly one phase state
#[derive(Debug)]
pub struct PhaseContext {
    owner: &'static str,
    source: Option<Cause>,
    completed: bool,
    captures: CaptureLists,
    extra: PhaseExtra,
}

impl PhaseContext {
    /// Phases call this from `create_context`
    pub fn new(owner: &'static str, extra: PhaseExtra) -> Self {
        PhaseContext {
            owner,
            source: None,
            completed: false,
            captures: CaptureLists::new(),
            extra,
        }
    }

    fn ensure_open(&self) -> CausalityResult<()> {
        if self.completed {
            return Err(CausalityError::ContextSealed { phase: self.owner });
        }
        Ok(())
    }

    /// Set the source actor; pushed as a cause while the context unwinds
    pub fn with_source(mut self, source: impl Into<Cause>) -> CausalityResult<Self> {
        self.ensure_open()?;
        self.source = Some(source.into());
        Ok(self)
    }

    /// Replace the typed fields; the variant must match the one the phase created
    pub fn with_extra(mut self, extra: PhaseExtra) -> CausalityResult<Self> {
        self.ensure_open()?;
        if mem::discriminant(&self.extra) != mem::discriminant(&extra) {
            return Err(CausalityError::ContextOwnerMismatch {
                phase: self.owner,
                context: extra.label(),
            });
        }
        self.extra = extra;
        Ok(self)
    }

    /// Builder form of `mark_complete`
    pub fn complete(mut self) -> CausalityResult<Self> {
        self.mark_complete()?;
        Ok(self)
    }

    /// Seal the configuration; completing twice is a usage error
    pub fn mark_complete(&mut self) -> CausalityResult<()> {
        if self.completed {
            return Err(CausalityError::ContextAlreadyCompleted { phase: self.owner });
        }
        self.completed = true;
        Ok(())
    }

    /// Seal without complaining about earlier completion; used on switch
    pub(crate) fn seal(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn source(&self) -> Option<&Cause> {
        self.source.as_ref()
    }

    pub fn extra(&self) -> &PhaseExtra {
        &self.extra
    }

    pub fn captures(&self) -> &CaptureLists {
        &self.captures
    }

    pub fn captures_mut(&mut self) -> &mut CaptureLists {
        &mut self.captures
    }

    pub fn teleport(&self) -> Option<&TeleportData> {
        match &self.extra {
            PhaseExtra::Teleport(data) => Some(data),
            _ => None,
        }
    }

    /// Record the teleport outcome
    pub fn set_did_port(&mut self, did_port: bool) {
        if let PhaseExtra::Teleport(data) = &mut self.extra {
            data.did_port = did_port;
        }
    }

    pub fn packet(&self) -> Option<(PacketKind, PlayerId)> {
        match self.extra {
            PhaseExtra::Packet { kind, player } => Some((kind, player)),
            _ => None,
        }
    }

    pub fn dying_entity(&self) -> Option<EntityId> {
        match self.extra {
            PhaseExtra::EntityDeath { entity, .. } => Some(entity),
            _ => None,
        }
    }

    pub fn ticking_block(&self) -> Option<BlockPos> {
        match self.extra {
            PhaseExtra::BlockTick { pos, .. } => Some(pos),
            _ => None,
        }
    }
}
