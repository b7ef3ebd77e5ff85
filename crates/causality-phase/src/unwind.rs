//! Unwind plumbing
//!
//! Turns captured mutations into cancellable batched events, then applies,
//! reverts or discards them per the listeners' decision. A failing item is
//! logged and counted; the rest of the batch still goes through.

use std::collections::HashSet;

use causality_core::{keys, BlockPos, CausalityResult, EntityId, EntityKind, SpawnType};

use crate::{
    BlockChange, BlockTransaction, CaptureLists, ChangeBlockEvent, DropItemEvent, EntitySpawn,
    Event, ItemDrop, NeighborNotification, PhaseCapabilities, PhaseEnv, SpawnEntityEvent,
    WorldAccess,
};

/// Outcome of unwinding one phase context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub events_posted: u32,
    pub events_cancelled: u32,
    /// Captured items that took effect
    pub applied: u32,
    /// Eagerly applied block changes rolled back
    pub reverted: u32,
    /// Items that failed individually
    pub failures: u32,
    pub post_dispatch_rounds: u32,
    /// Items still captured after unwind, dropped without effect
    pub discarded: u32,
}

impl UnwindReport {
    pub fn merge(&mut self, other: &UnwindReport) {
        self.events_posted += other.events_posted;
        self.events_cancelled += other.events_cancelled;
        self.applied += other.applied;
        self.reverted += other.reverted;
        self.failures += other.failures;
        self.post_dispatch_rounds += other.post_dispatch_rounds;
        self.discarded += other.discarded;
    }
}

/// Default unwind: blocks, tiles, drops, then spawns
///
/// Neighbor notifications for block changes that stuck are queued back into
/// `captures` when the phase collects them; the tracker hands those to
/// post-dispatch.
pub fn dispatch_captures(
    captures: &mut CaptureLists,
    caps: PhaseCapabilities,
    env: &mut PhaseEnv<'_>,
    report: &mut UnwindReport,
) -> CausalityResult<()> {
    let reverted = dispatch_blocks(captures, caps, env, report)?;
    apply_tiles(captures, &reverted, env, report);

    let flat = without_reverted(captures.take_drops(), &reverted, report);
    if !flat.is_empty() {
        dispatch_drops(None, flat, env, report)?;
    }
    for (entity, drops) in captures.take_entity_drops() {
        let drops = without_reverted(drops, &reverted, report);
        if !drops.is_empty() {
            dispatch_drops(Some(entity), drops, env, report)?;
        }
    }

    let spawns = captures.take_spawns();
    for group in group_by_spawn_type(spawns) {
        dispatch_spawns(group, env, report)?;
    }
    Ok(())
}

fn without_reverted(
    drops: Vec<ItemDrop>,
    reverted: &HashSet<BlockPos>,
    report: &mut UnwindReport,
) -> Vec<ItemDrop> {
    let before = drops.len();
    let kept: Vec<ItemDrop> = drops
        .into_iter()
        .filter(|d| d.origin.map_or(true, |pos| !reverted.contains(&pos)))
        .collect();
    report.discarded += (before - kept.len()) as u32;
    kept
}

/// Post one event; a structural failure while posting counts as cancellation
fn post_batch(event: &mut Event, env: &mut PhaseEnv<'_>, report: &mut UnwindReport) -> bool {
    report.events_posted += 1;
    match env.post(event) {
        Ok(true) => {
            report.events_cancelled += 1;
            true
        }
        Ok(false) => false,
        Err(err) => {
            tracing::error!(kind = ?event.kind(), error = %err, "posting batch failed; discarding batch");
            report.failures += 1;
            true
        }
    }
}

fn dispatch_blocks(
    captures: &mut CaptureLists,
    caps: PhaseCapabilities,
    env: &mut PhaseEnv<'_>,
    report: &mut UnwindReport,
) -> CausalityResult<HashSet<BlockPos>> {
    let mut reverted = HashSet::new();
    if captures.blocks().is_empty() {
        return Ok(reverted);
    }
    // resolved before taking, so a failure leaves the changes revertible
    let cause = env.causes.current_cause()?;
    let blocks = captures.take_blocks();

    let transactions = blocks
        .iter()
        .map(|c| BlockTransaction::new(c.pos, c.original, c.replacement))
        .collect();
    let mut event = Event::ChangeBlock(ChangeBlockEvent::new(cause, transactions));
    let cancelled = post_batch(&mut event, env, report);

    // a listener may have swapped the event out; then nothing is trusted
    let verdicts: Vec<bool> = match &event {
        Event::ChangeBlock(e) if !cancelled && e.transactions.len() == blocks.len() => {
            e.transactions.iter().map(BlockTransaction::is_valid).collect()
        }
        _ => vec![false; blocks.len()],
    };

    for (change, keep) in blocks.iter().zip(&verdicts).rev() {
        if *keep {
            continue;
        }
        env.world.set_block_raw(change.pos, change.original);
        reverted.insert(change.pos);
        report.reverted += 1;
    }
    for (change, _) in blocks.iter().zip(&verdicts).filter(|(_, keep)| **keep) {
        report.applied += 1;
        if caps.capture_neighbors {
            captures.push_neighbors(change.pos);
        }
    }
    tracing::debug!(
        changes = blocks.len(),
        reverted = reverted.len(),
        cancelled,
        "block batch dispatched"
    );
    Ok(reverted)
}

fn apply_tiles(
    captures: &mut CaptureLists,
    reverted: &HashSet<BlockPos>,
    env: &mut PhaseEnv<'_>,
    report: &mut UnwindReport,
) {
    for update in captures.take_tiles() {
        if reverted.contains(&update.pos) {
            report.discarded += 1;
            continue;
        }
        match env.world.set_tile_raw(update.pos, update.data) {
            Ok(()) => report.applied += 1,
            Err(err) => {
                tracing::warn!(pos = ?update.pos, error = %err, "captured tile update failed");
                report.failures += 1;
            }
        }
    }
}

fn dispatch_drops(
    entity: Option<EntityId>,
    drops: Vec<ItemDrop>,
    env: &mut PhaseEnv<'_>,
    report: &mut UnwindReport,
) -> CausalityResult<()> {
    let causes = env.causes;
    let frame = causes.push_cause_frame()?;
    if let Some(entity) = entity {
        causes.push_cause(entity)?;
    }
    causes.add_context(&keys::SPAWN_TYPE, SpawnType::DroppedItem)?;

    let mut event = Event::DropItem(DropItemEvent::new(causes.current_cause()?, entity, drops));
    let cancelled = post_batch(&mut event, env, report);
    if !cancelled {
        if let Event::DropItem(event) = event {
            for drop in event.drops {
                match env.world.spawn_entity_raw(EntityKind::Item(drop.stack), drop.location) {
                    Ok(_) => report.applied += 1,
                    Err(err) => {
                        tracing::warn!(?entity, stack = ?drop.stack, error = %err, "captured drop failed");
                        report.failures += 1;
                    }
                }
            }
        }
    }
    frame.close()?;
    Ok(())
}

fn group_by_spawn_type(spawns: Vec<EntitySpawn>) -> Vec<Vec<EntitySpawn>> {
    let mut groups: Vec<Vec<EntitySpawn>> = Vec::new();
    for spawn in spawns {
        match groups.iter_mut().find(|g| g[0].spawn_type == spawn.spawn_type) {
            Some(group) => group.push(spawn),
            None => groups.push(vec![spawn]),
        }
    }
    groups
}

fn dispatch_spawns(
    spawns: Vec<EntitySpawn>,
    env: &mut PhaseEnv<'_>,
    report: &mut UnwindReport,
) -> CausalityResult<()> {
    let Some(spawn_type) = spawns.first().map(|s| s.spawn_type) else {
        return Ok(());
    };
    let causes = env.causes;
    let frame = causes.push_cause_frame()?;
    causes.add_context(&keys::SPAWN_TYPE, spawn_type)?;

    let mut event = Event::SpawnEntity(SpawnEntityEvent::new(causes.current_cause()?, spawns));
    let cancelled = post_batch(&mut event, env, report);
    if !cancelled {
        if let Event::SpawnEntity(event) = event {
            for spawn in event.entities {
                match env.world.spawn_entity_raw(spawn.kind, spawn.location) {
                    Ok(_) => report.applied += 1,
                    Err(err) => {
                        tracing::warn!(kind = ?spawn.kind, error = %err, "captured spawn failed");
                        report.failures += 1;
                    }
                }
            }
        }
    }
    frame.close()?;
    Ok(())
}

/// Default post-dispatch: let each notified block react through `env`
pub fn react_to_neighbors(
    notifications: &[NeighborNotification],
    env: &mut PhaseEnv<'_>,
) -> CausalityResult<()> {
    for note in notifications {
        for reaction in env.world.neighbor_changed(note.target, note.source) {
            if let Err(err) = env.apply_reaction(reaction) {
                tracing::warn!(pos = ?note.target, ?reaction, error = %err, "neighbor reaction failed");
            }
        }
    }
    Ok(())
}

/// Restore the original state of eagerly applied block changes, newest first
pub fn revert_blocks(blocks: &[BlockChange], world: &mut dyn WorldAccess) -> usize {
    for change in blocks.iter().rev() {
        world.set_block_raw(change.pos, change.original);
    }
    blocks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cancellable, EventKind, MemoryWorld, PhaseTracker};
    use causality_core::{BlockState, ItemStack, ItemType, Vector3};
    use causality_stack::CauseStackManager;
    use proptest::prelude::*;

    use crate::EventBus;

    fn change(x: i32, original: BlockState, replacement: BlockState) -> BlockChange {
        BlockChange {
            pos: BlockPos::new(x, 64, 0),
            original,
            replacement,
        }
    }

    #[test]
    fn test_cancelled_block_batch_reverts_everything() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::new();
        bus.register(&tracker, "deny", Some(EventKind::ChangeBlock), |event, _| {
            event.set_cancelled(true);
            Ok(())
        })
        .unwrap();

        let mut captures = CaptureLists::new();
        for x in 0..3 {
            world.set_block_raw(BlockPos::new(x, 64, 0), BlockState::STONE);
            captures.push_block(change(x, BlockState::AIR, BlockState::STONE));
        }

        let mut env = PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let mut report = UnwindReport::default();
        dispatch_captures(&mut captures, PhaseCapabilities::ALL, &mut env, &mut report).unwrap();

        assert_eq!(report.events_cancelled, 1);
        assert_eq!(report.reverted, 3);
        assert!(captures.neighbors().is_empty());
        assert_eq!(world.block_count(), 0);
    }

    #[test]
    fn test_failed_drop_does_not_abort_batch() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::new();

        let mut captures = CaptureLists::new();
        let stack = ItemStack::new(ItemType::BONE, 1);
        captures.push_drop(ItemDrop::new(stack, Vector3::new(0.0, -500.0, 0.0)));
        captures.push_drop(ItemDrop::new(stack, Vector3::new(0.0, 64.0, 0.0)));

        let mut env = PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let mut report = UnwindReport::default();
        dispatch_captures(&mut captures, PhaseCapabilities::ALL, &mut env, &mut report).unwrap();

        assert_eq!(report.failures, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(world.items().len(), 1);
        assert_eq!(causes.depth(), 0);
    }

    #[test]
    fn test_tile_update_dropped_with_reverted_block() {
        let causes = CauseStackManager::new();
        let tracker = PhaseTracker::new();
        let bus = EventBus::new();
        let mut world = MemoryWorld::new();
        bus.register(&tracker, "deny", Some(EventKind::ChangeBlock), |event, _| {
            event.set_cancelled(true);
            Ok(())
        })
        .unwrap();

        let pos = BlockPos::new(0, 64, 0);
        world.set_block_raw(pos, BlockState::STONE);
        let mut captures = CaptureLists::new();
        captures.push_block(change(0, BlockState::AIR, BlockState::STONE));
        captures.push_tile(crate::TileUpdate {
            pos,
            data: Some("sign".into()),
        });

        let mut env = PhaseEnv::new(&causes, &tracker, &bus, &mut world);
        let mut report = UnwindReport::default();
        dispatch_captures(&mut captures, PhaseCapabilities::ALL, &mut env, &mut report).unwrap();

        assert_eq!(report.discarded, 1);
        assert_eq!(world.tile(pos), None);
    }

    proptest! {
        #[test]
        fn prop_invalidated_transactions_are_reverted(keep in prop::collection::vec(any::<bool>(), 1..12)) {
            let causes = CauseStackManager::new();
            let tracker = PhaseTracker::new();
            let bus = EventBus::new();
            let mut world = MemoryWorld::new();
            let verdicts = keep.clone();
            bus.register(&tracker, "filter", Some(EventKind::ChangeBlock), move |event, _| {
                if let Event::ChangeBlock(change) = event {
                    for (tx, keep) in change.transactions.iter_mut().zip(&verdicts) {
                        if !keep {
                            tx.invalidate();
                        }
                    }
                }
                Ok(())
            })
            .unwrap();

            let mut captures = CaptureLists::new();
            for x in 0..keep.len() as i32 {
                world.set_block_raw(BlockPos::new(x, 64, 0), BlockState::LOG);
                captures.push_block(change(x, BlockState::AIR, BlockState::LOG));
            }

            let mut env = PhaseEnv::new(&causes, &tracker, &bus, &mut world);
            let mut report = UnwindReport::default();
            dispatch_captures(&mut captures, PhaseCapabilities::NONE, &mut env, &mut report).unwrap();

            for (x, keep) in keep.iter().enumerate() {
                let expected = if *keep { BlockState::LOG } else { BlockState::AIR };
                prop_assert_eq!(world.block(BlockPos::new(x as i32, 64, 0)), expected);
            }
            prop_assert_eq!(report.applied as usize, keep.iter().filter(|k| **k).count());
        }
    }
}
