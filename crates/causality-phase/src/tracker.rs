//! Phase tracker
//!
//! Stack of in-flight phases, current = top. Switching is gated by the
//! current phase's `can_switch_to`; completion unwinds the context exactly
//! once, runs bounded post-dispatch and pops. The stack must be empty at
//! every tick boundary.

use std::fmt;
use std::mem;

use parking_lot::Mutex;

use causality_core::{CausalityError, CausalityResult, PhaseConfig, ThreadGuard};

use crate::{
    phases, unwind, CaptureLists, PhaseCapabilities, PhaseContext, PhaseEnv, PhaseExtra,
    PhaseState, UnwindReport, WorldAccess,
};

/// Identifies one switch; completing requires the id of the current phase
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseId(pub u64);

impl fmt::Debug for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase#{}", self.0)
    }
}

struct PhaseEntry {
    id: PhaseId,
    state: &'static dyn PhaseState,
    /// Taken out while the phase unwinds
    context: Option<PhaseContext>,
    unwinding: bool,
}

#[derive(Default)]
struct TrackerState {
    stack: Vec<PhaseEntry>,
    next_id: u64,
}

impl TrackerState {
    fn names(&self) -> Vec<&'static str> {
        self.stack.iter().map(|e| e.state.name()).collect()
    }

    fn push(&mut self, state: &'static dyn PhaseState, context: PhaseContext) -> PhaseId {
        self.next_id += 1;
        let id = PhaseId(self.next_id);
        self.stack.push(PhaseEntry {
            id,
            state,
            context: Some(context),
            unwinding: false,
        });
        id
    }
}

/// Phase tracker
pub struct PhaseTracker {
    guard: ThreadGuard,
    config: PhaseConfig,
    state: Mutex<TrackerState>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::with_config(PhaseConfig::default())
    }

    pub fn with_config(config: PhaseConfig) -> Self {
        Self::with_guard(config, ThreadGuard::current())
    }

    pub fn with_guard(config: PhaseConfig, guard: ThreadGuard) -> Self {
        PhaseTracker {
            guard,
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.config
    }

    pub fn thread_guard(&self) -> &ThreadGuard {
        &self.guard
    }

    /// Make `state` current with `context`, sealing the context
    ///
    /// An illegal switch is logged and rejected; the stack is left as it was.
    pub fn switch_to(
        &self,
        state: &'static dyn PhaseState,
        mut context: PhaseContext,
    ) -> CausalityResult<PhaseId> {
        self.guard.check("switch_phase")?;
        if context.owner() != state.name() {
            tracing::error!(
                phase = state.name(),
                context = context.owner(),
                "phase context switched to a phase that did not create it"
            );
            return Err(CausalityError::ContextOwnerMismatch {
                phase: state.name(),
                context: context.owner(),
            });
        }

        let mut inner = self.state.lock();
        if let Some(top) = inner.stack.last() {
            if !top.unwinding && !top.state.can_switch_to(state) {
                let from = top.state.name();
                tracing::error!(
                    from,
                    to = state.name(),
                    stack = ?inner.names(),
                    "illegal phase transition; switch rejected"
                );
                return Err(CausalityError::IllegalPhaseTransition {
                    from,
                    to: state.name(),
                });
            }
        }

        context.seal();
        let id = inner.push(state, context);
        if self.config.debug_transitions {
            tracing::debug!(phase = state.name(), ?id, stack = ?inner.names(), "phase switched");
        } else {
            tracing::trace!(phase = state.name(), depth = inner.stack.len(), "phase switched");
        }
        Ok(id)
    }

    /// Unwind and pop the current phase
    ///
    /// The phase's source is pushed as a cause for the duration of unwind and
    /// post-dispatch. Anything still captured afterwards never reached a
    /// listener: eager block changes are reverted, the rest is discarded.
    pub fn complete(&self, id: PhaseId, env: &mut PhaseEnv<'_>) -> CausalityResult<UnwindReport> {
        self.guard.check("complete_phase")?;
        let (state, mut context) = self.begin_unwind(id)?;

        let mut report = UnwindReport::default();
        let result = self.unwind_entry(state, &mut context, env, &mut report);
        self.pop_through(id, env.world);

        discard_leftovers(state.name(), context.captures(), env.world, &mut report);
        if self.config.debug_transitions {
            tracing::debug!(phase = state.name(), ?id, ?report, "phase completed");
        }
        result.map(|()| report)
    }

    /// Switch, run `body`, then complete, even when `body` fails
    pub fn run<R>(
        &self,
        state: &'static dyn PhaseState,
        context: PhaseContext,
        env: &mut PhaseEnv<'_>,
        body: impl FnOnce(&mut PhaseEnv<'_>) -> CausalityResult<R>,
    ) -> CausalityResult<(R, UnwindReport)> {
        let id = self.switch_to(state, context)?;
        let outcome = body(env);
        let report = self.complete(id, env);
        let value = outcome?;
        Ok((value, report?))
    }

    fn begin_unwind(&self, id: PhaseId) -> CausalityResult<(&'static dyn PhaseState, PhaseContext)> {
        let mut inner = self.state.lock();
        let top_id = inner.stack.last().map(|e| e.id);
        if top_id != Some(id) {
            let requested = inner
                .stack
                .iter()
                .find(|e| e.id == id)
                .map_or_else(|| format!("{:?}", id), |e| e.state.name().to_string());
            let current = inner
                .stack
                .last()
                .map_or_else(|| "<none>".to_string(), |e| e.state.name().to_string());
            tracing::error!(%requested, %current, "completion requested for a phase that is not current");
            return Err(CausalityError::PhaseNotCurrent { requested, current });
        }

        match inner.stack.last_mut() {
            Some(top) => match top.context.take() {
                Some(context) => {
                    top.unwinding = true;
                    Ok((top.state, context))
                }
                None => Err(CausalityError::PhaseNotCurrent {
                    requested: top.state.name().to_string(),
                    current: format!("{} (already unwinding)", top.state.name()),
                }),
            },
            None => Err(CausalityError::NoActivePhase),
        }
    }

    fn unwind_entry(
        &self,
        state: &'static dyn PhaseState,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let causes = env.causes;
        let frame = causes.push_cause_frame()?;
        if let Some(source) = context.source() {
            causes.push_cause(source.clone())?;
        }

        state.unwind(context, env, report)?;
        self.post_dispatch(state, context, env, report)?;

        frame.close()?;
        Ok(())
    }

    fn post_dispatch(
        &self,
        state: &'static dyn PhaseState,
        context: &mut PhaseContext,
        env: &mut PhaseEnv<'_>,
        report: &mut UnwindReport,
    ) -> CausalityResult<()> {
        let mut pending = context.captures_mut().take_neighbors();
        if pending.is_empty() {
            return Ok(());
        }

        let post_context = phases::POST
            .create_context()
            .with_extra(PhaseExtra::Unwinding { phase: state.name() })?;
        let post_id = {
            let mut post_context = post_context;
            post_context.seal();
            self.state.lock().push(&phases::POST, post_context)
        };

        let max_rounds = self.config.max_post_dispatch_rounds;
        let mut result = Ok(());
        while !pending.is_empty() {
            if report.post_dispatch_rounds as usize >= max_rounds {
                tracing::error!(
                    phase = state.name(),
                    rounds = report.post_dispatch_rounds,
                    pending = pending.len(),
                    "post-dispatch did not settle; dropping remaining notifications"
                );
                report.discarded += pending.len() as u32;
                break;
            }
            report.post_dispatch_rounds += 1;

            if let Err(err) = state.post_dispatch(context, &pending, env) {
                result = Err(err);
                break;
            }
            let mut batch = self.take_captures(post_id);
            if let Err(err) =
                unwind::dispatch_captures(&mut batch, phases::POST.capabilities(), env, report)
            {
                discard_leftovers(phases::POST.name(), &batch, env.world, report);
                result = Err(err);
                break;
            }
            pending = batch.take_neighbors();
        }

        self.pop_through(post_id, env.world);
        result
    }

    fn take_captures(&self, id: PhaseId) -> CaptureLists {
        let mut inner = self.state.lock();
        inner
            .stack
            .iter_mut()
            .find(|e| e.id == id)
            .and_then(|e| e.context.as_mut())
            .map(|c| mem::take(c.captures_mut()))
            .unwrap_or_default()
    }

    /// Pop `id` and anything left above it
    ///
    /// Every removed entry that still holds captures has its eager block
    /// changes reverted, `id` itself included.
    fn pop_through(&self, id: PhaseId, world: &mut dyn WorldAccess) -> usize {
        let mut removed: Vec<PhaseEntry> = {
            let mut inner = self.state.lock();
            match inner.stack.iter().position(|e| e.id == id) {
                Some(index) => inner.stack.drain(index..).collect(),
                None => return 0,
            }
        };
        let target = removed.remove(0);
        if let Some(context) = &target.context {
            let reverted = unwind::revert_blocks(context.captures().blocks(), world);
            if reverted > 0 {
                tracing::warn!(
                    phase = target.state.name(),
                    reverted,
                    "completing phase still held block changes; reverted"
                );
            }
        }

        for entry in removed.iter().rev() {
            let reverted = entry
                .context
                .as_ref()
                .map_or(0, |c| unwind::revert_blocks(c.captures().blocks(), world));
            tracing::error!(
                phase = entry.state.name(),
                id = ?entry.id,
                reverted,
                "phase leaked above a completing phase; discarded"
            );
        }
        removed.len()
    }

    /// Capabilities of the phase mutations should be captured into, if any
    pub fn capture_policy(&self) -> CausalityResult<Option<PhaseCapabilities>> {
        self.guard.check("capture_policy")?;
        let inner = self.state.lock();
        Ok(inner
            .stack
            .last()
            .filter(|e| e.context.is_some())
            .map(|e| e.state.capabilities()))
    }

    /// Run `f` on the current context's captures; `None` when nothing captures
    pub fn with_captures<R>(&self, f: impl FnOnce(&mut CaptureLists) -> R) -> CausalityResult<Option<R>> {
        self.guard.check("capture")?;
        let mut inner = self.state.lock();
        Ok(inner
            .stack
            .last_mut()
            .and_then(|e| e.context.as_mut())
            .map(|c| f(c.captures_mut())))
    }

    pub fn current_state(&self) -> CausalityResult<Option<&'static dyn PhaseState>> {
        self.guard.check_read("current_state")?;
        Ok(self.state.lock().stack.last().map(|e| e.state))
    }

    pub fn with_current_context<R>(&self, f: impl FnOnce(&PhaseContext) -> R) -> CausalityResult<R> {
        self.guard.check_read("current_context")?;
        let inner = self.state.lock();
        inner
            .stack
            .last()
            .and_then(|e| e.context.as_ref())
            .map(f)
            .ok_or(CausalityError::NoActivePhase)
    }

    pub fn with_current_context_mut<R>(
        &self,
        f: impl FnOnce(&mut PhaseContext) -> R,
    ) -> CausalityResult<R> {
        self.guard.check("current_context_mut")?;
        let mut inner = self.state.lock();
        inner
            .stack
            .last_mut()
            .and_then(|e| e.context.as_mut())
            .map(f)
            .ok_or(CausalityError::NoActivePhase)
    }

    /// Whether no phase is active; the host asserts this at tick boundaries
    pub fn is_empty(&self) -> CausalityResult<bool> {
        self.guard.check_read("is_empty")?;
        Ok(self.state.lock().stack.is_empty())
    }

    // Diagnostics; no thread check, they only read the phase stack.

    pub fn depth(&self) -> usize {
        self.state.lock().stack.len()
    }

    /// Active phase names, bottom first
    pub fn phase_names(&self) -> Vec<&'static str> {
        self.state.lock().names()
    }

    /// Discard every leaked phase, reverting its eager block changes
    ///
    /// Returns `PhaseStackNotEmpty` after recovering when anything leaked.
    pub fn check_tick_boundary(&self, world: &mut dyn WorldAccess) -> CausalityResult<()> {
        self.guard.check("check_tick_boundary")?;
        let (leaked, phases): (Vec<PhaseEntry>, Vec<&'static str>) = {
            let mut inner = self.state.lock();
            if inner.stack.is_empty() {
                return Ok(());
            }
            let phases = inner.names();
            (inner.stack.drain(..).collect(), phases)
        };

        tracing::error!(?phases, "phase stack not empty at tick boundary; discarding leaked phases");
        for entry in leaked.iter().rev() {
            if let Some(context) = &entry.context {
                let reverted = unwind::revert_blocks(context.captures().blocks(), world);
                tracing::warn!(
                    phase = entry.state.name(),
                    reverted,
                    discarded = context.captures().len(),
                    "leaked phase discarded"
                );
            }
        }
        Err(CausalityError::PhaseStackNotEmpty { phases })
    }
}

/// Revert eager block changes left in `captures` and count everything else
/// as discarded
fn discard_leftovers(
    phase: &'static str,
    captures: &CaptureLists,
    world: &mut dyn WorldAccess,
    report: &mut UnwindReport,
) {
    let leftover = captures.len();
    if leftover == 0 {
        return;
    }
    let reverted = unwind::revert_blocks(captures.blocks(), world);
    tracing::warn!(
        phase,
        reverted,
        discarded = leftover - reverted,
        "captures left after unwind; reverted and discarded"
    );
    report.reverted += reverted as u32;
    report.discarded += (leftover - reverted) as u32;
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PhaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseTracker")
            .field("phases", &self.phase_names())
            .field("config", &self.config)
            .finish()
    }
}
