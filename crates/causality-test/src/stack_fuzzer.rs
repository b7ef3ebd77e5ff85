//! Cause Stack Fuzzer - Randomized operation sequences against the stack
//!
//! Checks:
//! - Closing a frame restores the cause depth and the chain seen at open
//! - Pops never cross the innermost frame's floor
//! - Out-of-order closes force-close exactly the frames above
//! - Stale guards of force-closed frames report `AlreadyForced`
//! - Leaked frames are closed by `ensure_balanced`

use std::sync::Arc;

use causality_core::{
    keys, CausalityError, Cause, CauseChain, CauseStackConfig, EntityId, PlayerId, SpawnType,
};
use causality_stack::{CauseStackFrame, CauseStackManager, FrameClose, LazyCauseFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of operations to run
    pub op_count: usize,
    /// Maximum simultaneously open frames
    pub max_frames: usize,
    /// Probability of opening a frame
    pub frame_prob: f64,
    /// Probability an opened frame is lazy
    pub lazy_prob: f64,
    /// Probability of closing a buried frame instead of the top one
    pub corrupt_prob: f64,
    /// Probability of taking a full snapshot after an operation
    pub observe_prob: f64,
    /// Forget the remaining guards at the end instead of closing them
    pub leak_at_end: bool,
    pub stack: CauseStackConfig,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            op_count: 1000,
            max_frames: 8,
            frame_prob: 0.15,
            lazy_prob: 0.3,
            corrupt_prob: 0.0,
            observe_prob: 0.3,
            leak_at_end: false,
            stack: CauseStackConfig::default(),
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            op_count: 200,
            max_frames: 4,
            ..Self::default()
        }
    }

    /// Heavy fuzzing with a tiny pool so frames churn through allocation
    pub fn heavy() -> Self {
        FuzzerConfig {
            op_count: 20_000,
            max_frames: 32,
            frame_prob: 0.25,
            stack: CauseStackConfig {
                max_pool_size: 4,
                prewarm: 2,
                debug_frames: false,
            },
            ..Self::default()
        }
    }

    /// Misuse: buried closes and leaked guards
    pub fn adversarial() -> Self {
        FuzzerConfig {
            op_count: 5000,
            max_frames: 16,
            frame_prob: 0.2,
            corrupt_prob: 0.1,
            leak_at_end: true,
            ..Self::default()
        }
    }
}

enum Guard<'a> {
    Eager(CauseStackFrame<'a>),
    Lazy(LazyCauseFrame<'a>),
}

impl Guard<'_> {
    fn close(self) -> Result<FrameClose, CausalityError> {
        match self {
            Guard::Eager(frame) => frame.close(),
            Guard::Lazy(frame) => frame.close(),
        }
    }
}

/// An open frame and what the stack looked like just before it opened
struct OpenFrame<'a> {
    guard: Guard<'a>,
    depth: usize,
    chain: Arc<CauseChain>,
}

/// Cause stack fuzzer
pub struct StackFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
}

impl StackFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        StackFuzzer { config, rng }
    }

    fn random_cause(&mut self) -> Cause {
        match self.rng.gen_range(0..4) {
            0 | 1 => Cause::Player(PlayerId(self.rng.gen_range(0..3))),
            2 => Cause::Entity(EntityId(self.rng.gen_range(0..3))),
            _ => Cause::plugin("fuzz"),
        }
    }

    /// Run the fuzzer on a fresh manager bound to the calling thread
    pub fn run(&mut self) -> FuzzResult {
        let manager = CauseStackManager::with_config(self.config.stack.clone());
        let mut result = FuzzResult::new();
        let mut open: Vec<OpenFrame<'_>> = Vec::new();

        for _ in 0..self.config.op_count {
            result.ops_run += 1;
            let roll: f64 = self.rng.gen();
            if roll < self.config.frame_prob && open.len() < self.config.max_frames {
                self.open_frame(&manager, &mut open, &mut result);
            } else if roll < self.config.frame_prob * 2.0 && !open.is_empty() {
                if open.len() > 1 && self.rng.gen::<f64>() < self.config.corrupt_prob {
                    self.close_buried(&manager, &mut open, &mut result);
                } else {
                    self.close_top(&manager, &mut open, &mut result);
                }
            } else {
                self.mutate(&manager, &open, &mut result);
            }

            if let Some(top) = open.last() {
                if manager.depth() < top.depth {
                    result.violation(format!(
                        "depth {} fell below frame floor {}",
                        manager.depth(),
                        top.depth
                    ));
                }
            }
            if self.rng.gen::<f64>() < self.config.observe_prob {
                self.observe(&manager, &mut result);
            }
        }

        self.finish(&manager, open, &mut result);
        result
    }

    fn open_frame<'a>(
        &mut self,
        manager: &'a CauseStackManager,
        open: &mut Vec<OpenFrame<'a>>,
        result: &mut FuzzResult,
    ) {
        let chain = match manager.current_cause() {
            Ok(chain) => chain,
            Err(err) => return result.violation(format!("snapshot failed: {}", err)),
        };
        let depth = manager.depth();
        let guard = if self.rng.gen::<f64>() < self.config.lazy_prob {
            let cause = self.random_cause();
            let spawn_type = SpawnType::Plugin;
            manager
                .push_lazy_frame(move |frame| {
                    frame
                        .push_cause(cause)
                        .add_context(&keys::SPAWN_TYPE, spawn_type);
                })
                .map(Guard::Lazy)
        } else {
            manager.push_cause_frame().map(Guard::Eager)
        };
        match guard {
            Ok(guard) => {
                result.frames_opened += 1;
                open.push(OpenFrame {
                    guard,
                    depth,
                    chain,
                });
            }
            Err(err) => result.violation(format!("frame open failed: {}", err)),
        }
    }

    fn close_top(
        &mut self,
        manager: &CauseStackManager,
        open: &mut Vec<OpenFrame<'_>>,
        result: &mut FuzzResult,
    ) {
        let Some(frame) = open.pop() else {
            return;
        };
        match frame.guard.close() {
            Ok(FrameClose::Clean) => result.clean_closes += 1,
            Ok(other) => result.violation(format!("top frame closed as {:?}", other)),
            Err(err) => result.violation(format!("top frame close failed: {}", err)),
        }
        self.check_restored(manager, frame.depth, &frame.chain, result);
    }

    fn close_buried(
        &mut self,
        manager: &CauseStackManager,
        open: &mut Vec<OpenFrame<'_>>,
        result: &mut FuzzResult,
    ) {
        // buried lazy providers would otherwise be discarded instead of popped
        if let Err(err) = manager.current_cause() {
            return result.violation(format!("snapshot failed: {}", err));
        }
        let index = self.rng.gen_range(0..open.len() - 1);
        let mut stale = open.split_off(index);
        let target = stale.remove(0);
        let expected = stale.len();

        match target.guard.close() {
            Ok(FrameClose::Recovered { forced }) if forced == expected => result.recovered += 1,
            Ok(other) => result.violation(format!(
                "buried close with {} above resolved as {:?}",
                expected, other
            )),
            Err(err) => result.violation(format!("buried close failed: {}", err)),
        }
        self.check_restored(manager, target.depth, &target.chain, result);

        for frame in stale {
            match frame.guard.close() {
                Ok(FrameClose::AlreadyForced) => result.already_forced += 1,
                Ok(other) => result.violation(format!("stale guard closed as {:?}", other)),
                Err(err) => result.violation(format!("stale guard close failed: {}", err)),
            }
        }
        if manager.depth() != target.depth {
            result.violation("stale guard close changed the stack".to_string());
        }
    }

    fn mutate(&mut self, manager: &CauseStackManager, open: &[OpenFrame<'_>], result: &mut FuzzResult) {
        let outcome = match self.rng.gen_range(0..5) {
            0 | 1 => {
                let cause = self.random_cause();
                manager.push_cause(cause)
            }
            2 => match manager.pop_cause() {
                Ok(_) => Ok(()),
                Err(CausalityError::CauseUnderflow { floor, .. }) => {
                    result.underflows += 1;
                    let expected = open.last().map_or(0, |f| f.depth);
                    if floor != expected {
                        result.violation(format!("underflow floor {} != frame floor {}", floor, expected));
                    }
                    Ok(())
                }
                Err(CausalityError::EmptyCauseStack) => {
                    result.underflows += 1;
                    Ok(())
                }
                Err(err) => Err(err),
            },
            3 => {
                let player = PlayerId(self.rng.gen_range(0..3));
                manager.add_context(&keys::OWNER, player).map(|_| ())
            }
            _ => manager.remove_context(&keys::OWNER).map(|_| ()),
        };
        if let Err(err) = outcome {
            result.violation(format!("mutation failed: {}", err));
        }
    }

    fn observe(&mut self, manager: &CauseStackManager, result: &mut FuzzResult) {
        let (chain, top) = match (manager.current_cause(), manager.peek_cause()) {
            (Ok(chain), Ok(top)) => (chain, top),
            _ => return result.violation("observation failed".to_string()),
        };
        result.observations += 1;
        let expected = top.unwrap_or(Cause::Server);
        if chain.root() != &expected {
            result.violation(format!("chain root {:?} != top {:?}", chain.root(), expected));
        }
        if chain.causes().last() != Some(&Cause::Server) && manager.depth() == 0 {
            result.violation("empty stack did not report the server root".to_string());
        }
    }

    fn check_restored(
        &self,
        manager: &CauseStackManager,
        depth: usize,
        chain: &Arc<CauseChain>,
        result: &mut FuzzResult,
    ) {
        if manager.depth() != depth {
            result.violation(format!("depth {} not restored to {}", manager.depth(), depth));
            return;
        }
        // observing would materialize a lazy frame still pending below
        if manager.pending_providers() > 0 {
            return;
        }
        match manager.current_cause() {
            Ok(now) if *now == **chain => {}
            Ok(now) => result.violation(format!("chain {:?} not restored to {:?}", now, chain)),
            Err(err) => result.violation(format!("snapshot failed: {}", err)),
        }
    }

    fn finish(&mut self, manager: &CauseStackManager, mut open: Vec<OpenFrame<'_>>, result: &mut FuzzResult) {
        let Some(bottom_depth) = open.first().map(|f| f.depth) else {
            return;
        };
        if self.config.leak_at_end {
            for frame in open.drain(..) {
                std::mem::forget(frame.guard);
            }
            match manager.ensure_balanced() {
                Ok(closed) => result.leaked_closed += closed,
                Err(err) => result.violation(format!("ensure_balanced failed: {}", err)),
            }
            if manager.frame_depth() != 0 || manager.depth() != bottom_depth {
                result.violation("leaked frames survived ensure_balanced".to_string());
            }
            return;
        }
        while !open.is_empty() {
            self.close_top(manager, &mut open, result);
        }
    }
}

/// Fuzzing result
#[derive(Debug, Default)]
pub struct FuzzResult {
    pub ops_run: u64,
    pub frames_opened: u64,
    pub clean_closes: u64,
    pub recovered: u64,
    pub already_forced: u64,
    pub underflows: u64,
    pub observations: u64,
    pub leaked_closed: usize,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn violation(&mut self, message: String) {
        tracing::error!(%message, "stack fuzzer violation");
        self.violations.push(message);
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fuzzer_light() {
        let mut fuzzer = StackFuzzer::new(FuzzerConfig::light());
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result.violations);
        assert_eq!(result.ops_run, 200);
        assert!(result.frames_opened > 0);
    }

    #[test]
    fn test_fuzzer_heavy_pool_churn() {
        let mut fuzzer = StackFuzzer::new(FuzzerConfig {
            op_count: 3000,
            ..FuzzerConfig::heavy()
        });
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result.violations);
        assert!(result.underflows > 0);
    }

    #[test]
    fn test_fuzzer_adversarial() {
        let mut fuzzer = StackFuzzer::new(FuzzerConfig::adversarial());
        let result = fuzzer.run();
        assert!(result.is_valid(), "{:?}", result.violations);
        assert!(result.recovered > 0);
        assert!(result.already_forced > 0);
    }

    #[test]
    fn test_same_seed_same_run() {
        let a = StackFuzzer::new(FuzzerConfig::light()).run();
        let b = StackFuzzer::new(FuzzerConfig::light()).run();
        assert_eq!(a.frames_opened, b.frames_opened);
        assert_eq!(a.underflows, b.underflows);
    }
}
