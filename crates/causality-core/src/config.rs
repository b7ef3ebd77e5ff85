//! Engine configuration
//!
//! Resolved once at startup and passed by value into constructors.

use crate::{CausalityError, CausalityResult};

/// Cause stack configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CauseStackConfig {
    /// Maximum number of recycled frames retained by the pool
    pub max_pool_size: usize,
    /// Record a creation trace on every frame for corruption diagnostics
    pub debug_frames: bool,
    /// Frames allocated into the pool at construction
    pub prewarm: usize,
}

impl Default for CauseStackConfig {
    fn default() -> Self {
        CauseStackConfig {
            max_pool_size: 50,
            debug_frames: false,
            prewarm: 16,
        }
    }
}

impl CauseStackConfig {
    /// Creation traces on; slower, for tracking down frame leaks
    pub fn debug() -> Self {
        CauseStackConfig {
            debug_frames: true,
            ..Self::default()
        }
    }

    /// No pooling: every frame is a fresh allocation
    pub fn unpooled() -> Self {
        CauseStackConfig {
            max_pool_size: 0,
            debug_frames: false,
            prewarm: 0,
        }
    }

    pub fn validate(&self) -> CausalityResult<()> {
        if self.prewarm > self.max_pool_size {
            return Err(CausalityError::InvalidConfig(format!(
                "prewarm ({}) exceeds max_pool_size ({})",
                self.prewarm, self.max_pool_size
            )));
        }
        Ok(())
    }
}

/// Phase tracker configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseConfig {
    /// Upper bound on post-dispatch capture rounds for one unwind
    pub max_post_dispatch_rounds: usize,
    /// Log every phase switch at debug level
    pub debug_transitions: bool,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        PhaseConfig {
            max_post_dispatch_rounds: 64,
            debug_transitions: false,
        }
    }
}

impl PhaseConfig {
    pub fn validate(&self) -> CausalityResult<()> {
        if self.max_post_dispatch_rounds == 0 {
            return Err(CausalityError::InvalidConfig(
                "max_post_dispatch_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(CauseStackConfig::default().validate().is_ok());
        assert!(CauseStackConfig::debug().validate().is_ok());
        assert!(CauseStackConfig::unpooled().validate().is_ok());
        assert!(PhaseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_prewarm_beyond_pool_rejected() {
        let config = CauseStackConfig {
            max_pool_size: 4,
            prewarm: 8,
            debug_frames: false,
        };
        assert!(config.validate().is_err());
    }
}
