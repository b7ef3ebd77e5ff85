//! Error types for the causality engine

use thiserror::Error;

/// Core causality errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CausalityError {
    // Stack discipline
    #[error("Cause stack underflow: cannot pop at depth {depth}, innermost frame floor is {floor}")]
    CauseUnderflow { depth: usize, floor: usize },

    #[error("Cause stack is empty")]
    EmptyCauseStack,

    #[error("Phase context for {phase} already completed")]
    ContextAlreadyCompleted { phase: &'static str },

    #[error("Phase context for {phase} is completed and can no longer be configured")]
    ContextSealed { phase: &'static str },

    #[error("Phase context created by {context} cannot be switched to {phase}")]
    ContextOwnerMismatch {
        phase: &'static str,
        context: &'static str,
    },

    #[error("Cannot complete phase {requested}: current phase is {current}")]
    PhaseNotCurrent { requested: String, current: String },

    #[error("No phase is active")]
    NoActivePhase,

    #[error("Listeners cannot be registered while listener phase {phase} is active")]
    ListenerRegistration { phase: &'static str },

    // Frame corruption
    #[error("Cause frame {frame} not found on the frame stack")]
    UnknownFrame { frame: u64, trace: Option<String> },

    // Phase transitions
    #[error("Illegal phase transition: {from} cannot switch to {to}")]
    IllegalPhaseTransition { from: &'static str, to: &'static str },

    #[error("Phase stack not empty at tick boundary: {phases:?}")]
    PhaseStackNotEmpty { phases: Vec<&'static str> },

    // Threading
    #[error("{operation} called off the main thread: current {current}, expected {expected}")]
    OffThread {
        operation: &'static str,
        current: String,
        expected: String,
    },

    // Capture
    #[error("Failed to process captured {item}: {reason}")]
    CaptureFailed { item: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Coarse classification used for recovery decisions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Usage error; always surfaced immediately
    StackDiscipline,
    /// Frame stack mismatch; force-unwound and logged
    FrameCorruption,
    /// Illegal switch or leaked phase; tracker forced back to baseline
    IllegalTransition,
    OffThread,
    /// A single captured item failed; the rest of the batch continues
    CaptureItem,
    Configuration,
}

impl CausalityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CausalityError::CauseUnderflow { .. }
            | CausalityError::EmptyCauseStack
            | CausalityError::ContextAlreadyCompleted { .. }
            | CausalityError::ContextSealed { .. }
            | CausalityError::ContextOwnerMismatch { .. }
            | CausalityError::PhaseNotCurrent { .. }
            | CausalityError::NoActivePhase
            | CausalityError::ListenerRegistration { .. } => ErrorKind::StackDiscipline,
            CausalityError::UnknownFrame { .. } => ErrorKind::FrameCorruption,
            CausalityError::IllegalPhaseTransition { .. }
            | CausalityError::PhaseStackNotEmpty { .. } => ErrorKind::IllegalTransition,
            CausalityError::OffThread { .. } => ErrorKind::OffThread,
            CausalityError::CaptureFailed { .. } => ErrorKind::CaptureItem,
            CausalityError::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }

    /// Structural violations after which the engine repairs its own state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::FrameCorruption | ErrorKind::IllegalTransition | ErrorKind::CaptureItem
        )
    }

    pub fn capture(item: impl Into<String>, reason: impl Into<String>) -> Self {
        CausalityError::CaptureFailed {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for causality operations
pub type CausalityResult<T> = Result<T, CausalityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CausalityError::CauseUnderflow { depth: 1, floor: 1 }.kind(),
            ErrorKind::StackDiscipline
        );
        assert_eq!(
            CausalityError::UnknownFrame { frame: 3, trace: None }.kind(),
            ErrorKind::FrameCorruption
        );
        assert!(CausalityError::IllegalPhaseTransition {
            from: "listener",
            to: "explosion"
        }
        .is_recoverable());
        assert!(!CausalityError::EmptyCauseStack.is_recoverable());
    }

    #[test]
    fn test_messages() {
        let err = CausalityError::capture("item drop", "entity id collision");
        assert_eq!(
            err.to_string(),
            "Failed to process captured item drop: entity id collision"
        );
    }
}
