use crate::{PhaseCapabilities, PhaseContext, PhaseExtra, PhaseState};

/// Running event listeners; mutations apply immediately and no listener may
/// be registered
#[derive(Debug)]
pub struct ListenerPhase;

impl PhaseState for ListenerPhase {
    fn name(&self) -> &'static str {
        "listener"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities {
            listener: true,
            ..PhaseCapabilities::NONE
        }
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(self.name(), PhaseExtra::Listener { kind: None })
    }
}

/// Second-order effects of another phase's unwind
#[derive(Debug)]
pub struct PostPhase;

impl PhaseState for PostPhase {
    fn name(&self) -> &'static str {
        "post"
    }

    fn capabilities(&self) -> PhaseCapabilities {
        PhaseCapabilities {
            unwinding: true,
            ..PhaseCapabilities::ALL
        }
    }

    fn create_context(&self) -> PhaseContext {
        PhaseContext::new(self.name(), PhaseExtra::Unwinding { phase: "" })
    }

    fn can_switch_to(&self, _next: &dyn PhaseState) -> bool {
        true
    }
}
