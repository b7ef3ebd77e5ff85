//! Cause chain - the immutable combined snapshot handed to observers

use crate::{Cause, ContextKey, ContextType, EntityId, EventContext, PlayerId};

/// Snapshot of the cause stack (nearest-pushed first) and the event context
#[derive(Clone, Debug, PartialEq)]
pub struct CauseChain {
    causes: Vec<Cause>,
    context: EventContext,
}

impl CauseChain {
    /// Build a chain; an empty cause list is replaced by the server root
    pub fn new(causes: Vec<Cause>, context: EventContext) -> Self {
        let causes = if causes.is_empty() {
            vec![Cause::Server]
        } else {
            causes
        };
        CauseChain { causes, context }
    }

    /// Chain containing only the root cause
    pub fn root_only() -> Self {
        CauseChain::new(Vec::new(), EventContext::new())
    }

    /// The nearest cause
    pub fn root(&self) -> &Cause {
        // never empty, see `new`
        &self.causes[0]
    }

    pub fn causes(&self) -> &[Cause] {
        &self.causes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cause> {
        self.causes.iter()
    }

    pub fn len(&self) -> usize {
        self.causes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, cause: &Cause) -> bool {
        self.causes.contains(cause)
    }

    /// Nearest player responsible, looking through packets
    pub fn first_player(&self) -> Option<PlayerId> {
        self.causes.iter().find_map(Cause::player)
    }

    pub fn first_entity(&self) -> Option<EntityId> {
        self.causes.iter().find_map(Cause::entity)
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    pub fn context_value<T: ContextType>(&self, key: &ContextKey<T>) -> Option<T> {
        self.context.get(key)
    }
}

impl Default for CauseChain {
    fn default() -> Self {
        Self::root_only()
    }
}
