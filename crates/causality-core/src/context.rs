//! Event context - a keyed bag of auxiliary facts about the in-flight operation
//!
//! Keys are typed: a `ContextKey<T>` can only store and retrieve `T`. Values
//! are held in the `ContextValue` tagged union so that frames can record and
//! restore prior values without knowing their type.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{BlockSnapshot, EntityId, ItemStack, PlayerId, SpawnType, TeleportType, Vector3};

/// Type-erased context value
#[derive(Clone, Debug, PartialEq)]
pub enum ContextValue {
    Player(PlayerId),
    Entity(EntityId),
    Block(BlockSnapshot),
    Item(ItemStack),
    SpawnType(SpawnType),
    TeleportType(TeleportType),
    Location(Vector3),
    Text(Arc<str>),
    Integer(i64),
    Flag(bool),
}

/// Conversion between a concrete value type and `ContextValue`
pub trait ContextType: Sized {
    fn into_value(self) -> ContextValue;
    fn from_value(value: &ContextValue) -> Option<Self>;
}

macro_rules! context_type {
    ($ty:ty, $variant:ident) => {
        impl ContextType for $ty {
            fn into_value(self) -> ContextValue {
                ContextValue::$variant(self)
            }

            fn from_value(value: &ContextValue) -> Option<Self> {
                match value {
                    ContextValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

context_type!(PlayerId, Player);
context_type!(EntityId, Entity);
context_type!(BlockSnapshot, Block);
context_type!(ItemStack, Item);
context_type!(SpawnType, SpawnType);
context_type!(TeleportType, TeleportType);
context_type!(Vector3, Location);
context_type!(Arc<str>, Text);
context_type!(i64, Integer);
context_type!(bool, Flag);

impl ContextType for String {
    fn into_value(self) -> ContextValue {
        ContextValue::Text(Arc::from(self))
    }

    fn from_value(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Text(s) => Some(s.to_string()),
            _ => None,
        }
    }
}

/// Typed key into an `EventContext`
pub struct ContextKey<T> {
    id: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(id: &'static str) -> Self {
        ContextKey {
            id,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.id)
    }
}

/// Standard context keys
pub mod keys {
    use std::sync::Arc;

    use super::ContextKey;
    use crate::{BlockSnapshot, ItemStack, PlayerId, SpawnType, TeleportType};

    /// Player owning the block or entity being mutated
    pub const OWNER: ContextKey<PlayerId> = ContextKey::new("owner");
    /// Player who last notified the block being mutated
    pub const NOTIFIER: ContextKey<PlayerId> = ContextKey::new("notifier");
    pub const PLAYER: ContextKey<PlayerId> = ContextKey::new("player");
    pub const SPAWN_TYPE: ContextKey<SpawnType> = ContextKey::new("spawn_type");
    pub const TELEPORT_TYPE: ContextKey<TeleportType> = ContextKey::new("teleport_type");
    pub const BLOCK_HIT: ContextKey<BlockSnapshot> = ContextKey::new("block_hit");
    pub const USED_ITEM: ContextKey<ItemStack> = ContextKey::new("used_item");
    pub const PLUGIN: ContextKey<Arc<str>> = ContextKey::new("plugin");
    pub const DAMAGE_TYPE: ContextKey<String> = ContextKey::new("damage_type");
}

/// Flat map of context facts
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventContext {
    entries: HashMap<&'static str, ContextValue>,
}

impl EventContext {
    pub fn new() -> Self {
        EventContext::default()
    }

    /// Get a typed value
    pub fn get<T: ContextType>(&self, key: &ContextKey<T>) -> Option<T> {
        self.entries.get(key.id()).and_then(T::from_value)
    }

    pub fn contains<T>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(key.id())
    }

    /// Insert a typed value, returning the raw value it replaced
    pub fn insert<T: ContextType>(&mut self, key: &ContextKey<T>, value: T) -> Option<ContextValue> {
        self.entries.insert(key.id(), value.into_value())
    }

    pub fn remove<T>(&mut self, key: &ContextKey<T>) -> Option<ContextValue> {
        self.entries.remove(key.id())
    }

    pub fn get_raw(&self, id: &str) -> Option<&ContextValue> {
        self.entries.get(id)
    }

    pub fn insert_raw(&mut self, id: &'static str, value: ContextValue) -> Option<ContextValue> {
        self.entries.insert(id, value)
    }

    pub fn remove_raw(&mut self, id: &str) -> Option<ContextValue> {
        self.entries.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ContextValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_roundtrip() {
        let mut ctx = EventContext::new();
        ctx.insert(&keys::OWNER, PlayerId(4));
        ctx.insert(&keys::DAMAGE_TYPE, "fall".to_string());

        assert_eq!(ctx.get(&keys::OWNER), Some(PlayerId(4)));
        assert_eq!(ctx.get(&keys::DAMAGE_TYPE).as_deref(), Some("fall"));
        assert_eq!(ctx.get(&keys::NOTIFIER), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_override_returns_previous() {
        let mut ctx = EventContext::new();
        assert_eq!(ctx.insert(&keys::PLAYER, PlayerId(1)), None);
        assert_eq!(
            ctx.insert(&keys::PLAYER, PlayerId(2)),
            Some(ContextValue::Player(PlayerId(1)))
        );
        assert_eq!(ctx.remove(&keys::PLAYER), Some(ContextValue::Player(PlayerId(2))));
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_mismatched_raw_value_reads_as_none() {
        let mut ctx = EventContext::new();
        ctx.insert_raw("owner", ContextValue::Flag(true));
        assert_eq!(ctx.get(&keys::OWNER), None);
        assert!(ctx.contains(&keys::OWNER));
    }
}
