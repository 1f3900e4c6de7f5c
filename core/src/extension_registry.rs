//! Typed per-entity extension data
//!
//! Modules attach their own state to users and channels through slots. A module
//! registers a slot while loading and gets back a [`SlotKey<T>`]; the key is the
//! only way to read or write values of that slot, so every access is typed.
//! Values are owned by the entity's [`Extensible`] container and dropped with it,
//! or when the owning module unloads.

use crate::module::ModuleId;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

/// Opaque identity of a registered slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u32);

/// Typed handle to a slot
pub struct SlotKey<T> {
    id: SlotId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotKey<T> {
    /// The untyped slot identity
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl<T> Clone for SlotKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotKey<T> {}

impl<T> fmt::Debug for SlotKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SlotKey").field(&self.id).finish()
    }
}

/// Slot bookkeeping
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub name: String,
    pub owner: ModuleId,
}

/// Registry of all live slots and their owning modules
#[derive(Debug, Default)]
pub struct SlotRegistry {
    slots: FxHashMap<SlotId, SlotInfo>,
    next_id: u32,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new slot holding values of type `T`
    pub fn register<T: Any + Send>(&mut self, owner: ModuleId, name: &str) -> SlotKey<T> {
        let id = SlotId(self.next_id);
        self.next_id += 1;
        self.slots.insert(
            id,
            SlotInfo {
                name: name.to_string(),
                owner,
            },
        );
        SlotKey {
            id,
            _marker: PhantomData,
        }
    }

    /// Slots registered by `owner`
    pub fn owned_by(&self, owner: ModuleId) -> Vec<SlotId> {
        let mut ids: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, info)| info.owner == owner)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Forget every slot registered by `owner`, returning their ids
    pub fn unregister_owner(&mut self, owner: ModuleId) -> Vec<SlotId> {
        let ids = self.owned_by(owner);
        for id in &ids {
            self.slots.remove(id);
        }
        ids
    }

    pub fn info(&self, id: SlotId) -> Option<&SlotInfo> {
        self.slots.get(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Container of slot values carried by a user or channel
#[derive(Default)]
pub struct Extensible {
    values: FxHashMap<SlotId, Box<dyn Any + Send>>,
}

impl Extensible {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any>(&self, key: &SlotKey<T>) -> Option<&T> {
        self.values.get(&key.id).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &SlotKey<T>) -> Option<&mut T> {
        self.values.get_mut(&key.id).and_then(|v| v.downcast_mut::<T>())
    }

    /// Attach a value, returning the one it replaced
    pub fn set<T: Any + Send>(&mut self, key: &SlotKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.id, Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Detach and return a value
    pub fn take<T: Any>(&mut self, key: &SlotKey<T>) -> Option<T> {
        self.values
            .remove(&key.id)
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn contains<T>(&self, key: &SlotKey<T>) -> bool {
        self.values.contains_key(&key.id)
    }

    /// Drop the value of an untyped slot, if any
    pub fn remove_slot(&mut self, id: SlotId) -> bool {
        self.values.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Extensible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensible")
            .field("slots", &self.values.len())
            .finish()
    }
}
