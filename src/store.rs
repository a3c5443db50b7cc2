//! The shared table substrate handle.

use std::any::TypeId;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use papaya::HashMap;

use crate::key::ErasedKey;

/// A slot address in the shared store: the owning layer plus a type-erased
/// key. Tagging slots with the layer keeps distinct layers collision-free
/// even when they use the same key type.
#[derive(Clone)]
pub struct StoreKey {
    layer: TypeId,
    key: Arc<dyn ErasedKey>,
}

impl StoreKey {
    /// Create a slot address for a key owned by layer `L`.
    pub fn for_layer<L, K>(key: K) -> Self
    where
        L: 'static,
        K: Hash + Eq + Debug + Send + Sync + 'static,
    {
        Self {
            layer: TypeId::of::<L>(),
            key: Arc::new(key),
        }
    }

    /// Downcast the key to its original type.
    pub fn downcast<K: 'static>(&self) -> Option<&K> {
        self.key.as_any().downcast_ref()
    }
}

impl Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreKey({:?})", self.key)
    }
}

impl Hash for StoreKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layer.hash(state);
        self.key.hash(state);
    }
}

impl PartialEq for StoreKey {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer && self.key.dyn_eq(other.key.as_any())
    }
}

impl Eq for StoreKey {}

/// Process-wide table of serialized values, shared by every layer and every
/// parallel worker during an update.
///
/// This is an injected handle, not a hidden global: layers receive it at
/// construction. Single-key writes are atomic; writes in one update touch
/// disjoint keys, so entries outside an update's trigger set stay
/// bit-for-bit unchanged. There is no removal during a session.
pub struct Store {
    entries: HashMap<StoreKey, Arc<[u8]>, ahash::RandomState>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Get the serialized value at a slot, if present.
    pub fn get(&self, key: &StoreKey) -> Option<Arc<[u8]>> {
        self.entries.pin().get(key).cloned()
    }

    /// Write a slot. Idempotent: re-storing identical bytes is permitted and
    /// observable only as the same content.
    pub fn put(&self, key: StoreKey, bytes: Arc<[u8]>) {
        self.entries.pin().insert(key, bytes);
    }

    /// Returns true if the slot has been written.
    pub fn contains(&self, key: &StoreKey) -> bool {
        self.entries.pin().contains_key(key)
    }

    /// Every (key, serialized value) pair belonging to layer `L` whose keys
    /// are of type `K`.
    pub fn layer_entries<L, K>(&self) -> Vec<(K, Arc<[u8]>)>
    where
        L: 'static,
        K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    {
        let layer = TypeId::of::<L>();
        let pinned = self.entries.pin();
        pinned
            .iter()
            .filter(|(slot, _)| slot.layer == layer)
            .filter_map(|(slot, bytes)| {
                slot.downcast::<K>()
                    .map(|key| (key.clone(), bytes.clone()))
            })
            .collect()
    }

    /// Total number of slots across all layers.
    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    /// Returns true if nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
