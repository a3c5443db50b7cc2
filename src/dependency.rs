//! Dependency tokens and the process-wide dependency registry.

use std::any::TypeId;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use papaya::{HashMap, Operation};
use parking_lot::RwLock;
use slab::Slab;

use crate::key::ErasedKey;

/// An opaque dependency token: a small index into the registry arena.
///
/// Tokens mark "a consumer that read a particular trigger's value". They are
/// allocated once per distinct [`DependencyStamp`] and live for the whole
/// checking session. Two tokens are equal iff they are the same integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dependency(u32);

impl Dependency {
    /// The arena index backing this token.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a dependency token denotes: the layer that owns the trigger and the
/// trigger value itself, type-erased.
///
/// Stamps are the unit of interning in the [`DependencyRegistry`]: the same
/// (layer, trigger) pair always resolves to the same token.
#[derive(Clone)]
pub struct DependencyStamp {
    layer: TypeId,
    layer_name: &'static str,
    trigger: Arc<dyn ErasedKey>,
}

impl DependencyStamp {
    /// Create a stamp for a trigger owned by layer `L`.
    pub fn new<L, T>(layer_name: &'static str, trigger: T) -> Self
    where
        L: 'static,
        T: Hash + Eq + Debug + Send + Sync + 'static,
    {
        Self {
            layer: TypeId::of::<L>(),
            layer_name,
            trigger: Arc::new(trigger),
        }
    }

    /// Returns true if this stamp was minted by layer `L`.
    pub fn is_layer<L: 'static>(&self) -> bool {
        self.layer == TypeId::of::<L>()
    }

    /// The diagnostic name of the owning layer.
    pub fn layer_name(&self) -> &'static str {
        self.layer_name
    }

    /// Downcast the trigger payload to its original type.
    ///
    /// Returns `None` if the trigger is not of type `T`.
    pub fn trigger<T: 'static>(&self) -> Option<&T> {
        self.trigger.as_any().downcast_ref()
    }

    /// Get the debug representation of this stamp.
    pub fn debug_repr(&self) -> String {
        format!("{}({:?})", self.layer_name, self.trigger)
    }
}

impl Debug for DependencyStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({:?})", self.layer_name, self.trigger)
    }
}

impl Hash for DependencyStamp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.layer.hash(state);
        self.trigger.hash(state);
    }
}

impl PartialEq for DependencyStamp {
    fn eq(&self, other: &Self) -> bool {
        self.layer == other.layer && self.trigger.dyn_eq(other.trigger.as_any())
    }
}

impl Eq for DependencyStamp {}

/// A set of dependency tokens.
///
/// Clone is cheap as the inner set is wrapped by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct DependencySet(Arc<ahash::HashSet<Dependency>>);

impl DependencySet {
    /// Returns true if the set contains the token.
    pub fn contains(&self, dep: Dependency) -> bool {
        self.0.contains(&dep)
    }

    /// Returns true if there are no tokens.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the tokens.
    pub fn iter(&self) -> impl Iterator<Item = Dependency> + '_ {
        self.0.iter().copied()
    }

    /// Returns a new set with the token added.
    #[must_use]
    pub fn inserted(&self, dep: Dependency) -> Self {
        let mut set = ahash::HashSet::clone(&self.0);
        set.insert(dep);
        DependencySet(Arc::new(set))
    }

    /// Returns the union of this set and another.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        let mut set = ahash::HashSet::clone(&self.0);
        set.extend(other.iter());
        DependencySet(Arc::new(set))
    }

    /// Returns true if this set contains every token of `other`.
    pub fn is_superset(&self, other: &Self) -> bool {
        other.iter().all(|dep| self.contains(dep))
    }
}

impl FromIterator<Dependency> for DependencySet {
    fn from_iter<T: IntoIterator<Item = Dependency>>(iter: T) -> Self {
        DependencySet(Arc::new(iter.into_iter().collect()))
    }
}

impl PartialEq for DependencySet {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for DependencySet {}

/// Process-wide registry of dependency tokens and recorded read edges.
///
/// The registry is append-only within a checking session: tokens are interned
/// once and never removed, and registering a new token never invalidates
/// existing ones. All operations are safe to call concurrently from parallel
/// workers.
pub struct DependencyRegistry {
    /// Arena of stamps, indexed by token.
    stamps: RwLock<Slab<DependencyStamp>>,
    /// Interning map from stamp to its token.
    interned: HashMap<DependencyStamp, Dependency, ahash::RandomState>,
    /// Recorded read edges: source token -> consumers that read through it.
    readers: HashMap<Dependency, DependencySet, ahash::RandomState>,
}

impl Default for DependencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            stamps: RwLock::new(Slab::new()),
            interned: HashMap::with_hasher(ahash::RandomState::new()),
            readers: HashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Intern a stamp and return its token.
    ///
    /// The same stamp always yields the same token, across threads and across
    /// update cycles.
    pub fn acquire(&self, stamp: DependencyStamp) -> Dependency {
        let pinned = self.interned.pin();
        if let Some(dep) = pinned.get(&stamp) {
            return *dep;
        }
        // Token creation is serialized by the arena lock; the re-check under
        // the lock keeps concurrent acquires of the same stamp agreeing.
        let mut stamps = self.stamps.write();
        if let Some(dep) = pinned.get(&stamp) {
            return *dep;
        }
        let index = stamps.insert(stamp.clone());
        let dep = Dependency(u32::try_from(index).expect("registry arena overflow"));
        pinned.insert(stamp, dep);
        tracing::trace!(token = dep.index(), "registered dependency token");
        dep
    }

    /// Resolve a token back to its stamp.
    pub fn describe(&self, dep: Dependency) -> Option<DependencyStamp> {
        self.stamps.read().get(dep.index()).cloned()
    }

    /// Record that `reader` read the value behind `source`.
    ///
    /// Append-only; recording the same edge twice is a no-op.
    pub fn record_read(&self, source: Dependency, reader: Dependency) {
        let pinned = self.readers.pin();
        pinned.compute(source, |entry| match entry {
            Some((_, set)) if set.contains(reader) => Operation::Abort(()),
            Some((_, set)) => Operation::Insert(set.inserted(reader)),
            None => Operation::Insert(DependencySet::default().inserted(reader)),
        });
    }

    /// Look up "what reads this": every consumer recorded against `source`.
    pub fn readers(&self, source: Dependency) -> DependencySet {
        self.readers
            .pin()
            .get(&source)
            .cloned()
            .unwrap_or_default()
    }

    /// The number of tokens registered so far.
    pub fn len(&self) -> usize {
        self.stamps.read().len()
    }

    /// Returns true if no tokens have been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[test]
fn test_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    assert_send::<DependencyRegistry>();
    assert_sync::<DependencyRegistry>();
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LayerA;
    struct LayerB;

    #[test]
    fn acquire_interns_by_stamp() {
        let registry = DependencyRegistry::new();
        let a1 = registry.acquire(DependencyStamp::new::<LayerA, _>("a", "mod.x".to_string()));
        let a2 = registry.acquire(DependencyStamp::new::<LayerA, _>("a", "mod.x".to_string()));
        let a3 = registry.acquire(DependencyStamp::new::<LayerA, _>("a", "mod.y".to_string()));
        let b1 = registry.acquire(DependencyStamp::new::<LayerB, _>("b", "mod.x".to_string()));

        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
        // Same trigger under a different layer is a different token.
        assert_ne!(a1, b1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn describe_round_trips() {
        let registry = DependencyRegistry::new();
        let stamp = DependencyStamp::new::<LayerA, _>("a", "mod.x".to_string());
        let dep = registry.acquire(stamp.clone());

        let described = registry.describe(dep).unwrap();
        assert_eq!(described, stamp);
        assert!(described.is_layer::<LayerA>());
        assert_eq!(described.trigger::<String>().unwrap(), "mod.x");
        assert_eq!(described.trigger::<u32>(), None);
    }

    #[test]
    fn record_read_is_append_only_and_deduplicated() {
        let registry = DependencyRegistry::new();
        let source = registry.acquire(DependencyStamp::new::<LayerA, _>("a", "mod".to_string()));
        let r1 = registry.acquire(DependencyStamp::new::<LayerB, _>("b", "mod.x".to_string()));
        let r2 = registry.acquire(DependencyStamp::new::<LayerB, _>("b", "mod.y".to_string()));

        registry.record_read(source, r1);
        registry.record_read(source, r1);
        registry.record_read(source, r2);

        let readers = registry.readers(source);
        assert_eq!(readers.len(), 2);
        assert!(readers.contains(r1));
        assert!(readers.contains(r2));
        assert!(registry.readers(r1).is_empty());
    }

    #[test]
    fn dependency_set_union_is_superset_of_both() {
        let registry = DependencyRegistry::new();
        let deps: Vec<_> = (0..4)
            .map(|i| registry.acquire(DependencyStamp::new::<LayerA, _>("a", i)))
            .collect();

        let left: DependencySet = deps[..2].iter().copied().collect();
        let right: DependencySet = deps[2..].iter().copied().collect();
        let union = left.union(&right);

        assert_eq!(union.len(), 4);
        assert!(union.is_superset(&left));
        assert!(union.is_superset(&right));
    }

    #[test]
    fn concurrent_acquire_agrees_on_tokens() {
        let registry = std::sync::Arc::new(DependencyRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|i| {
                            registry.acquire(DependencyStamp::new::<LayerA, _>("a", i % 10))
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<Dependency>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for tokens in &results[1..] {
            assert_eq!(tokens, &results[0]);
        }
        assert_eq!(registry.len(), 10);
    }
}
