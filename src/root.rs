//! A root layer stand-in: mutable per-module inputs feeding the chain.

use std::sync::Arc;

use papaya::HashMap;

use crate::dependency::{Dependency, DependencyRegistry, DependencySet, DependencyStamp};
use crate::error::UpdateError;
use crate::layer::{Layer, ModuleChangeSet, ModuleName, RootUpdate};

/// The base of a layer chain: module-name keyed input values.
///
/// In the full checker the chain bottoms out at the parsed-module layer;
/// this stand-in holds externally supplied per-module values so chains
/// compose uniformly and are testable in isolation. Entries may be mutated
/// with [`SourceRoot::set`] and [`SourceRoot::remove`] only *between* update
/// cycles; the changed names are then handed to [`SourceRoot::ingest`] as
/// the session-wide change set.
pub struct SourceRoot<V> {
    entries: Arc<HashMap<ModuleName, Arc<V>, ahash::RandomState>>,
    registry: Arc<DependencyRegistry>,
}

impl<V: Send + Sync + 'static> SourceRoot<V> {
    /// Create an empty root over the shared registry.
    pub fn new(registry: Arc<DependencyRegistry>) -> Self {
        Self {
            entries: Arc::new(HashMap::with_hasher(ahash::RandomState::new())),
            registry,
        }
    }

    /// Set a module's value. Call only between update cycles.
    pub fn set(&self, name: impl Into<ModuleName>, value: V) {
        self.entries.pin().insert(name.into(), Arc::new(value));
    }

    /// Remove a module. Call only between update cycles.
    pub fn remove(&self, name: &ModuleName) {
        self.entries.pin().remove(name);
    }

    /// The stamp identifying one top-level name in the registry.
    pub fn stamp(name: ModuleName) -> DependencyStamp {
        DependencyStamp::new::<Self, _>("sources", name)
    }

    /// Turn a change set into this session generation's root update,
    /// minting one dependency token per changed name.
    pub fn ingest(&self, changed: &ModuleChangeSet) -> RootUpdate {
        let triggered: DependencySet = changed
            .iter()
            .map(|name| self.registry.acquire(Self::stamp(name.clone())))
            .collect();
        tracing::debug!(changed = changed.len(), "ingested root change set");
        RootUpdate::new(changed.clone(), triggered)
    }

    /// The current read-only view over the root entries.
    pub fn view(&self) -> SourceView<V> {
        SourceView {
            entries: self.entries.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Layer for SourceRoot<V> {
    type Upstream = Self;
    type View = SourceView<V>;
    type Update = RootUpdate;

    fn update(
        &self,
        _upstream_view: &SourceView<V>,
        changed: &ModuleChangeSet,
        _upstream_update: RootUpdate,
    ) -> Result<RootUpdate, UpdateError> {
        Ok(self.ingest(changed))
    }

    fn read_only(&self, _update: &RootUpdate) -> SourceView<V> {
        self.view()
    }
}

/// Read-only view over the root's module entries.
///
/// Clone is cheap as all state is behind `Arc`.
pub struct SourceView<V> {
    entries: Arc<HashMap<ModuleName, Arc<V>, ahash::RandomState>>,
    registry: Arc<DependencyRegistry>,
}

impl<V> Clone for SourceView<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> SourceView<V> {
    /// Point lookup by module name. When `reader` is given, the read is
    /// recorded as an edge in the dependency registry.
    pub fn get(&self, name: &ModuleName, reader: Option<Dependency>) -> Option<Arc<V>> {
        if let Some(reader) = reader {
            let source = self.registry.acquire(SourceRoot::<V>::stamp(name.clone()));
            self.registry.record_read(source, reader);
        }
        self.entries.pin().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerUpdate;

    #[test]
    fn ingest_mints_one_token_per_changed_name() {
        let registry = Arc::new(DependencyRegistry::new());
        let root = SourceRoot::new(registry.clone());
        root.set("mod.x", 1i64);
        root.set("mod.y", 2i64);

        let changed: ModuleChangeSet = ["mod.x"].into_iter().collect();
        let update = root.ingest(&changed);
        assert_eq!(update.locally_triggered().len(), 1);

        let token = update.locally_triggered().iter().next().unwrap();
        let stamp = registry.describe(token).unwrap();
        assert!(stamp.is_layer::<SourceRoot<i64>>());
        assert_eq!(
            stamp.trigger::<ModuleName>().unwrap(),
            &ModuleName::from("mod.x")
        );

        // Re-ingesting the same change set reuses the token.
        assert_eq!(root.ingest(&changed).locally_triggered(), update.locally_triggered());
    }

    #[test]
    fn tracked_reads_are_recorded() {
        let registry = Arc::new(DependencyRegistry::new());
        let root = SourceRoot::new(registry.clone());
        root.set("mod.x", 1i64);

        struct Downstream;
        let reader = registry.acquire(DependencyStamp::new::<Downstream, _>(
            "downstream",
            "mod.x".to_string(),
        ));

        let view = root.view();
        let name = ModuleName::from("mod.x");
        assert_eq!(*view.get(&name, Some(reader)).unwrap(), 1);

        let source = registry.acquire(SourceRoot::<i64>::stamp(name));
        assert!(registry.readers(source).contains(reader));
    }
}
