//! The contract every environment layer implements.

use std::fmt;
use std::sync::Arc;

use crate::dependency::DependencySet;
use crate::error::UpdateError;

/// A top-level module name, the unit of the session-wide root change set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ModuleName(Arc<str>);

impl ModuleName {
    /// Create a module name.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        ModuleName(name.into())
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleName {
    fn from(name: &str) -> Self {
        ModuleName::new(name)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of top-level names that changed at the root of the chain.
///
/// Clone is cheap as the inner set is wrapped by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ModuleChangeSet(Arc<ahash::HashSet<ModuleName>>);

impl ModuleChangeSet {
    /// Returns true if the set contains the module.
    pub fn contains(&self, name: &ModuleName) -> bool {
        self.0.contains(name)
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of changed modules.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the changed modules.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleName> + '_ {
        self.0.iter()
    }
}

impl FromIterator<ModuleName> for ModuleChangeSet {
    fn from_iter<T: IntoIterator<Item = ModuleName>>(iter: T) -> Self {
        ModuleChangeSet(Arc::new(iter.into_iter().collect()))
    }
}

impl<'a> FromIterator<&'a str> for ModuleChangeSet {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        iter.into_iter().map(ModuleName::from).collect()
    }
}

/// The immutable record of one update cycle, linked to its predecessor.
///
/// Each update result exclusively owns its predecessor's, forming a chain
/// down to the [`RootUpdate`]; walking toward the root is an explicit
/// traversal via [`LayerUpdate::previous`], never a back reference.
pub trait LayerUpdate: Send + Sync {
    /// The tokens whose value changed at this layer in this cycle.
    fn locally_triggered(&self) -> &DependencySet;

    /// The cumulative union of triggered tokens from this layer and every
    /// layer below it. Always a superset of [`LayerUpdate::locally_triggered`].
    fn all_triggered(&self) -> &DependencySet;

    /// The predecessor's update result, if this is not the root.
    fn previous(&self) -> Option<&dyn LayerUpdate>;

    /// Walk the chain down to the root update.
    fn root(&self) -> &RootUpdate;
}

/// The update result at the base of every chain.
///
/// Holds the session-wide change set and the tokens minted for the changed
/// top-level names; layers in legacy mode derive their invalidated keys from
/// this record directly.
#[derive(Debug, Clone)]
pub struct RootUpdate {
    changed: ModuleChangeSet,
    triggered: DependencySet,
}

impl RootUpdate {
    /// Create a root update from a change set and the tokens minted for it.
    pub fn new(changed: ModuleChangeSet, triggered: DependencySet) -> Self {
        Self { changed, triggered }
    }

    /// The top-level names that changed this cycle.
    pub fn changed(&self) -> &ModuleChangeSet {
        &self.changed
    }
}

impl LayerUpdate for RootUpdate {
    fn locally_triggered(&self) -> &DependencySet {
        &self.triggered
    }

    fn all_triggered(&self) -> &DependencySet {
        &self.triggered
    }

    fn previous(&self) -> Option<&dyn LayerUpdate> {
        None
    }

    fn root(&self) -> &RootUpdate {
        self
    }
}

/// One stage in a chain of derived incremental tables.
///
/// Every layer, the root included, exposes this identical shape so layers
/// compose uniformly; a layer never inspects more than one predecessor, and
/// transitive history is reached only via the update-result chain.
pub trait Layer: Send + Sync {
    /// The predecessor layer. The root uses `Upstream = Self`.
    type Upstream: Layer;

    /// The read-only query surface exposed after an update.
    type View: Clone + Send + Sync;

    /// The update result produced by one update cycle.
    type Update: LayerUpdate;

    /// Run one update cycle against the predecessor's post-update state.
    ///
    /// Pure with respect to the given inputs plus this layer's own existing
    /// table: a read-modify-write of exactly the affected keys. Must be
    /// called at most once per session generation; not reentrant mid-update.
    fn update(
        &self,
        upstream_view: &<Self::Upstream as Layer>::View,
        changed: &ModuleChangeSet,
        upstream_update: <Self::Upstream as Layer>::Update,
    ) -> Result<Self::Update, UpdateError>;

    /// Extract the read-only view of an update result. Cheap and
    /// side-effect-free.
    fn read_only(&self, update: &Self::Update) -> Self::View;
}
