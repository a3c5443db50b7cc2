//! The incremental table builder and its shared update algorithm.

use std::sync::Arc;

use crate::dependency::{Dependency, DependencyRegistry, DependencySet};
use crate::error::{KeyFailure, UpdateError};
use crate::layer::{Layer, LayerUpdate, ModuleChangeSet, RootUpdate};
use crate::scheduler::{RayonScheduler, Scheduler};
use crate::spec::TableSpec;
use crate::store::{Store, StoreKey};
use crate::view::{ResidentCache, TableView};

/// How the candidate trigger set is derived for one run.
enum UpdatePlan {
    /// Incremental: fine-grained filtering or the legacy blanket path,
    /// per the layer's `lazy_incremental` selection.
    Incremental,
    /// Full build: every key from `all_keys`.
    Rebuild,
}

/// Per-key outcome of one recomputation.
enum KeyOutcome {
    /// The value changed or the key is new; the token is triggered.
    Changed(Dependency),
    /// The recomputed value equals the stored one; early cutoff.
    Unchanged,
    /// Recomputation failed; the token is conservatively triggered.
    Failed(Dependency, KeyFailure),
}

/// The update algorithm and table state shared by both strategies.
struct TableCore<S: TableSpec> {
    spec: Arc<S>,
    store: Arc<Store>,
    registry: Arc<DependencyRegistry>,
    /// `Some` for the cache-retaining strategy, `None` for the transient one.
    resident: Option<ResidentCache<S>>,
}

impl<S: TableSpec> TableCore<S> {
    fn run_update<P: Scheduler>(
        &self,
        scheduler: &P,
        upstream_view: &<S::Upstream as Layer>::View,
        upstream_update: <S::Upstream as Layer>::Update,
        plan: UpdatePlan,
    ) -> Result<TableUpdate<S>, UpdateError> {
        let triggers = self.candidate_triggers(&upstream_update, &plan)?;
        tracing::debug!(
            layer = S::LAYER_NAME,
            candidates = triggers.len(),
            "collected candidate trigger set"
        );

        // The work list: one entry per distinct affected key, bounded by the
        // candidate set, never by the table size.
        let work: Vec<(S::Key, S::Trigger, Dependency)> = triggers
            .into_iter()
            .map(|trigger| {
                let key = S::key_of(&trigger);
                debug_assert!(
                    S::trigger_of(&key) == trigger,
                    "key/trigger conversion must round-trip for `{}`",
                    S::render_key(&key)
                );
                let token = self.spec.trigger_to_dependency(&self.registry, &trigger);
                (key, trigger, token)
            })
            .collect();
        let recomputed = work.len();

        let outcomes = scheduler.parallel_map(work, |(key, trigger, token)| {
            self.recompute_one(upstream_view, key, trigger, token)
        });

        let mut locally = ahash::HashSet::default();
        let mut failures = Vec::new();
        let mut cutoff = 0usize;
        for outcome in outcomes {
            match outcome {
                KeyOutcome::Changed(token) => {
                    locally.insert(token);
                }
                KeyOutcome::Unchanged => cutoff += 1,
                KeyOutcome::Failed(token, failure) => {
                    locally.insert(token);
                    failures.push(failure);
                }
            }
        }
        tracing::info!(
            layer = S::LAYER_NAME,
            recomputed,
            cutoff,
            triggered = locally.len(),
            failed = failures.len(),
            "layer update complete"
        );

        let locally_triggered: DependencySet = locally.into_iter().collect();
        let all_triggered = locally_triggered.union(upstream_update.all_triggered());
        let view = TableView::new(
            self.spec.clone(),
            self.store.clone(),
            self.registry.clone(),
            self.resident.clone(),
            upstream_view.clone(),
        );
        Ok(TableUpdate {
            locally_triggered,
            all_triggered,
            previous: Box::new(upstream_update),
            view,
            failures,
        })
    }

    fn candidate_triggers(
        &self,
        upstream_update: &<S::Upstream as Layer>::Update,
        plan: &UpdatePlan,
    ) -> Result<Vec<S::Trigger>, UpdateError> {
        match plan {
            UpdatePlan::Rebuild => Ok(self
                .spec
                .all_keys(upstream_update.root())
                .iter()
                .map(S::trigger_of)
                .collect()),
            UpdatePlan::Incremental if self.spec.lazy_incremental() => {
                let mut triggers = ahash::HashSet::default();
                for dep in upstream_update.all_triggered().iter() {
                    let stamp = self.registry.describe(dep).ok_or(
                        UpdateError::UnknownDependency {
                            layer: S::LAYER_NAME,
                            token: dep,
                        },
                    )?;
                    if let Some(trigger) = self.spec.filter_upstream_dependency(&stamp) {
                        triggers.insert(trigger);
                    }
                }
                Ok(triggers.into_iter().collect())
            }
            UpdatePlan::Incremental => Ok(self
                .spec
                .legacy_invalidated_keys(upstream_update.root())
                .into_iter()
                .collect()),
        }
    }

    fn recompute_one(
        &self,
        upstream_view: &<S::Upstream as Layer>::View,
        key: S::Key,
        trigger: S::Trigger,
        token: Dependency,
    ) -> KeyOutcome {
        let value = match self.spec.produce_value(upstream_view, &trigger, Some(token)) {
            Ok(value) => value,
            Err(error) => {
                return KeyOutcome::Failed(
                    token,
                    KeyFailure {
                        key: S::render_key(&key),
                        error: Arc::new(error),
                    },
                )
            }
        };

        let bytes = match S::serialize_value(&value) {
            Ok(bytes) => bytes,
            Err(error) => {
                return KeyOutcome::Failed(
                    token,
                    KeyFailure {
                        key: S::render_key(&key),
                        error: Arc::new(error.into()),
                    },
                )
            }
        };

        let store_key = StoreKey::for_layer::<S, _>(key.clone());
        let previous = self
            .store
            .get(&store_key)
            .and_then(|old| S::deserialize_value(&old).ok());
        // The write happens whether or not the value changed; the store is
        // idempotent and keys in one work list are disjoint across workers.
        self.store.put(store_key, bytes.into());
        if let Some(resident) = &self.resident {
            resident.insert(key, Arc::new(value.clone()));
        }

        match previous {
            Some(old) if S::equal_value(&old, &value) => KeyOutcome::Unchanged,
            _ => KeyOutcome::Changed(token),
        }
    }
}

/// The result of one table update cycle.
///
/// Owns the predecessor's update result, forming a chain down to the root;
/// retained only as long as some caller holds it.
pub struct TableUpdate<S: TableSpec> {
    locally_triggered: DependencySet,
    all_triggered: DependencySet,
    previous: Box<<S::Upstream as Layer>::Update>,
    view: TableView<S>,
    failures: Vec<KeyFailure>,
}

impl<S: TableSpec> TableUpdate<S> {
    /// Per-key recomputation failures absorbed by this cycle. The
    /// corresponding tokens are already in the locally-triggered set.
    pub fn failures(&self) -> &[KeyFailure] {
        &self.failures
    }
}

impl<S: TableSpec> LayerUpdate for TableUpdate<S> {
    fn locally_triggered(&self) -> &DependencySet {
        &self.locally_triggered
    }

    fn all_triggered(&self) -> &DependencySet {
        &self.all_triggered
    }

    fn previous(&self) -> Option<&dyn LayerUpdate> {
        Some(&*self.previous)
    }

    fn root(&self) -> &RootUpdate {
        self.previous.root()
    }
}

/// The cache-retaining table strategy.
///
/// Every computed value stays resident (decoded, `Arc`-shared) for point
/// lookups without recomputation or decoding.
pub struct RetainingTable<S: TableSpec, P: Scheduler = RayonScheduler> {
    core: TableCore<S>,
    scheduler: P,
}

impl<S: TableSpec> RetainingTable<S> {
    /// Create a retaining table over the shared store and registry.
    pub fn new(spec: S, store: Arc<Store>, registry: Arc<DependencyRegistry>) -> Self {
        Self::with_scheduler(spec, store, registry, RayonScheduler::new())
    }
}

impl<S: TableSpec, P: Scheduler> RetainingTable<S, P> {
    /// Create a retaining table driven by a specific scheduler.
    pub fn with_scheduler(
        spec: S,
        store: Arc<Store>,
        registry: Arc<DependencyRegistry>,
        scheduler: P,
    ) -> Self {
        Self {
            core: TableCore {
                spec: Arc::new(spec),
                store,
                registry,
                resident: Some(ResidentCache::new()),
            },
            scheduler,
        }
    }

    /// Populate the table from scratch: every key from `all_keys` is
    /// computed through the same algorithm as an incremental update, so a
    /// cold build and an update share one code path.
    pub fn rebuild(
        &self,
        upstream_view: &<S::Upstream as Layer>::View,
        upstream_update: <S::Upstream as Layer>::Update,
    ) -> Result<TableUpdate<S>, UpdateError> {
        self.core
            .run_update(&self.scheduler, upstream_view, upstream_update, UpdatePlan::Rebuild)
    }
}

impl<S: TableSpec, P: Scheduler> Layer for RetainingTable<S, P> {
    type Upstream = S::Upstream;
    type View = TableView<S>;
    type Update = TableUpdate<S>;

    fn update(
        &self,
        upstream_view: &<S::Upstream as Layer>::View,
        _changed: &ModuleChangeSet,
        upstream_update: <S::Upstream as Layer>::Update,
    ) -> Result<TableUpdate<S>, UpdateError> {
        self.core.run_update(
            &self.scheduler,
            upstream_view,
            upstream_update,
            UpdatePlan::Incremental,
        )
    }

    fn read_only(&self, update: &Self::Update) -> Self::View {
        update.view.clone()
    }
}

/// The non-retaining table strategy.
///
/// Keeps no decoded values: reads decode from the shared store on every
/// lookup and recompute on a store miss, trading memory for compute. Point
/// queries return the same values as the retaining strategy for the same
/// specification and update sequence.
pub struct TransientTable<S: TableSpec, P: Scheduler = RayonScheduler> {
    core: TableCore<S>,
    scheduler: P,
}

impl<S: TableSpec> TransientTable<S> {
    /// Create a transient table over the shared store and registry.
    pub fn new(spec: S, store: Arc<Store>, registry: Arc<DependencyRegistry>) -> Self {
        Self::with_scheduler(spec, store, registry, RayonScheduler::new())
    }
}

impl<S: TableSpec, P: Scheduler> TransientTable<S, P> {
    /// Create a transient table driven by a specific scheduler.
    pub fn with_scheduler(
        spec: S,
        store: Arc<Store>,
        registry: Arc<DependencyRegistry>,
        scheduler: P,
    ) -> Self {
        Self {
            core: TableCore {
                spec: Arc::new(spec),
                store,
                registry,
                resident: None,
            },
            scheduler,
        }
    }

    /// Populate the table from scratch; see [`RetainingTable::rebuild`].
    pub fn rebuild(
        &self,
        upstream_view: &<S::Upstream as Layer>::View,
        upstream_update: <S::Upstream as Layer>::Update,
    ) -> Result<TableUpdate<S>, UpdateError> {
        self.core
            .run_update(&self.scheduler, upstream_view, upstream_update, UpdatePlan::Rebuild)
    }
}

impl<S: TableSpec, P: Scheduler> Layer for TransientTable<S, P> {
    type Upstream = S::Upstream;
    type View = TableView<S>;
    type Update = TableUpdate<S>;

    fn update(
        &self,
        upstream_view: &<S::Upstream as Layer>::View,
        _changed: &ModuleChangeSet,
        upstream_update: <S::Upstream as Layer>::Update,
    ) -> Result<TableUpdate<S>, UpdateError> {
        self.core.run_update(
            &self.scheduler,
            upstream_view,
            upstream_update,
            UpdatePlan::Incremental,
        )
    }

    fn read_only(&self, update: &Self::Update) -> Self::View {
        update.view.clone()
    }
}
