//! The specification contract a concrete layer supplies to the table builder.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dependency::{Dependency, DependencyRegistry, DependencyStamp};
use crate::layer::{Layer, RootUpdate};

/// Everything that determines one concrete incremental table layer.
///
/// A layer implements this trait once; the table builder instantiates the
/// shared update algorithm over it twice, as [`RetainingTable`] and
/// [`TransientTable`].
///
/// # Purity
///
/// [`TableSpec::produce_value`] must be a deterministic, pure function of the
/// upstream view and the trigger: no side effects are observable outside the
/// returned value and the read edges it registers. The framework cannot
/// enforce this; parallel recomputation and the no-torn-views guarantee rest
/// on it, so it is a hard contractual obligation on every implementation.
///
/// [`RetainingTable`]: crate::table::RetainingTable
/// [`TransientTable`]: crate::table::TransientTable
pub trait TableSpec: Send + Sync + Sized + 'static {
    /// The identifier of one storage slot in this layer's table.
    type Key: Hash + Eq + Clone + Debug + Send + Sync + 'static;

    /// The computed content for a key.
    ///
    /// Equality (via [`TableSpec::equal_value`]) drives early cutoff; the
    /// serde bounds give the stable serialization used by the store and by
    /// snapshot/debug export.
    type Value: Clone + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// The unit of invalidation as seen from upstream.
    ///
    /// Related to `Key` by the declared one-to-one conversions; the types
    /// differ when a layer's recomputation granularity differs from its
    /// storage granularity.
    type Trigger: Hash + Eq + Clone + Debug + Send + Sync + 'static;

    /// The predecessor layer this one derives from.
    type Upstream: Layer;

    /// Diagnostic name of this layer.
    const LAYER_NAME: &'static str;

    /// Selects fine-grained (trigger-filtered) invalidation when true, the
    /// legacy blanket path via [`TableSpec::legacy_invalidated_keys`] when
    /// false. Legacy mode strictly overrides fine-grained mode: the
    /// predecessor's triggered set is not consulted at all.
    fn lazy_incremental(&self) -> bool {
        true
    }

    /// Convert a trigger to the key it recomputes.
    fn key_of(trigger: &Self::Trigger) -> Self::Key;

    /// Convert a key back to its trigger. Must round-trip with
    /// [`TableSpec::key_of`]: `key_of(&trigger_of(k)) == k` for every key
    /// this layer can hold.
    fn trigger_of(key: &Self::Key) -> Self::Trigger;

    /// Human-readable rendering of a key for diagnostics.
    fn render_key(key: &Self::Key) -> String {
        format!("{:?}", key)
    }

    /// Project an upstream dependency into this layer's trigger space.
    ///
    /// Returns `None` when the token is not relevant to this layer; that is
    /// the expected common case, not an error.
    fn filter_upstream_dependency(&self, stamp: &DependencyStamp) -> Option<Self::Trigger>;

    /// The sole recomputation function: derive the value for `trigger` by
    /// reading the predecessor only through its read-only view.
    ///
    /// When `token` is given, reads should be tagged with it so the
    /// dependency registry records the edges.
    fn produce_value(
        &self,
        upstream: &<Self::Upstream as Layer>::View,
        trigger: &Self::Trigger,
        token: Option<Dependency>,
    ) -> anyhow::Result<Self::Value>;

    /// Enumerate every key this layer could ever hold.
    ///
    /// Used only for full rebuilds and by the legacy invalidation path.
    fn all_keys(&self, root: &RootUpdate) -> Vec<Self::Key>;

    /// Coarse fallback invalidation: every trigger plausibly affected by the
    /// root change set. Consulted only when [`TableSpec::lazy_incremental`]
    /// is false.
    fn legacy_invalidated_keys(&self, root: &RootUpdate) -> ahash::HashSet<Self::Trigger> {
        let _ = root;
        ahash::HashSet::default()
    }

    /// Compare two values for early cutoff.
    fn equal_value(a: &Self::Value, b: &Self::Value) -> bool;

    /// Stable serialization for the store and snapshot export.
    fn serialize_value(value: &Self::Value) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(value)
    }

    /// Decode a value previously produced by [`TableSpec::serialize_value`].
    fn deserialize_value(bytes: &[u8]) -> serde_json::Result<Self::Value> {
        serde_json::from_slice(bytes)
    }

    /// The stamp identifying one of this layer's triggers in the registry.
    fn dependency_stamp(trigger: Self::Trigger) -> DependencyStamp {
        DependencyStamp::new::<Self, _>(Self::LAYER_NAME, trigger)
    }

    /// The registered token for one of this layer's triggers; what this
    /// layer itself depends on when it reads upstream on the trigger's
    /// behalf.
    fn trigger_to_dependency(
        &self,
        registry: &DependencyRegistry,
        trigger: &Self::Trigger,
    ) -> Dependency {
        registry.acquire(Self::dependency_stamp(trigger.clone()))
    }
}
