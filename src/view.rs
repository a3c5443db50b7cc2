//! Read-only views over a layer's post-update table.

use std::collections::BTreeMap;
use std::sync::Arc;

use papaya::HashMap;

use crate::dependency::{Dependency, DependencyRegistry};
use crate::key::stable_hash;
use crate::layer::Layer;
use crate::spec::TableSpec;
use crate::store::{Store, StoreKey};

/// Decoded values kept resident by the cache-retaining strategy.
pub(crate) struct ResidentCache<S: TableSpec> {
    entries: Arc<HashMap<S::Key, Arc<S::Value>, ahash::RandomState>>,
}

impl<S: TableSpec> Clone for ResidentCache<S> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<S: TableSpec> ResidentCache<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(HashMap::with_hasher(ahash::RandomState::new())),
        }
    }

    pub(crate) fn get(&self, key: &S::Key) -> Option<Arc<S::Value>> {
        self.entries.pin().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: S::Key, value: Arc<S::Value>) {
        self.entries.pin().insert(key, value);
    }
}

/// The query-only surface of a layer after an update.
///
/// A view obtained from an update result reflects exactly the post-update
/// state. Reads are atomic per key; while a *successor* update cycle is in
/// progress the per-key values a view returns are each either the old or the
/// new content, never a torn mix.
///
/// Clone is cheap as all state is behind `Arc`.
pub struct TableView<S: TableSpec> {
    spec: Arc<S>,
    store: Arc<Store>,
    registry: Arc<DependencyRegistry>,
    resident: Option<ResidentCache<S>>,
    upstream: <S::Upstream as Layer>::View,
}

impl<S: TableSpec> Clone for TableView<S> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            store: self.store.clone(),
            registry: self.registry.clone(),
            resident: self.resident.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

impl<S: TableSpec> TableView<S> {
    pub(crate) fn new(
        spec: Arc<S>,
        store: Arc<Store>,
        registry: Arc<DependencyRegistry>,
        resident: Option<ResidentCache<S>>,
        upstream: <S::Upstream as Layer>::View,
    ) -> Self {
        Self {
            spec,
            store,
            registry,
            resident,
            upstream,
        }
    }

    /// Point lookup by key.
    pub fn get(&self, key: &S::Key) -> Option<Arc<S::Value>> {
        self.lookup(key, None)
    }

    /// Point lookup that records the read in the dependency registry:
    /// `reader` becomes a consumer of this key's trigger.
    pub fn get_tracked(&self, key: &S::Key, reader: Dependency) -> Option<Arc<S::Value>> {
        self.lookup(key, Some(reader))
    }

    fn lookup(&self, key: &S::Key, reader: Option<Dependency>) -> Option<Arc<S::Value>> {
        if let Some(reader) = reader {
            let trigger = S::trigger_of(key);
            let source = self.spec.trigger_to_dependency(&self.registry, &trigger);
            self.registry.record_read(source, reader);
        }
        if let Some(resident) = &self.resident {
            if let Some(value) = resident.get(key) {
                return Some(value);
            }
        }
        if let Some(bytes) = self.store.get(&StoreKey::for_layer::<S, _>(key.clone())) {
            if let Ok(value) = S::deserialize_value(&bytes) {
                let value = Arc::new(value);
                if let Some(resident) = &self.resident {
                    resident.insert(key.clone(), value.clone());
                }
                return Some(value);
            }
        }
        self.recompute_miss(key)
    }

    /// A store miss means the key was never computed this session; derive it
    /// on demand from the upstream view and store the result.
    fn recompute_miss(&self, key: &S::Key) -> Option<Arc<S::Value>> {
        let trigger = S::trigger_of(key);
        let token = self.spec.trigger_to_dependency(&self.registry, &trigger);
        match self.spec.produce_value(&self.upstream, &trigger, Some(token)) {
            Ok(value) => {
                if let Ok(bytes) = S::serialize_value(&value) {
                    self.store
                        .put(StoreKey::for_layer::<S, _>(key.clone()), bytes.into());
                }
                let value = Arc::new(value);
                if let Some(resident) = &self.resident {
                    resident.insert(key.clone(), value.clone());
                }
                Some(value)
            }
            Err(error) => {
                tracing::debug!(
                    layer = S::LAYER_NAME,
                    key = %S::render_key(key),
                    %error,
                    "on-demand recomputation failed"
                );
                None
            }
        }
    }

    /// Map of content hash (over the serialized value) to key, for
    /// cross-session divergence checks.
    pub fn content_hashes(&self) -> ahash::HashMap<u64, S::Key> {
        self.store
            .layer_entries::<S, S::Key>()
            .into_iter()
            .map(|(key, bytes)| (stable_hash(&bytes), key))
            .collect()
    }

    /// Export this layer's table for external debugging tooling.
    pub fn snapshot(&self) -> TableSnapshot {
        let entries = self
            .store
            .layer_entries::<S, S::Key>()
            .into_iter()
            .map(|(key, bytes)| {
                let value = serde_json::from_slice(&bytes)
                    .unwrap_or_else(|_| serde_json::Value::String("<undecodable>".to_string()));
                (S::render_key(&key), value)
            })
            .collect();
        TableSnapshot {
            layer: S::LAYER_NAME.to_string(),
            entries,
        }
    }

    /// Decode two serialized values and compare them with the layer's value
    /// equality. Undecodable input compares unequal.
    pub fn equal_serialized(a: &[u8], b: &[u8]) -> bool {
        match (S::deserialize_value(a), S::deserialize_value(b)) {
            (Ok(a), Ok(b)) => S::equal_value(&a, &b),
            _ => false,
        }
    }
}

/// A serializable export of one layer's table: rendered keys mapped to their
/// JSON-decoded values. Two sessions' snapshots of the same layer can be
/// compared directly for unexpected divergence.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TableSnapshot {
    /// The exporting layer's diagnostic name.
    pub layer: String,
    /// Rendered key to decoded value, in key order.
    pub entries: BTreeMap<String, serde_json::Value>,
}
