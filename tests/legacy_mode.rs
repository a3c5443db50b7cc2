//! Legacy (coarse) invalidation: a layer with fine-grained tracking disabled
//! recomputes every key derived from the root change set and ignores the
//! predecessor's triggered-dependency set entirely.

use std::sync::{Arc, Mutex};

use layer_flow::{
    Dependency, DependencyRegistry, DependencyStamp, Layer, LayerUpdate, ModuleChangeSet,
    ModuleName, RetainingTable, RootUpdate, SerialScheduler, SourceRoot, SourceView, Store,
    TableSpec,
};

/// The module owning a dotted symbol name.
fn module_of(symbol: &str) -> &str {
    symbol.split_once('.').map(|(module, _)| module).unwrap_or(symbol)
}

/// A symbol table that cannot track fine-grained dependencies: the root
/// change set arrives at module granularity, so every symbol of a changed
/// module is blanket-invalidated.
struct CoarseSymbolSpec {
    /// Every symbol this layer can hold.
    universe: Vec<String>,
    produced: Arc<Mutex<Vec<String>>>,
}

impl TableSpec for CoarseSymbolSpec {
    type Key = String;
    type Value = i64;
    type Trigger = String;
    type Upstream = SourceRoot<i64>;

    const LAYER_NAME: &'static str = "coarse_symbols";

    fn lazy_incremental(&self) -> bool {
        false
    }

    fn key_of(trigger: &String) -> String {
        trigger.clone()
    }

    fn trigger_of(key: &String) -> String {
        key.clone()
    }

    // Present but must never be consulted: legacy mode strictly overrides
    // fine-grained filtering.
    fn filter_upstream_dependency(&self, stamp: &DependencyStamp) -> Option<String> {
        stamp
            .is_layer::<SourceRoot<i64>>()
            .then(|| stamp.trigger::<ModuleName>())
            .flatten()
            .map(|name| name.as_str().to_string())
    }

    fn produce_value(
        &self,
        upstream: &SourceView<i64>,
        trigger: &String,
        token: Option<Dependency>,
    ) -> anyhow::Result<i64> {
        self.produced.lock().unwrap().push(trigger.clone());
        let name = ModuleName::from(trigger.as_str());
        upstream
            .get(&name, token)
            .map(|value| *value)
            .ok_or_else(|| anyhow::anyhow!("unknown symbol `{trigger}`"))
    }

    fn all_keys(&self, _root: &RootUpdate) -> Vec<String> {
        self.universe.clone()
    }

    fn legacy_invalidated_keys(&self, root: &RootUpdate) -> ahash::HashSet<String> {
        self.universe
            .iter()
            .filter(|symbol| root.changed().contains(&ModuleName::from(module_of(symbol))))
            .cloned()
            .collect()
    }

    fn equal_value(a: &i64, b: &i64) -> bool {
        a == b
    }
}

#[test]
fn module_change_recomputes_every_symbol_of_the_module() {
    let registry = Arc::new(DependencyRegistry::new());
    let store = Arc::new(Store::new());
    let root = SourceRoot::new(registry.clone());
    root.set("mod.x", 1);
    root.set("mod.y", 2);
    root.set("other.z", 3);

    let produced = Arc::new(Mutex::new(Vec::new()));
    let spec = CoarseSymbolSpec {
        universe: vec![
            "mod.x".to_string(),
            "mod.y".to_string(),
            "other.z".to_string(),
        ],
        produced: produced.clone(),
    };
    let table = RetainingTable::with_scheduler(spec, store, registry, SerialScheduler);

    // Cold build over the whole universe.
    let all: ModuleChangeSet = ["mod.x", "mod.y", "other.z"].into_iter().collect();
    let _ = table.rebuild(&root.view(), root.ingest(&all)).unwrap();
    produced.lock().unwrap().clear();

    // A root change at module granularity: "mod" is not itself a symbol, so
    // fine-grained filtering could never name the affected keys.
    root.set("mod.x", 10);
    root.set("mod.y", 20);
    let changed: ModuleChangeSet = ["mod"].into_iter().collect();
    let update = table
        .update(&root.view(), &changed, root.ingest(&changed))
        .unwrap();

    let mut recomputed = produced.lock().unwrap().clone();
    recomputed.sort();
    assert_eq!(recomputed, vec!["mod.x".to_string(), "mod.y".to_string()]);

    let view = table.read_only(&update);
    assert_eq!(*view.get(&"mod.x".to_string()).unwrap(), 10);
    assert_eq!(*view.get(&"mod.y".to_string()).unwrap(), 20);
    assert_eq!(*view.get(&"other.z".to_string()).unwrap(), 3);

    // Both recomputed symbols changed, so both tokens are triggered.
    assert_eq!(update.locally_triggered().len(), 2);
    assert!(update.failures().is_empty());
}

#[test]
fn untouched_module_is_not_recomputed() {
    let registry = Arc::new(DependencyRegistry::new());
    let store = Arc::new(Store::new());
    let root = SourceRoot::new(registry.clone());
    root.set("mod.x", 1);
    root.set("other.z", 3);

    let produced = Arc::new(Mutex::new(Vec::new()));
    let spec = CoarseSymbolSpec {
        universe: vec!["mod.x".to_string(), "other.z".to_string()],
        produced: produced.clone(),
    };
    let table = RetainingTable::with_scheduler(spec, store, registry, SerialScheduler);

    let all: ModuleChangeSet = ["mod.x", "other.z"].into_iter().collect();
    let _ = table.rebuild(&root.view(), root.ingest(&all)).unwrap();
    produced.lock().unwrap().clear();

    let changed: ModuleChangeSet = ["other"].into_iter().collect();
    let update = table
        .update(&root.view(), &changed, root.ingest(&changed))
        .unwrap();

    assert_eq!(*produced.lock().unwrap(), vec!["other.z".to_string()]);
    // The value did not change, so even the blanket path cuts off.
    assert!(update.locally_triggered().is_empty());
}

#[test]
fn counter_example_lazy_mode_would_miss_the_module_fanout() {
    // Sanity check on the scenario itself: the predecessor's triggered set
    // for a "mod" change contains only the module-level token, which maps to
    // a trigger that is not a symbol. Legacy mode exists exactly for this.
    let registry = Arc::new(DependencyRegistry::new());
    let root: SourceRoot<i64> = SourceRoot::new(registry.clone());

    let changed: ModuleChangeSet = ["mod"].into_iter().collect();
    let update = root.ingest(&changed);
    assert_eq!(update.all_triggered().len(), 1);

    let token = update.all_triggered().iter().next().unwrap();
    let stamp = registry.describe(token).unwrap();
    assert_eq!(stamp.trigger::<ModuleName>().unwrap(), &ModuleName::from("mod"));
}
