#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod dependency;
mod error;
mod key;
mod layer;
mod root;
mod scheduler;
mod spec;
mod store;
mod table;
mod view;

pub use dependency::{Dependency, DependencyRegistry, DependencySet, DependencyStamp};
pub use error::{KeyFailure, UpdateError};
pub use key::{DynEq, ErasedKey};
pub use layer::{Layer, LayerUpdate, ModuleChangeSet, ModuleName, RootUpdate};
pub use root::{SourceRoot, SourceView};
pub use scheduler::{RayonScheduler, Scheduler, SerialScheduler};
pub use spec::TableSpec;
pub use store::{Store, StoreKey};
pub use table::{RetainingTable, TableUpdate, TransientTable};
pub use view::{TableSnapshot, TableView};
