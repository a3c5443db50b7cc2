//! Object-safe key erasure for stamps and store slots.

use std::any::Any;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash, Hasher};

use dyn_hash::DynHash;

/// Object-safe equality comparison.
///
/// This trait enables comparing two trait objects for equality
/// by downcasting and comparing the concrete types.
pub trait DynEq: Any {
    /// Compare self with another value for equality.
    ///
    /// Returns `true` if `other` is the same concrete type and equal to `self`.
    fn dyn_eq(&self, other: &dyn Any) -> bool;
}

impl<T: Eq + 'static> DynEq for T {
    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|o| self == o)
    }
}

/// Trait for types that can serve as erased keys.
///
/// This trait combines object-safe hashing, equality, and debug formatting.
/// It is automatically implemented for all types that implement
/// `Hash + Eq + Debug + Send + Sync + 'static`.
///
/// # Object Safety
///
/// This trait is object-safe, allowing `Arc<dyn ErasedKey>` to be used
/// in hash maps and other collections.
pub trait ErasedKey: DynHash + DynEq + Debug + Send + Sync {
    /// Get the key as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Get the type name for this key.
    fn type_name(&self) -> &'static str;
}

impl<T: Hash + Eq + Debug + Send + Sync + 'static> ErasedKey for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

// Enable Hash for dyn ErasedKey using the dyn-hash crate
dyn_hash::hash_trait_object!(ErasedKey);

/// Hash a value with a fixed-seed hasher, for content hashes that must be
/// stable across threads and sessions of the same build.
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
    let state = ahash::RandomState::with_seeds(
        0x517c_c1b7_2722_0a95,
        0x6c62_272e_07bb_0142,
        0x1000_0000_01b3_0000,
        0xcbf2_9ce4_8422_2325,
    );
    let mut hasher = state.build_hasher();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn erased_keys_compare_by_concrete_type() {
        let a: Arc<dyn ErasedKey> = Arc::new("mod.x".to_string());
        let b: Arc<dyn ErasedKey> = Arc::new("mod.x".to_string());
        let c: Arc<dyn ErasedKey> = Arc::new(42u32);

        assert!(a.dyn_eq(b.as_any()));
        assert!(!a.dyn_eq(c.as_any()));
    }

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash(b"value"), stable_hash(b"value"));
        assert_ne!(stable_hash(b"value"), stable_hash(b"other"));
    }
}
