//! Error types for layer updates.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dependency::Dependency;

/// Errors that abort a whole layer update.
///
/// Failures local to a single key never surface here; they are absorbed into
/// the update result's failure list and converted into conservative
/// over-invalidation. An `UpdateError` means the layer could not establish a
/// well-defined result at all and the session driver must handle it.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The predecessor layer failed to update.
    ///
    /// This layer cannot partially proceed against an inconsistent upstream
    /// view; the predecessor's failure is wrapped and propagated.
    #[error("upstream layer `{layer}` failed to update")]
    Upstream {
        /// The failing predecessor's diagnostic name.
        layer: &'static str,
        /// The predecessor's failure.
        #[source]
        source: Box<UpdateError>,
    },

    /// A token in the predecessor's triggered set is not registered.
    ///
    /// This indicates a defect in how the chain was assembled (an update
    /// result fed to a layer whose registry never minted the token), not a
    /// recoverable runtime condition.
    #[error("dependency token {token:?} fed to layer `{layer}` is not registered")]
    UnknownDependency {
        /// The layer that received the token.
        layer: &'static str,
        /// The unresolvable token.
        token: Dependency,
    },
}

impl UpdateError {
    /// Wrap a predecessor's failure for propagation through this layer.
    pub fn upstream(layer: &'static str, source: UpdateError) -> Self {
        UpdateError::Upstream {
            layer,
            source: Box::new(source),
        }
    }
}

/// An isolated recomputation failure for a single key.
///
/// The failing key's token is conservatively treated as changed, so
/// downstream layers re-derive rather than risk staleness on a partially
/// failed computation. There is no retry at this level.
#[derive(Debug, Clone)]
pub struct KeyFailure {
    /// Human-readable rendering of the failing key.
    pub key: String,
    /// The failure produced by the layer's recomputation function.
    pub error: Arc<anyhow::Error>,
}

impl fmt::Display for KeyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recomputation of `{}` failed: {}", self.key, self.error)
    }
}
