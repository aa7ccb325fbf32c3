//! The function / cache contract behind computed nodes.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::node::{AnyComputed, Computed};
use crate::{CancellationToken, ComputeContext, ComputeError, ComputedValue, LTag};

/// The contract a computed node's input must satisfy.
///
/// An input carries the identity of one `(function, argument)` pair. The core
/// never computes anything itself: when `update` finds a node stale, it
/// delegates to [`Input::invoke`], which produces or reuses a consistent node,
/// deduplicates in-flight work, and installs the `used_by` dependent on the
/// fresh result. [`Input::try_get_cached`] recovers a still-live node by tag
/// during invalidation cascades.
///
/// Implementations must keep the graph acyclic and must only hand out a node
/// as a dependency once it has produced an output; the core rejects edges onto
/// nodes that are still computing.
pub trait Input: Clone + PartialEq + Eq + Hash + Debug + Send + Sync + 'static {
    /// The value nodes for this input produce.
    type Value: ComputedValue;

    /// Produce (or reuse) a consistent computed for this input.
    ///
    /// `used_by`, when present, is the node currently being built on whose
    /// behalf this call happens; the implementation installs it as a dependent
    /// of the returned node. `cancel` is polled cooperatively; a cancelled
    /// invocation returns [`ComputeError::Cancelled`] and mutates nothing.
    fn invoke(
        &self,
        used_by: Option<Arc<dyn AnyComputed>>,
        ctx: Option<&Arc<ComputeContext>>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Computed<Self>>, ComputeError>;

    /// Look up a still-live node with the given tag.
    ///
    /// Returns `None` once the node has been evicted or superseded; callers
    /// treat a miss as "the dependent is gone" and move on.
    fn try_get_cached(&self, ltag: LTag) -> Option<Arc<Computed<Self>>>;
}
