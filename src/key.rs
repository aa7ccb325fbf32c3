//! Identity pairs for dependency edges.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::node::AnyComputed;
use crate::{Input, LTag};

/// Type-erased view of an input, as stored inside reverse-edge keys.
///
/// Implemented blanket-style for every [`Input`]; never implemented by hand.
pub trait DynInput: Send + Sync + fmt::Debug + 'static {
    /// The input as `Any`, for downcast-based equality.
    fn as_any(&self) -> &dyn Any;

    /// Structural equality across erased inputs.
    fn dyn_eq(&self, other: &dyn DynInput) -> bool;

    /// Pre-hash of `(input type, input)`.
    fn dyn_hash(&self) -> u64;

    /// Look up a still-live node for this input with the given tag.
    fn resolve(&self, ltag: LTag) -> Option<Arc<dyn AnyComputed>>;
}

impl<I: Input> DynInput for I {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynInput) -> bool {
        other
            .as_any()
            .downcast_ref::<I>()
            .is_some_and(|other| self == other)
    }

    fn dyn_hash(&self) -> u64 {
        let mut hasher = ahash::AHasher::default();
        TypeId::of::<I>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn resolve(&self, ltag: LTag) -> Option<Arc<dyn AnyComputed>> {
        self.try_get_cached(ltag)
            .map(|computed| computed as Arc<dyn AnyComputed>)
    }
}

/// Identity of one incarnation of a computed node: its input plus the tag of
/// that incarnation.
///
/// A key holds the input strongly but the node not at all. Reverse edges store
/// keys so that dependents stay collectible; at cascade time a key is resolved
/// back to a live node through the input's cache lookup, and a miss means the
/// dependent is gone and gets skipped.
#[derive(Clone)]
pub struct ComputedKey {
    input: Arc<dyn DynInput>,
    ltag: LTag,
    hash: u64,
}

impl ComputedKey {
    /// Build the key for `(input, ltag)`.
    pub fn new<I: Input>(input: I, ltag: LTag) -> Self {
        let hash = input.dyn_hash();
        ComputedKey {
            input: Arc::new(input),
            ltag,
            hash,
        }
    }

    /// The tag of the incarnation this key names.
    pub fn ltag(&self) -> LTag {
        self.ltag
    }

    /// Resolve the key back to a live node via the input's cache lookup.
    ///
    /// Returns `None` once the cache has evicted the node or replaced it with
    /// a newer incarnation.
    pub fn resolve(&self) -> Option<Arc<dyn AnyComputed>> {
        self.input.resolve(self.ltag)
    }
}

impl fmt::Debug for ComputedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}{}", self.input, self.ltag)
    }
}

impl Hash for ComputedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
        self.ltag.hash(state);
    }
}

impl PartialEq for ComputedKey {
    fn eq(&self, other: &Self) -> bool {
        self.ltag == other.ltag
            && self.hash == other.hash
            && self.input.dyn_eq(other.input.as_ref())
    }
}

impl Eq for ComputedKey {}
