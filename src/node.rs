//! The computed node: state machine, output protocol, and dependency edges.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::{CallOptions, ComputeContext};
use crate::current::current_computation;
use crate::key::ComputedKey;
use crate::timer::AutoInvalidateTimer;
use crate::{
    CancellationToken, ComputeError, ComputedOptions, ComputedResult, ComputedValue, Input, LTag,
    Moment,
};

/// The lifecycle states of a computed node.
///
/// The order is monotonic: a node only ever moves forward through
/// `Computing < Consistent < Invalidated`, and `Invalidated` is terminal.
/// Because no transition goes backwards, the state may be read without the
/// node's lock; a racing reader sees an older state, never an illegal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ComputedState {
    /// The node is being built; its output is not yet readable.
    Computing = 0,
    /// The node holds a valid output.
    Consistent = 1,
    /// The node's output is stale. Terminal.
    Invalidated = 2,
}

impl ComputedState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ComputedState::Computing,
            1 => ComputedState::Consistent,
            _ => ComputedState::Invalidated,
        }
    }
}

/// Object-safe view of a computed node, independent of its input and value
/// types.
///
/// Dependency edges and the task-local current-computation slot are typed
/// against this, which is what lets nodes of different input types form one
/// graph.
pub trait AnyComputed: fmt::Debug + Send + Sync + 'static {
    /// The tag of this incarnation.
    fn ltag(&self) -> LTag;

    /// Current state; readable without the node's lock.
    fn state(&self) -> ComputedState;

    /// The identity pair `(input, ltag)` of this node.
    fn key(&self) -> ComputedKey;

    /// Mark the node invalidated and cascade along reverse edges.
    ///
    /// Returns `false` when it already was invalidated.
    fn invalidate(&self) -> bool;

    /// Record an access for external eviction policies.
    fn touch(&self);

    /// The moment of the last recorded access.
    fn last_access(&self) -> Moment;

    /// Install a forward edge from this (currently computing) node onto
    /// `dependency`, together with the matching reverse edge.
    fn add_used(&self, dependency: Arc<dyn AnyComputed>) -> Result<(), ComputeError>;

    /// Install `dependent` as a reverse edge on this node.
    fn add_used_by(&self, dependent: &dyn AnyComputed) -> Result<(), ComputeError>;

    /// Drop the reverse edge to `dependent`, if present. Always legal.
    fn remove_used_by(&self, dependent: &ComputedKey);

    /// Register a handler fired exactly once on invalidation.
    ///
    /// A handler registered after the transition fires synchronously, during
    /// registration.
    fn on_invalidated(&self, handler: Box<dyn FnOnce() + Send>);
}

struct Inner<I: Input> {
    options: ComputedOptions,
    output: Option<ComputedResult<I::Value>>,
    /// Forward edges: nodes this one read while computing. Strong.
    used: ahash::HashMap<ComputedKey, Arc<dyn AnyComputed>>,
    /// Reverse edges: identity pairs of dependents, resolved through the
    /// external cache at cascade time. Holds no node references.
    used_by: ahash::HashSet<ComputedKey>,
    invalidated_handlers: Vec<Box<dyn FnOnce() + Send>>,
    invalidate_on_set_output: bool,
}

/// A memoized function-result node: one function's output for one argument,
/// with a lifecycle and bidirectional dependency edges.
///
/// Nodes are created by the function layer in one of two shapes: blank, in
/// [`ComputedState::Computing`], to be filled by the compute body; or
/// pre-baked, constructed directly with an output. All mutation of the
/// output, the edge sets, and the deferred-invalidation flag happens under
/// the node's own lock.
pub struct Computed<I: Input> {
    input: I,
    key: ComputedKey,
    state: AtomicU8,
    last_access: AtomicU64,
    weak_self: Weak<Computed<I>>,
    inner: Mutex<Inner<I>>,
}

impl<I: Input> Computed<I> {
    /// Create a blank node in [`ComputedState::Computing`], to be filled via
    /// [`Computed::set_output`].
    pub fn new_computing(input: I, ltag: LTag, options: ComputedOptions) -> Arc<Self> {
        Self::with_state(input, ltag, options, ComputedState::Computing, None)
    }

    /// Create a pre-baked consistent node holding `output`.
    ///
    /// Pre-baked outputs arm no auto-invalidate timer; the timer belongs to
    /// the `Computing -> Consistent` transition only.
    pub fn new_consistent(
        input: I,
        ltag: LTag,
        output: ComputedResult<I::Value>,
        options: ComputedOptions,
    ) -> Arc<Self> {
        Self::with_state(input, ltag, options, ComputedState::Consistent, Some(output))
    }

    /// Create a pre-baked node that is already invalidated.
    pub fn new_invalidated(
        input: I,
        ltag: LTag,
        output: ComputedResult<I::Value>,
        options: ComputedOptions,
    ) -> Arc<Self> {
        Self::with_state(input, ltag, options, ComputedState::Invalidated, Some(output))
    }

    fn with_state(
        input: I,
        ltag: LTag,
        options: ComputedOptions,
        state: ComputedState,
        output: Option<ComputedResult<I::Value>>,
    ) -> Arc<Self> {
        if let Some(Ok(value)) = &output {
            value.freeze();
        }
        Arc::new_cyclic(|weak| Computed {
            key: ComputedKey::new(input.clone(), ltag),
            input,
            state: AtomicU8::new(state as u8),
            last_access: AtomicU64::new(Moment::now().as_nanos()),
            weak_self: weak.clone(),
            inner: Mutex::new(Inner {
                options,
                output,
                used: ahash::HashMap::default(),
                used_by: ahash::HashSet::default(),
                invalidated_handlers: Vec::new(),
                invalidate_on_set_output: false,
            }),
        })
    }

    fn strong(&self) -> Arc<Self> {
        self.weak_self
            .upgrade()
            .expect("computed nodes are always owned by an Arc")
    }

    /// The input this node was computed for.
    pub fn input(&self) -> &I {
        &self.input
    }

    /// The tag distinguishing this incarnation from its successors.
    pub fn ltag(&self) -> LTag {
        self.key.ltag()
    }

    /// The identity pair `(input, ltag)` of this node.
    pub fn key(&self) -> ComputedKey {
        self.key.clone()
    }

    /// Current state; readable without the node's lock.
    pub fn state(&self) -> ComputedState {
        ComputedState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while the node holds a valid output.
    pub fn is_consistent(&self) -> bool {
        self.state() == ComputedState::Consistent
    }

    /// True once the node has been invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.state() == ComputedState::Invalidated
    }

    /// The node's options.
    pub fn options(&self) -> ComputedOptions {
        self.inner.lock().options
    }

    /// Replace the node's options. Legal only while computing.
    pub fn set_options(&self, options: ComputedOptions) -> Result<(), ComputeError> {
        let mut inner = self.inner.lock();
        if self.state() != ComputedState::Computing {
            return Err(ComputeError::WrongState {
                operation: "set_options",
                state: self.state(),
            });
        }
        inner.options = options;
        Ok(())
    }

    /// The stored output.
    ///
    /// Readable only once the node has left [`ComputedState::Computing`];
    /// invalidation does not clear it.
    pub fn output(&self) -> Result<ComputedResult<I::Value>, ComputeError> {
        let inner = self.inner.lock();
        match &inner.output {
            Some(output) => Ok(output.clone()),
            None => Err(ComputeError::WrongState {
                operation: "output",
                state: self.state(),
            }),
        }
    }

    /// The stored value; re-raises the stored error.
    pub fn value(&self) -> Result<I::Value, ComputeError> {
        self.output()?
    }

    /// Number of forward edges currently installed.
    pub fn used_count(&self) -> usize {
        self.inner.lock().used.len()
    }

    /// Number of reverse edges currently installed.
    pub fn used_by_count(&self) -> usize {
        self.inner.lock().used_by.len()
    }

    /// Record an access now. Concurrent touches leave the access time
    /// non-decreasing.
    pub fn touch(&self) {
        self.last_access
            .fetch_max(Moment::now().as_nanos(), Ordering::AcqRel);
    }

    /// The moment of the last recorded access.
    pub fn last_access(&self) -> Moment {
        Moment(self.last_access.load(Ordering::Acquire))
    }

    /// Publish the node's output, transitioning `Computing -> Consistent`.
    ///
    /// Returns `false` when the node is not computing. Successful values are
    /// frozen before they become observable. An `invalidate` recorded while
    /// the node was still computing takes effect immediately after the
    /// transition; otherwise a finite auto-invalidate timeout arms the
    /// one-shot timer.
    pub fn try_set_output(&self, output: ComputedResult<I::Value>) -> bool {
        if let Ok(value) = &output {
            value.freeze();
        }
        let is_error = output.is_err();
        let deferred;
        let timeout;
        {
            let mut inner = self.inner.lock();
            if self.state() != ComputedState::Computing {
                return false;
            }
            inner.output = Some(output);
            self.state
                .store(ComputedState::Consistent as u8, Ordering::Release);
            deferred = std::mem::take(&mut inner.invalidate_on_set_output);
            timeout = if deferred {
                None
            } else {
                inner.options.timeout_for(is_error)
            };
        }
        debug!(node = ?self.key, "output set");
        if deferred {
            trace!(node = ?self.key, "applying invalidation deferred while computing");
            self.invalidate();
        } else if let Some(after) = timeout {
            let target: Weak<dyn AnyComputed> = self.weak_self.clone();
            let timer = AutoInvalidateTimer::arm(target, after);
            self.on_invalidated(move || timer.cancel());
        }
        true
    }

    /// [`Computed::try_set_output`] that errors instead of returning `false`.
    pub fn set_output(&self, output: ComputedResult<I::Value>) -> Result<(), ComputeError> {
        if self.try_set_output(output) {
            Ok(())
        } else {
            Err(ComputeError::WrongState {
                operation: "set_output",
                state: self.state(),
            })
        }
    }

    /// Register a handler fired exactly once when the node is invalidated.
    ///
    /// A handler registered after the transition fires synchronously, here.
    /// Handlers run outside the node's lock; a panicking handler is dropped.
    pub fn on_invalidated(&self, handler: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.inner.lock();
            if self.state() != ComputedState::Invalidated {
                inner.invalidated_handlers.push(Box::new(handler));
                return;
            }
        }
        run_handler(Box::new(handler));
    }

    /// Invalidate the node.
    ///
    /// While the node is computing this only records the intent; the actual
    /// transition happens when the output is set. Otherwise the node moves to
    /// [`ComputedState::Invalidated`], its handlers fire, and the invalidation
    /// cascades to every dependent still resolvable through the cache.
    /// Returns `false` when the node was already invalidated.
    pub fn invalidate(&self) -> bool {
        if self.state() == ComputedState::Invalidated {
            return false;
        }
        let dependents;
        let handlers;
        {
            let mut inner = self.inner.lock();
            match self.state() {
                ComputedState::Invalidated => return false,
                ComputedState::Computing => {
                    trace!(node = ?self.key, "invalidation deferred until output is set");
                    inner.invalidate_on_set_output = true;
                    return true;
                }
                ComputedState::Consistent => {}
            }
            self.state
                .store(ComputedState::Invalidated as u8, Ordering::Release);
            dependents = std::mem::take(&mut inner.used_by);
            handlers = std::mem::take(&mut inner.invalidated_handlers);
            // Dependencies must forget this node before the lock drops, so no
            // one observes an invalidated node still listed as a dependent.
            // The dependent -> dependency lock order matches edge
            // installation; the graph is acyclic, so nesting is safe.
            for (_, dependency) in std::mem::take(&mut inner.used) {
                dependency.remove_used_by(&self.key);
            }
        }
        debug!(node = ?self.key, dependents = dependents.len(), "invalidated");
        // Local handlers observe the invalidation before the cascade reaches
        // any dependent.
        for handler in handlers {
            run_handler(handler);
        }
        // Walk the reverse edges; a dependent the cache has evicted is
        // skipped. Sibling order is unspecified.
        for dependent in dependents {
            match dependent.resolve() {
                Some(node) => {
                    node.invalidate();
                }
                None => trace!(key = ?dependent, "dependent evicted, skipping"),
            }
        }
        true
    }

    /// Install a forward edge onto `dependency`, together with the matching
    /// reverse edge on it.
    ///
    /// Legal only while this node is computing; a consistent node raises
    /// [`ComputeError::WrongState`], an invalidated one drops the edge
    /// silently. A dependency that turns out to be invalidated invalidates
    /// this node instead of accepting the edge.
    pub fn add_used(&self, dependency: Arc<dyn AnyComputed>) -> Result<(), ComputeError> {
        match self.state() {
            ComputedState::Consistent => {
                return Err(ComputeError::WrongState {
                    operation: "add_used",
                    state: ComputedState::Consistent,
                })
            }
            // Late edge; nothing depends on keeping it.
            ComputedState::Invalidated => return Ok(()),
            ComputedState::Computing => {}
        }
        // Reverse edge first, outside our own lock: if the dependency is
        // already invalidated it invalidates us, and the re-check below
        // drops the forward edge again.
        dependency.add_used_by(self)?;
        let mut inner = self.inner.lock();
        if self.state() == ComputedState::Computing && !inner.invalidate_on_set_output {
            trace!(node = ?self.key, dependency = ?dependency.key(), "used edge installed");
            inner.used.insert(dependency.key(), dependency);
            Ok(())
        } else {
            drop(inner);
            dependency.remove_used_by(&self.key);
            Ok(())
        }
    }

    /// Install `dependent` as a reverse edge on this node.
    ///
    /// A node that has not produced a value yet cannot be depended on and
    /// raises [`ComputeError::WrongState`]; callers are expected to compute
    /// dependencies to consistency before wiring dependents onto them. An
    /// already-invalidated node invalidates the incoming dependent instead.
    pub fn add_used_by(&self, dependent: &dyn AnyComputed) -> Result<(), ComputeError> {
        {
            let mut inner = self.inner.lock();
            match self.state() {
                ComputedState::Computing => {
                    return Err(ComputeError::WrongState {
                        operation: "add_used_by",
                        state: ComputedState::Computing,
                    })
                }
                ComputedState::Consistent => {
                    inner.used_by.insert(dependent.key());
                    return Ok(());
                }
                ComputedState::Invalidated => {}
            }
        }
        // The incoming dependent is already stale.
        trace!(node = ?self.key, dependent = ?dependent.key(), "dependency stale, invalidating dependent");
        dependent.invalidate();
        Ok(())
    }

    /// Drop the reverse edge to `dependent`, if present. Always legal.
    pub fn remove_used_by(&self, dependent: &ComputedKey) {
        self.inner.lock().used_by.remove(dependent);
    }

    /// Return a consistent node for this input, recomputing through the
    /// function when stale.
    ///
    /// When `add_dependency` is set and a computation is currently being
    /// built on this task, a `used` edge is registered onto it. `ctx` is
    /// installed as the ambient context for the remainder of the call; the
    /// effective context's [`CallOptions::INVALIDATE`] flag forces staleness
    /// as a side effect. `cancel` is forwarded verbatim to the function.
    pub fn update(
        &self,
        add_dependency: bool,
        ctx: Option<&Arc<ComputeContext>>,
        cancel: &CancellationToken,
    ) -> Result<Arc<Computed<I>>, ComputeError> {
        let used_by = if add_dependency {
            current_computation()
        } else {
            None
        };
        if self.state() != ComputedState::Consistent {
            // The function deduplicates in-flight work and installs the edge
            // on the fresh result.
            return self.input.invoke(used_by, ctx, cancel);
        }
        self.touch();
        let _scope = ctx.map(|ctx| ctx.clone().install());
        let effective = ComputeContext::resolve(ctx);
        if effective.call_options().contains(CallOptions::INVALIDATE) {
            // The caller wants staleness, not a recomputation.
            self.invalidate();
        }
        let this = self.strong();
        if let Some(used_by) = used_by {
            used_by.add_used(this.clone())?;
        }
        if let Some(ctx) = ctx {
            ctx.try_capture(this.clone());
        }
        Ok(this)
    }

    /// [`Computed::update`] plus unwrap: attach a dependency edge onto the
    /// current computation and return the value, re-raising a stored error.
    pub fn use_value(
        &self,
        ctx: Option<&Arc<ComputeContext>>,
        cancel: &CancellationToken,
    ) -> Result<I::Value, ComputeError> {
        let computed = self.update(true, ctx, cancel)?;
        computed.value()
    }
}

impl<I: Input> AnyComputed for Computed<I> {
    fn ltag(&self) -> LTag {
        Computed::ltag(self)
    }

    fn state(&self) -> ComputedState {
        Computed::state(self)
    }

    fn key(&self) -> ComputedKey {
        Computed::key(self)
    }

    fn invalidate(&self) -> bool {
        Computed::invalidate(self)
    }

    fn touch(&self) {
        Computed::touch(self)
    }

    fn last_access(&self) -> Moment {
        Computed::last_access(self)
    }

    fn add_used(&self, dependency: Arc<dyn AnyComputed>) -> Result<(), ComputeError> {
        Computed::add_used(self, dependency)
    }

    fn add_used_by(&self, dependent: &dyn AnyComputed) -> Result<(), ComputeError> {
        Computed::add_used_by(self, dependent)
    }

    fn remove_used_by(&self, dependent: &ComputedKey) {
        Computed::remove_used_by(self, dependent)
    }

    fn on_invalidated(&self, handler: Box<dyn FnOnce() + Send>) {
        Computed::on_invalidated(self, handler)
    }
}

impl<I: Input> fmt::Debug for Computed<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("input", &self.input)
            .field("ltag", &self.ltag())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// Invalidation must not fail: a panicking handler is dropped.
fn run_handler(handler: Box<dyn FnOnce() + Send>) {
    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(handler)).is_err() {
        debug!("invalidation handler panicked, dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::current::enter_computation;

    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    struct TestInput(&'static str);

    impl Input for TestInput {
        type Value = i64;

        fn invoke(
            &self,
            _used_by: Option<Arc<dyn AnyComputed>>,
            _ctx: Option<&Arc<ComputeContext>>,
            _cancel: &CancellationToken,
        ) -> Result<Arc<Computed<Self>>, ComputeError> {
            unreachable!("state-machine tests never recompute")
        }

        fn try_get_cached(&self, _ltag: LTag) -> Option<Arc<Computed<Self>>> {
            None
        }
    }

    fn computing(name: &'static str) -> Arc<Computed<TestInput>> {
        Computed::new_computing(TestInput(name), LTag::generate(), ComputedOptions::NONE)
    }

    fn consistent(name: &'static str, value: i64) -> Arc<Computed<TestInput>> {
        Computed::new_consistent(
            TestInput(name),
            LTag::generate(),
            Ok(value),
            ComputedOptions::NONE,
        )
    }

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Computed<TestInput>>();
        assert_sync::<Computed<TestInput>>();
    }

    #[test]
    fn test_output_transitions_to_consistent() {
        let node = computing("n");
        assert_eq!(node.state(), ComputedState::Computing);
        assert!(matches!(
            node.output(),
            Err(ComputeError::WrongState { operation: "output", .. })
        ));

        assert!(node.try_set_output(Ok(7)));
        assert_eq!(node.state(), ComputedState::Consistent);
        assert_eq!(node.value().unwrap(), 7);
    }

    #[test]
    fn test_output_is_written_once() {
        let node = computing("n");
        assert!(node.try_set_output(Ok(1)));
        assert!(!node.try_set_output(Ok(2)));
        assert!(node.set_output(Ok(3)).is_err());
        assert_eq!(node.value().unwrap(), 1);

        node.invalidate();
        assert!(!node.try_set_output(Ok(4)));
        assert_eq!(node.value().unwrap(), 1);
    }

    #[test]
    fn test_stored_error_is_reraised() {
        #[derive(Debug)]
        struct Broken;
        impl fmt::Display for Broken {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "broken")
            }
        }
        impl std::error::Error for Broken {}

        let node = computing("n");
        assert!(node.try_set_output(Err(ComputeError::failed(Broken))));
        assert_eq!(node.state(), ComputedState::Consistent);
        assert!(matches!(node.value(), Err(ComputeError::Failed(_))));
    }

    #[test]
    fn test_invalidate_consistent_node() {
        let node = consistent("n", 1);
        assert!(node.invalidate());
        assert_eq!(node.state(), ComputedState::Invalidated);
        // Terminal: a second call is a no-op.
        assert!(!node.invalidate());
        // The output survives invalidation.
        assert_eq!(node.value().unwrap(), 1);
    }

    #[test]
    fn test_invalidate_while_computing_defers() {
        let node = computing("n");
        assert!(node.invalidate());
        assert_eq!(node.state(), ComputedState::Computing);

        let fired = Arc::new(AtomicUsize::new(0));
        let count = fired.clone();
        node.on_invalidated(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(node.try_set_output(Ok(5)));
        assert_eq!(node.state(), ComputedState::Invalidated);
        assert_eq!(node.value().unwrap(), 5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_fire_exactly_once() {
        let node = consistent("n", 1);
        let fired = Arc::new(AtomicUsize::new(0));

        let count = fired.clone();
        node.on_invalidated(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(node.invalidate());
        assert!(!node.invalidate());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Registered late: fires synchronously, once.
        let count = fired.clone();
        node.on_invalidated(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_is_swallowed() {
        let node = consistent("n", 1);
        let fired = Arc::new(AtomicUsize::new(0));

        node.on_invalidated(|| panic!("handler bug"));
        let count = fired.clone();
        node.on_invalidated(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert!(node.invalidate());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_options_only_while_computing() {
        let node = computing("n");
        let options =
            ComputedOptions::NONE.with_auto_invalidate(std::time::Duration::from_secs(3600));
        node.set_options(options).unwrap();
        assert_eq!(node.options(), options);

        // Arms no timer: the node is invalidated before the hour is up.
        node.invalidate();
        assert!(node.try_set_output(Ok(1)));
        assert!(matches!(
            node.set_options(ComputedOptions::NONE),
            Err(ComputeError::WrongState { .. })
        ));
    }

    #[test]
    fn test_add_used_state_rules() {
        let dependency = consistent("a", 1);

        // A consistent node cannot grow new dependencies.
        let settled = consistent("b", 2);
        assert!(matches!(
            settled.add_used(dependency.clone() as Arc<dyn AnyComputed>),
            Err(ComputeError::WrongState { operation: "add_used", .. })
        ));

        // An invalidated node drops the edge silently.
        let stale = consistent("c", 3);
        stale.invalidate();
        stale
            .add_used(dependency.clone() as Arc<dyn AnyComputed>)
            .unwrap();
        assert_eq!(stale.used_count(), 0);
        assert_eq!(dependency.used_by_count(), 0);

        // A computing node installs both halves.
        let building = computing("d");
        building
            .add_used(dependency.clone() as Arc<dyn AnyComputed>)
            .unwrap();
        assert_eq!(building.used_count(), 1);
        assert_eq!(dependency.used_by_count(), 1);
    }

    #[test]
    fn test_add_used_by_rejects_computing_dependency() {
        let dependency = computing("a");
        let dependent = computing("b");
        assert!(matches!(
            dependency.add_used_by(dependent.as_ref()),
            Err(ComputeError::WrongState { operation: "add_used_by", .. })
        ));
    }

    #[test]
    fn test_stale_dependency_invalidates_incoming_dependent() {
        let dependency = consistent("a", 1);
        dependency.invalidate();

        let dependent = computing("b");
        dependent
            .add_used(dependency.clone() as Arc<dyn AnyComputed>)
            .unwrap();

        // The intent was recorded while computing; output lands invalidated.
        assert!(dependent.try_set_output(Ok(2)));
        assert_eq!(dependent.state(), ComputedState::Invalidated);
        assert_eq!(dependent.used_count(), 0);
    }

    #[test]
    fn test_invalidate_clears_both_edge_sets() {
        let dependency = consistent("a", 1);
        let node = computing("b");
        node.add_used(dependency.clone() as Arc<dyn AnyComputed>)
            .unwrap();
        assert!(node.try_set_output(Ok(2)));

        assert!(node.invalidate());
        assert_eq!(node.used_count(), 0);
        assert_eq!(node.used_by_count(), 0);
        // The dependency forgot about this node too.
        assert_eq!(dependency.used_by_count(), 0);
    }

    #[test]
    fn test_cascade_skips_evicted_dependents() {
        // TestInput::try_get_cached never resolves, which is exactly what an
        // evicting cache looks like to the cascade.
        let dependency = consistent("a", 1);
        let dependent = computing("b");
        dependent
            .add_used(dependency.clone() as Arc<dyn AnyComputed>)
            .unwrap();
        assert!(dependent.try_set_output(Ok(2)));

        assert!(dependency.invalidate());
        assert_eq!(dependency.state(), ComputedState::Invalidated);
        assert_eq!(dependent.state(), ComputedState::Consistent);
    }

    #[test]
    fn test_freeze_runs_once_before_publish() {
        #[derive(Clone, Debug)]
        struct Sealed(Arc<AtomicUsize>);
        impl ComputedValue for Sealed {
            fn freeze(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[derive(Clone, PartialEq, Eq, Hash, Debug)]
        struct SealedInput;
        impl Input for SealedInput {
            type Value = Sealed;

            fn invoke(
                &self,
                _used_by: Option<Arc<dyn AnyComputed>>,
                _ctx: Option<&Arc<ComputeContext>>,
                _cancel: &CancellationToken,
            ) -> Result<Arc<Computed<Self>>, ComputeError> {
                unreachable!()
            }

            fn try_get_cached(&self, _ltag: LTag) -> Option<Arc<Computed<Self>>> {
                None
            }
        }

        let freezes = Arc::new(AtomicUsize::new(0));
        let node = Computed::new_computing(SealedInput, LTag::generate(), ComputedOptions::NONE);
        assert!(node.try_set_output(Ok(Sealed(freezes.clone()))));
        assert_eq!(freezes.load(Ordering::SeqCst), 1);

        // Re-setting is rejected before the freeze hook could run again.
        assert!(!node.try_set_output(Ok(Sealed(freezes.clone()))));
        assert_eq!(freezes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_registers_edge_on_current_computation() {
        let dependency = consistent("a", 40);
        let dependent = computing("b");

        {
            let _scope = enter_computation(dependent.clone() as Arc<dyn AnyComputed>);
            let value = dependency
                .use_value(None, &CancellationToken::none())
                .unwrap();
            assert_eq!(value, 40);
        }

        assert_eq!(dependent.used_count(), 1);
        assert_eq!(dependency.used_by_count(), 1);

        // Without a current computation no edge appears.
        let lone = consistent("c", 1);
        lone.use_value(None, &CancellationToken::none()).unwrap();
        assert_eq!(lone.used_by_count(), 0);
    }

    #[test]
    fn test_update_with_invalidate_flag() {
        let node = consistent("a", 1);
        let ctx = Arc::new(ComputeContext::new(CallOptions::INVALIDATE));
        let updated = node.update(false, Some(&ctx), &CancellationToken::none()).unwrap();
        assert!(updated.is_invalidated());
        // The caller forced staleness; the stale value is still readable.
        assert_eq!(updated.value().unwrap(), 1);
    }

    #[test]
    fn test_update_captures_into_explicit_context() {
        let node = consistent("a", 1);
        let ctx = Arc::new(ComputeContext::new(CallOptions::CAPTURE));
        node.update(false, Some(&ctx), &CancellationToken::none())
            .unwrap();
        let captured = ctx.captured().expect("captured");
        assert_eq!(captured.ltag(), node.ltag());
    }

    #[test]
    fn test_touch_is_monotonic() {
        let node = consistent("a", 1);
        let first = node.last_access();
        node.touch();
        let second = node.last_access();
        assert!(first <= second);
        node.touch();
        assert!(second <= node.last_access());
    }
}
