//! Ambient per-call context.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use crate::node::AnyComputed;

bitflags::bitflags! {
    /// Call flags read by `update` and by [`Input`](crate::Input)
    /// implementations.
    ///
    /// Bits the core does not recognize are preserved and forwarded untouched,
    /// so function implementations may define their own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CallOptions: u32 {
        /// Record the observed computed into the context's capture slot.
        const CAPTURE = 0b0001;
        /// Force a `Consistent -> Invalidated` transition as a side effect of
        /// `update`.
        const INVALIDATE = 0b0010;
        /// Ask the function for an already-cached node only, never computing.
        const GET_EXISTING = 0b0100;
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions::empty()
    }
}

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Arc<ComputeContext>>> = RefCell::new(None);
}

static DEFAULT_CONTEXT: LazyLock<Arc<ComputeContext>> =
    LazyLock::new(|| Arc::new(ComputeContext::new(CallOptions::empty())));

/// Ambient per-call context: call flags plus an optional capture slot.
///
/// A context reaches an operation either explicitly, as an argument, or
/// ambiently, through a task-local slot filled by [`ComputeContext::install`].
/// Passing no context means "use whatever is ambient; otherwise a flagless
/// default".
#[derive(Debug, Default)]
pub struct ComputeContext {
    call_options: CallOptions,
    captured: Mutex<Option<Arc<dyn AnyComputed>>>,
}

impl ComputeContext {
    /// Create a context with the given call flags.
    pub fn new(call_options: CallOptions) -> Self {
        ComputeContext {
            call_options,
            captured: Mutex::new(None),
        }
    }

    /// The context's call flags.
    pub fn call_options(&self) -> CallOptions {
        self.call_options
    }

    /// The context installed on this task, if any.
    pub fn current() -> Option<Arc<ComputeContext>> {
        CURRENT_CONTEXT.with(|slot| slot.borrow().clone())
    }

    /// Resolve an explicit context against the ambient one: explicit wins,
    /// then the installed context, then a shared flagless default.
    pub fn resolve(explicit: Option<&Arc<ComputeContext>>) -> Arc<ComputeContext> {
        explicit
            .cloned()
            .or_else(Self::current)
            .unwrap_or_else(|| DEFAULT_CONTEXT.clone())
    }

    /// Install this context as the task-local ambient context.
    ///
    /// The previous context is restored when the returned scope drops, on
    /// every exit path.
    pub fn install(self: Arc<Self>) -> ContextScope {
        let previous = CURRENT_CONTEXT.with(|slot| slot.borrow_mut().replace(self));
        ContextScope {
            previous,
            _not_send: PhantomData,
        }
    }

    /// Record an observed computed, if this context captures.
    ///
    /// The first write wins; later observations are ignored.
    pub fn try_capture(&self, computed: Arc<dyn AnyComputed>) {
        if !self.call_options.contains(CallOptions::CAPTURE) {
            return;
        }
        let mut slot = self.captured.lock();
        if slot.is_none() {
            *slot = Some(computed);
        }
    }

    /// The captured computed, if any.
    pub fn captured(&self) -> Option<Arc<dyn AnyComputed>> {
        self.captured.lock().clone()
    }
}

/// Restores the previously-installed context on drop.
#[must_use = "dropping the scope immediately restores the previous context"]
pub struct ContextScope {
    previous: Option<Arc<ComputeContext>>,
    // Scopes restore the slot they came from; keep them on their thread.
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScope").finish_non_exhaustive()
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = self.previous.take());
    }
}
