//! The task-local current-computation slot.
//!
//! While a compute function builds a node, the node is installed here so that
//! nested `update`/`use_value` calls can attach dependency edges onto it
//! implicitly. The slot's lifetime is strictly nested with the compute call;
//! the scope guard restores the previous value on every exit path.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::node::AnyComputed;

thread_local! {
    static CURRENT_COMPUTATION: RefCell<Option<Arc<dyn AnyComputed>>> = RefCell::new(None);
}

/// The computed currently being built on this task, if any.
pub fn current_computation() -> Option<Arc<dyn AnyComputed>> {
    CURRENT_COMPUTATION.with(|slot| slot.borrow().clone())
}

/// Install `computed` as the current computation for the duration of the
/// returned scope.
///
/// Called by function implementations around the user's compute body. The
/// previous value comes back when the scope drops, also on panic.
pub fn enter_computation(computed: Arc<dyn AnyComputed>) -> ComputationScope {
    let previous = CURRENT_COMPUTATION.with(|slot| slot.borrow_mut().replace(computed));
    ComputationScope {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previous current computation on drop.
#[must_use = "dropping the scope immediately restores the previous computation"]
pub struct ComputationScope {
    previous: Option<Arc<dyn AnyComputed>>,
    _not_send: PhantomData<*const ()>,
}

impl fmt::Debug for ComputationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationScope").finish_non_exhaustive()
    }
}

impl Drop for ComputationScope {
    fn drop(&mut self) {
        CURRENT_COMPUTATION.with(|slot| *slot.borrow_mut() = self.previous.take());
    }
}
