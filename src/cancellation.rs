use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ComputeError;

/// A cooperative cancellation flag.
///
/// `update`/`use_value` forward the token verbatim to the compute function,
/// which is expected to poll it at its own suspension points. A cancelled
/// computation surfaces [`ComputeError::Cancelled`] and leaves the dependency
/// graph untouched; cancellation never converts into an invalidation.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is never cancelled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Request cancellation. Irrevocable.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(ComputeError::Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), ComputeError> {
        if self.is_cancelled() {
            Err(ComputeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
