//! Error types for computed-node operations.

use std::fmt;
use std::sync::Arc;

use crate::node::ComputedState;

/// Errors raised by computed-node operations.
///
/// `WrongState` and `Cancelled` travel on the operation channel and surface to
/// the caller immediately. `Failed` is the result channel: it is stored as a
/// node's output and re-raised only when the output is unwrapped.
#[derive(Debug, Clone)]
pub enum ComputeError {
    /// An operation was invoked in a state that forbids it.
    ///
    /// This is a programmer error: reading the output of a node that is still
    /// computing, setting the output twice, or wiring edges against the
    /// lifecycle rules.
    WrongState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the node was in.
        state: ComputedState,
    },

    /// The computation was cancelled before it produced an output.
    ///
    /// Cancellation never converts into an invalidation; it propagates
    /// verbatim from the compute function.
    Cancelled,

    /// The compute function failed.
    ///
    /// Carried inside the node's output so that dependents observe the same
    /// failure until the node is invalidated and recomputed.
    Failed(Arc<dyn std::error::Error + Send + Sync>),
}

impl ComputeError {
    /// Wrap an arbitrary error as a stored computation failure.
    pub fn failed(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ComputeError::Failed(Arc::new(error))
    }

    /// Returns true if this is the cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ComputeError::Cancelled)
    }
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::WrongState { operation, state } => {
                write!(f, "{} is not allowed while the node is {:?}", operation, state)
            }
            ComputeError::Cancelled => write!(f, "computation cancelled"),
            ComputeError::Failed(error) => write!(f, "computation failed: {}", error),
        }
    }
}

impl std::error::Error for ComputeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComputeError::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}
