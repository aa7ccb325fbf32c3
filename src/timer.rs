//! One-shot auto-invalidation timer.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::node::AnyComputed;

/// Invalidates a node after a timeout unless cancelled first.
///
/// The handle's `cancel` is registered as an invalidation handler on the node
/// itself, so it must tolerate being called from within `invalidate`: it only
/// flips a flag and wakes the timer thread, and a timer that already fired
/// makes the follow-up `invalidate` a no-op.
pub(crate) struct AutoInvalidateTimer {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl AutoInvalidateTimer {
    /// Arm a timer that invalidates `target` once `after` has elapsed.
    ///
    /// Holds only a weak reference: a node dropped by its cache lets the timer
    /// thread exit without firing.
    pub(crate) fn arm(target: Weak<dyn AnyComputed>, after: Duration) -> Arc<AutoInvalidateTimer> {
        let timer = Arc::new(AutoInvalidateTimer {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
        });
        let worker = timer.clone();
        std::thread::spawn(move || worker.run(target, after));
        timer
    }

    /// Cancel the timer. Idempotent.
    pub(crate) fn cancel(&self) {
        let mut cancelled = self.cancelled.lock();
        *cancelled = true;
        self.wake.notify_all();
    }

    fn run(&self, target: Weak<dyn AnyComputed>, after: Duration) {
        let deadline = Instant::now() + after;
        {
            let mut cancelled = self.cancelled.lock();
            loop {
                if *cancelled {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let _ = self.wake.wait_for(&mut cancelled, deadline - now);
            }
        }
        if let Some(node) = target.upgrade() {
            trace!(node = ?node.key(), "auto-invalidate timeout elapsed");
            node.invalidate();
        }
    }
}
