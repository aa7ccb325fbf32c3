use std::time::Duration;

/// Immutable knob bag carried by a computed node.
///
/// A `None` timeout disables the corresponding auto-invalidation. Options may
/// be replaced only while a node is still computing; once the output is set
/// they are fixed for the node's lifetime.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use computed_flow::ComputedOptions;
/// let options = ComputedOptions::NONE.with_error_auto_invalidate(Duration::from_secs(1));
/// assert_eq!(options.auto_invalidate_time, None);
/// assert_eq!(options.error_auto_invalidate_time, Some(Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComputedOptions {
    /// Timeout after which a successful output auto-invalidates.
    pub auto_invalidate_time: Option<Duration>,
    /// Timeout after which an error output auto-invalidates.
    pub error_auto_invalidate_time: Option<Duration>,
}

impl ComputedOptions {
    /// Options with both timers disabled.
    pub const NONE: Self = ComputedOptions {
        auto_invalidate_time: None,
        error_auto_invalidate_time: None,
    };

    /// Set the timeout for successful outputs.
    #[must_use]
    pub fn with_auto_invalidate(mut self, after: Duration) -> Self {
        self.auto_invalidate_time = Some(after);
        self
    }

    /// Set the timeout for error outputs.
    #[must_use]
    pub fn with_error_auto_invalidate(mut self, after: Duration) -> Self {
        self.error_auto_invalidate_time = Some(after);
        self
    }

    /// The timeout applying to an output of the given kind, if any.
    pub(crate) fn timeout_for(&self, is_error: bool) -> Option<Duration> {
        if is_error {
            self.error_auto_invalidate_time
        } else {
            self.auto_invalidate_time
        }
    }
}
