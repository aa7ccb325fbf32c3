use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Moment is a coarse monotonic timestamp: nanoseconds since a process-local
/// epoch.
///
/// Reading the clock is cheap enough to do on every node touch, which is what
/// external eviction policies use it for.
///
/// # Examples
///
/// ```
/// # use computed_flow::Moment;
/// let earlier = Moment::now();
/// let later = Moment::now();
/// assert!(earlier <= later);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Moment(pub u64);

impl Moment {
    /// Read the clock.
    pub fn now() -> Self {
        Moment(EPOCH.elapsed().as_nanos() as u64)
    }

    /// Nanoseconds since the process-local epoch.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Duration from this moment to `later`; zero when `later` is not later.
    pub fn elapsed_until(self, later: Moment) -> Duration {
        Duration::from_nanos(later.0.saturating_sub(self.0))
    }
}

impl fmt::Debug for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}ns", self.0)
    }
}
