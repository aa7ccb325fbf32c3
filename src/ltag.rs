use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// LTag is an opaque 64-bit version token distinguishing successive
/// computations of the same input from one another.
///
/// Tags carry no ordering semantics across inputs; they are only compared for
/// equality, to tell whether a cached node still is the incarnation a reverse
/// edge was installed against.
///
/// # Examples
///
/// ```
/// # use computed_flow::LTag;
/// assert_ne!(LTag::generate(), LTag::generate());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LTag(pub u64);

static NEXT_LTAG: AtomicU64 = AtomicU64::new(1);

impl LTag {
    /// Mint a process-wide unique tag.
    pub fn generate() -> Self {
        LTag(NEXT_LTAG.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for LTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}", self.0)
    }
}

impl fmt::Display for LTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_unique() {
        let tags: Vec<LTag> = (0..1000).map(|_| LTag::generate()).collect();
        for pair in tags.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_format_is_compact() {
        assert_eq!(format!("{}", LTag(0x2a)), "@2a");
        assert_eq!(format!("{:?}", LTag(0x2a)), "@2a");
    }
}
