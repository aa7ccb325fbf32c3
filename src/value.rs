//! Values computed nodes can hold.

use std::sync::Arc;

use crate::ComputeError;

/// The stored outcome of one computation: the produced value, or the error it
/// failed with.
pub type ComputedResult<T> = Result<T, ComputeError>;

/// A value a computed node can produce.
///
/// `freeze` is invoked exactly once, immediately before the value becomes
/// observable to other tasks. The default is a no-op; implement it for values
/// with interior mutability that should be sealed once published.
pub trait ComputedValue: Clone + Send + Sync + 'static {
    /// Seal the value against further mutation.
    fn freeze(&self) {}
}

macro_rules! plain_values {
    ($($ty:ty),* $(,)?) => {
        $(impl ComputedValue for $ty {})*
    };
}

plain_values!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: ComputedValue> ComputedValue for Option<T> {
    fn freeze(&self) {
        if let Some(value) = self {
            value.freeze();
        }
    }
}

impl<T: ComputedValue> ComputedValue for Vec<T> {
    fn freeze(&self) {
        for value in self {
            value.freeze();
        }
    }
}

impl<T: ComputedValue> ComputedValue for Arc<T> {
    fn freeze(&self) {
        (**self).freeze();
    }
}
