//! Same-value comparison used by state cells, context channels and
//! dependency lists.
//!
//! Scalars and strings compare by value. Floats compare by bit pattern, so
//! `NaN` is the same as `NaN` and `0.0` is not the same as `-0.0`. Shared
//! pointers (`Rc`, `Arc`) compare by identity and never look at what they
//! point to: a fresh allocation with equal contents counts as a change.

use std::rc::Rc;
use std::sync::Arc;

/// Equality function a cell or channel uses to decide whether a write changed
/// anything.
pub type EqualsFn<T> = fn(&T, &T) -> bool;

pub trait SameValue {
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! same_value_by_eq {
    ($($t:ty),* $(,)?) => {
        $(
            impl SameValue for $t {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
    &'static str,
);

impl SameValue for f32 {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl SameValue for f64 {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl<T: ?Sized> SameValue for Rc<T> {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> SameValue for Arc<T> {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_value(b),
            _ => false,
        }
    }
}

impl<A: SameValue, B: SameValue> SameValue for (A, B) {
    fn same_value(&self, other: &Self) -> bool {
        self.0.same_value(&other.0) && self.1.same_value(&other.1)
    }
}

/// Free-function form, usable as an [`EqualsFn`].
#[inline]
pub fn same_value<T: SameValue>(a: &T, b: &T) -> bool {
    a.same_value(b)
}
