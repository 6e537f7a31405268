//! Dependency lists and the comparator that decides when memoized values and
//! effects must run again.
//!
//! ```rust
//! use ripple_core::{deps, Comparison, DependencyComparator};
//!
//! let first = deps![1, "a"];
//! assert_eq!(DependencyComparator::compare(None, &first), Comparison::Changed);
//!
//! let again = deps![1, "a"];
//! assert_eq!(
//!     DependencyComparator::compare(Some(&first), &again),
//!     Comparison::Unchanged
//! );
//! ```

use std::any::{Any, type_name};
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::SameValue;

trait DepKey: Any {
    fn same_key(&self, other: &dyn DepKey) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T: SameValue + 'static> DepKey for T {
    fn same_key(&self, other: &dyn DepKey) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| self.same_value(o))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One opaque entry of a dependency list.
#[derive(Clone)]
pub struct Dep {
    key: Rc<dyn DepKey>,
    type_name: &'static str,
}

impl Dep {
    pub fn new<T: SameValue + 'static>(value: T) -> Self {
        Self {
            key: Rc::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Same-value comparison; keys of different types never match.
    pub fn same(&self, other: &Dep) -> bool {
        // Deref explicitly: `Rc<dyn DepKey>` is itself a `DepKey` (by pointer).
        let key: &dyn DepKey = &*self.key;
        key.same_key(&*other.key)
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dep<{}>", self.type_name)
    }
}

/// Ordered dependency keys. Most call sites list a handful, so they live
/// inline.
#[derive(Clone, Debug, Default)]
pub struct DependencyList(SmallVec<[Dep; 4]>);

impl DependencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<T: SameValue + 'static>(&mut self, value: T) {
        self.0.push(Dep::new(value));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dep> {
        self.0.iter()
    }
}

impl FromIterator<Dep> for DependencyList {
    fn from_iter<I: IntoIterator<Item = Dep>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Builds a [`DependencyList`] from values implementing
/// [`SameValue`](crate::SameValue). Values are moved in; pass clones of
/// handles you still need.
#[macro_export]
macro_rules! deps {
    () => {
        $crate::deps::DependencyList::new()
    };
    ($($dep:expr),+ $(,)?) => {
        [$($crate::deps::Dep::new($dep)),+]
            .into_iter()
            .collect::<$crate::deps::DependencyList>()
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Unchanged,
    Changed,
    ArityChanged { previous: usize, current: usize },
}

impl Comparison {
    pub fn is_changed(self) -> bool {
        !matches!(self, Comparison::Unchanged)
    }
}

pub struct DependencyComparator;

impl DependencyComparator {
    /// `previous == None` means first evaluation, which always counts as a
    /// change. Two empty lists are unchanged, so an empty list runs once.
    pub fn compare(previous: Option<&DependencyList>, current: &DependencyList) -> Comparison {
        let Some(previous) = previous else {
            return Comparison::Changed;
        };
        if previous.len() != current.len() {
            return Comparison::ArityChanged {
                previous: previous.len(),
                current: current.len(),
            };
        }
        if previous.iter().zip(current.iter()).all(|(a, b)| a.same(b)) {
            Comparison::Unchanged
        } else {
            Comparison::Changed
        }
    }
}
