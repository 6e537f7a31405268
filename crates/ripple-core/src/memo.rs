use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;

use crate::deps::{Comparison, DependencyComparator, DependencyList};
use crate::error::{MemoError, StaleDependencyError};

/// Cached value plus the dependency list it was computed from.
///
/// The factory is only invoked on the first evaluation and whenever the
/// dependency list changes. Keeping the factory pure is the caller's job.
pub struct MemoCell<T> {
    slot: RefCell<Option<Memoized<T>>>,
    evaluations: Cell<usize>,
}

struct Memoized<T> {
    value: T,
    deps: DependencyList,
}

impl<T> Default for MemoCell<T> {
    fn default() -> Self {
        Self {
            slot: RefCell::new(None),
            evaluations: Cell::new(0),
        }
    }
}

impl<T: Clone> MemoCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &self,
        deps: DependencyList,
        factory: impl FnOnce() -> T,
    ) -> Result<T, StaleDependencyError> {
        self.try_evaluate(deps, || Ok::<T, Infallible>(factory()))
            .map_err(|e| match e {
                MemoError::Stale(stale) => stale,
                MemoError::Factory(never) => match never {},
            })
    }

    /// Like [`evaluate`](Self::evaluate) with a fallible factory. On error
    /// (or panic) the previously cached value and dependencies are kept.
    pub fn try_evaluate<E>(
        &self,
        deps: DependencyList,
        factory: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, MemoError<E>> {
        {
            let slot = self.slot.borrow();
            let previous = slot.as_ref().map(|m| &m.deps);
            match (DependencyComparator::compare(previous, &deps), slot.as_ref()) {
                (Comparison::Unchanged, Some(memo)) => return Ok(memo.value.clone()),
                (Comparison::ArityChanged { previous, current }, _) => {
                    let err = StaleDependencyError { previous, current };
                    log::warn!("memo: {err}; keeping cached value");
                    return Err(err.into());
                }
                _ => {}
            }
        }

        // The borrow is released so the factory may read other memos freely.
        let value = factory().map_err(MemoError::Factory)?;
        self.evaluations.set(self.evaluations.get() + 1);
        *self.slot.borrow_mut() = Some(Memoized {
            value: value.clone(),
            deps,
        });
        Ok(value)
    }

    pub fn cached(&self) -> Option<T> {
        self.slot.borrow().as_ref().map(|m| m.value.clone())
    }
}

impl<T> MemoCell<T> {
    /// Forget the cached value; the next evaluation recomputes.
    pub fn invalidate(&self) {
        *self.slot.borrow_mut() = None;
    }

    /// How many times a factory has completed successfully.
    pub fn evaluations(&self) -> usize {
        self.evaluations.get()
    }
}

impl<T> fmt::Debug for MemoCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCell")
            .field("cached", &self.slot.borrow().is_some())
            .field("evaluations", &self.evaluations.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    #[test]
    fn same_deps_reuse_cached_value() {
        let memo = MemoCell::new();
        let calls = Cell::new(0);
        let x = 7;

        let compute = || {
            calls.set(calls.get() + 1);
            x * x
        };
        assert_eq!(memo.evaluate(deps![x], compute), Ok(49));
        assert_eq!(memo.evaluate(deps![x], || unreachable!()), Ok(49));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn changed_deps_recompute() {
        let memo = MemoCell::new();
        assert_eq!(memo.evaluate(deps![1], || "one"), Ok("one"));
        assert_eq!(memo.evaluate(deps![2], || "two"), Ok("two"));
        assert_eq!(memo.evaluations(), 2);
    }

    #[test]
    fn arity_change_leaves_cache_untouched() {
        let memo = MemoCell::new();
        memo.evaluate(deps![1], || 10).unwrap();

        let err = memo.evaluate(deps![1, 2], || 20).unwrap_err();
        assert_eq!(
            err,
            StaleDependencyError {
                previous: 1,
                current: 2
            }
        );
        assert_eq!(memo.cached(), Some(10));
        assert_eq!(memo.evaluate(deps![1], || 30), Ok(10));
    }

    #[test]
    fn factory_error_keeps_previous_value() {
        let memo = MemoCell::new();
        memo.evaluate(deps!["a"], || 1).unwrap();

        let res = memo.try_evaluate(deps!["b"], || Err::<i32, _>("offline"));
        assert!(matches!(res, Err(MemoError::Factory("offline"))));
        assert_eq!(memo.cached(), Some(1));

        // Dependencies were not replaced either, so "a" still hits the cache.
        assert_eq!(memo.evaluate(deps!["a"], || 2), Ok(1));
    }

    #[test]
    fn factory_panic_keeps_previous_value() {
        let memo = MemoCell::new();
        memo.evaluate(deps![1], || 5).unwrap();

        let res = catch_unwind(AssertUnwindSafe(|| {
            memo.evaluate(deps![2], || panic!("factory blew up"))
        }));
        assert!(res.is_err());
        assert_eq!(memo.cached(), Some(5));
    }

    #[test]
    fn empty_deps_compute_once() {
        let memo = MemoCell::new();
        memo.evaluate(deps![], || 1).unwrap();
        memo.evaluate(deps![], || 2).unwrap();
        assert_eq!(memo.cached(), Some(1));
        assert_eq!(memo.evaluations(), 1);
    }

    #[test]
    fn invalidate_forces_recompute() {
        let memo = MemoCell::new();
        memo.evaluate(deps![], || 1).unwrap();
        memo.invalidate();
        assert_eq!(memo.evaluate(deps![], || 2), Ok(2));
    }

    #[test]
    fn memoized_function_keeps_identity() {
        let memo: MemoCell<Rc<dyn Fn(i32) -> i32>> = MemoCell::new();
        let a = memo
            .evaluate(deps![3], || Rc::new(|n: i32| n + 3) as Rc<dyn Fn(i32) -> i32>)
            .unwrap();
        let b = memo
            .evaluate(deps![3], || Rc::new(|n: i32| n * 100) as Rc<dyn Fn(i32) -> i32>)
            .unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(b(1), 4);
    }
}
