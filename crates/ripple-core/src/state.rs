use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::same_value::{EqualsFn, SameValue};
use crate::scheduler::{ConsumerId, Scheduler};

/// A write to a [`StateCell`]: either a new value or a pure function of the
/// previous one.
pub enum Update<T> {
    Value(T),
    With(Box<dyn FnOnce(&T) -> T>),
}

impl<T> Update<T> {
    pub fn with(f: impl FnOnce(&T) -> T + 'static) -> Self {
        Update::With(Box::new(f))
    }
}

impl<T> From<T> for Update<T> {
    fn from(value: T) -> Self {
        Update::Value(value)
    }
}

/// Observable value. Writes that change it schedule every subscriber on the
/// scheduler; the notification arrives when the pass is flushed, so any
/// number of writes in one turn cost each subscriber one callback.
///
/// ```rust
/// use ripple_core::*;
///
/// let scheduler = Scheduler::new();
/// let count = StateCell::new(&scheduler, 0);
/// count.set(1);
/// count.update(|prev| prev + 1);
/// assert_eq!(count.read(), 2);
/// ```
pub struct StateCell<T: 'static>(Rc<StateInner<T>>);

struct StateInner<T> {
    value: RefCell<T>,
    subs: RefCell<SmallVec<[ConsumerId; 4]>>,
    equals: EqualsFn<T>,
    scheduler: Scheduler,
}

impl<T: SameValue + 'static> StateCell<T> {
    pub fn new(scheduler: &Scheduler, value: T) -> Self {
        Self::with_equality(scheduler, value, T::same_value)
    }
}

impl<T: 'static> StateCell<T> {
    /// For types without a [`SameValue`] impl, or to opt into a different
    /// notion of "unchanged".
    pub fn with_equality(scheduler: &Scheduler, value: T, equals: EqualsFn<T>) -> Self {
        Self(Rc::new(StateInner {
            value: RefCell::new(value),
            subs: RefCell::new(SmallVec::new()),
            equals,
            scheduler: scheduler.clone(),
        }))
    }

    pub fn read(&self) -> T
    where
        T: Clone,
    {
        self.0.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.value.borrow())
    }

    /// Apply a write. Returns `true` if the value changed and subscribers
    /// were scheduled, `false` if it was a no-op.
    pub fn write(&self, update: impl Into<Update<T>>) -> bool {
        let next = match update.into() {
            Update::Value(value) => value,
            Update::With(f) => f(&self.0.value.borrow()),
        };
        if (self.0.equals)(&self.0.value.borrow(), &next) {
            log::trace!("state: write with same value ignored");
            return false;
        }
        *self.0.value.borrow_mut() = next;

        let subs = self.0.subs.borrow().clone();
        let mut gone: SmallVec<[ConsumerId; 2]> = SmallVec::new();
        for id in subs {
            if !self.0.scheduler.schedule(id) {
                gone.push(id);
            }
        }
        if !gone.is_empty() {
            self.0.subs.borrow_mut().retain(|id| !gone.contains(id));
        }
        true
    }

    pub fn set(&self, value: T) -> bool {
        self.write(Update::Value(value))
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T + 'static) -> bool {
        self.write(Update::with(f))
    }

    /// Returns `false` if the consumer was already subscribed.
    pub fn subscribe(&self, consumer: ConsumerId) -> bool {
        let mut subs = self.0.subs.borrow_mut();
        if subs.contains(&consumer) {
            return false;
        }
        subs.push(consumer);
        true
    }

    pub fn unsubscribe(&self, consumer: ConsumerId) -> bool {
        let mut subs = self.0.subs.borrow_mut();
        let before = subs.len();
        subs.retain(|id| *id != consumer);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subs.borrow().len()
    }

    /// True if both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: 'static> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for StateCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("value", &*self.0.value.borrow())
            .field("subscribers", &self.0.subs.borrow().len())
            .finish()
    }
}
