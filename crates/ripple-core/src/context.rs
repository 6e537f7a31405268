//! # Context channels
//!
//! A [`ContextChannel`] broadcasts a value down the scope hierarchy. A
//! consumer resolves to the value provided by the nearest enclosing scope
//! (innermost wins), falling back to the channel's default:
//!
//! ```rust
//! use ripple_core::*;
//!
//! let scheduler = Scheduler::new();
//! let theme = ContextChannel::new(&scheduler, "theme", "light");
//!
//! let app = Scope::new();
//! let page = app.child();
//! let reader = scheduler.register(|| {});
//!
//! assert_eq!(theme.consume(&page, reader), Ok("light"));
//!
//! theme.provide(&app, "dark");
//! assert_eq!(theme.consume(&page, reader), Ok("dark"));
//! ```
//!
//! Consuming registers the consumer; a later `provide` (or `revoke`) that
//! changes what it resolves to schedules it on the scheduler.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::error::UnresolvedContextError;
use crate::same_value::{EqualsFn, SameValue};
use crate::scheduler::{ConsumerId, Scheduler};
use crate::scope::{Scope, ScopeId};

enum Fallback<T> {
    Missing,
    Ready(T),
    Lazy(Rc<dyn Fn() -> T>),
}

struct Registration {
    consumer: ConsumerId,
    ancestry: SmallVec<[ScopeId; 8]>,
}

struct ChannelInner<T> {
    name: String,
    scheduler: Scheduler,
    equals: EqualsFn<T>,
    fallback: RefCell<Fallback<T>>,
    computing_default: Cell<bool>,
    provided: RefCell<HashMap<ScopeId, T>>,
    consumers: RefCell<Vec<Registration>>,
}

pub struct ContextChannel<T: 'static>(Rc<ChannelInner<T>>);

impl<T: SameValue + 'static> ContextChannel<T> {
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, default: T) -> Self {
        Self::build(scheduler, name.into(), T::same_value, Fallback::Ready(default))
    }

    /// The default is computed on first need and then cached. If `default`
    /// panics, the next resolution tries again.
    pub fn with_lazy_default(
        scheduler: &Scheduler,
        name: impl Into<String>,
        default: impl Fn() -> T + 'static,
    ) -> Self {
        Self::build(
            scheduler,
            name.into(),
            T::same_value,
            Fallback::Lazy(Rc::new(default)),
        )
    }

    /// Consuming outside every provider fails with
    /// [`UnresolvedContextError`].
    pub fn without_default(scheduler: &Scheduler, name: impl Into<String>) -> Self {
        Self::build(scheduler, name.into(), T::same_value, Fallback::Missing)
    }
}

impl<T: 'static> ContextChannel<T> {
    fn build(scheduler: &Scheduler, name: String, equals: EqualsFn<T>, fallback: Fallback<T>) -> Self {
        Self(Rc::new(ChannelInner {
            name,
            scheduler: scheduler.clone(),
            equals,
            fallback: RefCell::new(fallback),
            computing_default: Cell::new(false),
            provided: RefCell::new(HashMap::new()),
            consumers: RefCell::new(Vec::new()),
        }))
    }

    /// Replace the comparison used by [`provide`](Self::provide).
    pub fn with_equality(self, equals: EqualsFn<T>) -> Self {
        match Rc::try_unwrap(self.0) {
            Ok(mut inner) => {
                inner.equals = equals;
                Self(Rc::new(inner))
            }
            Err(shared) => {
                log::warn!(
                    "context `{}`: equality not replaced, channel already shared",
                    shared.name
                );
                Self(shared)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Set the value `scope` provides to itself and its descendants. Returns
    /// `false` (and notifies nobody) if it is the same value as before.
    pub fn provide(&self, scope: &Scope, value: T) -> bool {
        let id = scope.id();
        {
            let provided = self.0.provided.borrow();
            if let Some(current) = provided.get(&id)
                && (self.0.equals)(current, &value)
            {
                return false;
            }
        }
        let first = self.0.provided.borrow_mut().insert(id, value).is_none();
        if first {
            // A disposed (or dropped) provider stops providing.
            let weak: Weak<ChannelInner<T>> = Rc::downgrade(&self.0);
            scope.add_disposer(move || {
                if let Some(inner) = weak.upgrade() {
                    ContextChannel(inner).revoke_id(id);
                }
            });
        }
        let affected = self.affected_by(id);
        log::debug!(
            "context `{}`: {} provided, {} consumer(s) affected",
            self.0.name,
            id,
            affected.len()
        );
        self.notify(affected);
        true
    }

    /// Remove the value `scope` provides (the provider went away). Consumers
    /// that resolved to it are scheduled and fall back to an outer provider
    /// or the default.
    pub fn revoke(&self, scope: &Scope) -> Option<T> {
        self.revoke_id(scope.id())
    }

    fn revoke_id(&self, id: ScopeId) -> Option<T> {
        let affected = self.affected_by(id);
        let removed = self.0.provided.borrow_mut().remove(&id)?;
        self.notify(affected);
        Some(removed)
    }

    /// Register `consumer` under `scope` and resolve the current value.
    pub fn consume(&self, scope: &Scope, consumer: ConsumerId) -> Result<T, UnresolvedContextError>
    where
        T: Clone,
    {
        {
            let mut consumers = self.0.consumers.borrow_mut();
            match consumers.iter_mut().find(|r| r.consumer == consumer) {
                Some(existing) => {
                    if existing.ancestry.as_slice() != scope.ancestry() {
                        existing.ancestry = SmallVec::from_slice(scope.ancestry());
                    }
                }
                None => consumers.push(Registration {
                    consumer,
                    ancestry: SmallVec::from_slice(scope.ancestry()),
                }),
            }
        }
        self.resolve(scope)
    }

    /// Resolve without registering.
    pub fn resolve(&self, scope: &Scope) -> Result<T, UnresolvedContextError>
    where
        T: Clone,
    {
        {
            let provided = self.0.provided.borrow();
            if let Some(value) = scope.ancestry().iter().find_map(|id| provided.get(id)) {
                return Ok(value.clone());
            }
        }
        self.default_value()
    }

    /// Stop tracking `consumer`.
    pub fn release(&self, consumer: ConsumerId) -> bool {
        let mut consumers = self.0.consumers.borrow_mut();
        let before = consumers.len();
        consumers.retain(|r| r.consumer != consumer);
        consumers.len() != before
    }

    /// Release `consumer` once `scope` is disposed.
    pub(crate) fn release_on_dispose(&self, scope: &Scope, consumer: ConsumerId) {
        let weak: Weak<ChannelInner<T>> = Rc::downgrade(&self.0);
        scope.add_disposer(move || {
            if let Some(inner) = weak.upgrade() {
                ContextChannel(inner).release(consumer);
            }
        });
    }

    pub fn consumer_count(&self) -> usize {
        self.0.consumers.borrow().len()
    }

    fn default_value(&self) -> Result<T, UnresolvedContextError>
    where
        T: Clone,
    {
        let init = match &*self.0.fallback.borrow() {
            Fallback::Ready(value) => return Ok(value.clone()),
            Fallback::Missing => return Err(self.unresolved()),
            Fallback::Lazy(init) => init.clone(),
        };
        if self.0.computing_default.replace(true) {
            log::warn!(
                "context `{}`: default resolved while it is being computed",
                self.0.name
            );
            return Err(self.unresolved());
        }

        // Left `Lazy` until `init` returns, so an unwinding initializer can be
        // retried.
        struct Computing<'a>(&'a Cell<bool>);
        impl Drop for Computing<'_> {
            fn drop(&mut self) {
                self.0.set(false);
            }
        }
        let _computing = Computing(&self.0.computing_default);

        log::debug!("context `{}`: computing lazy default", self.0.name);
        let value = init();
        *self.0.fallback.borrow_mut() = Fallback::Ready(value.clone());
        Ok(value)
    }

    fn unresolved(&self) -> UnresolvedContextError {
        UnresolvedContextError {
            channel: self.0.name.clone(),
        }
    }

    // Consumers whose nearest provider is (or, for a revoke, was) `scope`.
    fn affected_by(&self, scope: ScopeId) -> SmallVec<[ConsumerId; 8]> {
        let provided = self.0.provided.borrow();
        self.0
            .consumers
            .borrow()
            .iter()
            .filter(|r| {
                r.ancestry
                    .iter()
                    .find(|id| **id == scope || provided.contains_key(*id))
                    == Some(&scope)
            })
            .map(|r| r.consumer)
            .collect()
    }

    fn notify(&self, affected: SmallVec<[ConsumerId; 8]>) {
        let mut gone: SmallVec<[ConsumerId; 4]> = SmallVec::new();
        for id in affected {
            if !self.0.scheduler.schedule(id) {
                gone.push(id);
            }
        }
        if !gone.is_empty() {
            self.0
                .consumers
                .borrow_mut()
                .retain(|r| !gone.contains(&r.consumer));
        }
    }
}

impl<T: 'static> Clone for ContextChannel<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: 'static> fmt::Debug for ContextChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextChannel")
            .field("name", &self.0.name)
            .field("providers", &self.0.provided.borrow().len())
            .field("consumers", &self.0.consumers.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn watcher(scheduler: &Scheduler) -> (ConsumerId, Rc<Cell<usize>>) {
        let hits = Rc::new(Cell::new(0));
        let id = scheduler.register({
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        });
        (id, hits)
    }

    #[test]
    fn innermost_provider_wins() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "lang", "en");
        let root = Scope::new();
        let mid = root.child();
        let leaf = mid.child();
        let (id, _) = watcher(&s);

        ctx.provide(&root, "es");
        ctx.provide(&mid, "fr");
        assert_eq!(ctx.consume(&leaf, id), Ok("fr"));
        assert_eq!(ctx.resolve(&root), Ok("es"));
    }

    #[test]
    fn shadowed_consumers_are_not_notified() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "lang", "en");
        let root = Scope::new();
        let mid = root.child();
        let (near, near_hits) = watcher(&s);
        let (far, far_hits) = watcher(&s);

        ctx.provide(&mid, "fr");
        ctx.consume(&mid.child(), near).unwrap();
        ctx.consume(&root, far).unwrap();
        s.flush();

        ctx.provide(&root, "de");
        s.flush();
        assert_eq!(near_hits.get(), 0);
        assert_eq!(far_hits.get(), 1);
    }

    #[test]
    fn same_value_provide_notifies_nobody() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "theme", "light");
        let root = Scope::new();
        let (id, hits) = watcher(&s);
        ctx.provide(&root, "dark");
        ctx.consume(&root, id).unwrap();

        assert!(!ctx.provide(&root, "dark"));
        assert!(s.flush().is_none());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn missing_default_fails_fast() {
        let s = Scheduler::new();
        let ctx: ContextChannel<u32> = ContextChannel::without_default(&s, "session");
        let (id, _) = watcher(&s);
        let err = ctx.consume(&Scope::new(), id).unwrap_err();
        assert_eq!(err.channel, "session");
    }

    #[test]
    fn missing_default_resolves_once_provided() {
        let s = Scheduler::new();
        let ctx: ContextChannel<u32> = ContextChannel::without_default(&s, "session");
        let root = Scope::new();
        let (id, hits) = watcher(&s);
        assert!(ctx.consume(&root, id).is_err());

        ctx.provide(&root, 7);
        s.flush();
        assert_eq!(hits.get(), 1);
        assert_eq!(ctx.consume(&root, id), Ok(7));
    }

    #[test]
    fn lazy_default_is_computed_once() {
        let s = Scheduler::new();
        let calls = Rc::new(Cell::new(0));
        let ctx = ContextChannel::with_lazy_default(&s, "config", {
            let calls = calls.clone();
            move || {
                calls.set(calls.get() + 1);
                42u64
            }
        });
        let scope = Scope::new();
        assert_eq!(ctx.resolve(&scope), Ok(42));
        assert_eq!(ctx.resolve(&scope.child()), Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn panicking_lazy_default_is_retried() {
        let s = Scheduler::new();
        let attempts = Rc::new(Cell::new(0));
        let ctx = ContextChannel::with_lazy_default(&s, "config", {
            let attempts = attempts.clone();
            move || {
                attempts.set(attempts.get() + 1);
                if attempts.get() == 1 {
                    panic!("config file unreadable");
                }
                8u16
            }
        });
        let scope = Scope::new();

        let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctx.resolve(&scope)));
        assert!(first.is_err());
        assert_eq!(ctx.resolve(&scope), Ok(8));
        assert_eq!(ctx.resolve(&scope), Ok(8));
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn lazy_default_reading_itself_keeps_the_default() {
        let s = Scheduler::new();
        let slot: Rc<RefCell<Option<ContextChannel<u16>>>> = Rc::new(RefCell::new(None));
        let nested = Rc::new(Cell::new(None));
        let ctx = ContextChannel::with_lazy_default(&s, "config", {
            let slot = slot.clone();
            let nested = nested.clone();
            move || {
                if let Some(ctx) = slot.borrow().as_ref() {
                    nested.set(Some(ctx.resolve(&Scope::new()).is_err()));
                }
                3
            }
        });
        *slot.borrow_mut() = Some(ctx.clone());

        assert_eq!(ctx.resolve(&Scope::new()), Ok(3));
        assert_eq!(nested.get(), Some(true));
        assert_eq!(ctx.resolve(&Scope::new()), Ok(3));
        slot.borrow_mut().take();
    }

    #[test]
    fn disposed_provider_stops_providing() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "theme", "light");
        let root = Scope::new();
        let (id, hits) = watcher(&s);
        assert_eq!(ctx.consume(&root, id), Ok("light"));

        {
            let dialog = root.child();
            ctx.provide(&dialog, "dark");
            assert_eq!(ctx.resolve(&dialog), Ok("dark"));
        }
        let panel = root.child();
        ctx.provide(&panel, "sepia");
        ctx.provide(&root, "dark");
        s.flush();
        assert_eq!(hits.get(), 1);

        panel.dispose();
        root.dispose();
        assert_eq!(ctx.resolve(&root), Ok("light"));
        assert_eq!(format!("{ctx:?}"), "ContextChannel { name: \"theme\", providers: 0, consumers: 1 }");
        s.flush();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn revoke_falls_back_and_notifies() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "theme", "light");
        let root = Scope::new();
        let inner = root.child();
        let (id, hits) = watcher(&s);
        ctx.provide(&root, "dark");
        ctx.provide(&inner, "sepia");
        assert_eq!(ctx.consume(&inner, id), Ok("sepia"));

        assert_eq!(ctx.revoke(&inner), Some("sepia"));
        s.flush();
        assert_eq!(hits.get(), 1);
        assert_eq!(ctx.resolve(&inner), Ok("dark"));
        assert_eq!(ctx.revoke(&inner), None);
    }

    #[test]
    fn consumers_register_once() {
        let s = Scheduler::new();
        let ctx = ContextChannel::new(&s, "theme", "light");
        let scope = Scope::new();
        let (id, _) = watcher(&s);
        ctx.consume(&scope, id).unwrap();
        ctx.consume(&scope, id).unwrap();
        assert_eq!(ctx.consumer_count(), 1);
        assert!(ctx.release(id));
        assert_eq!(ctx.consumer_count(), 0);
    }

    #[test]
    fn reference_equality_for_shared_values() {
        let s = Scheduler::new();
        let user = Rc::new(String::from("ada"));
        let ctx = ContextChannel::new(&s, "user", user.clone());
        let root = Scope::new();
        let (id, hits) = watcher(&s);
        ctx.consume(&root, id).unwrap();

        ctx.provide(&root, user.clone());
        s.flush();
        assert_eq!(hits.get(), 1);

        // Same pointer: unchanged. Equal contents, new pointer: changed.
        assert!(!ctx.provide(&root, user.clone()));
        assert!(ctx.provide(&root, Rc::new(String::from("ada"))));
    }
}
