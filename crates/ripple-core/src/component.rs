//! # Components
//!
//! A [`Component`] is a consumer with a render closure, its own hook slots
//! and its own scope. Rendering is a pure re-invocation of the closure: hooks
//! read and write their slots, and side effects are queued on the scheduler
//! instead of running inline.
//!
//! Hook slots are positional: the Nth hook call in a render always gets the
//! Nth slot, so hooks must be called unconditionally and in the same order
//! on every render.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::effects::EffectSlot;
use crate::scheduler::{ConsumerId, Scheduler};
use crate::scope::Scope;

thread_local! {
    static RENDER_STACK: RefCell<Vec<Rc<HookFrame>>> = const { RefCell::new(Vec::new()) };
}

/// Per-component hook storage, visible to hooks while the component renders.
pub(crate) struct HookFrame {
    pub(crate) scheduler: Scheduler,
    pub(crate) scope: Scope,
    pub(crate) consumer: ConsumerId,
    slots: RefCell<Vec<Box<dyn Any>>>,
    cursor: Cell<usize>,
}

impl HookFrame {
    fn remember<T: 'static>(&self, init: impl FnOnce() -> T) -> Rc<T> {
        let cursor = self.cursor.get();
        self.cursor.set(cursor + 1);

        {
            let slots = self.slots.borrow();
            if let Some(slot) = slots.get(cursor) {
                if let Some(rc) = slot.downcast_ref::<Rc<T>>() {
                    return rc.clone();
                }
                log::warn!(
                    "remember: slot {cursor} type changed; replacing. \
                     Hooks must be called in the same order on every render."
                );
            }
        }

        // `init` may itself create cells or channels, so no borrow is held.
        let rc: Rc<T> = Rc::new(init());
        let mut slots = self.slots.borrow_mut();
        if cursor < slots.len() {
            slots[cursor] = Box::new(rc.clone());
        } else {
            slots.push(Box::new(rc.clone()));
        }
        rc
    }

    fn effect_slots(&self) -> Vec<Rc<EffectSlot>> {
        self.slots
            .borrow()
            .iter()
            .filter_map(|slot| slot.downcast_ref::<Rc<EffectSlot>>().cloned())
            .collect()
    }
}

/// The hook frame of the component currently rendering.
///
/// Panics outside a render: calling a hook anywhere else is a programming
/// error, not a recoverable condition.
pub(crate) fn current_frame() -> Rc<HookFrame> {
    RENDER_STACK
        .with(|stack| stack.borrow().last().cloned())
        .expect("hooks can only be called while a component is rendering")
}

/// Slot-based remember for the component currently rendering.
pub fn remember<T: 'static>(init: impl FnOnce() -> T) -> Rc<T> {
    current_frame().remember(init)
}

/// The consumer id of the component currently rendering, if any.
pub fn current_consumer() -> Option<ConsumerId> {
    RENDER_STACK.with(|stack| stack.borrow().last().map(|f| f.consumer))
}

struct ComponentInner<V> {
    frame: Rc<HookFrame>,
    render: Box<dyn Fn() -> V>,
    output: RefCell<Option<V>>,
    renders: Cell<usize>,
    mounted: Cell<bool>,
}

impl<V: 'static> ComponentInner<V> {
    fn render(&self) {
        if !self.mounted.get() {
            return;
        }

        struct Pop;
        impl Drop for Pop {
            fn drop(&mut self) {
                RENDER_STACK.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }

        self.frame.cursor.set(0);
        RENDER_STACK.with(|stack| stack.borrow_mut().push(self.frame.clone()));
        let output = {
            let _pop = Pop;
            self.frame.scope.run(|| (self.render)())
        };
        *self.output.borrow_mut() = Some(output);
        self.renders.set(self.renders.get() + 1);
    }

    fn teardown(&self) {
        if !self.mounted.replace(false) {
            return;
        }
        let frame = &self.frame;
        frame.scheduler.unregister(frame.consumer);
        for effect in frame.effect_slots() {
            effect.dispose();
        }
        frame.scope.dispose();
        log::debug!("component {:?}: unmounted", frame.consumer);
    }
}

/// A mounted component. Dropping it unmounts it.
///
/// ```rust
/// use ripple_core::*;
///
/// let scheduler = Scheduler::new();
/// let counter = Component::mount(&scheduler, None, || {
///     let count = use_state(|| 0);
///     count.read()
/// });
/// assert_eq!(counter.output(), Some(0));
/// ```
pub struct Component<V: 'static = ()> {
    inner: Rc<ComponentInner<V>>,
}

impl<V: Clone + 'static> Component<V> {
    /// Register the component and render it once. Effects from this first
    /// render run on the next flush.
    pub fn mount(
        scheduler: &Scheduler,
        parent: Option<&Scope>,
        render: impl Fn() -> V + 'static,
    ) -> Self {
        let scope = parent.map_or_else(Scope::new, Scope::child);
        let inner = Rc::new_cyclic(|weak: &Weak<ComponentInner<V>>| {
            let weak = weak.clone();
            let consumer = scheduler.register(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.render();
                }
            });
            ComponentInner {
                frame: Rc::new(HookFrame {
                    scheduler: scheduler.clone(),
                    scope,
                    consumer,
                    slots: RefCell::new(Vec::new()),
                    cursor: Cell::new(0),
                }),
                render: Box::new(render),
                output: RefCell::new(None),
                renders: Cell::new(0),
                mounted: Cell::new(true),
            }
        });
        // Disposing an enclosing scope (a parent unmounting) unmounts this
        // component too.
        inner.frame.scope.add_disposer({
            let weak = Rc::downgrade(&inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.teardown();
                }
            }
        });
        log::debug!("component {:?}: mounted", inner.frame.consumer);
        inner.render();
        Self { inner }
    }

    /// Mount a component in a child scope of this one, so it sees the
    /// contexts this component provides.
    pub fn mount_child<C: Clone + 'static>(
        &self,
        render: impl Fn() -> C + 'static,
    ) -> Component<C> {
        Component::mount(&self.inner.frame.scheduler, Some(&self.inner.frame.scope), render)
    }

    /// Output of the latest render.
    pub fn output(&self) -> Option<V> {
        self.inner.output.borrow().clone()
    }
}

impl<V: 'static> Component<V> {
    pub fn consumer(&self) -> ConsumerId {
        self.inner.frame.consumer
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.frame.scope
    }

    pub fn render_count(&self) -> usize {
        self.inner.renders.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// Schedule a re-render without changing any state.
    pub fn invalidate(&self) -> bool {
        self.inner.frame.scheduler.schedule(self.inner.frame.consumer)
    }

    /// Unregister, cancel tasks, run effect cleanups and dispose the scope.
    pub fn unmount(self) {
        self.inner.teardown();
    }
}

impl<V: 'static> Drop for Component<V> {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl<V: 'static> fmt::Debug for Component<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("consumer", &self.inner.frame.consumer)
            .field("scope", &self.inner.frame.scope.id())
            .field("renders", &self.inner.renders.get())
            .field("mounted", &self.inner.mounted.get())
            .finish()
    }
}
