//! Hooks for use inside a [`Component`](crate::Component) render closure.
//!
//! | hook            | backed by                                   |
//! |-----------------|---------------------------------------------|
//! | `use_state`     | [`StateCell`] subscribed by the component   |
//! | `use_reducer`   | [`StateCell`] + a [`Reducer`]               |
//! | `use_ref`       | a remembered `RefCell`, never notifies      |
//! | `use_memo`      | [`MemoCell`]                                |
//! | `use_callback`  | [`MemoCell`] holding an `Rc<dyn Fn>`        |
//! | `use_context`   | [`ContextChannel::consume`]                 |
//! | `use_effect`    | [`EffectSlot`] queued on the scheduler      |
//! | `use_task`      | an effect that spawns a [`PendingTask`]     |
//!
//! All of them panic when called outside a render.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::component::{current_frame, remember};
use crate::context::ContextChannel;
use crate::deps::DependencyList;
use crate::effects::{Dispose, EffectSlot, on_unmount};
use crate::error::{StaleDependencyError, UnresolvedContextError};
use crate::memo::MemoCell;
use crate::same_value::SameValue;
use crate::state::StateCell;
use crate::task::PendingTask;

/// Component-local state. The component re-renders when a write changes it.
pub fn use_state<T: SameValue + 'static>(init: impl FnOnce() -> T) -> StateCell<T> {
    let frame = current_frame();
    let cell = remember(|| StateCell::new(&frame.scheduler, init()));
    cell.subscribe(frame.consumer);
    (*cell).clone()
}

/// State transitions described as `(state, action) -> state`.
pub trait Reducer: 'static {
    type State: SameValue + Clone + 'static;
    type Action: 'static;

    fn initial_state() -> Self::State;
    fn reduce(state: &Self::State, action: Self::Action) -> Self::State;
}

/// Sends actions to a reducer-backed state cell. Cheap to clone; identity is
/// stable across renders.
pub struct Dispatch<A>(Rc<dyn Fn(A)>);

impl<A> Dispatch<A> {
    pub fn send(&self, action: A) {
        (self.0)(action)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch")
    }
}

pub fn use_reducer<R: Reducer>() -> (R::State, Dispatch<R::Action>) {
    let state = use_state(R::initial_state);
    let dispatch = remember(|| {
        let state = state.clone();
        Dispatch(Rc::new(move |action: R::Action| {
            state.update(move |s| R::reduce(s, action));
        }) as Rc<dyn Fn(R::Action)>)
    });
    (state.read(), (*dispatch).clone())
}

/// Mutable box that survives re-renders and never triggers one.
pub fn use_ref<T: 'static>(init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
    remember(|| RefCell::new(init()))
}

pub fn use_memo<T: Clone + 'static>(
    deps: DependencyList,
    factory: impl FnOnce() -> T,
) -> Result<T, StaleDependencyError> {
    remember(MemoCell::<T>::new).evaluate(deps, factory)
}

/// A handler whose identity only changes when `deps` change.
pub type Handler<A, R = ()> = Rc<dyn Fn(A) -> R>;

pub fn use_callback<A: 'static, R: 'static>(
    deps: DependencyList,
    f: impl Fn(A) -> R + 'static,
) -> Result<Handler<A, R>, StaleDependencyError> {
    use_memo(deps, move || Rc::new(f) as Handler<A, R>)
}

/// Resolve `channel` from the component's scope and subscribe to changes.
pub fn use_context<T: Clone + 'static>(
    channel: &ContextChannel<T>,
) -> Result<T, UnresolvedContextError> {
    let frame = current_frame();
    remember(|| channel.release_on_dispose(&frame.scope, frame.consumer));
    channel.consume(&frame.scope, frame.consumer)
}

/// Queue `effect` to run after this pass whenever `deps` change. The
/// returned cleanup runs before the next run and on unmount.
pub fn use_effect(deps: DependencyList, effect: impl FnOnce() -> Option<Dispose> + 'static) {
    let frame = current_frame();
    let slot = remember(EffectSlot::new);
    slot.schedule(&frame.scheduler, deps, effect);
}

/// Start asynchronous work when `deps` change. `start` receives the task and
/// is responsible for completing it later; `apply` receives the result.
///
/// The task is cancelled when `deps` change again or the component unmounts,
/// so a late completion cannot write stale data.
pub fn use_task<T: 'static>(
    deps: DependencyList,
    start: impl FnOnce(PendingTask<T>) + 'static,
    apply: impl FnOnce(T) + 'static,
) {
    let frame = current_frame();
    let scheduler = frame.scheduler.clone();
    let consumer = frame.consumer;
    use_effect(deps, move || {
        let task = scheduler.spawn_task(consumer, apply);
        let token = task.token();
        start(task);
        Some(on_unmount(move || token.cancel()))
    });
}
