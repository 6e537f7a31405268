//! # Ripple
//!
//! A small reactive core for component UIs. State lives in cells, derived
//! values in memo cells, shared values flow down a scope tree through context
//! channels, and a single-threaded [`Scheduler`] turns writes into batched
//! render passes.
//!
//! - [`StateCell<T>`]: observable value; writes schedule subscribers.
//! - [`MemoCell<T>`]: cached computation keyed by a [`DependencyList`].
//! - [`ContextChannel<T>`]: nearest-provider lookup over [`Scope`]s.
//! - [`Scheduler`]: coalesces notifications into passes, runs effects after.
//!
//! ## State
//!
//! ```rust
//! use ripple_core::*;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let scheduler = Scheduler::new();
//! let count = StateCell::new(&scheduler, 0);
//!
//! let hits = Rc::new(Cell::new(0));
//! let watcher = scheduler.register({
//!     let hits = hits.clone();
//!     move || hits.set(hits.get() + 1)
//! });
//! count.subscribe(watcher);
//!
//! count.set(1);
//! count.update(|prev| prev + 1);
//! scheduler.flush();
//!
//! assert_eq!(count.read(), 2);
//! assert_eq!(hits.get(), 1);
//! ```
//!
//! Writes compare with [`SameValue`]: scalars and strings by value, `Rc`/`Arc`
//! by pointer. Replacing a shared value with an equal copy still notifies.
//!
//! ## Components and hooks
//!
//! ```rust
//! use ripple_core::*;
//!
//! let scheduler = Scheduler::new();
//! let theme = ContextChannel::new(&scheduler, "theme", "light");
//! let app = Scope::new();
//!
//! let label = Component::mount(&scheduler, Some(&app), {
//!     let theme = theme.clone();
//!     move || {
//!         let clicks = use_state(|| 0);
//!         let theme = use_context(&theme).unwrap();
//!         format!("{theme}: {}", clicks.read())
//!     }
//! });
//! assert_eq!(label.output().as_deref(), Some("light: 0"));
//!
//! theme.provide(&app, "dark");
//! scheduler.flush();
//! assert_eq!(label.output().as_deref(), Some("dark: 0"));
//! ```
//!
//! Hooks are positional and only valid while a component renders. Effects
//! (`use_effect`, `use_task`) are queued and run after the pass's renders.

pub mod component;
pub mod context;
pub mod deps;
pub mod effects;
pub mod error;
pub mod hooks;
pub mod memo;
pub mod prelude;
pub mod same_value;
pub mod scheduler;
pub mod scope;
pub mod state;
pub mod task;

pub use component::{Component, current_consumer, remember};
pub use context::ContextChannel;
pub use deps::{Comparison, Dep, DependencyComparator, DependencyList};
pub use effects::{Dispose, EffectSlot, on_unmount};
pub use error::{
    MemoError, ReentrantFlushWarning, RenderLoopError, RippleError, StaleDependencyError,
    UnresolvedContextError,
};
pub use hooks::*;
pub use memo::MemoCell;
pub use same_value::{EqualsFn, SameValue, same_value};
pub use scheduler::{ConsumerId, ObserverId, PassReport, Scheduler, SchedulerConfig, SchedulerState};
pub use scope::{Scope, ScopeId, current_scope};
pub use state::{StateCell, Update};
pub use task::{CancelToken, PendingTask, TaskOutcome};
