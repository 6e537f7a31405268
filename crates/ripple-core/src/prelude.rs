pub use crate::component::{Component, current_consumer, remember};
pub use crate::context::ContextChannel;
pub use crate::deps;
pub use crate::deps::{Comparison, Dep, DependencyComparator, DependencyList};
pub use crate::effects::{Dispose, EffectSlot, on_unmount};
pub use crate::error::{
    MemoError, ReentrantFlushWarning, RenderLoopError, RippleError, StaleDependencyError,
    UnresolvedContextError,
};
pub use crate::hooks::{
    Dispatch, Handler, Reducer, use_callback, use_context, use_effect, use_memo, use_reducer,
    use_ref, use_state, use_task,
};
pub use crate::memo::MemoCell;
pub use crate::same_value::{EqualsFn, SameValue, same_value};
pub use crate::scheduler::{
    ConsumerId, ObserverId, PassReport, Scheduler, SchedulerConfig, SchedulerState,
};
pub use crate::scope::{Scope, ScopeId, current_scope};
pub use crate::state::{StateCell, Update};
pub use crate::task::{CancelToken, PendingTask, TaskOutcome};
