//! Error types surfaced by cells, channels and the scheduler.
//!
//! Every error is reported synchronously to the immediate caller. Nothing is
//! retried: the model is single-threaded and a retry would observe the same
//! state.

use thiserror::Error;

/// A memo or effect was evaluated with a dependency list whose length differs
/// from the previous evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("dependency list changed length between evaluations ({previous} -> {current})")]
pub struct StaleDependencyError {
    pub previous: usize,
    pub current: usize,
}

/// A context channel was consumed with no enclosing provider and no default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context `{channel}` consumed outside of any provider and has no default")]
pub struct UnresolvedContextError {
    pub channel: String,
}

/// Non-fatal: a notification was requested while a pass was flushing.
///
/// Never returned as `Err`; the scheduler logs it through `log::warn!` and
/// defers the notification to the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("render pass {pass} is flushing; notification deferred to the next pass")]
pub struct ReentrantFlushWarning {
    pub pass: u64,
}

/// The scheduler kept producing passes past its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("too many re-renders: scheduler still pending after {passes} passes")]
pub struct RenderLoopError {
    pub passes: usize,
}

/// Failure of [`MemoCell::try_evaluate`](crate::MemoCell::try_evaluate).
#[derive(Debug, Error)]
pub enum MemoError<E> {
    #[error(transparent)]
    Stale(#[from] StaleDependencyError),
    #[error("memo factory failed: {0}")]
    Factory(E),
}

/// Umbrella error for call sites that can fail in more than one way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RippleError {
    #[error(transparent)]
    StaleDependency(#[from] StaleDependencyError),
    #[error(transparent)]
    UnresolvedContext(#[from] UnresolvedContextError),
    #[error(transparent)]
    RenderLoop(#[from] RenderLoopError),
}

pub type Result<T, E = RippleError> = std::result::Result<T, E>;
