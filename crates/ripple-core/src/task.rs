//! Cancellable pending work.
//!
//! A [`PendingTask`] stands for asynchronous work (a network fetch, a timer)
//! whose result should land in some state once it completes. When the
//! consumer that started it goes away, or the effect that spawned it is
//! re-run with new dependencies, its [`CancelToken`] is cancelled and the late
//! completion is discarded instead of writing stale data.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenState {
    Live,
    Cancelled,
    Settled,
}

#[derive(Clone)]
pub struct CancelToken(Rc<Cell<TokenState>>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(TokenState::Live)))
    }

    /// No effect once the task has completed.
    pub fn cancel(&self) {
        if self.0.get() == TokenState::Live {
            self.0.set(TokenState::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get() == TokenState::Cancelled
    }

    /// Neither cancelled nor completed.
    pub fn is_live(&self) -> bool {
        self.0.get() == TokenState::Live
    }

    fn settle(&self) {
        self.0.set(TokenState::Settled);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelToken").field(&self.0.get()).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied,
    Cancelled,
}

pub struct PendingTask<T> {
    token: CancelToken,
    apply: Option<Box<dyn FnOnce(T)>>,
}

impl<T> PendingTask<T> {
    pub fn new(apply: impl FnOnce(T) + 'static) -> Self {
        Self::with_token(CancelToken::new(), apply)
    }

    pub fn with_token(token: CancelToken, apply: impl FnOnce(T) + 'static) -> Self {
        Self {
            token,
            apply: Some(Box::new(apply)),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Deliver the result. Checks the token first; a cancelled task drops the
    /// value without running its apply step.
    pub fn complete(mut self, value: T) -> TaskOutcome {
        if self.token.is_cancelled() {
            log::debug!("task: late completion discarded (token cancelled)");
            return TaskOutcome::Cancelled;
        }
        self.token.settle();
        match self.apply.take() {
            Some(apply) => {
                apply(value);
                TaskOutcome::Applied
            }
            None => TaskOutcome::Cancelled,
        }
    }
}

impl<T> Drop for PendingTask<T> {
    fn drop(&mut self) {
        // Abandoned without completing; nobody will deliver a result.
        if self.token.is_live() {
            self.token.settle();
        }
    }
}

impl<T> fmt::Debug for PendingTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn completion_applies_result() {
        let out = Rc::new(RefCell::new(None));
        let task = PendingTask::new({
            let out = out.clone();
            move |v| *out.borrow_mut() = Some(v)
        });
        assert_eq!(task.complete("user#1"), TaskOutcome::Applied);
        assert_eq!(*out.borrow(), Some("user#1"));
    }

    #[test]
    fn cancelled_task_discards_late_result() {
        let out = Rc::new(Cell::new(0));
        let task = PendingTask::new({
            let out = out.clone();
            move |v| out.set(v)
        });
        let token = task.token();
        token.cancel();
        assert_eq!(task.complete(9), TaskOutcome::Cancelled);
        assert_eq!(out.get(), 0);
    }

    #[test]
    fn cancel_after_completion_is_ignored() {
        let task = PendingTask::new(|_: ()| {});
        let token = task.token();
        task.complete(());
        token.cancel();
        assert!(!token.is_cancelled());
        assert!(!token.is_live());
    }

    #[test]
    fn dropping_a_task_settles_its_token() {
        let task = PendingTask::new(|_: u8| {});
        let token = task.token();
        drop(task);
        assert!(!token.is_live());
    }
}
