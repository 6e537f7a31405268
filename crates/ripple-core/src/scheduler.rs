//! # Scheduler
//!
//! Single-threaded, cooperative queue that turns writes into render passes.
//!
//! Consumers register a callback and receive a [`ConsumerId`]. Cells and
//! channels never own consumers; they keep ids and ask the scheduler to
//! [`schedule`](Scheduler::schedule) them. Everything scheduled during one
//! synchronous turn lands in the same pending set, and
//! [`flush`](Scheduler::flush) delivers it as one pass:
//!
//! 1. every pending consumer's callback runs once, in registration order;
//! 2. effects queued so far run, after the callbacks ("after commit");
//! 3. the pass is discarded.
//!
//! ```text
//! Idle --schedule--> Pending --flush--> Flushing --done--> Idle | Pending
//! ```
//!
//! While a pass is flushing, new notifications are deferred to the next pass
//! and a [`ReentrantFlushWarning`] is logged. A nested `flush()` is refused
//! with the same warning.
//!
//! ```rust
//! use ripple_core::*;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let scheduler = Scheduler::new();
//! let hits = Rc::new(Cell::new(0));
//! let id = scheduler.register({
//!     let hits = hits.clone();
//!     move || hits.set(hits.get() + 1)
//! });
//!
//! scheduler.schedule(id);
//! scheduler.schedule(id);
//! scheduler.flush();
//! assert_eq!(hits.get(), 1);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::error::{ReentrantFlushWarning, RenderLoopError};
use crate::task::{CancelToken, PendingTask};

new_key_type! {
    /// Generational handle to a registered consumer. A stale id never aliases
    /// a newer consumer.
    pub struct ConsumerId;

    /// Handle returned by [`Scheduler::add_pass_observer`].
    pub struct ObserverId;
}

pub type ConsumerFn = Rc<dyn Fn()>;
pub type PassObserver = Rc<dyn Fn(&PassReport)>;
type Job = Box<dyn FnOnce()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Pending,
    Flushing,
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Passes [`Scheduler::flush_until_idle`] runs before giving up.
    pub max_passes: usize,
    /// Log a [`ReentrantFlushWarning`] when a callback schedules during a
    /// flush.
    pub warn_on_reentrant: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: 50,
            warn_on_reentrant: true,
        }
    }
}

/// What one flushed pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub pass: u64,
    /// Callbacks invoked.
    pub delivered: usize,
    /// Pending consumers unregistered before their turn.
    pub dropped: usize,
    /// Effects run after the callbacks.
    pub effects: usize,
    /// Consumers already waiting for the next pass.
    pub deferred: usize,
}

struct Consumer {
    seq: u64,
    callback: ConsumerFn,
    tokens: SmallVec<[CancelToken; 2]>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: SchedulerState,
    consumers: SlotMap<ConsumerId, Consumer>,
    next_seq: u64,
    pending: Vec<ConsumerId>,
    pending_set: SecondaryMap<ConsumerId, ()>,
    deferred: Vec<ConsumerId>,
    deferred_set: SecondaryMap<ConsumerId, ()>,
    effects: VecDeque<Job>,
    running_effects: bool,
    pass: u64,
    batch_depth: usize,
    observers: SlotMap<ObserverId, PassObserver>,
}

impl SchedulerInner {
    fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.effects.is_empty()
    }

    // Move the next-pass set into the pending set and leave `Flushing`.
    fn finish_pass(&mut self) -> usize {
        self.pending = std::mem::take(&mut self.deferred);
        self.pending_set = std::mem::take(&mut self.deferred_set);
        self.running_effects = false;
        self.state = if self.has_work() {
            SchedulerState::Pending
        } else {
            SchedulerState::Idle
        };
        self.pending.len()
    }
}

/// Cheap, cloneable handle; clones share the same queue.
#[derive(Clone)]
pub struct Scheduler(Rc<RefCell<SchedulerInner>>);

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self(Rc::new(RefCell::new(SchedulerInner {
            config,
            state: SchedulerState::Idle,
            consumers: SlotMap::with_key(),
            next_seq: 0,
            pending: Vec::new(),
            pending_set: SecondaryMap::new(),
            deferred: Vec::new(),
            deferred_set: SecondaryMap::new(),
            effects: VecDeque::new(),
            running_effects: false,
            pass: 0,
            batch_depth: 0,
            observers: SlotMap::with_key(),
        })))
    }

    /// True if both handles share the same queue.
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn config(&self) -> SchedulerConfig {
        self.0.borrow().config
    }

    pub fn state(&self) -> SchedulerState {
        self.0.borrow().state
    }

    /// Number of passes flushed so far.
    pub fn pass_count(&self) -> u64 {
        self.0.borrow().pass
    }

    pub fn register(&self, callback: impl Fn() + 'static) -> ConsumerId {
        let mut inner = self.0.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = inner.consumers.insert(Consumer {
            seq,
            callback: Rc::new(callback),
            tokens: SmallVec::new(),
        });
        log::trace!("scheduler: registered consumer {id:?}");
        id
    }

    /// Removes the consumer from any pending pass and cancels its tasks. A
    /// callback that is already running completes normally.
    pub fn unregister(&self, id: ConsumerId) -> bool {
        let consumer = {
            let mut inner = self.0.borrow_mut();
            let Some(consumer) = inner.consumers.remove(id) else {
                return false;
            };
            if inner.pending_set.remove(id).is_some() {
                inner.pending.retain(|c| *c != id);
            }
            if inner.deferred_set.remove(id).is_some() {
                inner.deferred.retain(|c| *c != id);
            }
            if inner.state == SchedulerState::Pending && !inner.has_work() {
                inner.state = SchedulerState::Idle;
            }
            consumer
        };
        for token in &consumer.tokens {
            token.cancel();
        }
        log::trace!("scheduler: unregistered consumer {id:?}");
        true
    }

    pub fn is_registered(&self, id: ConsumerId) -> bool {
        self.0.borrow().consumers.contains_key(id)
    }

    pub fn consumer_count(&self) -> usize {
        self.0.borrow().consumers.len()
    }

    /// Queue a notification for `id`. Idempotent within a pass. Returns
    /// `false` if the consumer is no longer registered.
    pub fn schedule(&self, id: ConsumerId) -> bool {
        let mut inner = self.0.borrow_mut();
        if !inner.consumers.contains_key(id) {
            return false;
        }
        match inner.state {
            SchedulerState::Flushing => {
                if inner.deferred_set.insert(id, ()).is_none() {
                    inner.deferred.push(id);
                    if inner.running_effects {
                        log::debug!("scheduler: effect scheduled {id:?} for the next pass");
                    } else if inner.config.warn_on_reentrant {
                        log::warn!("{}", ReentrantFlushWarning { pass: inner.pass });
                    }
                }
            }
            SchedulerState::Idle | SchedulerState::Pending => {
                if inner.pending_set.insert(id, ()).is_none() {
                    inner.pending.push(id);
                    log::trace!("scheduler: scheduled {id:?}");
                }
                inner.state = SchedulerState::Pending;
            }
        }
        true
    }

    /// Queue a deferred effect. Effects run after the callbacks of the pass
    /// that is flushing (or the next one, if none is).
    pub fn enqueue_effect(&self, job: impl FnOnce() + 'static) {
        let mut inner = self.0.borrow_mut();
        inner.effects.push_back(Box::new(job));
        if inner.state == SchedulerState::Idle {
            inner.state = SchedulerState::Pending;
        }
    }

    /// Start cancellable work on behalf of `consumer`. Unregistering the
    /// consumer cancels the task; so does [`PendingTask::cancel`].
    pub fn spawn_task<T>(
        &self,
        consumer: ConsumerId,
        apply: impl FnOnce(T) + 'static,
    ) -> PendingTask<T> {
        let token = CancelToken::new();
        match self.0.borrow_mut().consumers.get_mut(consumer) {
            Some(c) => {
                c.tokens.retain(|t| t.is_live());
                c.tokens.push(token.clone());
            }
            None => {
                log::debug!("scheduler: task spawned for missing consumer {consumer:?}");
                token.cancel();
            }
        }
        PendingTask::with_token(token, apply)
    }

    /// Call `observer` with the report of every flushed pass until it is
    /// removed.
    pub fn add_pass_observer(&self, observer: impl Fn(&PassReport) + 'static) -> ObserverId {
        self.0.borrow_mut().observers.insert(Rc::new(observer))
    }

    pub fn remove_pass_observer(&self, id: ObserverId) -> bool {
        self.0.borrow_mut().observers.remove(id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.0.borrow().observers.len()
    }

    /// Flush one render pass. Returns `None` if there was nothing to do or a
    /// pass is already flushing.
    pub fn flush(&self) -> Option<PassReport> {
        let (order, pass) = {
            let mut inner = self.0.borrow_mut();
            match inner.state {
                SchedulerState::Idle => return None,
                SchedulerState::Flushing => {
                    if inner.config.warn_on_reentrant {
                        log::warn!("{}", ReentrantFlushWarning { pass: inner.pass });
                    }
                    return None;
                }
                SchedulerState::Pending => {}
            }
            inner.state = SchedulerState::Flushing;
            inner.pass += 1;

            let mut order = std::mem::take(&mut inner.pending);
            inner.pending_set.clear();
            order.sort_by_key(|id| inner.consumers.get(*id).map_or(u64::MAX, |c| c.seq));
            (order, inner.pass)
        };

        let mut guard = FlushGuard {
            scheduler: self,
            armed: true,
        };
        let mut report = PassReport {
            pass,
            ..PassReport::default()
        };

        for id in order {
            // An earlier callback in this pass may have unregistered it.
            let callback = self.0.borrow().consumers.get(id).map(|c| c.callback.clone());
            match callback {
                Some(callback) => {
                    callback();
                    report.delivered += 1;
                }
                None => report.dropped += 1,
            }
        }

        let jobs = {
            let mut inner = self.0.borrow_mut();
            inner.running_effects = true;
            std::mem::take(&mut inner.effects)
        };
        for job in jobs {
            job();
            report.effects += 1;
        }

        guard.armed = false;
        report.deferred = self.0.borrow_mut().finish_pass();
        log::debug!(
            "scheduler: pass {} delivered={} dropped={} effects={} deferred={}",
            report.pass,
            report.delivered,
            report.dropped,
            report.effects,
            report.deferred
        );

        let observers: Vec<PassObserver> = self.0.borrow().observers.values().cloned().collect();
        for observer in observers {
            observer(&report);
        }
        Some(report)
    }

    /// Flush until idle. Fails once `max_passes` passes ran and work is still
    /// pending (a component that keeps scheduling itself).
    pub fn flush_until_idle(&self) -> Result<usize, RenderLoopError> {
        let max = self.config().max_passes;
        let mut passes = 0;
        while self.flush().is_some() {
            passes += 1;
            if passes >= max && self.state() == SchedulerState::Pending {
                log::error!("scheduler: still pending after {passes} passes");
                return Err(RenderLoopError { passes });
            }
        }
        Ok(passes)
    }

    /// Run `f` as one synchronous turn: everything it schedules is flushed as
    /// a single pass when the outermost batch exits.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.0.borrow_mut().batch_depth += 1;

        struct BatchGuard<'a>(&'a Scheduler);

        impl Drop for BatchGuard<'_> {
            fn drop(&mut self) {
                let (depth, state) = {
                    let mut inner = self.0.0.borrow_mut();
                    inner.batch_depth -= 1;
                    (inner.batch_depth, inner.state)
                };
                if depth == 0 && state == SchedulerState::Pending && !std::thread::panicking() {
                    self.0.flush();
                }
            }
        }

        let _guard = BatchGuard(self);
        f()
    }

    pub fn is_batching(&self) -> bool {
        self.0.borrow().batch_depth > 0
    }

    #[cfg(feature = "inspector")]
    pub fn pending_consumers(&self) -> Vec<ConsumerId> {
        self.0.borrow().pending.clone()
    }
}

// Leaves `Flushing` if a callback or effect unwinds.
struct FlushGuard<'a> {
    scheduler: &'a Scheduler,
    armed: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Ok(mut inner) = self.scheduler.0.try_borrow_mut()
        {
            inner.effects.clear();
            inner.finish_pass();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        let mut d = f.debug_struct("Scheduler");
        d.field("state", &inner.state)
            .field("pass", &inner.pass)
            .field("consumers", &inner.consumers.len())
            .field("pending", &inner.pending.len())
            .field("effects", &inner.effects.len());
        #[cfg(feature = "inspector")]
        d.field("pending_ids", &inner.pending)
            .field("deferred_ids", &inner.deferred);
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    fn counter(scheduler: &Scheduler) -> (ConsumerId, Rc<Cell<usize>>) {
        let hits = Rc::new(Cell::new(0));
        let id = scheduler.register({
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        });
        (id, hits)
    }

    #[test]
    fn state_machine_moves_through_a_pass() {
        let s = Scheduler::new();
        let seen = Rc::new(Cell::new(None));
        let id = s.register({
            let s = s.clone();
            let seen = seen.clone();
            move || seen.set(Some(s.state()))
        });

        assert_eq!(s.state(), SchedulerState::Idle);
        s.schedule(id);
        assert_eq!(s.state(), SchedulerState::Pending);
        s.flush();
        assert_eq!(seen.get(), Some(SchedulerState::Flushing));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn idle_flush_does_nothing() {
        let s = Scheduler::new();
        assert!(s.flush().is_none());
        assert_eq!(s.pass_count(), 0);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let s = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let ids: Vec<_> = (0..3)
            .map(|n| {
                let log = log.clone();
                s.register(move || log.borrow_mut().push(n))
            })
            .collect();

        s.schedule(ids[2]);
        s.schedule(ids[0]);
        s.schedule(ids[1]);
        s.flush();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn unregister_before_flush_drops_notification() {
        let s = Scheduler::new();
        let (id, hits) = counter(&s);
        s.schedule(id);
        assert!(s.unregister(id));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(s.flush().is_none());
        assert_eq!(hits.get(), 0);
        assert!(!s.schedule(id));
    }

    #[test]
    fn unregister_mid_pass_skips_later_consumer() {
        let s = Scheduler::new();
        let victim = Rc::new(Cell::new(None));
        let first = s.register({
            let s = s.clone();
            let victim = victim.clone();
            move || {
                if let Some(v) = victim.get() {
                    s.unregister(v);
                }
            }
        });
        // Registered after `first`, so it runs later in the pass.
        let (third, third_hits) = counter(&s);
        victim.set(Some(third));

        s.schedule(third);
        s.schedule(first);
        let report = s.flush().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(third_hits.get(), 0);
    }

    #[test]
    fn schedules_during_flush_go_to_next_pass() {
        let s = Scheduler::new();
        let (target, hits) = counter(&s);
        let trigger = s.register({
            let s = s.clone();
            move || {
                s.schedule(target);
            }
        });

        s.schedule(trigger);
        let report = s.flush().unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(hits.get(), 0);
        assert_eq!(s.state(), SchedulerState::Pending);

        s.flush();
        assert_eq!(hits.get(), 1);
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn nested_flush_is_refused() {
        let s = Scheduler::new();
        let nested = Rc::new(Cell::new(true));
        let id = s.register({
            let s = s.clone();
            let nested = nested.clone();
            move || nested.set(s.flush().is_some())
        });
        s.schedule(id);
        s.flush();
        assert!(!nested.get());
    }

    #[test]
    fn effects_run_after_callbacks() {
        let s = Scheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let id = s.register({
            let log = log.clone();
            move || log.borrow_mut().push("render")
        });
        s.enqueue_effect({
            let log = log.clone();
            move || log.borrow_mut().push("effect")
        });
        s.schedule(id);

        let report = s.flush().unwrap();
        assert_eq!(report.effects, 1);
        assert_eq!(*log.borrow(), vec!["render", "effect"]);
    }

    #[test]
    fn flush_until_idle_stops_runaway_loops() {
        let s = Scheduler::with_config(SchedulerConfig {
            max_passes: 5,
            warn_on_reentrant: false,
        });
        let me = Rc::new(Cell::new(None));
        let id = s.register({
            let s = s.clone();
            let me = me.clone();
            move || {
                if let Some(id) = me.get() {
                    s.schedule(id);
                }
            }
        });
        me.set(Some(id));
        s.schedule(id);

        assert_eq!(s.flush_until_idle(), Err(RenderLoopError { passes: 5 }));
    }

    #[test]
    fn flush_until_idle_settles_chains() {
        let s = Scheduler::new();
        let (last, hits) = counter(&s);
        let first = s.register({
            let s = s.clone();
            move || {
                s.schedule(last);
            }
        });
        s.schedule(first);
        assert_eq!(s.flush_until_idle(), Ok(2));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn batch_flushes_once_at_outermost_exit() {
        let s = Scheduler::new();
        let (id, hits) = counter(&s);
        s.batch(|| {
            s.schedule(id);
            s.batch(|| {
                s.schedule(id);
            });
            assert!(s.is_batching());
            assert_eq!(hits.get(), 0);
        });
        assert_eq!(hits.get(), 1);
        assert_eq!(s.pass_count(), 1);
    }

    #[test]
    fn unregister_cancels_spawned_tasks() {
        let s = Scheduler::new();
        let (id, _) = counter(&s);
        let task = s.spawn_task(id, |_: i32| {});
        let token = task.token();
        s.unregister(id);
        assert!(token.is_cancelled());
        assert_eq!(task.complete(1), crate::task::TaskOutcome::Cancelled);
    }

    #[test]
    fn observers_see_every_report() {
        let s = Scheduler::new();
        let (id, _) = counter(&s);
        let reports = Rc::new(RefCell::new(Vec::new()));
        let observer = s.add_pass_observer({
            let reports = reports.clone();
            move |r| reports.borrow_mut().push(*r)
        });
        s.schedule(id);
        s.flush();
        assert_eq!(reports.borrow().len(), 1);
        assert_eq!(reports.borrow()[0].delivered, 1);

        assert!(s.remove_pass_observer(observer));
        assert!(!s.remove_pass_observer(observer));
        assert_eq!(s.observer_count(), 0);
        s.schedule(id);
        s.flush();
        assert_eq!(reports.borrow().len(), 1);
    }
}
