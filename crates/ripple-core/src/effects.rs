use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::deps::{Comparison, DependencyComparator, DependencyList};
use crate::error::StaleDependencyError;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct Dispose(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.borrow_mut().take();
        if let Some(f) = f {
            f()
        }
    }
}

/// Helper to return a cleanup from an effect.
pub fn on_unmount(f: impl FnOnce() + 'static) -> Dispose {
    Dispose::new(f)
}

/// State of one effect call site: the dependencies it last ran with and the
/// cleanup it left behind.
///
/// Effects never run inline. [`schedule`](Self::schedule) enqueues a job on
/// the scheduler; the job runs the previous cleanup, then the effect, after
/// the callbacks of the pass.
pub struct EffectSlot {
    deps: RefCell<Option<DependencyList>>,
    cleanup: Rc<RefCell<Option<Dispose>>>,
    alive: Rc<Cell<bool>>,
    runs: Rc<Cell<usize>>,
}

impl EffectSlot {
    pub fn new() -> Self {
        Self {
            deps: RefCell::new(None),
            cleanup: Rc::new(RefCell::new(None)),
            alive: Rc::new(Cell::new(true)),
            runs: Rc::new(Cell::new(0)),
        }
    }

    /// Enqueue `effect` if `deps` changed since the last call. Returns
    /// whether it was enqueued.
    pub fn schedule(
        &self,
        scheduler: &Scheduler,
        deps: DependencyList,
        effect: impl FnOnce() -> Option<Dispose> + 'static,
    ) -> bool {
        if !self.alive.get() {
            return false;
        }
        let comparison = DependencyComparator::compare(self.deps.borrow().as_ref(), &deps);
        match comparison {
            Comparison::Unchanged => return false,
            Comparison::ArityChanged { previous, current } => {
                log::warn!(
                    "effect: {}; running it as changed",
                    StaleDependencyError { previous, current }
                );
            }
            Comparison::Changed => {}
        }
        *self.deps.borrow_mut() = Some(deps);

        let cleanup = self.cleanup.clone();
        let alive = self.alive.clone();
        let runs = self.runs.clone();
        scheduler.enqueue_effect(move || {
            if !alive.get() {
                return;
            }
            let previous = cleanup.borrow_mut().take();
            if let Some(previous) = previous {
                previous.run();
            }
            let next = effect();
            runs.set(runs.get() + 1);
            *cleanup.borrow_mut() = next;
        });
        true
    }

    /// How many times the effect body has run.
    pub fn runs(&self) -> usize {
        self.runs.get()
    }

    /// Run the outstanding cleanup and stop any queued run (unmount).
    pub fn dispose(&self) {
        if !self.alive.replace(false) {
            return;
        }
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            cleanup.run();
        }
    }
}

impl Default for EffectSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;

    #[test]
    fn dispose_runs_once() {
        let hits = Rc::new(Cell::new(0));
        let d = on_unmount({
            let hits = hits.clone();
            move || hits.set(hits.get() + 1)
        });
        let d2 = d.clone();
        d.run();
        d2.run();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn effect_waits_for_flush() {
        let s = Scheduler::new();
        let slot = EffectSlot::new();
        let ran = Rc::new(Cell::new(false));
        slot.schedule(&s, deps![], {
            let ran = ran.clone();
            move || {
                ran.set(true);
                None
            }
        });
        assert!(!ran.get());
        s.flush();
        assert!(ran.get());
    }

    #[test]
    fn cleanup_runs_before_next_effect() {
        let s = Scheduler::new();
        let slot = EffectSlot::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for id in [1, 2] {
            let log = log.clone();
            slot.schedule(&s, deps![id], move || {
                log.borrow_mut().push(format!("subscribe {id}"));
                let log = log.clone();
                Some(on_unmount(move || log.borrow_mut().push(format!("unsubscribe {id}"))))
            });
            s.flush();
        }
        slot.dispose();

        assert_eq!(
            *log.borrow(),
            vec!["subscribe 1", "unsubscribe 1", "subscribe 2", "unsubscribe 2"]
        );
    }

    #[test]
    fn unchanged_deps_skip_the_effect() {
        let s = Scheduler::new();
        let slot = EffectSlot::new();
        assert!(slot.schedule(&s, deps!["room"], || None));
        s.flush();
        assert!(!slot.schedule(&s, deps!["room"], || None));
        assert!(s.flush().is_none());
        assert_eq!(slot.runs(), 1);
    }

    #[test]
    fn disposed_slot_skips_queued_run() {
        let s = Scheduler::new();
        let slot = EffectSlot::new();
        slot.schedule(&s, deps![], || panic!("effect ran after unmount"));
        slot.dispose();
        s.flush();
        assert_eq!(slot.runs(), 0);
    }
}
