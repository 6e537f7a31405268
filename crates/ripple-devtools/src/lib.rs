//! Render-pass inspector for a [`ripple_core::Scheduler`].
//!
//! ```rust
//! use ripple_core::*;
//! use ripple_devtools::PassInspector;
//!
//! let scheduler = Scheduler::new();
//! let inspector = PassInspector::new(16);
//! inspector.attach(&scheduler);
//!
//! let count = StateCell::new(&scheduler, 0);
//! let id = scheduler.register(|| {});
//! count.subscribe(id);
//! count.set(1);
//! scheduler.flush();
//!
//! assert_eq!(inspector.totals().delivered, 1);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use ripple_core::{ObserverId, PassReport, Scheduler};
use web_time::Instant;

/// Running sums over every pass recorded while enabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub passes: u64,
    pub delivered: usize,
    pub dropped: usize,
    pub effects: usize,
    pub deferred: usize,
}

struct InspectorState {
    enabled: bool,
    capacity: usize,
    history: VecDeque<PassReport>,
    totals: Totals,
    last_pass: Option<Instant>,
    rate_smooth: f32,
    attachments: Vec<(Scheduler, ObserverId)>,
}

impl Drop for InspectorState {
    fn drop(&mut self) {
        for (scheduler, id) in self.attachments.drain(..) {
            scheduler.remove_pass_observer(id);
        }
    }
}

impl InspectorState {
    fn record(&mut self, report: &PassReport) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if let Some(prev) = self.last_pass.replace(now) {
            let dt = (now - prev).as_secs_f32();
            if dt > 0.0 {
                let rate = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                self.rate_smooth = if self.rate_smooth == 0.0 {
                    rate
                } else {
                    (1.0 - a) * self.rate_smooth + a * rate
                };
            }
        }

        self.totals.passes += 1;
        self.totals.delivered += report.delivered;
        self.totals.dropped += report.dropped;
        self.totals.effects += report.effects;
        self.totals.deferred += report.deferred;

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        if self.capacity > 0 {
            self.history.push_back(*report);
        }
    }
}

/// Keeps the most recent [`PassReport`]s of the schedulers it is attached
/// to. Clones share the same history.
#[derive(Clone)]
pub struct PassInspector {
    state: Rc<RefCell<InspectorState>>,
}

impl Default for PassInspector {
    fn default() -> Self {
        Self::new(64)
    }
}

impl PassInspector {
    /// `capacity` bounds the history; totals are kept regardless.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(InspectorState {
                enabled: true,
                capacity,
                history: VecDeque::with_capacity(capacity),
                totals: Totals::default(),
                last_pass: None,
                rate_smooth: 0.0,
                attachments: Vec::new(),
            })),
        }
    }

    /// Observe every pass `scheduler` flushes. The scheduler only holds a
    /// weak handle; dropping the last inspector clone detaches it.
    pub fn attach(&self, scheduler: &Scheduler) {
        let weak = Rc::downgrade(&self.state);
        let id = scheduler.add_pass_observer(move |report| {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().record(report);
            }
        });
        self.state
            .borrow_mut()
            .attachments
            .push((scheduler.clone(), id));
        log::debug!("inspector: attached");
    }

    /// Stop observing `scheduler`. Returns `false` if it was not attached.
    pub fn detach(&self, scheduler: &Scheduler) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(at) = state
            .attachments
            .iter()
            .position(|(s, _)| s.ptr_eq(scheduler))
        else {
            return false;
        };
        let (scheduler, id) = state.attachments.remove(at);
        drop(state);
        scheduler.remove_pass_observer(id)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.borrow_mut();
        state.enabled = enabled;
        if !enabled {
            state.last_pass = None;
        }
    }

    pub fn toggle(&self) {
        let enabled = self.is_enabled();
        self.set_enabled(!enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().enabled
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<PassReport> {
        self.state.borrow().history.iter().copied().collect()
    }

    pub fn last(&self) -> Option<PassReport> {
        self.state.borrow().history.back().copied()
    }

    pub fn totals(&self) -> Totals {
        self.state.borrow().totals
    }

    /// Smoothed passes per second.
    pub fn pass_rate(&self) -> f32 {
        self.state.borrow().rate_smooth
    }

    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.history.clear();
        state.totals = Totals::default();
        state.last_pass = None;
        state.rate_smooth = 0.0;
    }

    pub fn summary(&self) -> String {
        let state = self.state.borrow();
        let mut lines = vec![
            format!("passes: {}", state.totals.passes),
            format!("rate: {:.1}/s", state.rate_smooth),
            format!("delivered: {}", state.totals.delivered),
            format!("effects: {}", state.totals.effects),
        ];
        if state.totals.dropped > 0 {
            lines.push(format!("dropped: {}", state.totals.dropped));
        }
        if let Some(last) = state.history.back() {
            lines.push(format!(
                "last: #{} ({} delivered, {} deferred)",
                last.pass, last.delivered, last.deferred
            ));
        }
        lines.join("  |  ")
    }

    pub fn log_summary(&self) {
        log::info!("{}", self.summary());
    }
}

/// One line describing what `scheduler` would deliver on its next flush.
pub fn describe_pending(scheduler: &Scheduler) -> String {
    let pending = scheduler.pending_consumers();
    if pending.is_empty() {
        return format!("{:?}: nothing pending", scheduler.state());
    }
    let ids: Vec<String> = pending.iter().map(|id| format!("{id:?}")).collect();
    format!("{:?}: {} pending [{}]", scheduler.state(), pending.len(), ids.join(", "))
}
