use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Weak<ScopeInner>>> = const { RefCell::new(None) };
    static NEXT_SCOPE_ID: Cell<u64> = const { Cell::new(1) };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// A region of the composition hierarchy. Context values are provided per
/// scope and visible to every descendant.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    /// This scope first, then each ancestor up to the root.
    ancestry: SmallVec<[ScopeId; 8]>,
    parent: Weak<ScopeInner>,
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    /// Weak: a child nobody holds detaches itself when dropped.
    children: RefCell<Vec<Weak<ScopeInner>>>,
    disposed: Cell<bool>,
}

fn next_scope_id() -> ScopeId {
    NEXT_SCOPE_ID.with(|n| {
        let id = n.get();
        n.set(id + 1);
        ScopeId(id)
    })
}

impl Scope {
    pub fn new() -> Self {
        let mut ancestry = SmallVec::new();
        ancestry.push(next_scope_id());
        Self {
            inner: Rc::new(ScopeInner {
                ancestry,
                parent: Weak::new(),
                disposers: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.ancestry[0]
    }

    /// This scope's id followed by its ancestors' ids, innermost first.
    pub fn ancestry(&self) -> &[ScopeId] {
        &self.inner.ancestry
    }

    /// True if `other` is this scope or one of its ancestors.
    pub fn is_within(&self, other: ScopeId) -> bool {
        self.inner.ancestry.contains(&other)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        // Restores the previous scope even if `f` unwinds.
        struct Restore(Option<Weak<ScopeInner>>);
        impl Drop for Restore {
            fn drop(&mut self) {
                let prev = self.0.take();
                CURRENT_SCOPE.with(|current| *current.borrow_mut() = prev);
            }
        }

        let prev = CURRENT_SCOPE.with(|current| {
            current
                .borrow_mut()
                .replace(Rc::downgrade(&self.inner))
        });
        let _restore = Restore(prev);
        f()
    }

    pub fn add_disposer(&self, disposer: impl FnOnce() + 'static) {
        if self.is_disposed() {
            log::debug!("{}: disposer added after dispose; running now", self.id());
            disposer();
            return;
        }
        self.inner.disposers.borrow_mut().push(Box::new(disposer));
    }

    pub fn child(&self) -> Scope {
        let mut ancestry = SmallVec::with_capacity(self.inner.ancestry.len() + 1);
        ancestry.push(next_scope_id());
        ancestry.extend_from_slice(&self.inner.ancestry);
        let child = Scope {
            inner: Rc::new(ScopeInner {
                ancestry,
                parent: Rc::downgrade(&self.inner),
                disposers: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
                disposed: Cell::new(self.is_disposed()),
            }),
        };
        self.inner
            .children
            .borrow_mut()
            .push(Rc::downgrade(&child.inner));
        child
    }

    /// Disposes children first, then runs this scope's disposers. Runs at
    /// most once.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }

        self.inner.dispose_children();

        let disposers = std::mem::take(&mut *self.inner.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }

        if let Some(parent) = self.inner.parent.upgrade() {
            let me = Rc::downgrade(&self.inner);
            parent
                .children
                .borrow_mut()
                .retain(|c| !c.ptr_eq(&me) && c.strong_count() > 0);
        }
    }

    /// Child scopes that are still alive and not disposed.
    pub fn child_count(&self) -> usize {
        self.inner
            .children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|c| !c.disposed.get())
            .count()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id())
            .field("depth", &(self.inner.ancestry.len() - 1))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

pub fn current_scope() -> Option<Scope> {
    CURRENT_SCOPE.with(|current| {
        current
            .borrow()
            .as_ref()
            .and_then(|weak| weak.upgrade().map(|inner| Scope { inner }))
    })
}

impl ScopeInner {
    fn dispose_children(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children.iter().filter_map(Weak::upgrade) {
            Scope { inner: child }.dispose();
        }
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        if self.disposed.get() {
            return;
        }
        if let Some(parent) = self.parent.upgrade() {
            parent.children.borrow_mut().retain(|c| c.strong_count() > 0);
        }
        // Children still held elsewhere outlive a dropped parent; only an
        // explicit dispose cascades.

        let disposers = std::mem::take(&mut *self.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }
    }
}
