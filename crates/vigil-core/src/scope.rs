use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::scheduler::{self, ObserverId};

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Weak<ScopeInner>>> = const { RefCell::new(None) };
}

/// Owner of the observers created while it is current.
///
/// A templating layer runs each mounted subtree inside a scope and disposes
/// it on unmount: every observer registered inside is released and the
/// disposers run. Child scopes are disposed first.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

struct ScopeInner {
    observers: RefCell<Vec<ObserverId>>,
    disposers: RefCell<Vec<Box<dyn FnOnce()>>>,
    children: RefCell<Vec<Scope>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                observers: RefCell::new(Vec::new()),
                disposers: RefCell::new(Vec::new()),
                children: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Weak<ScopeInner>>);
        impl Drop for Restore {
            fn drop(&mut self) {
                let prev = self.0.take();
                let _ = CURRENT_SCOPE.try_with(|current| *current.borrow_mut() = prev);
            }
        }

        let prev = CURRENT_SCOPE
            .with(|current| current.replace(Some(Rc::downgrade(&self.inner))));
        let _restore = Restore(prev);
        f()
    }

    pub fn add_disposer(&self, disposer: impl FnOnce() + 'static) {
        self.inner.disposers.borrow_mut().push(Box::new(disposer));
    }

    pub(crate) fn adopt(&self, id: ObserverId) {
        self.inner.observers.borrow_mut().push(id);
    }

    pub fn child(&self) -> Scope {
        let child = Scope::new();
        self.inner.children.borrow_mut().push(child.clone());
        child
    }

    /// Number of observers registered while this scope was current.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    pub fn dispose(self) {
        self.inner.teardown();
    }
}

impl ScopeInner {
    fn teardown(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.dispose();
        }

        let observers = std::mem::take(&mut *self.observers.borrow_mut());
        for id in observers {
            scheduler::release_quietly(id);
        }

        let disposers = std::mem::take(&mut *self.disposers.borrow_mut());
        for disposer in disposers {
            disposer();
        }
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
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

/// Release-on-teardown for a scope that is dropped without `dispose`.
impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}
