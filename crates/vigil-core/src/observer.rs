use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::scheduler::{self, ObserverFlags, ObserverId};
use crate::scope;

/// Handle to a registered observer.
///
/// Dropping the handle does not stop the observer; call [`Observer::release`]
/// (or dispose the [`Scope`](crate::Scope) it was created in).
pub struct Observer<T: 'static> {
    id: ObserverId,
    latest: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            latest: self.latest.clone(),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("id", &self.id).finish()
    }
}

impl<T: 'static> Observer<T> {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Re-run now, re-establishing dependencies. No-op once released.
    pub fn run(&self) {
        scheduler::run(self.id);
    }

    /// Stop reacting immediately; the observer and its descendants are
    /// removed on the next removal pass after the debounce window.
    pub fn release(&self) {
        scheduler::release(self.id);
    }

    pub fn is_released(&self) -> bool {
        !scheduler::is_watched(self.id)
    }

    /// Hook invoked when the observer is finally removed.
    pub fn on_release(&self, hook: impl FnOnce() + 'static) {
        scheduler::on_remove(self.id, hook);
    }

    /// Result of the most recent run of the tracked callback.
    pub fn latest(&self) -> Option<T>
    where
        T: Clone,
    {
        self.latest.borrow().clone()
    }

    pub fn with_latest<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.latest.borrow().as_ref())
    }
}

/// Register an observer and run it once.
///
/// Every reactive read made by `tracked` subscribes the observer to that
/// path; a later write to the path schedules a re-run.
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use vigil_core::*;
///
/// let store = create_store(Record::new().with("count", 0)).unwrap();
/// let seen = Rc::new(Cell::new(0.0));
/// let obs = observe({
///     let store = store.clone();
///     let seen = seen.clone();
///     move || seen.set(store.get("count").as_f64().unwrap_or(0.0))
/// });
///
/// store.set("count", 3).unwrap();
/// assert_eq!(seen.get(), 0.0); // batched until the flush
/// flush();
/// assert_eq!(seen.get(), 3.0);
/// obs.release();
/// ```
pub fn observe<T, F>(tracked: F) -> Observer<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
{
    spawn(
        Cow::Borrowed(std::any::type_name::<F>()),
        tracked,
        None::<fn(&T)>,
        ObserverFlags::empty(),
    )
}

/// Like [`observe`], and additionally hands each result to `untracked`,
/// whose reads are not tracked.
pub fn observe_with<T, F, U>(tracked: F, untracked: U) -> Observer<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
    U: Fn(&T) + 'static,
{
    spawn(
        Cow::Borrowed(std::any::type_name::<F>()),
        tracked,
        Some(untracked),
        ObserverFlags::empty(),
    )
}

/// Computed-property cacher: created outside the current observer and
/// flagged internal.
pub(crate) fn spawn_internal<F, U>(label: String, tracked: F, untracked: U) -> ObserverId
where
    F: Fn() -> crate::Value + 'static,
    U: Fn(&crate::Value) + 'static,
{
    scheduler::untracked(|| {
        spawn(
            Cow::Owned(label),
            tracked,
            Some(untracked),
            ObserverFlags::INTERNAL,
        )
        .id
    })
}

fn spawn<T, F, U>(
    label: Cow<'static, str>,
    tracked: F,
    untracked: Option<U>,
    flags: ObserverFlags,
) -> Observer<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
    U: Fn(&T) + 'static,
{
    let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let slot = latest.clone();
    let runner: Rc<dyn Fn()> = Rc::new(move || {
        let value = tracked();
        *slot.borrow_mut() = Some(value);
        if let Some(untracked) = &untracked
            && let Some(value) = slot.borrow().as_ref()
        {
            scheduler::untracked(|| untracked(value));
        }
    });

    let id = scheduler::register(runner, label, flags);
    if !flags.contains(ObserverFlags::INTERNAL)
        && let Some(scope) = scope::current_scope()
    {
        scope.adopt(id);
    }
    scheduler::run(id);
    Observer { id, latest }
}
