//! Observer registry, dependency bookkeeping and the batched flush.
//!
//! Every observer run starts from an empty dependency set: it detaches from
//! the subscriber sets it joined last time, becomes the active observer, and
//! re-registers whatever it reads. Writes enqueue the subscribers of the
//! written path; [`flush`] drains the queue.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::runtime::{Runtime, try_with_runtime, with_runtime};

slotmap::new_key_type! {
    /// Identity of a registered observer.
    pub struct ObserverId;
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ObserverFlags: u8 {
        /// Released; skipped by flushes, waiting for removal.
        const UNWATCHED = 1 << 0;
        /// Computed-property cacher owned by a store.
        const INTERNAL = 1 << 1;
        /// Currently executing its tracked callback.
        const RUNNING = 1 << 2;
    }
}

type RemoveHook = Box<dyn FnOnce()>;

pub(crate) struct ObserverEntry {
    runner: Rc<dyn Fn()>,
    label: Cow<'static, str>,
    parent: Option<ObserverId>,
    children: SmallVec<[ObserverId; 4]>,
    deps: HashSet<Subscribers>,
    flags: ObserverFlags,
    on_remove: SmallVec<[RemoveHook; 1]>,
    runs: u64,
}

/// The set of observers subscribed to one path.
///
/// Observers keep a handle to every set they joined so detaching is a direct
/// removal instead of a search through the path map.
#[derive(Clone, Default)]
pub(crate) struct Subscribers(Rc<SubscriberSet>);

#[derive(Default)]
pub(crate) struct SubscriberSet {
    ids: RefCell<SmallVec<[ObserverId; 4]>>,
    /// Computed cacher feeding this (shadow) path.
    cacher: Cell<Option<ObserverId>>,
}

impl Subscribers {
    pub(crate) fn ids(&self) -> SmallVec<[ObserverId; 4]> {
        self.0.ids.borrow().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.ids.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.ids.borrow().is_empty()
    }

    fn insert(&self, id: ObserverId) {
        let mut ids = self.0.ids.borrow_mut();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    fn remove(&self, id: ObserverId) {
        self.0.ids.borrow_mut().retain(|i| *i != id);
    }

    pub(crate) fn cacher(&self) -> Option<ObserverId> {
        self.0.cacher.get()
    }

    pub(crate) fn set_cacher(&self, id: ObserverId) {
        self.0.cacher.set(Some(id));
    }
}

impl PartialEq for Subscribers {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Subscribers {}

impl Hash for Subscribers {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).hash(state);
    }
}

/// Read-only view of one registered observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObserverInfo {
    pub id: ObserverId,
    pub label: String,
    pub parent: Option<ObserverId>,
    pub children: usize,
    pub dependencies: usize,
    pub flags: ObserverFlags,
    pub runs: u64,
}

/// Restores the previous cursor (and clears `RUNNING`) on every exit path,
/// unwinding included.
struct CursorGuard {
    prev: Option<ObserverId>,
    running: Option<ObserverId>,
}

impl CursorGuard {
    fn enter(next: Option<ObserverId>, running: Option<ObserverId>) -> Self {
        let prev = with_runtime(|rt| std::mem::replace(&mut rt.active, next));
        Self { prev, running }
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        let running = self.running;
        try_with_runtime(|rt| {
            rt.active = prev;
            if let Some(e) = running.and_then(|id| rt.observers.get_mut(id)) {
                e.flags.remove(ObserverFlags::RUNNING);
            }
        });
    }
}

pub(crate) fn active() -> Option<ObserverId> {
    with_runtime(|rt| rt.active)
}

/// Run `f` with no active observer: nothing it reads is tracked and
/// observers it creates have no parent.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = CursorGuard::enter(None, None);
    f()
}

pub(crate) fn register(
    runner: Rc<dyn Fn()>,
    label: Cow<'static, str>,
    flags: ObserverFlags,
) -> ObserverId {
    with_runtime(|rt| {
        let id = rt.observers.insert(ObserverEntry {
            runner,
            label,
            parent: None,
            children: SmallVec::new(),
            deps: HashSet::new(),
            flags,
            on_remove: SmallVec::new(),
            runs: 0,
        });
        log::trace!("observer {id:?} registered");
        id
    })
}

/// Record `id` as a subscriber of `set`, on both sides.
pub(crate) fn subscribe(id: ObserverId, set: &Subscribers) {
    with_runtime(|rt| {
        if let Some(e) = rt.observers.get_mut(id) {
            set.insert(id);
            e.deps.insert(set.clone());
        }
    });
}

/// Execute an observer: adopt the active observer as parent, release the
/// children of the previous run, drop stale dependencies, then run the
/// callbacks with the observer as cursor.
pub(crate) fn run(id: ObserverId) {
    let Some(runner) = with_runtime(|rt| rt.prepare_run(id)) else {
        return;
    };
    let _guard = CursorGuard::enter(Some(id), Some(id));
    runner();
}

impl Runtime {
    fn prepare_run(&mut self, id: ObserverId) -> Option<Rc<dyn Fn()>> {
        let active = self.active;
        let entry = self.observers.get(id)?;
        if entry.flags.contains(ObserverFlags::UNWATCHED) {
            log::debug!("observer `{}` is released; run ignored", entry.label);
            return None;
        }
        if entry.flags.contains(ObserverFlags::RUNNING) {
            log::warn!("observer `{}` re-entered itself; nested run ignored", entry.label);
            return None;
        }
        let old_parent = entry.parent;

        if let Some(p) = active.filter(|p| *p != id && old_parent != Some(*p)) {
            if let Some(old) = old_parent.and_then(|op| self.observers.get_mut(op)) {
                old.children.retain(|c| *c != id);
            }
            if let Some(pe) = self.observers.get_mut(p) {
                pe.children.push(id);
            }
            if let Some(e) = self.observers.get_mut(id) {
                e.parent = Some(p);
            }
        }

        let entry = self.observers.get_mut(id)?;
        let children = std::mem::take(&mut entry.children);
        for set in entry.deps.drain() {
            set.remove(id);
        }
        entry.flags.insert(ObserverFlags::RUNNING);
        entry.runs += 1;
        let runner = entry.runner.clone();
        self.stats.observer_runs += 1;

        for child in children {
            self.release(child);
        }
        Some(runner)
    }

    /// Flag `id` and its descendants unwatched and (re)arm the removal timer.
    pub(crate) fn release(&mut self, id: ObserverId) {
        if !self.observers.contains_key(id) {
            return;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(e) = self.observers.get_mut(next) {
                e.flags.insert(ObserverFlags::UNWATCHED);
                stack.extend(e.children.iter().copied());
            }
        }
        if !self.removals.contains(&id) {
            self.removals.push(id);
        }
        self.removal_deadline = Some(self.clock.now() + self.config.release_debounce);
        log::trace!("observer {id:?} released; removal pending");
    }

    /// Unlink `id` and all descendants. Hooks and entries are handed back so
    /// they run and drop outside the runtime borrow.
    fn remove(&mut self, id: ObserverId) -> (Vec<RemoveHook>, Vec<ObserverEntry>) {
        let mut hooks = Vec::new();
        let mut removed = Vec::new();

        if let Some(p) = self.observers.get(id).and_then(|e| e.parent)
            && let Some(pe) = self.observers.get_mut(p)
        {
            pe.children.retain(|c| *c != id);
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(mut entry) = self.observers.remove(next) else {
                continue;
            };
            hooks.extend(entry.on_remove.drain(..));
            stack.extend(entry.children.iter().copied());
            for set in entry.deps.drain() {
                set.remove(next);
                if set.is_empty()
                    && let Some(cacher) = set.cacher()
                {
                    self.release(cacher);
                }
            }
            self.pending_set.remove(&next);
            self.stats.removals += 1;
            log::debug!("observer `{}` removed", entry.label);
            removed.push(entry);
        }
        (hooks, removed)
    }

    fn take_batch(&mut self) -> Option<Vec<ObserverId>> {
        if self.pending.is_empty() {
            return None;
        }
        let mut batch = std::mem::take(&mut self.pending);
        self.pending_set.clear();
        // Cachers first so dependents read fresh computed values.
        batch.sort_by_key(|id| {
            !self
                .observers
                .get(*id)
                .is_some_and(|e| e.flags.contains(ObserverFlags::INTERNAL))
        });
        self.in_flight = batch.iter().copied().collect();
        Some(batch)
    }
}

pub(crate) fn release(id: ObserverId) {
    with_runtime(|rt| rt.release(id));
}

/// Release from a destructor; silently skipped while the runtime is busy.
pub(crate) fn release_quietly(id: ObserverId) {
    try_with_runtime(|rt| rt.release(id));
}

pub(crate) fn is_watched(id: ObserverId) -> bool {
    with_runtime(|rt| {
        rt.observers
            .get(id)
            .is_some_and(|e| !e.flags.contains(ObserverFlags::UNWATCHED))
    })
}

pub(crate) fn on_remove(id: ObserverId, hook: impl FnOnce() + 'static) {
    with_runtime(|rt| {
        if let Some(e) = rt.observers.get_mut(id) {
            e.on_remove.push(Box::new(hook));
        }
    });
}

/// Queue observers for the next flush.
pub(crate) fn enqueue(ids: impl IntoIterator<Item = ObserverId>) {
    let hook = with_runtime(|rt| {
        let was_empty = rt.pending.is_empty();
        for id in ids {
            if rt.in_flight.contains(&id) {
                continue;
            }
            if rt.pending_set.insert(id) {
                rt.pending.push(id);
            }
        }
        if was_empty && !rt.pending.is_empty() && !rt.flush_scheduled {
            rt.flush_scheduled = true;
            log::trace!("flush scheduled ({} pending)", rt.pending.len());
            return rt.microtask_hook.clone();
        }
        None
    });
    if let Some(hook) = hook {
        hook();
    }
}

/// Ends a drain. If an observer panicked, the ids of the current batch that
/// had not started yet go back to the front of the pending set so the next
/// flush still runs them.
struct FlushGuard {
    batch: Vec<ObserverId>,
    next: usize,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let rest = self.batch.get(self.next..).unwrap_or_default();
        try_with_runtime(|rt| {
            rt.flushing = false;
            rt.in_flight.clear();
            if !rest.is_empty() {
                let mut pending: Vec<ObserverId> = rest
                    .iter()
                    .copied()
                    .filter(|id| rt.pending_set.insert(*id))
                    .collect();
                log::debug!("flush interrupted; {} observer(s) re-queued", pending.len());
                pending.append(&mut rt.pending);
                rt.pending = pending;
            }
            rt.flush_scheduled = !rt.pending.is_empty();
        });
    }
}

enum Step {
    Skip,
    Run,
}

/// Drain the pending set, re-running invalidated observers. Returns how
/// many observer runs happened.
///
/// Observers whose parent is pending in the same batch are skipped: the
/// parent's run recreates them. Writes made while draining are handled in
/// the same call.
pub fn flush() -> usize {
    let start = with_runtime(|rt| {
        if rt.flushing || !rt.flush_scheduled {
            return false;
        }
        rt.flushing = true;
        rt.stats.flushes += 1;
        true
    });
    if !start {
        return 0;
    }
    let mut guard = FlushGuard {
        batch: Vec::new(),
        next: 0,
    };

    let mut counts: HashMap<ObserverId, usize> = HashMap::new();
    let mut warned: HashSet<ObserverId> = HashSet::new();
    let mut ran = 0;

    while let Some(batch) = with_runtime(|rt| rt.take_batch()) {
        let batch_set: HashSet<ObserverId> = batch.iter().copied().collect();
        guard.batch = batch;
        guard.next = 0;
        while let Some(&id) = guard.batch.get(guard.next) {
            guard.next += 1;
            let step = with_runtime(|rt| {
                rt.in_flight.remove(&id);
                let Some(e) = rt.observers.get(id) else {
                    return Step::Skip;
                };
                if e.flags.contains(ObserverFlags::UNWATCHED) {
                    return Step::Skip;
                }
                if e.parent.is_some_and(|p| batch_set.contains(&p)) {
                    log::trace!("observer `{}` covered by its pending parent", e.label);
                    return Step::Skip;
                }
                let n = counts.entry(id).or_default();
                *n += 1;
                if *n > rt.config.max_reruns {
                    if warned.insert(id) {
                        rt.stats.runaway_skips += 1;
                        log::warn!(
                            "observer `{}` re-triggered itself more than {} times in one flush; skipping it for the rest of this flush",
                            e.label,
                            rt.config.max_reruns
                        );
                    }
                    return Step::Skip;
                }
                Step::Run
            });
            if let Step::Run = step {
                run(id);
                ran += 1;
            }
        }
    }
    ran
}

/// Process the batched removals if the debounce window has elapsed.
/// Returns the number of observers removed.
pub fn run_timers() -> usize {
    let due = with_runtime(|rt| match rt.removal_deadline {
        Some(deadline) if rt.clock.now() >= deadline => {
            rt.removal_deadline = None;
            Some(std::mem::take(&mut rt.removals))
        }
        _ => None,
    });
    let Some(batch) = due else {
        return 0;
    };

    let mut count = 0;
    for id in batch {
        let (hooks, removed) = with_runtime(|rt| rt.remove(id));
        count += removed.len();
        for hook in hooks {
            hook();
        }
        drop(removed);
    }
    log::debug!("removal pass dropped {count} observer(s)");
    count
}

/// Flush, then process due timers.
pub fn tick() -> usize {
    let ran = flush();
    run_timers();
    ran
}

/// Snapshot of every registered observer, in registry order.
pub fn observers() -> Vec<ObserverInfo> {
    with_runtime(|rt| {
        rt.observers
            .iter()
            .map(|(id, e)| ObserverInfo {
                id,
                label: e.label.to_string(),
                parent: e.parent,
                children: e.children.len(),
                dependencies: e.deps.len(),
                flags: e.flags,
                runs: e.runs,
            })
            .collect()
    })
}
