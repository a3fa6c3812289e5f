use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use slotmap::SlotMap;
use web_time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::scheduler::{ObserverEntry, ObserverId};

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::default());
}

/// Scheduler context for the current thread: observer registry, the active
/// observer cursor, the pending flush set and the removal queue.
pub(crate) struct Runtime {
    pub(crate) config: Config,
    pub(crate) clock: Rc<dyn Clock>,
    pub(crate) observers: SlotMap<ObserverId, ObserverEntry>,
    pub(crate) active: Option<ObserverId>,
    /// Insertion-ordered pending set.
    pub(crate) pending: Vec<ObserverId>,
    pub(crate) pending_set: HashSet<ObserverId>,
    /// Ids of the batch being drained that have not started yet.
    pub(crate) in_flight: HashSet<ObserverId>,
    pub(crate) flush_scheduled: bool,
    pub(crate) flushing: bool,
    pub(crate) removals: Vec<ObserverId>,
    pub(crate) removal_deadline: Option<Instant>,
    pub(crate) microtask_hook: Option<Rc<dyn Fn()>>,
    pub(crate) stats: Stats,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            config: Config::default(),
            clock: Rc::new(SystemClock),
            observers: SlotMap::with_key(),
            active: None,
            pending: Vec::new(),
            pending_set: HashSet::new(),
            in_flight: HashSet::new(),
            flush_scheduled: false,
            flushing: false,
            removals: Vec::new(),
            removal_deadline: None,
            microtask_hook: None,
            stats: Stats::default(),
        }
    }
}

/// Counters since the last [`reset`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub flushes: u64,
    pub observer_runs: u64,
    pub removals: u64,
    pub runaway_skips: u64,
    pub live_observers: usize,
    pub pending: usize,
}

pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
}

/// For destructors: gives up when the runtime is gone or already borrowed.
pub(crate) fn try_with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
    RUNTIME
        .try_with(|rt| rt.try_borrow_mut().ok().map(|mut rt| f(&mut rt)))
        .ok()
        .flatten()
}

/// Install scheduler settings for this thread.
pub fn configure(config: Config) {
    with_runtime(|rt| rt.config = config);
}

pub fn config() -> Config {
    with_runtime(|rt| rt.config)
}

/// Replace the time source used for debounced teardown.
pub fn set_clock(clock: impl Clock) {
    with_runtime(|rt| rt.clock = Rc::new(clock));
}

/// Called whenever the pending set goes from empty to non-empty. An event
/// loop uses this to queue a call to [`flush`](crate::flush).
pub fn set_microtask_hook(hook: impl Fn() + 'static) {
    with_runtime(|rt| rt.microtask_hook = Some(Rc::new(hook)));
}

pub fn clear_microtask_hook() {
    with_runtime(|rt| rt.microtask_hook = None);
}

pub fn stats() -> Stats {
    with_runtime(|rt| Stats {
        live_observers: rt.observers.len(),
        pending: rt.pending.len(),
        ..rt.stats
    })
}

/// Drop every observer and restore defaults (config, clock, hook included).
///
/// Removal hooks are not invoked.
pub fn reset() {
    let old = with_runtime(|rt| {
        let entries: Vec<ObserverEntry> = rt.observers.drain().map(|(_, e)| e).collect();
        // The drained map keeps its bumped slot versions, so ids still held
        // by older stores never alias observers created after the reset.
        let observers = std::mem::take(&mut rt.observers);
        let previous = std::mem::replace(rt, Runtime { observers, ..Runtime::default() });
        (entries, previous)
    });
    drop(old);
    log::debug!("runtime reset");
}
