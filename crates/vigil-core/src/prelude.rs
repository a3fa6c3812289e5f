pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::Config;
pub use crate::error::*;
pub use crate::observer::{Observer, observe, observe_with};
pub use crate::reconcile::{Move, Patch, reconcile};
pub use crate::runtime::{
    Stats, clear_microtask_hook, config, configure, reset, set_clock, set_microtask_hook, stats,
};
pub use crate::scheduler::{ObserverId, flush, run_timers, tick, untracked};
pub use crate::scope::{Scope, current_scope};
pub use crate::store::{Reactive, create_store};
pub use crate::value::{Callable, Opaque, Record, Value};
