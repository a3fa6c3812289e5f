//! # Stores, Observers, and Flushes
//!
//! Vigil tracks reads of plain data instead of asking for explicit signals.
//! There are three main pieces:
//!
//! - `Reactive`: a record or sequence whose reads and writes are intercepted.
//! - `observe`: a callback that re-runs when something it read changes.
//! - `flush`: drains the batch of invalidated observers.
//!
//! ## Stores
//!
//! `create_store` wraps a plain record or sequence. Nested containers are
//! wrapped lazily on first read:
//!
//! ```rust
//! use vigil_core::*;
//!
//! let store = create_store(
//!     Record::new()
//!         .with("title", "groceries")
//!         .with("items", vec![Value::from("milk"), Value::from("eggs")]),
//! )
//! .unwrap();
//!
//! let items = store.get("items");
//! let items = items.as_reactive().unwrap();
//! items.push("bread").unwrap();
//! assert_eq!(items.len(), 3);
//! assert_eq!(store.to_json()["items"][2], "bread");
//! ```
//!
//! ## Observers
//!
//! Every read made inside an observer subscribes it to the exact path that
//! was read. Writes do not run observers directly; they are queued and the
//! embedding event loop calls `flush` at its microtask boundary:
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use vigil_core::*;
//!
//! let store = create_store(Record::new().with("a", 1).with("b", 2)).unwrap();
//! let runs = Rc::new(Cell::new(0));
//! let sum = observe({
//!     let store = store.clone();
//!     let runs = runs.clone();
//!     move || {
//!         runs.set(runs.get() + 1);
//!         store.get("a").as_f64().unwrap_or(0.0) + store.get("b").as_f64().unwrap_or(0.0)
//!     }
//! });
//!
//! store.set("a", 10).unwrap();
//! store.set("b", 20).unwrap();
//! flush();
//! assert_eq!(runs.get(), 2); // initial run plus one batched re-run
//! assert_eq!(sum.latest(), Some(30.0));
//! ```
//!
//! - A write of a loosely equal value (`1` over `"1"`) invalidates nothing.
//! - Observers created inside another observer are its children: they are
//!   released when the parent re-runs and skipped when the parent is pending
//!   in the same flush.
//! - `Observer::release` stops an observer at once; the registry entry is
//!   removed by `run_timers` after the debounce window.
//!
//! ## Computed properties
//!
//! A record may declare getters. Inside observers their value is cached and
//! readers are only notified when the derived value changes:
//!
//! ```rust
//! use vigil_core::*;
//!
//! let person = create_store(
//!     Record::new()
//!         .with("first", "Ada")
//!         .with("last", "Lovelace")
//!         .with_computed("full", |p: &Reactive| {
//!             let first = p.get("first");
//!             let last = p.get("last");
//!             Value::from(format!("{} {}", first.as_str().unwrap_or(""), last.as_str().unwrap_or("")))
//!         }),
//! )
//! .unwrap();
//!
//! assert_eq!(person.get("full").as_str(), Some("Ada Lovelace"));
//! assert!(person.set("full", "nope").is_err());
//! ```
//!
//! ## Scopes
//!
//! A templating layer mounts each subtree inside a `Scope` and disposes it
//! on unmount, which releases every observer created while it was current.

mod computed;
pub mod clock;
pub mod config;
pub mod error;
pub mod observer;
pub mod path;
pub mod prelude;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod store;
pub mod value;

pub use clock::*;
pub use config::*;
pub use error::{Error, Result};
pub use observer::*;
pub use reconcile::*;
pub use runtime::*;
pub use scheduler::{ObserverFlags, ObserverId, ObserverInfo, flush, observers, run_timers, tick, untracked};
pub use scope::*;
pub use store::*;
pub use value::*;
