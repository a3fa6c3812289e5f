//! Computed-property caching.
//!
//! Outside an observer a computed property is evaluated on every read. Inside
//! one, the container keeps a cached value in a side table and a single
//! internal observer (the cacher) per property re-derives it when its inputs
//! change. Readers subscribe to the property's shadow path, which is only
//! invalidated when the derived value actually changes.

use std::rc::Rc;

use crate::observer;
use crate::path;
use crate::scheduler::{self, ObserverId};
use crate::store::Reactive;
use crate::value::{Getter, Value};

#[derive(Default)]
pub(crate) struct Cached {
    pub(crate) value: Value,
    pub(crate) cacher: Option<ObserverId>,
}

pub(crate) fn read(node: &Reactive, key: &str, getter: Getter) -> Value {
    let Some(active) = scheduler::active() else {
        return getter(node);
    };
    let cacher = ensure_cacher(node, key, getter);

    // Re-tag on every read; the container may have moved since creation.
    let (root, shadow_path) = node.path_of(&path::shadow(key));
    let set = root.subscribers_at(shadow_path);
    set.set_cacher(cacher);
    scheduler::subscribe(active, &set);

    node.0
        .cache
        .borrow()
        .get(key)
        .map(|c| c.value.clone())
        .unwrap_or_default()
}

fn ensure_cacher(node: &Reactive, key: &str, getter: Getter) -> ObserverId {
    let existing = node.0.cache.borrow().get(key).and_then(|c| c.cacher);
    if let Some(id) = existing.filter(|id| scheduler::is_watched(*id)) {
        return id;
    }

    let key: Rc<str> = key.into();
    node.0
        .cache
        .borrow_mut()
        .entry(key.clone())
        .or_default()
        .cacher = None;

    let weak = Rc::downgrade(&node.0);
    let derive = {
        let weak = weak.clone();
        move || match weak.upgrade() {
            Some(n) => getter(&Reactive(n)),
            None => Value::Undefined,
        }
    };
    let store = {
        let weak = weak.clone();
        let key = key.clone();
        move |v: &Value| {
            if let Some(n) = weak.upgrade() {
                store_cached(&Reactive(n), &key, v);
            }
        }
    };

    let id = observer::spawn_internal(format!("computed `{key}`"), derive, store);
    if let Some(c) = node.0.cache.borrow_mut().get_mut(&key) {
        c.cacher = Some(id);
    }

    scheduler::on_remove(id, move || {
        let Some(n) = weak.upgrade() else {
            return;
        };
        let mut cache = n.cache.borrow_mut();
        if let Some(c) = cache.get_mut(&key)
            && c.cacher == Some(id)
        {
            c.cacher = None;
        }
    });
    log::trace!("cacher {id:?} created");
    id
}

/// Store a freshly derived value; readers are notified only on change.
fn store_cached(node: &Reactive, key: &str, value: &Value) {
    let changed = {
        let mut cache = node.0.cache.borrow_mut();
        let Some(entry) = cache.get_mut(key) else {
            return;
        };
        let changed = !entry.value.loose_eq(value);
        entry.value = value.clone();
        changed
    };
    if changed {
        node.invalidate(&path::shadow(key), false);
    }
}

/// Drop every cacher of `node`; they are recreated on the next tracked read.
pub(crate) fn release_all(node: &Reactive) {
    let ids: Vec<ObserverId> = node
        .0
        .cache
        .borrow_mut()
        .values_mut()
        .filter_map(|c| c.cacher.take())
        .collect();
    for id in ids {
        scheduler::release(id);
    }
}
