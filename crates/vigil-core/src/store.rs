//! Reactive containers.
//!
//! A [`Reactive`] wraps a record or a sequence. Reads made while an observer
//! runs subscribe that observer to the read path; writes invalidate the
//! subscribers of the written path. Nested plain containers are wrapped
//! lazily on first read and the wrapped handle is stored back in place, so
//! repeated reads return the same handle.
//!
//! Each wrapped child keeps a weak link to its parent and the key it lives
//! under. Paths are rebuilt from those links, and the root of a tree owns the
//! path → subscriber map.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::computed::{self, Cached};
use crate::error::{Error, Result};
use crate::path::{self, parse_index};
use crate::scheduler::{self, Subscribers};
use crate::value::{Getter, Record, Value};

static NEXT_NODE: AtomicU64 = AtomicU64::new(1);

/// Wrap a plain record or sequence into a reactive store root.
///
/// ```rust
/// use serde_json::json;
/// use vigil_core::create_store;
///
/// let store = create_store(json!({ "todos": [{ "title": "write docs" }] })).unwrap();
/// let first = store.get("todos").as_reactive().unwrap().at(0);
/// assert_eq!(first.as_reactive().unwrap().get("title").as_str(), Some("write docs"));
/// ```
pub fn create_store(value: impl Into<Value>) -> Result<Reactive> {
    match value.into() {
        Value::Reactive(r) => Ok(r),
        plain @ (Value::Record(_) | Value::Sequence(_)) => Ok(Reactive::wrap(plain, None)),
        other => Err(Error::NotAContainer { found: other.kind() }),
    }
}

/// Shared handle to a wrapped record or sequence.
#[derive(Clone)]
pub struct Reactive(pub(crate) Rc<Node>);

pub(crate) struct Node {
    id: u64,
    data: RefCell<Data>,
    /// Declared computed properties, captured once at wrap time.
    computed: SmallVec<[(Rc<str>, Getter); 2]>,
    pub(crate) cache: RefCell<HashMap<Rc<str>, Cached>>,
    link: RefCell<Option<Link>>,
    detached: Cell<bool>,
    /// Path → subscribers; only populated on roots.
    subscribers: RefCell<HashMap<String, Subscribers>>,
}

enum Data {
    Record(Vec<(Rc<str>, Value)>),
    Sequence(Vec<Value>),
}

struct Link {
    parent: Weak<Node>,
    key: Rc<str>,
}

struct Lineage {
    root: Reactive,
    keys: Vec<Rc<str>>,
    /// A parent along the way has been dropped.
    broken: bool,
    /// Some ancestor is detached.
    torn: bool,
}

impl Link {
    fn points_to(&self, parent: &Reactive, key: &str) -> bool {
        std::ptr::eq(self.parent.as_ptr(), Rc::as_ptr(&parent.0)) && &*self.key == key
    }
}

/// Where a key lands in the underlying storage.
enum Slot<'k> {
    Field(&'k str),
    Index(usize),
    Length,
}

impl Data {
    fn len(&self) -> usize {
        match self {
            Data::Record(entries) => entries.len(),
            Data::Sequence(items) => items.len(),
        }
    }

    fn get_mut(&mut self, slot: &Slot<'_>) -> Option<&mut Value> {
        match (self, slot) {
            (Data::Record(entries), Slot::Field(key)) => entries
                .iter_mut()
                .find(|(k, _)| &**k == *key)
                .map(|(_, v)| v),
            (Data::Sequence(items), Slot::Index(i)) => items.get_mut(*i),
            _ => None,
        }
    }

    /// Store `value`, returning the previous value (`Undefined` if none).
    fn put(&mut self, slot: &Slot<'_>, value: Value) -> Value {
        match (self, slot) {
            (Data::Record(entries), Slot::Field(key)) => {
                match entries.iter_mut().find(|(k, _)| &**k == *key) {
                    Some((_, v)) => std::mem::replace(v, value),
                    None => {
                        entries.push((Rc::from(*key), value));
                        Value::Undefined
                    }
                }
            }
            (Data::Sequence(items), Slot::Index(i)) => {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Undefined);
                }
                std::mem::replace(&mut items[*i], value)
            }
            _ => Value::Undefined,
        }
    }

    fn remove(&mut self, slot: &Slot<'_>) -> Value {
        match (self, slot) {
            (Data::Record(entries), Slot::Field(key)) => {
                match entries.iter().position(|(k, _)| &**k == *key) {
                    Some(pos) => entries.remove(pos).1,
                    None => Value::Undefined,
                }
            }
            (Data::Sequence(items), Slot::Index(i)) => items
                .get_mut(*i)
                .map(std::mem::take)
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }
}

impl Reactive {
    fn wrap(plain: Value, link: Option<Link>) -> Reactive {
        let (data, computed) = match plain {
            Value::Record(Record { entries, computed }) => (Data::Record(entries), computed),
            Value::Sequence(items) => (Data::Sequence(items), SmallVec::new()),
            _ => (Data::Record(Vec::new()), SmallVec::new()),
        };
        Reactive(Rc::new(Node {
            id: NEXT_NODE.fetch_add(1, Ordering::Relaxed),
            data: RefCell::new(data),
            computed,
            cache: RefCell::new(HashMap::new()),
            link: RefCell::new(link),
            detached: Cell::new(false),
            subscribers: RefCell::new(HashMap::new()),
        }))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Reactive) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_sequence(&self) -> bool {
        matches!(*self.0.data.borrow(), Data::Sequence(_))
    }

    /// Replaced at its location while still referenced from elsewhere.
    pub fn is_detached(&self) -> bool {
        self.0.detached.get()
    }

    fn getter(&self, key: &str) -> Option<Getter> {
        self.0
            .computed
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, g)| g.clone())
    }

    pub fn is_computed(&self, key: &str) -> bool {
        self.0.computed.iter().any(|(k, _)| &**k == key)
    }

    fn slot<'k>(&self, key: &'k str) -> Result<Slot<'k>> {
        if !self.is_sequence() {
            return Ok(Slot::Field(key));
        }
        if key == "length" {
            return Ok(Slot::Length);
        }
        parse_index(key)
            .map(Slot::Index)
            .ok_or_else(|| Error::InvalidKey { key: key.to_string() })
    }

    /// Walk the parent links up to the topmost ancestor.
    fn lineage(&self) -> Lineage {
        let mut keys = Vec::new();
        let mut cur = self.clone();
        let mut broken = false;
        let mut torn = false;
        loop {
            let up = match &*cur.0.link.borrow() {
                Some(l) => match l.parent.upgrade() {
                    Some(p) => Some((Reactive(p), l.key.clone())),
                    None => {
                        broken = true;
                        None
                    }
                },
                None => None,
            };
            let Some((parent, key)) = up else {
                break;
            };
            torn |= parent.is_detached();
            keys.push(key);
            cur = parent;
        }
        keys.reverse();
        Lineage {
            root: cur,
            keys,
            broken,
            torn,
        }
    }

    /// Root of the tree and the full path of `key` on this container.
    pub(crate) fn path_of(&self, key: &str) -> (Reactive, String) {
        let lineage = self.lineage();
        (lineage.root, path::join(&lineage.keys, key))
    }

    /// Readable path of this container itself (`""` for a root).
    pub fn path(&self) -> String {
        let lineage = self.lineage();
        lineage.keys.iter().map(|k| &**k).collect::<Vec<_>>().join(".")
    }

    /// The container reads and writes act on.
    ///
    /// A detached container is followed from the root down through the live
    /// containers to its original location. A container whose parent chain
    /// is gone, or which sits below a detached ancestor, is unreachable: it
    /// belongs to a subtree that was torn out.
    fn resolve(&self) -> Option<Reactive> {
        let lineage = self.lineage();
        if lineage.broken {
            return None;
        }
        if !self.is_detached() {
            return (!lineage.torn).then(|| self.clone());
        }
        let mut live = lineage.root;
        for key in &lineage.keys {
            live = match live.slot_wrapped(key) {
                Value::Reactive(next) => next,
                _ => return None,
            };
        }
        if live.ptr_eq(self) {
            self.0.detached.set(false);
        }
        Some(live)
    }

    fn mark_detached(&self) {
        self.0.detached.set(true);
        computed::release_all(self);
    }

    /// Raw slot value, wrapping a plain container in place. Untracked.
    fn slot_wrapped(&self, key: &str) -> Value {
        let Ok(slot) = self.slot(key) else {
            return Value::Undefined;
        };
        let mut data = self.0.data.borrow_mut();
        if let Slot::Length = slot {
            return Value::from(data.len());
        }
        let Some(value) = data.get_mut(&slot) else {
            return Value::Undefined;
        };
        if matches!(value, Value::Record(_) | Value::Sequence(_)) {
            let plain = std::mem::take(value);
            let child = Reactive::wrap(
                plain,
                Some(Link {
                    parent: Rc::downgrade(&self.0),
                    key: key.into(),
                }),
            );
            *value = Value::Reactive(child);
        }
        value.clone()
    }

    pub(crate) fn subscribers_at(&self, path: String) -> Subscribers {
        self.0
            .subscribers
            .borrow_mut()
            .entry(path)
            .or_default()
            .clone()
    }

    /// Subscribe the active observer to `segment` on this container.
    pub(crate) fn track(&self, segment: &str) {
        let Some(active) = scheduler::active() else {
            return;
        };
        let (root, path) = self.path_of(segment);
        let set = root.subscribers_at(path);
        scheduler::subscribe(active, &set);
    }

    /// Enqueue the subscribers of `segment`, or of it and every path below it.
    pub(crate) fn invalidate(&self, segment: &str, subtree: bool) {
        let (root, path) = self.path_of(segment);
        let ids: Vec<_> = {
            let map = root.0.subscribers.borrow();
            if subtree {
                map.iter()
                    .filter(|(p, _)| path::is_within(p, &path))
                    .flat_map(|(_, s)| s.ids())
                    .collect()
            } else {
                map.get(&path).map(|s| s.ids().to_vec()).unwrap_or_default()
            }
        };
        if !ids.is_empty() {
            log::trace!("invalidate `{}` ({} observer(s))", path::display(&path), ids.len());
            scheduler::enqueue(ids);
        }
    }

    /// Forget the subscriber sets at and below `segment`, releasing any
    /// computed cachers that fed them.
    fn prune(&self, segment: &str) {
        let (root, path) = self.path_of(segment);
        let cachers: Vec<_> = {
            let mut map = root.0.subscribers.borrow_mut();
            let mut cachers = Vec::new();
            map.retain(|p, set| {
                let keep = !path::is_within(p, &path);
                if !keep && let Some(c) = set.cacher() {
                    cachers.push(c);
                }
                keep
            });
            cachers
        };
        for c in cachers {
            scheduler::release(c);
        }
    }

    /// Read `key`. Inside an observer the read subscribes it to the path.
    ///
    /// Missing keys, and reads through a detached container whose path no
    /// longer exists, yield [`Value::Undefined`].
    pub fn get(&self, key: &str) -> Value {
        match self.resolve() {
            Some(target) => target.read(key),
            None => {
                log::debug!("read of `{key}` through an unreachable detached container");
                Value::Undefined
            }
        }
    }

    fn read(&self, key: &str) -> Value {
        if let Some(getter) = self.getter(key) {
            return computed::read(self, key, getter);
        }
        let value = self.slot_wrapped(key);
        if matches!(value, Value::Callable(_)) {
            return value;
        }
        self.track(key);
        value
    }

    /// Write `key`. Invalidates the path unless the new value is loosely
    /// equal to the old one (`length` always invalidates).
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        self.resolve_for_write()?.write(key, value.into())
    }

    fn resolve_for_write(&self) -> Result<Reactive> {
        self.resolve().ok_or_else(|| Error::Detached { path: self.path() })
    }

    fn write(&self, key: &str, value: Value) -> Result<()> {
        if self.is_computed(key) {
            return Err(Error::ReadOnly { key: key.to_string() });
        }
        let slot = self.slot(key)?;
        if let Slot::Length = slot {
            return self.set_len(&value);
        }

        if let Value::Reactive(incoming) = &value {
            incoming.adopt(self, key, matches!(slot, Slot::Index(_)));
        }

        let (old, grew) = {
            let mut data = self.0.data.borrow_mut();
            let before = data.len();
            let old = data.put(&slot, value.clone());
            (old, data.len() > before)
        };

        if let Value::Reactive(prev) = &old
            && !value.loose_eq(&old)
            && prev.is_linked_to(self, key)
        {
            prev.mark_detached();
        }

        if !old.loose_eq(&value) {
            let subtree = old.is_container() || value.is_container();
            self.invalidate(key, subtree);
        }
        if grew && self.is_sequence() {
            self.invalidate("length", false);
        }
        Ok(())
    }

    fn is_linked_to(&self, parent: &Reactive, key: &str) -> bool {
        self.0
            .link
            .borrow()
            .as_ref()
            .is_some_and(|l| l.points_to(parent, key))
    }

    /// Bookkeeping for a wrapped value being stored at `parent[key]`.
    fn adopt(&self, parent: &Reactive, key: &str, index: bool) {
        let detached = self.is_detached();
        let mut link = self.0.link.borrow_mut();
        if let Some(l) = link.as_mut() {
            if detached {
                l.parent = Rc::downgrade(&parent.0);
            }
            if index || detached {
                l.key = key.into();
            }
            if l.points_to(parent, key) {
                self.0.detached.set(false);
            }
        }
    }

    fn set_len(&self, value: &Value) -> Result<()> {
        let n = value
            .as_f64()
            .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= path::MAX_LENGTH as f64)
            .ok_or_else(|| Error::InvalidKey {
                key: format!("length = {value:?}"),
            })? as usize;
        let dropped: Vec<(usize, Value)> = {
            let mut data = self.0.data.borrow_mut();
            match &mut *data {
                Data::Sequence(items) => {
                    let dropped = if n < items.len() {
                        items.drain(n..).enumerate().map(|(i, v)| (n + i, v)).collect()
                    } else {
                        Vec::new()
                    };
                    items.resize(n, Value::Undefined);
                    dropped
                }
                Data::Record(_) => Vec::new(),
            }
        };
        for (i, v) in dropped {
            if let Value::Reactive(r) = v
                && r.is_linked_to(self, &i.to_string())
            {
                r.mark_detached();
            }
        }
        self.invalidate("length", false);
        Ok(())
    }

    /// Remove `key`. Always invalidates the path and everything below it,
    /// then forgets those subscriptions. On a sequence this leaves an
    /// `Undefined` hole.
    pub fn delete(&self, key: &str) -> Result<()> {
        let target = self.resolve_for_write()?;
        if target.is_computed(key) {
            return Err(Error::ReadOnly { key: key.to_string() });
        }
        let slot = target.slot(key)?;
        if let Slot::Length = slot {
            return Err(Error::InvalidKey { key: key.to_string() });
        }
        target.invalidate(key, true);
        target.prune(key);
        let old = target.0.data.borrow_mut().remove(&slot);
        if let Value::Reactive(prev) = old
            && prev.is_linked_to(&target, key)
        {
            prev.mark_detached();
        }
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let Some(target) = self.resolve() else {
            return false;
        };
        let Ok(slot) = target.slot(key) else {
            return false;
        };
        let mut data = target.0.data.borrow_mut();
        matches!(slot, Slot::Length) || data.get_mut(&slot).is_some() || target.is_computed(key)
    }

    /// Own keys (computed properties last). Not tracked.
    pub fn keys(&self) -> Vec<String> {
        let Some(target) = self.resolve() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = match &*target.0.data.borrow() {
            Data::Record(entries) => entries.iter().map(|(k, _)| k.to_string()).collect(),
            Data::Sequence(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        };
        keys.extend(target.0.computed.iter().map(|(k, _)| k.to_string()));
        keys
    }

    // Sequence helpers. Each goes through the same write bookkeeping as
    // `set`, so moved wrapped items get their index refreshed.

    /// Tracked `length`.
    pub fn len(&self) -> usize {
        self.get("length").as_f64().unwrap_or(0.0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Value {
        self.get(&index.to_string())
    }

    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.set(&index.to_string(), value)
    }

    /// Tracked reads of every item.
    pub fn values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.at(i)).collect()
    }

    fn sequence(&self) -> Result<Reactive> {
        let target = self.resolve_for_write()?;
        if target.is_sequence() {
            Ok(target)
        } else {
            Err(Error::NotAContainer { found: "reactive record" })
        }
    }

    fn raw_len(&self) -> usize {
        self.0.data.borrow().len()
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<()> {
        let seq = self.sequence()?;
        let n = seq.raw_len();
        seq.write(&n.to_string(), value.into())
    }

    pub fn pop(&self) -> Result<Value> {
        let seq = self.sequence()?;
        let n = seq.raw_len();
        if n == 0 {
            seq.set_len(&Value::from(0))?;
            return Ok(Value::Undefined);
        }
        let key = (n - 1).to_string();
        let last = seq.slot_wrapped(&key);
        seq.invalidate(&key, last.is_container());
        seq.set_len(&Value::from(n - 1))?;
        Ok(orphan(last))
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let seq = self.sequence()?;
        let n = seq.raw_len();
        let index = index.min(n);
        for k in (index..n).rev() {
            let moved = seq.slot_wrapped(&k.to_string());
            seq.write(&(k + 1).to_string(), moved)?;
        }
        seq.write(&index.to_string(), value.into())
    }

    pub fn remove(&self, index: usize) -> Result<Value> {
        let seq = self.sequence()?;
        let n = seq.raw_len();
        if index >= n {
            return Ok(Value::Undefined);
        }
        let removed = seq.slot_wrapped(&index.to_string());
        for k in index..n - 1 {
            let moved = seq.slot_wrapped(&(k + 1).to_string());
            seq.write(&k.to_string(), moved)?;
        }
        seq.set_len(&Value::from(n - 1))?;
        Ok(orphan(removed))
    }

    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        let seq = self.sequence()?;
        if a == b {
            return Ok(());
        }
        let va = seq.slot_wrapped(&a.to_string());
        let vb = seq.slot_wrapped(&b.to_string());
        seq.write(&a.to_string(), vb)?;
        seq.write(&b.to_string(), va)?;
        Ok(())
    }

    /// Side channel to the unwrapped data: a deep plain copy, not tracked.
    /// Computed properties stay declarations.
    pub fn raw(&self) -> Value {
        let target = self.resolve().unwrap_or_else(|| self.clone());
        match target.snapshot() {
            Data::Record(entries) => Value::Record(Record {
                entries: entries.iter().map(|(k, v)| (k.clone(), unwrap_deep(v))).collect(),
                computed: target.0.computed.clone(),
            }),
            Data::Sequence(items) => Value::Sequence(items.iter().map(unwrap_deep).collect()),
        }
    }

    /// Untracked JSON snapshot with computed properties evaluated.
    pub fn to_json(&self) -> serde_json::Value {
        let Some(target) = self.resolve() else {
            return serde_json::Value::Null;
        };
        scheduler::untracked(|| match target.snapshot() {
            Data::Record(entries) => {
                let mut map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect();
                for (k, getter) in target.0.computed.iter() {
                    map.insert(k.to_string(), getter(&target).to_json());
                }
                serde_json::Value::Object(map)
            }
            Data::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        })
    }

    /// Shallow copy of the storage, so nested conversions run without a
    /// borrow held on this container.
    fn snapshot(&self) -> Data {
        match &*self.0.data.borrow() {
            Data::Record(entries) => Data::Record(entries.clone()),
            Data::Sequence(items) => Data::Sequence(items.clone()),
        }
    }

    /// Subscribed paths under this root with their subscriber counts,
    /// sorted by readable path. Empty sets are skipped.
    pub fn subscriptions(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .lineage()
            .root
            .0
            .subscribers
            .borrow()
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(p, s)| (path::display(p), s.len()))
            .collect();
        out.sort();
        out
    }
}

/// Items taken out of a sequence by `pop`/`remove` stand on their own: they
/// become roots of their own tree instead of detached references.
fn orphan(v: Value) -> Value {
    if let Value::Reactive(r) = &v {
        r.0.link.replace(None);
        r.0.detached.set(false);
    }
    v
}

fn unwrap_deep(v: &Value) -> Value {
    match v {
        Value::Reactive(r) => r.raw(),
        other => other.clone(),
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_sequence() { "sequence" } else { "record" };
        write!(f, "Reactive#{}({kind}", self.0.id)?;
        if self.is_detached() {
            f.write_str(", detached")?;
        }
        f.write_str(")")
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for cached in self.cache.get_mut().values() {
            if let Some(id) = cached.cacher {
                scheduler::release_quietly(id);
            }
        }
    }
}
