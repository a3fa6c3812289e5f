use std::any::Any;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::store::Reactive;

/// Deriving function of a computed property. Receives the container the
/// property is declared on.
pub type Getter = Rc<dyn Fn(&Reactive) -> Value>;

/// A dynamically typed value held by a store.
///
/// `Record` and `Sequence` are plain, unwrapped containers. They become
/// [`Reactive`] the first time they are read through a store, and the wrapped
/// handle replaces them in place.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Record(Record),
    Sequence(Vec<Value>),
    Reactive(Reactive),
    Callable(Callable),
    Opaque(Opaque),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Record(_) => "record",
            Value::Sequence(_) => "sequence",
            Value::Reactive(r) if r.is_sequence() => "reactive sequence",
            Value::Reactive(_) => "reactive record",
            Value::Callable(_) => "callable",
            Value::Opaque(o) => o.type_name(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Plain or wrapped record/sequence.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Value::Record(_) | Value::Sequence(_) | Value::Reactive(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reactive(&self) -> Option<&Reactive> {
        match self {
            Value::Reactive(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Callable(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_opaque(&self) -> Option<&Opaque> {
        match self {
            Value::Opaque(o) => Some(o),
            _ => None,
        }
    }

    /// Truthiness in the usual dynamic-language sense.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion used by loose equality.
    fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Loose (`==`-style) equality. Writes of a loosely equal value are
    /// no-ops for invalidation.
    ///
    /// `undefined` and `null` only equal each other, numbers compare with
    /// numeric strings and booleans, handles compare by identity, and plain
    /// containers are never equal (every plain container is a fresh object).
    pub fn loose_eq(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Undefined | Null, Undefined | Null) => true,
            (Undefined | Null, _) | (_, Undefined | Null) => false,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Bool(a), Bool(b)) => a == b,
            (Bool(_), _) | (_, Bool(_)) | (Number(_), String(_)) | (String(_), Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Reactive(a), Reactive(b)) => a.ptr_eq(b),
            (Callable(a), Callable(b)) => a.ptr_eq(b),
            (Opaque(a), Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Untracked JSON snapshot. Callables and opaque values become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Callable(_) | Value::Opaque(_) => {
                serde_json::Value::Null
            }
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Record(r) => serde_json::Value::Object(
                r.entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Reactive(r) => r.to_json(),
        }
    }
}

impl PartialEq for Value {
    /// Strict equality: same variant, equal primitives, structurally equal
    /// plain containers, identical handles.
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Number(a), Number(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Record(a), Record(b)) => a.entries == b.entries,
            (Sequence(a), Sequence(b)) => a == b,
            (Reactive(a), Reactive(b)) => a.ptr_eq(b),
            (Callable(a), Callable(b)) => a.ptr_eq(b),
            (Opaque(a), Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Record(r) => r.fmt(f),
            Value::Sequence(items) => f.debug_list().entries(items).finish(),
            Value::Reactive(r) => r.fmt(f),
            Value::Callable(c) => c.fmt(f),
            Value::Opaque(o) => o.fmt(f),
        }
    }
}

macro_rules! from_number {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}
from_number!(i32, i64, u32, u64, usize, f32, f64);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<Reactive> for Value {
    fn from(r: Reactive) -> Self {
        Value::Reactive(r)
    }
}

impl From<Callable> for Value {
    fn from(c: Callable) -> Self {
        Value::Callable(c)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                let mut record = Record::new();
                for (k, v) in map {
                    record.insert(k, v);
                }
                Value::Record(record)
            }
        }
    }
}

/// A plain record: ordered entries plus declared computed properties.
///
/// ```rust
/// use vigil_core::{Record, Value};
///
/// let person = Record::new()
///     .with("first", "Ada")
///     .with("last", "Lovelace")
///     .with_computed("full", |this| {
///         let first = this.get("first");
///         let last = this.get("last");
///         Value::from(format!("{} {}", first.as_str().unwrap_or(""), last.as_str().unwrap_or("")))
///     });
/// assert_eq!(person.len(), 2);
/// assert!(person.is_computed("full"));
/// ```
#[derive(Clone, Default)]
pub struct Record {
    pub(crate) entries: Vec<(Rc<str>, Value)>,
    pub(crate) computed: SmallVec<[(Rc<str>, Getter); 2]>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<Rc<str>>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_computed(
        mut self,
        key: impl Into<Rc<str>>,
        getter: impl Fn(&Reactive) -> Value + 'static,
    ) -> Self {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.computed.retain(|(k, _)| *k != key);
        self.computed.push((key, Rc::new(getter)));
        self
    }

    pub fn insert(&mut self, key: impl Into<Rc<str>>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.computed.retain(|(k, _)| *k != key);
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    pub fn is_computed(&self, key: &str) -> bool {
        self.computed.iter().any(|(k, _)| &**k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| &**k)
    }

    /// Number of stored entries (computed properties excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for (k, v) in &self.entries {
            m.entry(k, v);
        }
        for (k, _) in &self.computed {
            m.entry(k, &format_args!("<computed>"));
        }
        m.finish()
    }
}

/// Function handle stored in a container. Never wrapped, never tracked.
#[derive(Clone)]
pub struct Callable(Rc<dyn Fn(&[Value]) -> Value>);

impl Callable {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Callable) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<callable>")
    }
}

/// Special values (timestamps, sets, weak collections, ...) that are stored
/// as-is and never wrapped.
#[derive(Clone)]
pub struct Opaque {
    inner: Rc<dyn Any>,
    type_name: &'static str,
}

impl Opaque {
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            inner: Rc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name)
    }
}
