use std::{
    borrow::Cow,
    fmt::Write,
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    class::{ClassDef, EnumEntry, InterfaceDef},
    concurrent::TaskHandle,
    function::{BoundMethod, Closure, NativeFunction},
    host::ForeignObject,
    object::Instance,
};

/// Shared, insertion-ordered storage behind a `Map` value.
pub type MapStore = IndexMap<Value, Value, ahash::RandomState>;

/// Shared storage behind a `List` value.
pub type ListRef = Arc<RwLock<Vec<Value>>>;

/// Shared storage behind a `Map` value.
pub type MapRef = Arc<RwLock<MapStore>>;

/// Depth cap for structural traversal (equality, hashing, display).
///
/// Protects against stack overflow on deeply nested or self-referential
/// containers; display truncates with `...` at the cap, equality and hashing
/// stop descending.
const MAX_STRUCTURAL_DEPTH: u16 = 200;

/// An integer range value.
///
/// `start..end` when `inclusive`, `start..<end` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub inclusive: bool,
}

impl RangeValue {
    /// Whether the range contains `v`.
    #[must_use]
    pub fn contains(&self, v: i64) -> bool {
        if self.inclusive {
            v >= self.start && v <= self.end
        } else {
            v >= self.start && v < self.end
        }
    }

    /// Number of integers in the range (saturating, never negative).
    #[must_use]
    pub fn len(&self) -> u64 {
        let end = if self.inclusive { self.end.saturating_add(1) } else { self.end };
        if end <= self.start {
            0
        } else {
            end.abs_diff(self.start)
        }
    }

    /// Whether the range is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Semantic type of a runtime value, used for display, extension dispatch,
/// and dispatch-cache keys.
///
/// The string representation is the canonical Nova type name
/// (e.g., `TypeTag::String` -> "String").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum TypeTag {
    Null,
    Unit,
    Bool,
    Int,
    Long,
    Float,
    Double,
    Char,
    String,
    List,
    Map,
    Pair,
    Range,
    Object,
    Enum,
    Class,
    Interface,
    Function,
    BoundMethod,
    Future,
    Job,
    Foreign,
}

impl TypeTag {
    /// Whether values of this tag participate in numeric promotion.
    #[must_use]
    pub fn is_number(self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Float | Self::Double)
    }
}

/// Primary value type representing Nova objects at runtime.
///
/// This enum is a closed tagged union: small values (Bool, Int, Double) are
/// stored inline, while shared values (String, List, Object, ...) sit behind
/// `Arc` so they can cross worker threads by reference. There is no class
/// hierarchy for values; all behavior is pattern-matched.
///
/// Identity semantics follow the variant: `List`, `Map`, `Object` (non-data),
/// `Class`, functions, and task handles compare by pointer identity;
/// everything else compares by value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The language-level absence of a value.
    Null,
    /// The canonical "no value returned", distinct from `Null`.
    Unit,
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    Float(f32),
    Double(f64),
    /// One UTF-16 code unit.
    Char(u16),
    /// Immutable string.
    Str(Arc<str>),
    List(ListRef),
    Map(MapRef),
    Pair(Arc<(Value, Value)>),
    Range(RangeValue),
    /// A class instance. Data-class instances override equality to structural.
    Object(Arc<Instance>),
    /// An enum entry, identified by its owning enum and ordinal.
    Enum(Arc<EnumEntry>),
    /// A class descriptor; callable to instantiate.
    Class(Arc<ClassDef>),
    Interface(Arc<InterfaceDef>),
    /// A host-implemented function.
    Native(Arc<NativeFunction>),
    /// A MIR function with its capture environment.
    Function(Arc<Closure>),
    /// A (receiver, callable) pair produced by member access.
    Bound(Arc<BoundMethod>),
    /// An eagerly-submitted asynchronous computation.
    Future(Arc<TaskHandle>),
    /// A fire-and-forget structured-concurrency task.
    Job(Arc<TaskHandle>),
    /// An opaque host reference with a class tag.
    Foreign(Arc<ForeignObject>),
}

impl Value {
    /// Convenience constructor for string values.
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Arc::from(s.as_ref()))
    }

    /// Convenience constructor for list values.
    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    /// Convenience constructor for map values.
    #[must_use]
    pub fn map(entries: MapStore) -> Self {
        Self::Map(Arc::new(RwLock::new(entries)))
    }

    /// Convenience constructor for pair values.
    #[must_use]
    pub fn pair(first: Self, second: Self) -> Self {
        Self::Pair(Arc::new((first, second)))
    }

    /// The semantic type of this value.
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Null => TypeTag::Null,
            Self::Unit => TypeTag::Unit,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Long(_) => TypeTag::Long,
            Self::Float(_) => TypeTag::Float,
            Self::Double(_) => TypeTag::Double,
            Self::Char(_) => TypeTag::Char,
            Self::Str(_) => TypeTag::String,
            Self::List(_) => TypeTag::List,
            Self::Map(_) => TypeTag::Map,
            Self::Pair(_) => TypeTag::Pair,
            Self::Range(_) => TypeTag::Range,
            Self::Object(_) => TypeTag::Object,
            Self::Enum(_) => TypeTag::Enum,
            Self::Class(_) => TypeTag::Class,
            Self::Interface(_) => TypeTag::Interface,
            Self::Native(_) | Self::Function(_) => TypeTag::Function,
            Self::Bound(_) => TypeTag::BoundMethod,
            Self::Future(_) => TypeTag::Future,
            Self::Job(_) => TypeTag::Job,
            Self::Foreign(_) => TypeTag::Foreign,
        }
    }

    /// Canonical type name used by extension dispatch and error messages.
    ///
    /// Objects report the canonical `Object` tag — their concrete class name
    /// is a separate, later extension-dispatch tier. Enum entries report
    /// their enum class; foreign values report their host class tag.
    #[must_use]
    pub fn type_name(&self) -> Cow<'static, str> {
        match self {
            Self::Enum(entry) => Cow::Owned(entry.owner().name().to_string()),
            Self::Foreign(foreign) => Cow::Owned(foreign.class_tag().to_string()),
            other => Cow::Borrowed(other.type_tag().into()),
        }
    }

    /// Truthiness for branch instructions.
    ///
    /// `Null` and `Unit` are false; numbers are true when non-zero; strings
    /// and containers are true when non-empty; everything else is true.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null | Self::Unit => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Long(v) => *v != 0,
            Self::Float(v) => *v != 0.0,
            Self::Double(v) => *v != 0.0,
            Self::Char(c) => *c != 0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.read().is_empty(),
            Self::Map(entries) => !entries.read().is_empty(),
            Self::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    /// Narrows this value to a numeric scalar, when it is one.
    #[must_use]
    pub(crate) fn as_number(&self) -> Option<Num> {
        match self {
            Self::Int(v) => Some(Num::Int(*v)),
            Self::Long(v) => Some(Num::Long(*v)),
            Self::Float(v) => Some(Num::Float(*v)),
            Self::Double(v) => Some(Num::Double(*v)),
            _ => None,
        }
    }

    /// Integer view for index/range operations.
    #[must_use]
    pub(crate) fn as_index(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// The canonical string form, as produced by string interpolation
    /// and concatenation.
    #[must_use]
    pub fn display(&self) -> String {
        let mut out = String::new();
        self.display_into(&mut out, 0);
        out
    }

    /// The developer-facing form: like `display` but with strings and chars
    /// quoted.
    #[must_use]
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("{s:?}"),
            Self::Char(c) => match char::from_u32(u32::from(*c)) {
                Some(c) => format!("'{}'", c.escape_default()),
                None => format!("'\\u{c:04x}'"),
            },
            other => other.display(),
        }
    }

    pub(crate) fn display_into(&self, out: &mut String, depth: u16) {
        if depth > MAX_STRUCTURAL_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::Null => out.push_str("null"),
            Self::Unit => out.push_str("Unit"),
            Self::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Self::Int(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Long(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Float(v) => out.push_str(ryu::Buffer::new().format(*v)),
            Self::Double(v) => out.push_str(ryu::Buffer::new().format(*v)),
            Self::Char(c) => match char::from_u32(u32::from(*c)) {
                Some(c) => out.push(c),
                None => {
                    let _ = write!(out, "\\u{c:04x}");
                }
            },
            Self::Str(s) => out.push_str(s),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.display_into(out, depth + 1);
                }
                out.push(']');
            }
            Self::Map(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.display_into(out, depth + 1);
                    out.push('=');
                    value.display_into(out, depth + 1);
                }
                out.push('}');
            }
            Self::Pair(pair) => {
                out.push('(');
                pair.0.display_into(out, depth + 1);
                out.push_str(", ");
                pair.1.display_into(out, depth + 1);
                out.push(')');
            }
            Self::Range(range) => {
                let sep = if range.inclusive { ".." } else { "..<" };
                let _ = write!(out, "{}{sep}{}", range.start, range.end);
            }
            Self::Object(instance) => instance.display_into(out, depth),
            Self::Enum(entry) => out.push_str(entry.name()),
            Self::Class(class) => {
                let _ = write!(out, "class {}", class.name());
            }
            Self::Interface(iface) => {
                let _ = write!(out, "interface {}", iface.name());
            }
            Self::Native(native) => {
                let _ = write!(out, "fun {}", native.name());
            }
            Self::Function(closure) => {
                let _ = write!(out, "fun {}", closure.function.name);
            }
            Self::Bound(bound) => {
                let _ = write!(out, "bound fun {}", bound.callable_name());
            }
            Self::Future(_) => out.push_str("Future"),
            Self::Job(_) => out.push_str("Job"),
            Self::Foreign(foreign) => {
                let _ = write!(out, "{}@host", foreign.class_tag());
            }
        }
    }

    /// Structural equality with a depth guard.
    ///
    /// By-identity variants compare by pointer; by-value variants compare
    /// structurally. Numbers compare numerically across Int/Long/Float/Double
    /// so that the equality relation agrees with `compare`.
    #[must_use]
    pub(crate) fn eq_depth(&self, other: &Self, depth: u16) -> bool {
        if depth > MAX_STRUCTURAL_DEPTH {
            return true;
        }
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.eq_numeric(b);
        }
        match (self, other) {
            (Self::Null, Self::Null) | (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => {
                a.0.eq_depth(&b.0, depth + 1) && a.1.eq_depth(&b.1, depth + 1)
            }
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Instance::nova_eq(a, b, depth),
            (Self::Enum(a), Self::Enum(b)) => {
                Arc::ptr_eq(a.owner_arc(), b.owner_arc()) && a.ordinal() == b.ordinal()
            }
            (Self::Class(a), Self::Class(b)) => Arc::ptr_eq(a, b),
            (Self::Interface(a), Self::Interface(b)) => Arc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Bound(a), Self::Bound(b)) => Arc::ptr_eq(a, b),
            (Self::Future(a), Self::Future(b)) | (Self::Job(a), Self::Job(b)) => Arc::ptr_eq(a, b),
            (Self::Foreign(a), Self::Foreign(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn hash_depth<H: Hasher>(&self, state: &mut H, depth: u16) {
        if depth > MAX_STRUCTURAL_DEPTH {
            return;
        }
        // Numbers hash by numeric value so Int(1), Long(1), and Double(1.0)
        // land in the same bucket, matching eq_depth.
        if let Some(n) = self.as_number() {
            n.hash_numeric(state);
            return;
        }
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null | Self::Unit => {}
            Self::Bool(b) => b.hash(state),
            Self::Char(c) => c.hash(state),
            Self::Str(s) => s.hash(state),
            Self::Pair(pair) => {
                pair.0.hash_depth(state, depth + 1);
                pair.1.hash_depth(state, depth + 1);
            }
            Self::Range(range) => range.hash(state),
            Self::List(items) => (Arc::as_ptr(items) as usize).hash(state),
            Self::Map(entries) => (Arc::as_ptr(entries) as usize).hash(state),
            Self::Object(instance) => Instance::nova_hash(instance, state, depth),
            Self::Enum(entry) => {
                (Arc::as_ptr(entry.owner_arc()) as usize).hash(state);
                entry.ordinal().hash(state);
            }
            Self::Class(class) => (Arc::as_ptr(class) as usize).hash(state),
            Self::Interface(iface) => (Arc::as_ptr(iface) as usize).hash(state),
            Self::Native(f) => (Arc::as_ptr(f) as usize).hash(state),
            Self::Function(f) => (Arc::as_ptr(f) as usize).hash(state),
            Self::Bound(b) => (Arc::as_ptr(b) as usize).hash(state),
            Self::Future(t) | Self::Job(t) => (Arc::as_ptr(t) as usize).hash(state),
            Self::Foreign(f) => (Arc::as_ptr(f) as usize).hash(state),
            Self::Int(_) | Self::Long(_) | Self::Float(_) | Self::Double(_) => {
                unreachable!("numbers handled above")
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_depth(other, 0)
    }
}

// NaN makes this not a true equivalence relation, which is the standard
// interpreter trade-off: map keys containing NaN simply never match.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_depth(state, 0);
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::str(v)
    }
}

/// A numeric scalar extracted from a value, prior to promotion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Num {
    pub fn tag(self) -> TypeTag {
        match self {
            Self::Int(_) => TypeTag::Int,
            Self::Long(_) => TypeTag::Long,
            Self::Float(_) => TypeTag::Float,
            Self::Double(_) => TypeTag::Double,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => i64::from(v),
            Self::Long(v) => v,
            Self::Float(v) => v as i64,
            Self::Double(v) => v as i64,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Self::Int(v) => v as f32,
            Self::Long(v) => v as f32,
            Self::Float(v) => v,
            Self::Double(v) => v as f32,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => f64::from(v),
            Self::Long(v) => v as f64,
            Self::Float(v) => f64::from(v),
            Self::Double(v) => v,
        }
    }

    /// Whether this scalar is a whole number representable as i64.
    fn integral(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(v)),
            Self::Long(v) => Some(v),
            Self::Float(v) => {
                let d = f64::from(v);
                (d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64).then(|| d as i64)
            }
            Self::Double(d) => {
                (d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64).then(|| d as i64)
            }
        }
    }

    fn eq_numeric(self, other: Self) -> bool {
        match (self.integral(), other.integral()) {
            (Some(a), Some(b)) => a == b,
            _ => self.as_f64() == other.as_f64(),
        }
    }

    fn hash_numeric<H: Hasher>(self, state: &mut H) {
        match self.integral() {
            Some(v) => v.hash(state),
            None => self.as_f64().to_bits().hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_primitives() {
        assert_eq!(Value::Null.display(), "null");
        assert_eq!(Value::Unit.display(), "Unit");
        assert_eq!(Value::Bool(true).display(), "true");
        assert_eq!(Value::Int(-3).display(), "-3");
        assert_eq!(Value::Long(1_000_000_000_000).display(), "1000000000000");
        assert_eq!(Value::Double(2.5).display(), "2.5");
        assert_eq!(Value::Double(3.0).display(), "3.0");
        assert_eq!(Value::str("ab").display(), "ab");
        assert_eq!(Value::str("ab").repr(), "\"ab\"");
    }

    #[test]
    fn display_containers() {
        let list = Value::list(vec![Value::Int(1), Value::str("x")]);
        assert_eq!(list.display(), "[1, x]");
        let pair = Value::pair(Value::Int(1), Value::Int(2));
        assert_eq!(pair.display(), "(1, 2)");
        let range = Value::Range(RangeValue { start: 1, end: 5, inclusive: true });
        assert_eq!(range.display(), "1..5");
    }

    #[test]
    fn numeric_equality_crosses_variants() {
        assert_eq!(Value::Int(1), Value::Long(1));
        assert_eq!(Value::Int(2), Value::Double(2.0));
        assert_ne!(Value::Int(2), Value::Double(2.5));
        assert_ne!(Value::Bool(true), Value::Int(1));
    }

    #[test]
    fn list_equality_is_identity() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn numeric_map_keys_coalesce() {
        let mut map = MapStore::default();
        map.insert(Value::Int(1), Value::str("a"));
        map.insert(Value::Long(1), Value::str("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::Double(1.0)), Some(&Value::str("b")));
    }

    #[test]
    fn range_membership() {
        let r = RangeValue { start: 0, end: 3, inclusive: false };
        assert!(r.contains(0));
        assert!(r.contains(2));
        assert!(!r.contains(3));
        assert_eq!(r.len(), 3);
    }
}
