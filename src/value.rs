//! Runtime values flowing through build plans.
//!
//! A [`Value`] is what a build plan produces and what the converter consumes.
//! Scalars and collections are represented structurally; everything a
//! construction backend builds is an [`Instance`], a type-erased `Arc` that
//! can be downcast back to the concrete type or to any trait-object view the
//! backend attached.

use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::convert::Converter;
use crate::error::DiResult;
use crate::types::TypeSpec;

/// String keyed property map used for provider properties and `props` metadata.
pub type Properties = BTreeMap<String, Value>;

/// A value produced or consumed by the container.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(char),
    Str(String),
    Duration(Duration),
    Path(PathBuf),
    Ip(IpAddr),
    Socket(SocketAddr),
    Regex(regex::Regex),
    /// Language, country, variant
    Locale(String, String, String),
    /// Variant of a [`TypeSpec::Enum`]
    Enum { type_name: String, variant: String },
    List(Vec<Value>),
    /// Insertion ordered, duplicate free
    Set(Vec<Value>),
    Array(Vec<Value>),
    /// Insertion ordered, keys unique
    Map(Vec<(Value, Value)>),
    Object(Instance),
    /// A partially built value that decides its own conversion
    Convertible(Arc<dyn Convertible>),
}

/// Hook for values that know how to convert themselves.
///
/// The converter consults this before anything else, so placeholders such as
/// dynamic reference holders can turn into the proxy, or into provider
/// properties, depending on what the consumer asked for.
pub trait Convertible: Send + Sync {
    fn convert(&self, target: &TypeSpec, converter: &Converter) -> DiResult<Value>;

    /// Short description used in error messages.
    fn describe(&self) -> String {
        "convertible".to_string()
    }
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    /// Wraps any shareable value as an [`Instance`].
    pub fn object<T: Send + Sync + 'static>(value: T) -> Self {
        Value::Object(Instance::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    /// True when both values are objects sharing one allocation.
    pub fn same_instance(&self, other: &Value) -> bool {
        match (self.as_instance(), other.as_instance()) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Elements of a list, set or array.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) | Value::Set(v) | Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a string key in a map value.
    pub fn get_key(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Typed extraction, see [`FromValue`].
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    /// Downcasts an object value to a shared handle.
    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.as_instance().and_then(Instance::downcast::<T>)
    }

    /// Name of the value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Duration(_) => "duration",
            Value::Path(_) => "path",
            Value::Ip(_) => "ipaddr",
            Value::Socket(_) => "socketaddr",
            Value::Regex(_) => "regex",
            Value::Locale(..) => "locale",
            Value::Enum { .. } => "enum",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
            Value::Convertible(_) => "convertible",
        }
    }

    /// Converts a property map into a map value with string keys.
    pub fn from_properties(properties: &Properties) -> Self {
        Value::Map(
            properties
                .iter()
                .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Pushes into a set value, ignoring duplicates.
    pub(crate) fn push_unique(items: &mut Vec<Value>, value: Value) {
        if !items.contains(&value) {
            items.push(value);
        }
    }

    /// Inserts into a map value, replacing an existing key in place.
    pub(crate) fn insert_entry(entries: &mut Vec<(Value, Value)>, key: Value, value: Value) {
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (UInt(a), UInt(b)) => a == b,
            (Int(a), UInt(b)) | (UInt(b), Int(a)) => i128::from(*a) == i128::from(*b),
            (Float(a), Float(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Duration(a), Duration(b)) => a == b,
            (Path(a), Path(b)) => a == b,
            (Ip(a), Ip(b)) => a == b,
            (Socket(a), Socket(b)) => a == b,
            (Regex(a), Regex(b)) => a.as_str() == b.as_str(),
            (Locale(a1, a2, a3), Locale(b1, b2, b3)) => a1 == b1 && a2 == b2 && a3 == b3,
            (
                Enum { type_name: t1, variant: v1 },
                Enum { type_name: t2, variant: v2 },
            ) => t1 == t2 && v1 == v2,
            (List(a), List(b)) | (Set(a), Set(b)) | (Array(a), Array(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            (Object(a), Object(b)) => a.ptr_eq(b),
            (Convertible(a), Convertible(b)) => {
                std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Char(c) => write!(f, "{c:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Duration(d) => write!(f, "{}", humantime::format_duration(*d)),
            Value::Path(p) => write!(f, "{p:?}"),
            Value::Ip(ip) => write!(f, "{ip}"),
            Value::Socket(addr) => write!(f, "{addr}"),
            Value::Regex(r) => write!(f, "/{}/", r.as_str()),
            Value::Locale(l, c, v) => write!(f, "{l}_{c}_{v}"),
            Value::Enum { type_name, variant } => write!(f, "{type_name}::{variant}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Set(items) => f.debug_set().entries(items).finish(),
            Value::Array(items) => {
                f.write_str("array")?;
                f.debug_list().entries(items).finish()
            }
            Value::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Object(instance) => write!(f, "{instance:?}"),
            Value::Convertible(c) => write!(f, "<{}>", c.describe()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::$variant(value.into())
            }
        })*
    };
}

value_from! {
    bool => Bool,
    i8 => Int, i16 => Int, i32 => Int, i64 => Int,
    u8 => UInt, u16 => UInt, u32 => UInt, u64 => UInt,
    f32 => Float, f64 => Float,
    char => Char,
    String => Str,
    Duration => Duration,
    PathBuf => Path,
    IpAddr => Ip,
    SocketAddr => Socket,
    regex::Regex => Regex,
    Instance => Object,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

/// Typed extraction from a [`Value`].
///
/// Integer extraction is range checked; object extraction downcasts.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! int_from_value {
    ($($ty:ty),*) => {
        $(impl FromValue for $ty {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::Int(i) => <$ty>::try_from(*i).ok(),
                    Value::UInt(u) => <$ty>::try_from(*u).ok(),
                    _ => None,
                }
            }
        })*
    };
}

int_from_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        f64::from_value(value).map(|f| f as f32)
    }
}

macro_rules! simple_from_value {
    ($($ty:ty => $variant:ident),*) => {
        $(impl FromValue for $ty {
            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        })*
    };
}

simple_from_value!(
    bool => Bool,
    char => Char,
    String => Str,
    Duration => Duration,
    PathBuf => Path,
    IpAddr => Ip,
    SocketAddr => Socket,
    regex::Regex => Regex,
    Instance => Object
);

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_slice()?
            .iter()
            .map(T::from_value)
            .collect::<Option<Vec<_>>>()
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| Some((k.as_str()?.to_string(), T::from_value(v)?)))
                .collect(),
            _ => None,
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> FromValue for Arc<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.downcast::<T>()
    }
}

/// A type-erased shared object built by a construction backend.
///
/// The instance keeps its primary `Arc<T>` plus any number of additional
/// views (typically trait objects over the same allocation) so consumers can
/// downcast to whichever capability they need. It also carries the backend
/// class name and the interface names the object is known to implement; the
/// converter uses these to decide whether a value satisfies a
/// [`TypeSpec::Named`] target.
#[derive(Clone)]
pub struct Instance {
    primary: Arc<dyn Any + Send + Sync>,
    meta: Arc<InstanceMeta>,
}

#[derive(Clone)]
struct InstanceMeta {
    rust_type: &'static str,
    class: String,
    interfaces: Vec<String>,
    views: Vec<Arc<dyn Any + Send + Sync>>,
}

impl Instance {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an existing shared handle; `T` may be a trait object.
    pub fn from_arc<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Instance {
            primary: Arc::new(value),
            meta: Arc::new(InstanceMeta {
                rust_type: type_name::<T>(),
                class: String::new(),
                interfaces: Vec::new(),
                views: Vec::new(),
            }),
        }
    }

    /// Adds another downcast target over the same object.
    pub fn with_view<U: ?Sized + Send + Sync + 'static>(mut self, view: Arc<U>) -> Self {
        Arc::make_mut(&mut self.meta).views.push(Arc::new(view));
        self
    }

    /// Sets the backend class name.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.meta).class = class.into();
        self
    }

    /// Declares an implemented interface name.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        let meta = Arc::make_mut(&mut self.meta);
        if !meta.interfaces.contains(&interface) {
            meta.interfaces.push(interface);
        }
        self
    }

    /// Downcasts to the primary type or any attached view.
    pub fn downcast<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        if let Some(arc) = self.primary.downcast_ref::<Arc<T>>() {
            return Some(arc.clone());
        }
        self.meta
            .views
            .iter()
            .find_map(|view| view.downcast_ref::<Arc<T>>().cloned())
    }

    pub fn is<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.primary.is::<Arc<T>>() || self.meta.views.iter().any(|v| v.is::<Arc<T>>())
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.primary, &other.primary)
    }

    pub fn class(&self) -> &str {
        &self.meta.class
    }

    pub fn interfaces(&self) -> &[String] {
        &self.meta.interfaces
    }

    pub fn rust_type(&self) -> &'static str {
        self.meta.rust_type
    }

    /// True when the class or one of the declared interfaces is `name`.
    pub fn satisfies(&self, name: &str) -> bool {
        self.meta.class == name || self.meta.interfaces.iter().any(|i| i == name)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.meta.class.is_empty() {
            write!(f, "Instance({})", self.meta.rust_type)
        } else {
            write!(f, "Instance({})", self.meta.class)
        }
    }
}
