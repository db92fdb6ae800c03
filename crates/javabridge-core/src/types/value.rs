//! Values flowing between the peer and native code.

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::closure::Closure;
use super::native_type::{names, NativeType, Primitive};
use super::throwable::Throwable;
use crate::protocol::TextEncoding;

/// An object owned by native code.
///
/// Implementors are shared behind `Arc`, so any mutable state needs
/// interior mutability.
pub trait NativeObject: Any + Send + Sync + fmt::Debug {
    fn class_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Text returned by a string conversion of this object.
    fn to_display(&self) -> String {
        format!("[{}]", self.class_name())
    }
}

pub type ObjectRef = Arc<dyn NativeObject>;

/// A peer string kept as raw bytes until a native parameter needs text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerString {
    bytes: Arc<[u8]>,
    encoding: TextEncoding,
}

impl PeerString {
    pub fn new(bytes: impl Into<Arc<[u8]>>, encoding: TextEncoding) -> Self {
        Self {
            bytes: bytes.into(),
            encoding,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn decode(&self) -> String {
        self.encoding.decode(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Key of a peer composite entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(i) => write!(f, "{}", i),
            ArrayKey::Str(s) => f.write_str(s),
        }
    }
}

impl ArrayKey {
    /// Native value of the key: an `Int` when it fits, else a `Long`.
    pub fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(i) => match i32::try_from(*i) {
                Ok(small) => Value::Int(small),
                Err(_) => Value::Long(*i),
            },
            ArrayKey::Str(s) => Value::string(s),
        }
    }
}

/// A peer array, either a sequence or a map. Entries keep their insertion
/// order; re-inserting a key replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerArray {
    entries: Vec<(ArrayKey, Value)>,
    index: HashMap<ArrayKey, usize>,
}

impl PeerArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let mut array = Self::new();
        for (i, v) in values.into_iter().enumerate() {
            array.insert(ArrayKey::Int(i as i64), v);
        }
        array
    }

    pub fn insert(&mut self, key: ArrayKey, value: Value) {
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.entries.first().map(|(_, v)| v)
    }

    /// Values ordered by key when the keys are exactly `0..len`.
    pub fn sequence(&self) -> Option<Vec<&Value>> {
        let len = self.entries.len();
        let mut slots: Vec<Option<&Value>> = vec![None; len];
        for (key, value) in &self.entries {
            match key {
                ArrayKey::Int(i) if *i >= 0 && (*i as usize) < len => {
                    slots[*i as usize] = Some(value);
                }
                _ => return None,
            }
        }
        slots.into_iter().collect()
    }
}

/// A typed native array.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeArray {
    pub component: NativeType,
    pub items: Vec<Value>,
}

/// Any value the bridge can hold.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    /// Null result stored in the reference table so the peer gets a handle.
    PeerNull,
    Boolean(bool),
    Char(char),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Exact integer from the peer, not yet narrowed to a parameter type.
    Exact(i64),
    String(Arc<str>),
    PeerString(PeerString),
    Bytes(Arc<[u8]>),
    Array(Arc<NativeArray>),
    Composite(Arc<PeerArray>),
    Object(ObjectRef),
    Class(NativeType),
    Error(Arc<Throwable>),
    Closure(Arc<Closure>),
}

impl Value {
    pub fn object(obj: impl NativeObject) -> Self {
        Value::Object(Arc::new(obj))
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn composite(array: PeerArray) -> Self {
        Value::Composite(Arc::new(array))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Dynamic type, or `None` for null.
    pub fn runtime_type(&self) -> Option<NativeType> {
        let name = match self {
            Value::Null => return None,
            Value::PeerNull => names::PEER_NULL,
            Value::Boolean(_) => names::BOOLEAN,
            Value::Char(_) => names::CHARACTER,
            Value::Byte(_) => names::BYTE,
            Value::Short(_) => names::SHORT,
            Value::Int(_) => names::INTEGER,
            Value::Long(_) => names::LONG,
            Value::Float(_) => names::FLOAT,
            Value::Double(_) => names::DOUBLE,
            Value::Exact(_) => names::EXACT_NUMBER,
            Value::String(_) => names::STRING,
            Value::PeerString(_) => names::PEER_STRING,
            Value::Bytes(_) => return Some(NativeType::array_of(NativeType::BYTE)),
            Value::Array(a) => return Some(NativeType::array_of(a.component.clone())),
            Value::Composite(_) => names::PEER_ARRAY,
            Value::Object(o) => o.class_name(),
            Value::Class(_) => names::CLASS,
            Value::Error(t) => return Some(NativeType::Class(t.class.clone())),
            Value::Closure(c) => return Some(c.runtime_type()),
        };
        Some(NativeType::class(name))
    }

    /// Whether the value is a boxed number, including peer exact numbers.
    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Byte(_)
                | Value::Short(_)
                | Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
                | Value::Exact(_)
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(*v as i64),
            Value::Short(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) | Value::Exact(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            Value::Double(v) => Some(*v as i64),
            Value::Char(c) => Some(*c as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Text content of a string value.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Value::String(s) => Some(Cow::Borrowed(s)),
            Value::PeerString(s) => Some(Cow::Owned(s.decode())),
            _ => None,
        }
    }

    pub fn as_object<T: NativeObject>(&self) -> Option<&T> {
        match self {
            Value::Object(o) => o.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// String conversion used when native code expects text.
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::PeerNull => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Char(c) => c.to_string(),
            Value::Byte(v) => v.to_string(),
            Value::Short(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) | Value::Exact(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::String(s) => s.to_string(),
            Value::PeerString(s) => s.decode(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Array(a) => {
                let items: Vec<String> = a.items.iter().map(Value::display_string).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Composite(c) => {
                let items: Vec<String> = c
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.display_string()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Object(o) => o.to_display(),
            Value::Class(ty) => format!("class {}", ty),
            Value::Error(t) => t.to_string(),
            Value::Closure(c) => format!("{}@{}", c.runtime_type(), c.object),
        }
    }

    /// Short description used in failure messages: `(Type)value`.
    pub fn describe(&self) -> String {
        match self.runtime_type() {
            None => "null".to_string(),
            Some(ty) => {
                let mut text = self.display_string();
                if text.chars().count() > 64 {
                    text = text.chars().take(61).collect::<String>() + "...";
                }
                format!("({}){}", ty, text)
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) | (PeerNull, PeerNull) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Short(a), Short(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Long(a), Long(b)) | (Exact(a), Exact(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (PeerString(a), PeerString(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => a == b,
            (Composite(a), Composite(b)) => a == b,
            (Object(a), Object(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Class(a), Class(b)) => a == b,
            (Error(a), Error(b)) => Arc::ptr_eq(a, b) || a == b,
            (Closure(a), Closure(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<Throwable> for Value {
    fn from(t: Throwable) -> Self {
        Value::Error(Arc::new(t))
    }
}

/// Zero value of a primitive type, as returned for malformed numeric text.
pub fn zero_of(p: Primitive) -> Value {
    match p {
        Primitive::Boolean => Value::Boolean(false),
        Primitive::Char => Value::Char('\0'),
        Primitive::Byte => Value::Byte(0),
        Primitive::Short => Value::Short(0),
        Primitive::Int => Value::Int(0),
        Primitive::Long => Value::Long(0),
        Primitive::Float => Value::Float(0.0),
        Primitive::Double => Value::Double(0.0),
        Primitive::Void => Value::Null,
    }
}
