//! Static types of the native side.

use std::fmt;
use std::sync::Arc;

/// Well-known class names.
pub mod names {
    pub const OBJECT: &str = "Object";
    pub const CLASS: &str = "Class";
    pub const STRING: &str = "String";
    pub const NUMBER: &str = "Number";
    pub const BOOLEAN: &str = "Boolean";
    pub const CHARACTER: &str = "Character";
    pub const BYTE: &str = "Byte";
    pub const SHORT: &str = "Short";
    pub const INTEGER: &str = "Integer";
    pub const LONG: &str = "Long";
    pub const FLOAT: &str = "Float";
    pub const DOUBLE: &str = "Double";
    pub const EXACT_NUMBER: &str = "ExactNumber";
    pub const PEER_STRING: &str = "PeerString";
    pub const PEER_ARRAY: &str = "PeerArray";
    pub const PEER_NULL: &str = "PeerNull";
    pub const COLLECTION: &str = "Collection";
    pub const LIST: &str = "List";
    pub const ARRAY_LIST: &str = "ArrayList";
    pub const LINKED_LIST: &str = "LinkedList";
    pub const MAP: &str = "Map";
    pub const HASH_MAP: &str = "HashMap";
    pub const HASHTABLE: &str = "Hashtable";
    pub const RUNNABLE: &str = "Runnable";
    pub const BRIDGE: &str = "Bridge";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Primitive {
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Boolean => "boolean",
            Primitive::Char => "char",
            Primitive::Byte => "byte",
            Primitive::Short => "short",
            Primitive::Int => "int",
            Primitive::Long => "long",
            Primitive::Float => "float",
            Primitive::Double => "double",
            Primitive::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => Primitive::Boolean,
            "char" => Primitive::Char,
            "byte" => Primitive::Byte,
            "short" => Primitive::Short,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "void" => Primitive::Void,
            _ => return None,
        })
    }

    /// Class of the boxed form.
    pub fn wrapper(self) -> &'static str {
        match self {
            Primitive::Boolean => names::BOOLEAN,
            Primitive::Char => names::CHARACTER,
            Primitive::Byte => names::BYTE,
            Primitive::Short => names::SHORT,
            Primitive::Int => names::INTEGER,
            Primitive::Long => names::LONG,
            Primitive::Float => names::FLOAT,
            Primitive::Double => names::DOUBLE,
            Primitive::Void => names::OBJECT,
        }
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long
        )
    }
}

/// A static type: primitive, class, array or closure adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    Primitive(Primitive),
    Class(Arc<str>),
    Array(Box<NativeType>),
    /// Runtime type of a peer closure implementing the listed interfaces.
    Proxy(Arc<[Arc<str>]>),
}

impl NativeType {
    pub const BOOLEAN: NativeType = NativeType::Primitive(Primitive::Boolean);
    pub const CHAR: NativeType = NativeType::Primitive(Primitive::Char);
    pub const BYTE: NativeType = NativeType::Primitive(Primitive::Byte);
    pub const SHORT: NativeType = NativeType::Primitive(Primitive::Short);
    pub const INT: NativeType = NativeType::Primitive(Primitive::Int);
    pub const LONG: NativeType = NativeType::Primitive(Primitive::Long);
    pub const FLOAT: NativeType = NativeType::Primitive(Primitive::Float);
    pub const DOUBLE: NativeType = NativeType::Primitive(Primitive::Double);
    pub const VOID: NativeType = NativeType::Primitive(Primitive::Void);

    pub fn class(name: &str) -> Self {
        NativeType::Class(Arc::from(name))
    }

    pub fn object() -> Self {
        Self::class(names::OBJECT)
    }

    pub fn string() -> Self {
        Self::class(names::STRING)
    }

    pub fn array_of(component: NativeType) -> Self {
        NativeType::Array(Box::new(component))
    }

    /// Parse a type name such as `int`, `String` or `long[][]`.
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        if let Some(component) = name.strip_suffix("[]") {
            return Self::array_of(Self::parse(component));
        }
        match Primitive::from_name(name) {
            Some(p) => NativeType::Primitive(p),
            None => Self::class(name),
        }
    }

    pub fn is_class(&self, name: &str) -> bool {
        matches!(self, NativeType::Class(c) if &**c == name)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, NativeType::Primitive(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, NativeType::Primitive(Primitive::Void))
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            NativeType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn component(&self) -> Option<&NativeType> {
        match self {
            NativeType::Array(c) => Some(c),
            _ => None,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            NativeType::Class(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Primitive(p) => f.write_str(p.name()),
            NativeType::Class(c) => f.write_str(c),
            NativeType::Array(c) => write!(f, "{}[]", c),
            NativeType::Proxy(interfaces) => {
                f.write_str("$Proxy")?;
                for (i, iface) in interfaces.iter().enumerate() {
                    f.write_str(if i == 0 { "(" } else { "," })?;
                    f.write_str(iface)?;
                }
                if !interfaces.is_empty() {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}
