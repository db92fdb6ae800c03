use std::sync::Arc;

use crate::error::Fault;
use crate::protocol::TextEncoding;
use crate::registry::{Backing, Registry};
use crate::types::{
    names, zero_of, ArrayKey, ListObject, MapObject, NativeArray, NativeType, PeerArray, Primitive,
    Value,
};

/// Converts arguments to the parameter types of a selected candidate.
pub struct Coercer<'a> {
    registry: &'a Registry,
    encoding: TextEncoding,
}

impl<'a> Coercer<'a> {
    pub fn new(registry: &'a Registry, encoding: TextEncoding) -> Self {
        Self { registry, encoding }
    }

    /// Coerce every argument to its parameter.
    pub fn coerce_all(&self, params: &[NativeType], args: Vec<Value>) -> Result<Vec<Value>, Fault> {
        params
            .iter()
            .zip(args)
            .map(|(param, arg)| self.coerce(param, arg))
            .collect()
    }

    /// Coerce one argument. Nulls pass through unchanged, except where a
    /// primitive is declared: those fail like an unboxing of null.
    pub fn coerce(&self, param: &NativeType, arg: Value) -> Result<Value, Fault> {
        if arg.is_null() {
            return match param.as_primitive() {
                Some(p) if p != Primitive::Void => Err(Fault::illegal_argument(format!(
                    "null cannot be passed as {}",
                    param
                ))),
                _ => Ok(arg),
            };
        }

        if param.is_class(names::STRING) {
            return Ok(match arg {
                Value::String(_) => arg,
                Value::PeerString(s) => Value::string(s.decode()),
                Value::Bytes(b) => Value::string(self.encoding.decode(&b)),
                other => Value::string(other.display_string()),
            });
        }

        match arg {
            Value::PeerString(_) | Value::String(_) => self.from_text(param, arg),
            Value::Composite(composite) => self.from_composite(param, composite),
            number if number.is_number() => Ok(self.from_number(param, number)),
            other => Ok(other),
        }
    }

    fn from_text(&self, param: &NativeType, arg: Value) -> Result<Value, Fault> {
        if let Some(component) = param.component() {
            if *component != NativeType::BYTE {
                return Err(Fault::illegal_argument(format!(
                    "cannot convert {} to {}",
                    arg.describe(),
                    param
                )));
            }
            return Ok(match arg {
                Value::PeerString(s) => Value::Bytes(Arc::from(s.bytes())),
                other => {
                    let text = other.display_string();
                    Value::Bytes(Arc::from(self.encoding.encode(&text)))
                }
            });
        }

        let text = arg.as_text().map(|t| t.into_owned()).unwrap_or_default();
        let Some(p) = param.as_primitive() else {
            return Ok(Value::string(text));
        };
        Ok(match p {
            Primitive::Boolean => Value::Boolean(text.eq_ignore_ascii_case("true")),
            Primitive::Char => text.chars().next().map(Value::Char).unwrap_or(zero_of(p)),
            Primitive::Byte => text.parse().map(Value::Byte).unwrap_or(zero_of(p)),
            Primitive::Short => text.parse().map(Value::Short).unwrap_or(zero_of(p)),
            Primitive::Int => text.parse().map(Value::Int).unwrap_or(zero_of(p)),
            Primitive::Long => text.parse().map(Value::Long).unwrap_or(zero_of(p)),
            Primitive::Float => text.parse().map(Value::Float).unwrap_or(zero_of(p)),
            Primitive::Double => text.parse().map(Value::Double).unwrap_or(zero_of(p)),
            Primitive::Void => Value::Null,
        })
    }

    fn from_number(&self, param: &NativeType, arg: Value) -> Value {
        if let Some(p) = param.as_primitive() {
            return convert_number(&arg, p);
        }
        let Value::Exact(v) = arg else {
            return arg;
        };
        let integer = NativeType::class(names::INTEGER);
        let long = NativeType::class(names::LONG);
        if self.registry.is_assignable(param, &integer) {
            if i32::try_from(v).is_ok() || !self.registry.is_assignable(param, &long) {
                Value::Int(v as i32)
            } else {
                Value::Long(v)
            }
        } else if self.registry.is_assignable(param, &long) {
            Value::Long(v)
        } else {
            match param.class_name() {
                Some(names::BYTE) => Value::Byte(v as i8),
                Some(names::SHORT) => Value::Short(v as i16),
                Some(names::FLOAT) => Value::Float(v as f32),
                Some(names::DOUBLE) => Value::Double(v as f64),
                _ => Value::Long(v),
            }
        }
    }

    fn from_composite(&self, param: &NativeType, composite: Arc<PeerArray>) -> Result<Value, Fault> {
        if let Some(component) = param.component() {
            return self.to_array(component, &composite);
        }
        let Some(class) = param.class_name() else {
            return Ok(Value::Composite(composite));
        };
        let registry = self.registry;

        if registry.is_subclass(class, names::COLLECTION) {
            let target = if registry.backing(class) == Backing::List {
                class
            } else {
                names::ARRAY_LIST
            };
            let items = composite.values().cloned().collect();
            return Ok(Value::object(ListObject::new(target, items)));
        }

        if registry.is_assignable(param, &NativeType::class(names::PEER_ARRAY)) {
            return Ok(Value::Composite(composite));
        }

        if registry.is_subclass(class, names::MAP) {
            let target = if registry.backing(class) == Backing::Map {
                class
            } else {
                names::HASH_MAP
            };
            let entries = composite
                .iter()
                .map(|(k, v)| (k.to_value(), v.clone()))
                .collect();
            return Ok(Value::object(MapObject::new(target, entries)));
        }

        Ok(Value::Composite(composite))
    }

    fn to_array(&self, component: &NativeType, composite: &PeerArray) -> Result<Value, Fault> {
        let size = composite.len();
        let mut slots: Vec<Option<Value>> = vec![None; size];
        for (key, value) in composite.iter() {
            let index = match key {
                ArrayKey::Int(i) if *i >= 0 && (*i as usize) < size => *i as usize,
                _ => {
                    return Err(Fault::illegal_argument(format!(
                        "Could not create array of type: {}, size: {}, failed entry at: {}={}",
                        component,
                        size,
                        key,
                        value.display_string()
                    )))
                }
            };
            slots[index] = Some(self.coerce(component, value.clone())?);
        }
        let items: Vec<Value> = slots.into_iter().map(|v| v.unwrap_or(Value::Null)).collect();

        if *component == NativeType::BYTE {
            let bytes: Vec<u8> = items
                .iter()
                .map(|v| v.as_i64().unwrap_or(0) as u8)
                .collect();
            return Ok(Value::Bytes(Arc::from(bytes)));
        }
        Ok(Value::Array(Arc::new(NativeArray {
            component: component.clone(),
            items,
        })))
    }
}

/// Numeric conversion with the platform's narrowing rules.
fn convert_number(arg: &Value, p: Primitive) -> Value {
    let float = matches!(arg, Value::Float(_) | Value::Double(_));
    let whole = if float {
        arg.as_f64().unwrap_or(0.0) as i64
    } else {
        arg.as_i64().unwrap_or(0)
    };
    match p {
        Primitive::Boolean => Value::Boolean(if float {
            arg.as_f64() != Some(0.0)
        } else {
            whole != 0
        }),
        Primitive::Char => Value::Char(char::from_u32(whole as u32).unwrap_or('\0')),
        Primitive::Byte => Value::Byte(whole as i8),
        Primitive::Short => Value::Short(whole as i16),
        Primitive::Int => Value::Int(whole as i32),
        Primitive::Long => Value::Long(whole),
        Primitive::Float => Value::Float(arg.as_f64().unwrap_or(0.0) as f32),
        Primitive::Double => Value::Double(arg.as_f64().unwrap_or(0.0)),
        Primitive::Void => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{exceptions, PeerString};

    fn coercer(registry: &Registry) -> Coercer<'_> {
        Coercer::new(registry, TextEncoding::Utf8)
    }

    fn peer(text: &str) -> Value {
        Value::PeerString(PeerString::new(text.as_bytes().to_vec(), TextEncoding::Utf8))
    }

    #[test]
    fn test_text_parameters_get_decoded_strings() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        assert_eq!(c.coerce(&NativeType::string(), peer("abc")).unwrap(), Value::string("abc"));
        assert_eq!(c.coerce(&NativeType::string(), Value::Exact(5)).unwrap(), Value::string("5"));
    }

    #[test]
    fn test_text_to_primitives() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        assert_eq!(c.coerce(&NativeType::INT, peer("42")).unwrap(), Value::Int(42));
        assert_eq!(c.coerce(&NativeType::INT, peer("4x")).unwrap(), Value::Int(0));
        assert_eq!(c.coerce(&NativeType::DOUBLE, peer("2.5")).unwrap(), Value::Double(2.5));
        assert_eq!(c.coerce(&NativeType::BOOLEAN, peer("TRUE")).unwrap(), Value::Boolean(true));
        assert_eq!(c.coerce(&NativeType::CHAR, peer("xy")).unwrap(), Value::Char('x'));
        let bytes = c.coerce(&NativeType::array_of(NativeType::BYTE), peer("ab")).unwrap();
        assert_eq!(bytes, Value::Bytes(Arc::from(&b"ab"[..])));
    }

    #[test]
    fn test_numbers_to_primitives() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        assert_eq!(c.coerce(&NativeType::INT, Value::Exact(7)).unwrap(), Value::Int(7));
        assert_eq!(c.coerce(&NativeType::BYTE, Value::Exact(257)).unwrap(), Value::Byte(1));
        assert_eq!(c.coerce(&NativeType::LONG, Value::Double(2.9)).unwrap(), Value::Long(2));
        assert_eq!(c.coerce(&NativeType::BOOLEAN, Value::Exact(0)).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn test_exact_to_reference_types() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        assert_eq!(c.coerce(&NativeType::object(), Value::Exact(3)).unwrap(), Value::Int(3));
        let big = i64::from(i32::MAX) + 1;
        assert_eq!(c.coerce(&NativeType::object(), Value::Exact(big)).unwrap(), Value::Long(big));
        assert_eq!(c.coerce(&NativeType::class("Long"), Value::Exact(3)).unwrap(), Value::Long(3));
    }

    #[test]
    fn test_sequence_composite_to_array() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        let composite = Value::composite(PeerArray::from_values(vec![Value::Exact(1), Value::Exact(2)]));
        let out = c.coerce(&NativeType::array_of(NativeType::INT), composite).unwrap();
        let Value::Array(array) = out else {
            panic!("expected array, got {:?}", out);
        };
        assert_eq!(array.component, NativeType::INT);
        assert_eq!(array.items, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_non_sequential_composite_fails() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        let mut map = PeerArray::new();
        map.insert(ArrayKey::Int(0), Value::Exact(1));
        map.insert(ArrayKey::Int(5), Value::Exact(2));
        let err = c
            .coerce(&NativeType::array_of(NativeType::INT), Value::composite(map))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("IllegalArgumentException"));
        assert!(message.contains("size: 2, failed entry at: 5=2"));
    }

    #[test]
    fn test_composite_to_collections() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        let composite = Value::composite(PeerArray::from_values(vec![Value::Int(1)]));

        let list = c.coerce(&NativeType::class("List"), composite.clone()).unwrap();
        assert_eq!(list.runtime_type(), Some(NativeType::class("ArrayList")));
        let linked = c.coerce(&NativeType::class("LinkedList"), composite.clone()).unwrap();
        assert_eq!(linked.runtime_type(), Some(NativeType::class("LinkedList")));

        let as_map = c.coerce(&NativeType::class("Map"), composite.clone()).unwrap();
        assert!(matches!(as_map, Value::Composite(_)));
        let table = c.coerce(&NativeType::class("Hashtable"), composite).unwrap();
        let map = table.as_object::<MapObject>().unwrap();
        assert_eq!(map.get(&Value::Int(0)), Some(Value::Int(1)));
    }

    #[test]
    fn test_coercion_is_idempotent() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        let cases = [
            (NativeType::string(), Value::string("s")),
            (NativeType::INT, Value::Int(3)),
            (NativeType::DOUBLE, Value::Double(0.25)),
            (NativeType::BOOLEAN, Value::Boolean(true)),
            (NativeType::object(), Value::Int(9)),
            (NativeType::class("Long"), Value::Long(9)),
        ];
        for (ty, value) in cases {
            assert_eq!(c.coerce(&ty, value.clone()).unwrap(), value, "{}", ty);
        }
    }

    #[test]
    fn test_null_passes_through() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        assert_eq!(c.coerce(&NativeType::string(), Value::Null).unwrap(), Value::Null);
        assert_eq!(c.coerce(&NativeType::object(), Value::Null).unwrap(), Value::Null);
        assert_eq!(c.coerce(&NativeType::VOID, Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_null_into_primitive_fails() {
        let r = Registry::with_builtins();
        let c = coercer(&r);
        match c.coerce(&NativeType::INT, Value::Null) {
            Err(Fault::Thrown(t)) => {
                assert_eq!(&*t.class, exceptions::ILLEGAL_ARGUMENT);
                assert_eq!(t.message, "null cannot be passed as int");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
