//! Built-in classes available on every bridge.

use std::sync::Arc;

use super::args;
use super::{Backing, RegistryBuilder};
use crate::error::Fault;
use crate::types::{
    exceptions, names, ListObject, MapObject, NativeArray, NativeType, PeerArray, Throwable, Value,
};

pub(super) fn register(b: &mut RegistryBuilder) {
    register_object(b);
    register_text(b);
    register_numbers(b);
    register_peer_types(b);
    register_collections(b);
    register_throwables(b);
    b.interface(names::RUNNABLE)
        .abstract_method("run", &[], NativeType::VOID)
        .register();
}

fn register_object(b: &mut RegistryBuilder) {
    b.class(names::OBJECT)
        .constructor(&[], |_, _| Ok(Value::object(PlainObject)))
        .method("toString", &[], NativeType::string(), |_, this, _| {
            Ok(Value::from(this.display_string()))
        })
        .method("equals", &[NativeType::object()], NativeType::BOOLEAN, |_, this, a| {
            Ok(Value::Boolean(*this == args::value(&a, 0)))
        })
        .method("getClass", &[], NativeType::class(names::CLASS), |_, this, _| {
            Ok(this
                .runtime_type()
                .map(Value::Class)
                .unwrap_or(Value::Null))
        })
        .register();

    b.class(names::CLASS)
        .method("getName", &[], NativeType::string(), |_, this, _| match this {
            Value::Class(ty) => Ok(Value::from(ty.to_string())),
            other => Err(Fault::illegal_argument(format!(
                "{} is not a class",
                other.describe()
            ))),
        })
        .register();
}

/// Instance of plain `Object`.
#[derive(Debug)]
struct PlainObject;

impl crate::types::NativeObject for PlainObject {
    fn class_name(&self) -> &str {
        names::OBJECT
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn string_of(this: &Value) -> String {
    this.as_text().map(|t| t.into_owned()).unwrap_or_default()
}

fn register_text(b: &mut RegistryBuilder) {
    let string = NativeType::string;
    b.class(names::STRING)
        .constructor(&[], |_, _| Ok(Value::from("")))
        .constructor(&[string()], |_, a| Ok(Value::from(args::text(&a, 0)?)))
        .method("length", &[], NativeType::INT, |_, this, _| {
            Ok(Value::Int(string_of(this).chars().count() as i32))
        })
        .method("isEmpty", &[], NativeType::BOOLEAN, |_, this, _| {
            Ok(Value::Boolean(string_of(this).is_empty()))
        })
        .method("toUpperCase", &[], string(), |_, this, _| {
            Ok(Value::from(string_of(this).to_uppercase()))
        })
        .method("toLowerCase", &[], string(), |_, this, _| {
            Ok(Value::from(string_of(this).to_lowercase()))
        })
        .method("trim", &[], string(), |_, this, _| {
            Ok(Value::from(string_of(this).trim()))
        })
        .method("concat", &[string()], string(), |_, this, a| {
            Ok(Value::from(string_of(this) + &args::text(&a, 0)?))
        })
        .method("startsWith", &[string()], NativeType::BOOLEAN, |_, this, a| {
            Ok(Value::Boolean(string_of(this).starts_with(&args::text(&a, 0)?)))
        })
        .method("indexOf", &[string()], NativeType::INT, |_, this, a| {
            let s = string_of(this);
            let needle = args::text(&a, 0)?;
            let pos = s
                .find(&needle)
                .map(|byte| s[..byte].chars().count() as i32)
                .unwrap_or(-1);
            Ok(Value::Int(pos))
        })
        .method("charAt", &[NativeType::INT], NativeType::CHAR, |_, this, a| {
            let i = args::index(&a, 0)?;
            string_of(this)
                .chars()
                .nth(i)
                .map(Value::Char)
                .ok_or_else(|| args::out_of_bounds(i as i64))
        })
        .method("substring", &[NativeType::INT], string(), |_, this, a| {
            let s = string_of(this);
            let start = args::index(&a, 0)?;
            substring(&s, start, s.chars().count())
        })
        .method(
            "substring",
            &[NativeType::INT, NativeType::INT],
            string(),
            |_, this, a| substring(&string_of(this), args::index(&a, 0)?, args::index(&a, 1)?),
        )
        .method(
            "getBytes",
            &[],
            NativeType::array_of(NativeType::BYTE),
            |ctx, this, _| {
                let bytes = match this {
                    Value::PeerString(p) => p.bytes().to_vec(),
                    other => ctx.encoding().encode(&string_of(other)),
                };
                Ok(Value::Bytes(Arc::from(bytes)))
            },
        )
        .static_method("valueOf", &[NativeType::object()], string(), |_, _, a| {
            Ok(Value::from(args::value(&a, 0).display_string()))
        })
        .register();
}

fn substring(s: &str, start: usize, end: usize) -> Result<Value, Fault> {
    let len = s.chars().count();
    if start > end || end > len {
        return Err(Fault::illegal_argument(format!(
            "substring range {}..{} outside of length {}",
            start, end, len
        )));
    }
    Ok(Value::from(
        s.chars().skip(start).take(end - start).collect::<String>(),
    ))
}

fn register_numbers(b: &mut RegistryBuilder) {
    b.class(names::NUMBER)
        .method("intValue", &[], NativeType::INT, |_, this, _| {
            Ok(Value::Int(this.as_i64().unwrap_or_default() as i32))
        })
        .method("longValue", &[], NativeType::LONG, |_, this, _| {
            Ok(Value::Long(this.as_i64().unwrap_or_default()))
        })
        .method("doubleValue", &[], NativeType::DOUBLE, |_, this, _| {
            Ok(Value::Double(this.as_f64().unwrap_or_default()))
        })
        .register();

    let integer = NativeType::class(names::INTEGER);
    b.class(names::INTEGER)
        .extends(names::NUMBER)
        .field("MAX_VALUE", NativeType::INT, true, |_| Ok(Value::Int(i32::MAX)))
        .field("MIN_VALUE", NativeType::INT, true, |_| Ok(Value::Int(i32::MIN)))
        .static_method("parseInt", &[NativeType::string()], NativeType::INT, |_, _, a| {
            let text = args::text(&a, 0)?;
            text.trim()
                .parse::<i32>()
                .map(Value::Int)
                .map_err(|e| Fault::illegal_argument(format!("{:?}: {}", text, e)))
        })
        .static_method("valueOf", &[NativeType::INT], integer, |_, _, a| {
            Ok(Value::Int(args::int(&a, 0)? as i32))
        })
        .register();

    let long = NativeType::class(names::LONG);
    b.class(names::LONG)
        .extends(names::NUMBER)
        .field("MAX_VALUE", NativeType::LONG, true, |_| Ok(Value::Long(i64::MAX)))
        .static_method("parseLong", &[NativeType::string()], NativeType::LONG, |_, _, a| {
            let text = args::text(&a, 0)?;
            text.trim()
                .parse::<i64>()
                .map(Value::Long)
                .map_err(|e| Fault::illegal_argument(format!("{:?}: {}", text, e)))
        })
        .static_method("valueOf", &[NativeType::LONG], long, |_, _, a| {
            Ok(Value::Long(args::int(&a, 0)?))
        })
        .register();

    let double = NativeType::class(names::DOUBLE);
    b.class(names::DOUBLE)
        .extends(names::NUMBER)
        .static_method(
            "parseDouble",
            &[NativeType::string()],
            NativeType::DOUBLE,
            |_, _, a| {
                let text = args::text(&a, 0)?;
                text.trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| Fault::illegal_argument(format!("{:?}: {}", text, e)))
            },
        )
        .static_method("valueOf", &[NativeType::DOUBLE], double, |_, _, a| {
            Ok(Value::Double(args::float(&a, 0)?))
        })
        .register();

    for name in [names::FLOAT, names::SHORT, names::BYTE, names::EXACT_NUMBER] {
        b.class(name).extends(names::NUMBER).register();
    }
    b.class(names::BOOLEAN)
        .static_method(
            "parseBoolean",
            &[NativeType::string()],
            NativeType::BOOLEAN,
            |_, _, a| Ok(Value::Boolean(args::text(&a, 0)?.eq_ignore_ascii_case("true"))),
        )
        .register();
    b.class(names::CHARACTER).register();
}

fn register_peer_types(b: &mut RegistryBuilder) {
    b.class(names::PEER_STRING).register();
    b.class(names::PEER_NULL).register();
    b.class(names::PEER_ARRAY)
        .implements(names::MAP)
        .method("size", &[], NativeType::INT, |_, this, _| {
            Ok(Value::Int(composite(this)?.len() as i32))
        })
        .method("isEmpty", &[], NativeType::BOOLEAN, |_, this, _| {
            Ok(Value::Boolean(composite(this)?.is_empty()))
        })
        .method("get", &[NativeType::object()], NativeType::object(), |_, this, a| {
            let key = args::array_key(&args::value(&a, 0));
            Ok(composite(this)?.get(&key).cloned().unwrap_or(Value::Null))
        })
        .method(
            "containsKey",
            &[NativeType::object()],
            NativeType::BOOLEAN,
            |_, this, a| {
                let key = args::array_key(&args::value(&a, 0));
                Ok(Value::Boolean(composite(this)?.get(&key).is_some()))
            },
        )
        .register();
}

fn composite(this: &Value) -> Result<&PeerArray, Fault> {
    match this {
        Value::Composite(c) => Ok(c),
        other => Err(Fault::illegal_argument(format!(
            "{} is not a peer array",
            other.describe()
        ))),
    }
}

/// Elements of a list-like value passed to a copy constructor.
fn elements_of(value: &Value) -> Result<Vec<Value>, Fault> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Composite(c) => Ok(c.values().cloned().collect()),
        Value::Array(a) => Ok(a.items.clone()),
        other => match other.as_object::<ListObject>() {
            Some(list) => Ok(list.snapshot()),
            None => Err(Fault::illegal_argument(format!(
                "{} is not a collection",
                other.describe()
            ))),
        },
    }
}

/// Entries of a map-like value passed to a copy constructor.
fn entries_of(value: &Value) -> Result<Vec<(Value, Value)>, Fault> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Composite(c) => Ok(c
            .iter()
            .map(|(k, v)| (k.to_value(), v.clone()))
            .collect()),
        other => match other.as_object::<MapObject>() {
            Some(map) => Ok(map.snapshot()),
            None => Err(Fault::illegal_argument(format!(
                "{} is not a map",
                other.describe()
            ))),
        },
    }
}

fn register_collections(b: &mut RegistryBuilder) {
    b.interface(names::COLLECTION).register();
    b.interface(names::LIST).implements(names::COLLECTION).register();
    b.interface(names::MAP).register();

    for class in [names::ARRAY_LIST, names::LINKED_LIST] {
        register_list(b, class);
    }
    for class in [names::HASH_MAP, names::HASHTABLE] {
        register_map(b, class);
    }
}

fn register_list(b: &mut RegistryBuilder, class: &'static str) {
    let object = NativeType::object;
    b.class(class)
        .implements(names::LIST)
        .backing(Backing::List)
        .constructor(&[], move |_, _| Ok(Value::object(ListObject::new(class, Vec::new()))))
        .constructor(&[NativeType::INT], move |_, _| {
            Ok(Value::object(ListObject::new(class, Vec::new())))
        })
        .constructor(&[NativeType::class(names::COLLECTION)], move |_, a| {
            let items = elements_of(&args::value(&a, 0))?;
            Ok(Value::object(ListObject::new(class, items)))
        })
        .method("add", &[object()], NativeType::BOOLEAN, |_, this, a| {
            args::receiver::<ListObject>(this)?.push(args::value(&a, 0));
            Ok(Value::Boolean(true))
        })
        .method("add", &[NativeType::INT, object()], NativeType::VOID, |_, this, a| {
            let list = args::receiver::<ListObject>(this)?;
            let index = args::index(&a, 0)?;
            let mut items = list.snapshot();
            if index > items.len() {
                return Err(args::out_of_bounds(index as i64));
            }
            items.insert(index, args::value(&a, 1));
            list.clear();
            items.into_iter().for_each(|v| list.push(v));
            Ok(Value::Null)
        })
        .method("get", &[NativeType::INT], object(), |_, this, a| {
            let index = args::index(&a, 0)?;
            args::receiver::<ListObject>(this)?
                .get(index)
                .ok_or_else(|| args::out_of_bounds(index as i64))
        })
        .method("set", &[NativeType::INT, object()], object(), |_, this, a| {
            let index = args::index(&a, 0)?;
            args::receiver::<ListObject>(this)?
                .set(index, args::value(&a, 1))
                .ok_or_else(|| args::out_of_bounds(index as i64))
        })
        .method("remove", &[NativeType::INT], object(), |_, this, a| {
            let index = args::index(&a, 0)?;
            args::receiver::<ListObject>(this)?
                .remove(index)
                .ok_or_else(|| args::out_of_bounds(index as i64))
        })
        .method("contains", &[object()], NativeType::BOOLEAN, |_, this, a| {
            let needle = args::value(&a, 0);
            let list = args::receiver::<ListObject>(this)?;
            Ok(Value::Boolean(list.snapshot().contains(&needle)))
        })
        .method("size", &[], NativeType::INT, |_, this, _| {
            Ok(Value::Int(args::receiver::<ListObject>(this)?.len() as i32))
        })
        .method("isEmpty", &[], NativeType::BOOLEAN, |_, this, _| {
            Ok(Value::Boolean(args::receiver::<ListObject>(this)?.is_empty()))
        })
        .method("clear", &[], NativeType::VOID, |_, this, _| {
            args::receiver::<ListObject>(this)?.clear();
            Ok(Value::Null)
        })
        .method("toArray", &[], NativeType::array_of(object()), |_, this, _| {
            Ok(Value::Array(Arc::new(NativeArray {
                component: NativeType::object(),
                items: args::receiver::<ListObject>(this)?.snapshot(),
            })))
        })
        .register();
}

fn register_map(b: &mut RegistryBuilder, class: &'static str) {
    let object = NativeType::object;
    b.class(class)
        .implements(names::MAP)
        .backing(Backing::Map)
        .constructor(&[], move |_, _| Ok(Value::object(MapObject::new(class, Vec::new()))))
        .constructor(&[NativeType::class(names::MAP)], move |_, a| {
            let entries = entries_of(&args::value(&a, 0))?;
            Ok(Value::object(MapObject::new(class, entries)))
        })
        .method("put", &[object(), object()], object(), |_, this, a| {
            let map = args::receiver::<MapObject>(this)?;
            Ok(map
                .put(args::value(&a, 0), args::value(&a, 1))
                .unwrap_or(Value::Null))
        })
        .method("get", &[object()], object(), |_, this, a| {
            let map = args::receiver::<MapObject>(this)?;
            Ok(map.get(&args::value(&a, 0)).unwrap_or(Value::Null))
        })
        .method("containsKey", &[object()], NativeType::BOOLEAN, |_, this, a| {
            let map = args::receiver::<MapObject>(this)?;
            Ok(Value::Boolean(map.contains_key(&args::value(&a, 0))))
        })
        .method("remove", &[object()], object(), |_, this, a| {
            let map = args::receiver::<MapObject>(this)?;
            Ok(map.remove(&args::value(&a, 0)).unwrap_or(Value::Null))
        })
        .method("size", &[], NativeType::INT, |_, this, _| {
            Ok(Value::Int(args::receiver::<MapObject>(this)?.len() as i32))
        })
        .method("isEmpty", &[], NativeType::BOOLEAN, |_, this, _| {
            Ok(Value::Boolean(args::receiver::<MapObject>(this)?.is_empty()))
        })
        .register();
}

fn register_throwables(b: &mut RegistryBuilder) {
    let throwable = NativeType::class(exceptions::THROWABLE);
    b.class(exceptions::THROWABLE)
        .method("getMessage", &[], NativeType::string(), |_, this, _| {
            Ok(Value::from(args::throwable(this)?.message.as_str()))
        })
        .method("getCause", &[], throwable, |_, this, _| {
            Ok(args::throwable(this)?
                .cause
                .clone()
                .map(Value::Error)
                .unwrap_or(Value::Null))
        })
        .method("getStackTrace", &[], NativeType::string(), |_, this, _| {
            Ok(Value::from(args::throwable(this)?.stack_trace()))
        })
        .register();
    register_exception(b, exceptions::THROWABLE);

    for (class, superclass) in exceptions::HIERARCHY {
        b.class(class).extends(superclass).register();
        register_exception(b, class);
    }
}

fn register_exception(b: &mut RegistryBuilder, class: &'static str) {
    b.class(class)
        .constructor(&[], move |_, _| Ok(Value::from(Throwable::new(class, ""))))
        .constructor(&[NativeType::string()], move |_, a| {
            Ok(Value::from(Throwable::new(class, args::text(&a, 0)?)))
        })
        .register();
}
