//! The connection root: the object the peer reaches through handle 0.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Fault;
use crate::protocol::{TextEncoding, WriterMode};
use crate::registry::{args, RegistryBuilder};
use crate::types::{names, Closure, NativeObject, NativeType, Value};

#[derive(Debug)]
pub struct BridgeRoot;

impl NativeObject for BridgeRoot {
    fn class_name(&self) -> &str {
        names::BRIDGE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Native type named by a class object or a class name.
fn type_of(value: &Value) -> Option<NativeType> {
    match value {
        Value::Class(ty) => Some(ty.clone()),
        other => other.as_text().map(|name| NativeType::parse(&name)),
    }
}

fn interface_name(value: &Value) -> Option<String> {
    match value {
        Value::Class(ty) => Some(ty.to_string()),
        other => other.as_text().map(|t| t.into_owned()),
    }
}

/// Per-method peer names from a map argument.
fn closure_names(value: &Value) -> HashMap<String, String> {
    let entries: Vec<(Value, Value)> = match value {
        Value::Composite(array) => array
            .iter()
            .map(|(k, v)| (k.to_value(), v.clone()))
            .collect(),
        other => match other.as_object::<crate::types::MapObject>() {
            Some(map) => map.snapshot(),
            None => Vec::new(),
        },
    };
    entries
        .into_iter()
        .map(|(k, v)| (k.display_string(), v.display_string()))
        .collect()
}

fn interfaces_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(array) => array.items.iter().filter_map(interface_name).collect(),
        Value::Composite(array) => array.values().filter_map(interface_name).collect(),
        _ => Vec::new(),
    }
}

/// Register the `Bridge` class.
pub fn register_root(b: &mut RegistryBuilder) {
    let object = NativeType::object;
    let mut class = b
        .class(names::BRIDGE)
        .method("getValues", &[object()], object(), |ctx, _, a| {
            ctx.select_writer(WriterMode::ArrayValues);
            Ok(args::value(&a, 0))
        })
        .method("castToArray", &[object()], object(), |ctx, _, a| {
            ctx.select_writer(WriterMode::ArrayValue);
            Ok(args::value(&a, 0))
        });
    for (name, target) in [
        ("castToString", NativeType::string()),
        ("castToExact", NativeType::LONG),
        ("castToBoolean", NativeType::BOOLEAN),
        ("castToInexact", NativeType::DOUBLE),
    ] {
        class = class.method(name, &[object()], object(), move |ctx, _, a| {
            ctx.select_writer(WriterMode::Coerce(target.clone()));
            Ok(args::value(&a, 0))
        });
    }

    class
        .method("getLastException", &[], object(), |ctx, _, _| {
            ctx.select_writer(WriterMode::Coerce(NativeType::object()));
            Ok(ctx.last_exception().map(Value::Error).unwrap_or(Value::Null))
        })
        .method("clearLastException", &[], NativeType::VOID, |ctx, _, _| {
            ctx.clear_last_exception();
            Ok(Value::Null)
        })
        .method("typeExists", &[NativeType::string()], NativeType::BOOLEAN, |ctx, _, a| {
            let name = args::text(&a, 0)?;
            ctx.select_writer(WriterMode::Coerce(NativeType::BOOLEAN));
            Ok(Value::Boolean(ctx.registry().type_exists(&name)))
        })
        .method("instanceOf", &[object(), object()], NativeType::BOOLEAN, |ctx, _, a| {
            ctx.select_writer(WriterMode::Coerce(NativeType::BOOLEAN));
            let value = args::value(&a, 0);
            let Some(class) = type_of(&args::value(&a, 1)) else {
                return Err(Fault::illegal_argument("instanceOf needs a class or a class name"));
            };
            let matches = value
                .runtime_type()
                .map(|ty| ctx.registry().is_assignable(&class, &ty))
                .unwrap_or(false);
            Ok(Value::Boolean(matches))
        })
        .method("inspect", &[object()], NativeType::string(), |ctx, _, a| {
            ctx.select_writer(WriterMode::Coerce(NativeType::string()));
            let value = args::value(&a, 0);
            let class = match &value {
                Value::Class(ty) => Some(ty.clone()),
                other => other.runtime_type(),
            };
            let listing = class
                .and_then(|ty| ctx.registry().describe_class(&ty.to_string()))
                .unwrap_or_default();
            Ok(Value::from(format!("[{}]\n{}", value.describe(), listing)))
        })
        .method("setFileEncoding", &[NativeType::string()], NativeType::VOID, |ctx, _, a| {
            let name = args::text(&a, 0)?;
            let encoding = TextEncoding::from_name(&name).ok_or_else(|| {
                Fault::illegal_argument(format!("unsupported encoding {}", name))
            })?;
            ctx.set_encoding(encoding);
            Ok(Value::Null)
        })
        .method("makeClosure", &[NativeType::LONG], object(), |_, _, a| {
            let closure = Closure::new(args::int(&a, 0)?);
            Ok(Value::Closure(Arc::new(closure)))
        })
        .method(
            "makeClosure",
            &[NativeType::LONG, NativeType::string()],
            object(),
            |_, _, a| {
                let closure = Closure::new(args::int(&a, 0)?).with_name(args::text(&a, 1)?);
                Ok(Value::Closure(Arc::new(closure)))
            },
        )
        .method(
            "makeClosure",
            &[
                NativeType::LONG,
                NativeType::string(),
                NativeType::class(names::CLASS),
            ],
            object(),
            |_, _, a| {
                let interface = interface_name(&args::value(&a, 2))
                    .ok_or_else(|| Fault::illegal_argument("makeClosure needs an interface"))?;
                let closure = Closure::new(args::int(&a, 0)?)
                    .with_name(args::text(&a, 1)?)
                    .with_interface(&interface);
                Ok(Value::Closure(Arc::new(closure)))
            },
        )
        .method(
            "makeClosure",
            &[
                NativeType::LONG,
                NativeType::class(names::MAP),
                NativeType::array_of(NativeType::class(names::CLASS)),
            ],
            object(),
            |_, _, a| {
                let mut closure = Closure::new(args::int(&a, 0)?)
                    .with_names(closure_names(&args::value(&a, 1)));
                for interface in interfaces_of(&args::value(&a, 2)) {
                    closure = closure.with_interface(&interface);
                }
                Ok(Value::Closure(Arc::new(closure)))
            },
        )
        .register();
}
