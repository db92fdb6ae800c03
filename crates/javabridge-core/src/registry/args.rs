//! Argument helpers for native method bodies.
//!
//! Arguments arrive already coerced to the declared parameter types, so
//! these only fail when a body is registered with a mismatched signature
//! or receives a null.

use std::sync::Arc;

use crate::error::Fault;
use crate::types::{exceptions, ArrayKey, NativeObject, Throwable, Value};

fn missing(index: usize, expected: &str, got: Option<&Value>) -> Fault {
    let got = got.map(Value::describe).unwrap_or_else(|| "nothing".to_string());
    Fault::illegal_argument(format!(
        "argument {} must be {}, got {}",
        index, expected, got
    ))
}

pub fn text(args: &[Value], index: usize) -> Result<String, Fault> {
    args.get(index)
        .and_then(|v| v.as_text().map(|t| t.into_owned()))
        .ok_or_else(|| missing(index, "a string", args.get(index)))
}

pub fn int(args: &[Value], index: usize) -> Result<i64, Fault> {
    args.get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| missing(index, "an integer", args.get(index)))
}

/// Non-negative index argument.
pub fn index(args: &[Value], index: usize) -> Result<usize, Fault> {
    let raw = int(args, index)?;
    usize::try_from(raw).map_err(|_| out_of_bounds(raw))
}

pub fn float(args: &[Value], index: usize) -> Result<f64, Fault> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| missing(index, "a number", args.get(index)))
}

pub fn boolean(args: &[Value], index: usize) -> Result<bool, Fault> {
    args.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| missing(index, "a boolean", args.get(index)))
}

/// The argument at `index`, or null when absent.
pub fn value(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Null)
}

/// Downcast the receiver of an instance method.
pub fn receiver<T: NativeObject>(this: &Value) -> Result<&T, Fault> {
    this.as_object::<T>().ok_or_else(|| {
        Fault::thrown(
            exceptions::ILLEGAL_STATE,
            format!("receiver {} has an unexpected type", this.describe()),
        )
    })
}

/// The throwable carried by an error receiver.
pub fn throwable(this: &Value) -> Result<&Arc<Throwable>, Fault> {
    match this {
        Value::Error(t) => Ok(t),
        other => Err(Fault::thrown(
            exceptions::ILLEGAL_STATE,
            format!("receiver {} is not a throwable", other.describe()),
        )),
    }
}

/// Key of a peer composite addressed by a native value.
pub fn array_key(key: &Value) -> ArrayKey {
    match key {
        Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) | Value::Exact(_) => {
            ArrayKey::Int(key.as_i64().unwrap_or_default())
        }
        other => ArrayKey::Str(other.display_string()),
    }
}

pub fn out_of_bounds(index: i64) -> Fault {
    Fault::thrown(
        exceptions::ILLEGAL_ARGUMENT,
        format!("index {} out of bounds", index),
    )
}
