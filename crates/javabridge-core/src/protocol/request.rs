//! Builds a [`PendingCall`] from parse events.

use std::sync::Arc;

use super::options::TextEncoding;
use super::parser::{DocHandler, ParserTag};
use crate::cache::StringCache;
use crate::error::{BridgeError, Result};
use crate::refs::{Handle, ReferenceTable};
use crate::types::{exceptions, ArrayKey, PeerArray, PeerString, Throwable, Value};

/// Receiver of a call, as named by the request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CallTarget {
    #[default]
    None,
    /// A handle (or the root) resolved to its value.
    Value(Value),
    /// A class name, for construction requests.
    Class(Arc<str>),
}

/// One top-level request, fully parsed.
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// Request tag: `I`, `G`, `Y`, `C`, `H`, `K`, `F` or `R`. Zero when the
    /// stream ended before a request was seen.
    pub kind: u8,
    pub predicate: u8,
    pub target: CallTarget,
    pub method: Arc<str>,
    pub args: Vec<Value>,
    /// Error carried by an `E` leaf, used by sub-request returns.
    pub error: Option<Arc<Throwable>>,
    /// Context id, when the connection passes them.
    pub context_id: Option<u64>,
    /// First released handle the request referred to.
    pub unresolved: Option<Handle>,
}

impl Default for PendingCall {
    fn default() -> Self {
        Self {
            kind: 0,
            predicate: 0,
            target: CallTarget::None,
            method: Arc::from(""),
            args: Vec::new(),
            error: None,
            context_id: None,
            unresolved: None,
        }
    }
}

impl PendingCall {
    /// Short form for traffic logs.
    pub fn summary(&self) -> String {
        let target = match &self.target {
            CallTarget::None => String::new(),
            CallTarget::Value(v) => v.describe(),
            CallTarget::Class(c) => c.to_string(),
        };
        format!(
            "{}{} {} {} ({} args)",
            self.kind as char,
            if self.predicate == 0 { ' ' } else { self.predicate as char },
            target,
            self.method,
            self.args.len()
        )
    }
}

#[derive(Debug)]
struct CompositeBuilder {
    kind: u8,
    key: Option<ArrayKey>,
    count: i64,
    array: PeerArray,
}

impl CompositeBuilder {
    fn new(kind: u8) -> Self {
        Self {
            kind,
            key: None,
            count: 0,
            array: PeerArray::new(),
        }
    }

    fn add(&mut self, value: Value) {
        match &self.key {
            Some(key) => self.array.insert(key.clone(), value),
            None => {
                self.array.insert(ArrayKey::Int(self.count), value);
                self.count += 1;
            }
        }
    }
}

/// [`DocHandler`] that fills a [`PendingCall`].
///
/// Handles are resolved while parsing: `0` is the connection root, anything
/// else is looked up in the reference table. A released handle does not fail
/// the parse; it is recorded in [`PendingCall::unresolved`].
pub struct RequestBuilder<'a> {
    refs: &'a mut ReferenceTable,
    strings: &'a mut StringCache,
    encoding: TextEncoding,
    pass_context: bool,
    root: &'a Value,
    call: PendingCall,
    stack: Vec<CompositeBuilder>,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(
        refs: &'a mut ReferenceTable,
        strings: &'a mut StringCache,
        encoding: TextEncoding,
        root: &'a Value,
    ) -> Self {
        Self {
            refs,
            strings,
            encoding,
            pass_context: false,
            root,
            call: PendingCall::default(),
            stack: Vec::new(),
        }
    }

    pub fn with_context_ids(mut self, pass_context: bool) -> Self {
        self.pass_context = pass_context;
        self
    }

    /// The parsed call.
    pub fn finish(self) -> PendingCall {
        self.call
    }

    fn in_hash(&self) -> bool {
        self.stack.last().map(|c| c.kind == b'H').unwrap_or(false)
    }

    fn add(&mut self, value: Value) {
        match self.stack.last_mut() {
            Some(composite) => composite.add(value),
            None => self.call.args.push(value),
        }
    }

    fn string(&mut self, bytes: &[u8]) -> Arc<str> {
        self.strings.get(bytes, self.encoding)
    }

    fn context_id(&mut self, raw: &[u8]) {
        if self.pass_context && !raw.is_empty() {
            self.call.context_id = parse_hex(raw).ok().map(|v| v as u64);
        }
    }

    /// Value behind a handle; `0` is the root.
    fn receiver(&mut self, raw: &[u8]) -> Result<Value> {
        let handle = parse_handle(raw)?;
        if handle == 0 {
            return Ok(self.root.clone());
        }
        Ok(self.lookup(handle))
    }

    /// Value behind a non-root handle. Peer nulls read back as null.
    fn lookup(&mut self, handle: Handle) -> Value {
        match self.refs.get(handle) {
            Ok(Value::PeerNull) => Value::Null,
            Ok(value) => value.clone(),
            Err(_) => {
                self.call.unresolved.get_or_insert(handle);
                Value::Null
            }
        }
    }

    fn error_leaf(&mut self, tag: &ParserTag) -> Result<()> {
        let handle = parse_handle(tag.value(0))?;
        let error = if handle == 0 {
            let message = self.encoding.decode(tag.value(1));
            Arc::new(Throwable::new(exceptions::EXCEPTION, message))
        } else {
            match self.lookup(handle) {
                Value::Error(t) => t,
                Value::Null => Arc::new(BridgeError::HandleReleased { handle }.to_throwable()),
                other => Arc::new(Throwable::new(
                    exceptions::EXCEPTION,
                    other.display_string(),
                )),
            }
        };
        self.call.error = Some(error);
        Ok(())
    }

    fn exact(&self, value: i64) -> Value {
        if self.in_hash() {
            Value::Int(value as i32)
        } else {
            Value::Exact(value)
        }
    }
}

impl DocHandler for RequestBuilder<'_> {
    fn begin(&mut self, tag: &ParserTag) -> Result<bool> {
        let kind = tag.kind();
        match kind {
            b'I' => {
                self.call.kind = kind;
                self.call.target = CallTarget::Value(self.receiver(tag.value(0))?);
                self.call.method = self.string(tag.value(1));
                self.call.predicate = tag.first_byte(2);
                self.context_id(tag.value(3));
            }
            b'G' | b'Y' => {
                self.call.kind = kind;
                self.call.predicate = tag.first_byte(0);
                self.call.target = CallTarget::Value(self.receiver(tag.value(1))?);
                self.call.method = self.string(tag.value(2));
                self.context_id(tag.value(3));
            }
            b'H' | b'K' => {
                self.call.kind = kind;
                self.call.predicate = tag.first_byte(0);
                self.call.target = CallTarget::Class(self.string(tag.value(1)));
                self.context_id(tag.value(2));
            }
            b'C' => {
                self.call.kind = kind;
                self.call.target = CallTarget::Class(self.string(tag.value(0)));
                self.call.predicate = tag.first_byte(1);
                self.context_id(tag.value(2));
            }
            b'F' => {
                self.call.kind = kind;
                self.call.predicate = tag.first_byte(0);
            }
            b'R' => {
                self.call.kind = kind;
                self.context_id(tag.value(0));
            }
            b'X' => self.stack.push(CompositeBuilder::new(tag.first_byte(0))),
            b'P' => {
                let key = if self.in_hash() {
                    Some(if tag.first_byte(0) == b'S' {
                        ArrayKey::Str(self.string(tag.value(1)).to_string())
                    } else {
                        ArrayKey::Int(parse_hex(tag.value(1))?)
                    })
                } else {
                    None
                };
                if let Some(composite) = self.stack.last_mut() {
                    composite.key = key;
                }
            }
            b'U' => {
                let handle = parse_handle(tag.value(0))?;
                self.refs.remove(handle);
                return Ok(false);
            }
            b'S' => {
                if tag.has_attrs() {
                    // Hash data is decoded directly; only names are interned.
                    let value = if self.in_hash() {
                        Value::String(Arc::from(self.encoding.decode(tag.value(0))))
                    } else {
                        Value::PeerString(PeerString::new(tag.value(0).to_vec(), self.encoding))
                    };
                    self.add(value);
                }
            }
            b'B' => self.add(Value::Boolean(tag.first_byte(0) == b'T')),
            b'T' => self.add(Value::Boolean(tag.first_byte(0) == b'1')),
            b'L' => {
                let magnitude = parse_hex(tag.value(0))?;
                let value = if tag.first_byte(1) == b'O' {
                    magnitude
                } else {
                    magnitude.wrapping_neg()
                };
                let value = self.exact(value);
                self.add(value);
            }
            b'J' => {
                let value = parse_decimal(tag.value(0))?;
                let value = self.exact(value);
                self.add(value);
            }
            b'D' => {
                let text = String::from_utf8_lossy(tag.value(0));
                let value: f64 = text.trim().parse().map_err(|_| {
                    BridgeError::protocol(format!("invalid double value {:?}", text))
                })?;
                self.add(Value::Double(value));
            }
            b'E' => self.error_leaf(tag)?,
            b'O' => {
                let raw = tag.value(0);
                let value = if raw.is_empty() {
                    Value::Null
                } else {
                    match parse_handle(raw)? {
                        0 => Value::Null,
                        handle => self.lookup(handle),
                    }
                };
                self.add(value);
            }
            b'N' => self.add(Value::Null),
            // Void carries no value.
            b'V' => {}
            other => {
                return Err(BridgeError::protocol(format!(
                    "unknown tag <{}>",
                    other as char
                )))
            }
        }
        Ok(true)
    }

    fn end(&mut self, name: &[u8]) -> Result<()> {
        if name.first() == Some(&b'X') {
            let composite = self
                .stack
                .pop()
                .ok_or_else(|| BridgeError::protocol("</X> without an open composite"))?;
            self.add(Value::composite(composite.array));
        }
        Ok(())
    }
}

/// Hex number with an optional leading `-`. Empty text is zero.
fn parse_hex(raw: &[u8]) -> Result<i64> {
    let (negative, digits) = match raw.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, raw),
    };
    let mut value: u64 = 0;
    for &b in digits {
        let digit = (b as char).to_digit(16).ok_or_else(|| {
            BridgeError::protocol(format!(
                "invalid hex number {:?}",
                String::from_utf8_lossy(raw)
            ))
        })?;
        value = value.wrapping_mul(16).wrapping_add(digit as u64);
    }
    let value = value as i64;
    Ok(if negative { value.wrapping_neg() } else { value })
}

fn parse_handle(raw: &[u8]) -> Result<Handle> {
    let value = parse_hex(raw)?;
    Handle::try_from(value)
        .map_err(|_| BridgeError::protocol(format!("invalid handle {}", value)))
}

fn parse_decimal(raw: &[u8]) -> Result<i64> {
    let text = String::from_utf8_lossy(raw);
    text.trim()
        .parse()
        .map_err(|_| BridgeError::protocol(format!("invalid decimal number {:?}", text)))
}
