//! Reply writers.
//!
//! A [`Response`] owns the reply buffer and the writer selected for the
//! current request. Writers decide how a result is encoded: as a handle, as
//! a value, deferred into the reference table, or not at all. After every
//! flush the writer falls back to the connection default.

use std::io::{self, Write};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::options::BridgeOptions;
use super::output::OutputBuffer;
use crate::error::Fault;
use crate::refs::ReferenceTable;
use crate::registry::Registry;
use crate::types::{
    exceptions, names, ArrayKey, ListObject, MapObject, NativeType, Primitive, Throwable, Value,
};

/// How the next result is written.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WriterMode {
    /// Handles, or values when the connection prefers values.
    #[default]
    Default,
    /// Store the result in the reference table, write nothing.
    Async,
    /// Discard the result.
    AsyncVoid,
    /// Expand arrays, lists and maps into composites of values.
    ArrayValues,
    /// Write the result as a composite, wrapping scalars in a one-element
    /// array.
    ArrayValue,
    /// Convert the result to the given type and write it as a value.
    Coerce(NativeType),
}

impl WriterMode {
    pub fn is_async(&self) -> bool {
        matches!(self, WriterMode::Async | WriterMode::AsyncVoid)
    }
}

/// Last errors of a connection, readable from the root object.
#[derive(Debug, Clone, Default)]
pub struct LastErrors {
    pub last: Option<Arc<Throwable>>,
    /// First undeclared error since the last clear.
    pub last_async: Option<Arc<Throwable>>,
}

impl LastErrors {
    pub fn record(&mut self, error: Arc<Throwable>) {
        self.last = Some(error);
    }

    /// Remember an undeclared error unless one is already pending.
    pub fn record_async(&mut self, error: Arc<Throwable>) {
        if self.last_async.is_none() {
            self.last = Some(error.clone());
            self.last_async = Some(error);
        }
    }

    /// The pending undeclared error, else the last error.
    pub fn current(&self) -> Option<Arc<Throwable>> {
        self.last_async.clone().or_else(|| self.last.clone())
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.last_async = None;
    }
}

/// Connection state a writer needs.
pub struct WriteContext<'a> {
    pub refs: &'a mut ReferenceTable,
    pub registry: &'a Registry,
    pub options: BridgeOptions,
    pub errors: &'a mut LastErrors,
}

/// How elements inside an expanded composite are written.
#[derive(Debug, Clone, Copy)]
enum Element {
    Values,
    Leaf,
}

#[derive(Debug)]
pub struct Response {
    buf: OutputBuffer,
    writer: WriterMode,
    current: WriterMode,
    /// Finish flag computed when the connection was recycled.
    recycled_async: Option<bool>,
}

/// Writer state saved around a sub-request.
#[derive(Debug, Clone)]
pub struct SavedWriter {
    writer: WriterMode,
    current: WriterMode,
}

impl Response {
    pub fn new(base64: bool) -> Self {
        Self {
            buf: OutputBuffer::new(base64),
            writer: WriterMode::Default,
            current: WriterMode::Default,
            recycled_async: None,
        }
    }

    pub fn writer(&self) -> &WriterMode {
        &self.writer
    }

    /// Select the writer for the current request only.
    pub fn set_writer(&mut self, mode: WriterMode) {
        self.writer = mode;
    }

    /// Select the default writer and make it the fallback.
    pub fn set_default_writer(&mut self) {
        self.writer = WriterMode::Default;
        self.current = WriterMode::Default;
    }

    pub fn is_async(&self) -> bool {
        self.writer.is_async()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn set_base64(&mut self, base64: bool) {
        if self.buf.is_base64() != base64 {
            self.buf = OutputBuffer::new(base64);
        }
    }

    /// Write a call result of declared type `ty`.
    pub fn set_result(&mut self, cx: &mut WriteContext<'_>, value: &Value, ty: &NativeType, declared: bool) {
        match self.writer.clone() {
            WriterMode::Default if cx.options.prefer_values => self.write_value_result(cx, value, ty),
            WriterMode::Default => self.write_object_result(cx, value, ty, declared),
            WriterMode::Async => self.store_async(cx, value, ty),
            WriterMode::AsyncVoid => {}
            WriterMode::ArrayValues => self.write_values(cx, value),
            WriterMode::ArrayValue => {
                if !self.write_composite(cx, value, Element::Leaf) {
                    self.buf.append(b"<X t=\"A\"><P>");
                    self.write_leaf(cx, value);
                    self.buf.append(b"</P></X>");
                }
            }
            WriterMode::Coerce(target) => self.write_coerced(cx, value, &target),
        }
    }

    /// Write an error reply. Undeclared errors are wrapped first.
    pub fn set_result_exception(&mut self, cx: &mut WriteContext<'_>, error: Arc<Throwable>, declared: bool) {
        let error = wrap_undeclared(cx, error, declared);
        match self.writer {
            WriterMode::Async => {
                cx.refs.append(Value::Error(error));
            }
            WriterMode::AsyncVoid => {}
            _ => {
                let handle = cx.refs.append(Value::Error(error));
                self.buf.append(b"<E v=\"");
                self.buf.append_hex(handle as u64);
                self.buf.append(if declared { b"\" m=\"T\"/>" } else { b"\" m=\"F\"/>" });
            }
        }
    }

    /// Write a callback packet asking the peer to run `method` on `object`.
    pub fn set_result_procedure(
        &mut self,
        cx: &mut WriteContext<'_>,
        object: i64,
        cname: &str,
        method: &str,
        args: &[Value],
    ) -> Result<(), Fault> {
        if self.writer == WriterMode::AsyncVoid {
            return Err(Fault::thrown(
                exceptions::ILLEGAL_STATE,
                format!("Cannot call {}: callbacks not allowed in stream mode", method),
            ));
        }
        let saved = self.writer.clone();
        if saved.is_async() {
            self.writer = WriterMode::Default;
        }

        let encoding = cx.options.encoding;
        self.buf.append(b"<A v=\"");
        self.buf.append_hex(object as u64);
        self.buf.append(b"\" p=\"");
        self.buf.append_quoted(&encoding.encode(cname));
        self.buf.append(b"\" m=\"");
        self.buf.append_quoted(&encoding.encode(method));
        self.buf.append(b"\" n=\"");
        self.buf.append_hex(args.len() as u64);
        self.buf.append(b"\">");
        for arg in args {
            self.buf.append(b"<P>");
            match arg.runtime_type() {
                None => self.buf.append(b"<N />"),
                Some(ty) => self.set_result(cx, arg, &ty, true),
            }
            self.buf.append(b"</P>");
        }
        self.buf.append(b"</A>");

        self.writer = saved;
        Ok(())
    }

    /// Write the finish packet. Lower case flags a pending undeclared error.
    pub fn set_finish(&mut self, cx: &WriteContext<'_>, keep_alive: bool) {
        let pending = self
            .recycled_async
            .take()
            .unwrap_or_else(|| cx.errors.last_async.is_some());
        self.set_default_writer();
        self.buf.append(match (keep_alive, pending) {
            (true, false) => b"<F p=\"A\"/>",
            (true, true) => b"<F p=\"a\"/>",
            (false, false) => b"<F p=\"E\"/>",
            (false, true) => b"<F p=\"e\"/>",
        });
    }

    /// Send the reply, or drop it when the writer is asynchronous.
    pub fn flush(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.is_async() {
            trace!(" |<- {}", self.buf.preview());
            self.buf.reset();
        } else {
            debug!(" <-- {}", self.buf.preview());
            self.buf.write_to(out)?;
        }
        self.writer = self.current.clone();
        Ok(())
    }

    /// Send the buffer as is, whatever the writer. Used before a callback.
    pub fn flush_raw(&mut self, out: &mut dyn Write) -> io::Result<()> {
        debug!(" <-- {}", self.buf.preview());
        self.buf.write_to(out)
    }

    /// Drop the buffer and fall back to the connection writer.
    pub fn reset(&mut self) {
        self.buf.reset();
        self.writer = self.current.clone();
    }

    /// Reset for keep-alive. `had_async` is whether an undeclared error was
    /// pending before the connection state was cleared.
    pub fn recycle(&mut self, had_async: bool) {
        self.recycled_async = Some(had_async);
        self.buf.reset();
        self.set_default_writer();
    }

    /// Switch to the default writer for a nested exchange.
    pub fn enter_nested(&mut self) -> SavedWriter {
        let saved = SavedWriter {
            writer: self.writer.clone(),
            current: self.current.clone(),
        };
        self.set_default_writer();
        saved
    }

    pub fn restore(&mut self, saved: SavedWriter) {
        self.writer = saved.writer;
        self.current = saved.current;
    }

    fn write_object_result(&mut self, cx: &mut WriteContext<'_>, value: &Value, ty: &NativeType, declared: bool) {
        if ty.is_void() {
            self.write_void(declared);
            return;
        }
        let value = if value.is_null() { &Value::PeerNull } else { value };
        self.write_object(cx, value, declared);
    }

    fn write_value_result(&mut self, cx: &mut WriteContext<'_>, value: &Value, ty: &NativeType) {
        if let Some(p) = ty.as_primitive() {
            match p {
                Primitive::Boolean => self.buf.append_bool(value.as_bool().unwrap_or(false)),
                Primitive::Byte | Primitive::Short | Primitive::Int | Primitive::Long => {
                    self.buf.append_long(value.as_i64().unwrap_or(0))
                }
                Primitive::Float | Primitive::Double => {
                    self.buf.append_double(value.as_f64().unwrap_or(0.0))
                }
                Primitive::Char => self.write_text(cx, &value.display_string()),
                Primitive::Void => self.write_void(true),
            }
            return;
        }
        match value {
            Value::PeerString(s) => self.buf.append_string(s.bytes()),
            other => self.write_object(cx, other, true),
        }
    }

    fn store_async(&mut self, cx: &mut WriteContext<'_>, value: &Value, ty: &NativeType) {
        let stored = if value.is_null() || ty.is_void() {
            Value::PeerNull
        } else {
            value.clone()
        };
        let handle = cx.refs.append(stored);
        trace!("deferred result stored as #{}", handle);
    }

    fn write_coerced(&mut self, cx: &mut WriteContext<'_>, value: &Value, target: &NativeType) {
        let decoded;
        let value = match value {
            Value::PeerString(s) => {
                decoded = Value::string(s.decode());
                &decoded
            }
            other => other,
        };

        match target {
            NativeType::Primitive(Primitive::Boolean) => {
                let truth = match value {
                    Value::Boolean(b) => *b,
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    Value::Bytes(b) => !b.is_empty(),
                    Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) | Value::Exact(_) => {
                        value.as_i64() != Some(0)
                    }
                    Value::Float(_) | Value::Double(_) => value.as_f64() != Some(0.0),
                    _ => true,
                };
                self.buf.append_bool(truth);
            }
            NativeType::Primitive(Primitive::Float | Primitive::Double) => {
                let number = if value.is_number() {
                    value.as_f64().unwrap_or(0.0)
                } else {
                    value.display_string().trim().parse().unwrap_or(0.0)
                };
                self.buf.append_double(number);
            }
            NativeType::Primitive(Primitive::Char) => self.write_text(cx, &value.display_string()),
            NativeType::Primitive(Primitive::Void) => self.write_void(true),
            NativeType::Primitive(_) => {
                let number = if value.is_number() {
                    value.as_i64().unwrap_or(0)
                } else {
                    value.display_string().trim().parse().unwrap_or(0)
                };
                self.buf.append_long(number);
            }
            ty if ty.is_class(names::STRING) => match value {
                Value::Bytes(b) => self.buf.append_string(b),
                other => self.write_text(cx, &other.display_string()),
            },
            _ => match value {
                Value::Null => self.buf.append(b"<N />"),
                other => self.write_object(cx, other, true),
            },
        }
    }

    /// Array-values writer: scalars as values, containers expanded.
    fn write_values(&mut self, cx: &mut WriteContext<'_>, value: &Value) {
        match value {
            Value::Null => self.buf.append(b"<N />"),
            Value::Bytes(b) => self.buf.append_string(b),
            Value::PeerString(s) => self.buf.append_string(s.bytes()),
            Value::String(s) => self.write_text(cx, s),
            Value::Char(c) => self.write_text(cx, &c.to_string()),
            Value::Byte(_) | Value::Short(_) | Value::Int(_) | Value::Long(_) | Value::Exact(_) => {
                self.buf.append_long(value.as_i64().unwrap_or(0))
            }
            Value::Float(_) | Value::Double(_) => self.buf.append_double(value.as_f64().unwrap_or(0.0)),
            Value::Boolean(b) => self.buf.append_bool(*b),
            other => {
                if !self.write_composite(cx, other, Element::Values) {
                    self.write_object(cx, other, true);
                }
            }
        }
    }

    /// Array-value writer leaves: only nulls, peer strings and exact
    /// numbers are written as values.
    fn write_leaf(&mut self, cx: &mut WriteContext<'_>, value: &Value) {
        match value {
            Value::Null => self.buf.append(b"<N />"),
            Value::PeerString(s) => self.buf.append_string(s.bytes()),
            Value::Exact(v) => self.buf.append_long(*v),
            other => self.write_object(cx, other, true),
        }
    }

    fn write_element(&mut self, cx: &mut WriteContext<'_>, value: &Value, element: Element) {
        match element {
            Element::Values => self.write_values(cx, value),
            Element::Leaf => self.write_leaf(cx, value),
        }
    }

    /// Expand arrays, lists and maps. Returns false for anything else.
    fn write_composite(&mut self, cx: &mut WriteContext<'_>, value: &Value, element: Element) -> bool {
        match value {
            Value::Array(array) => {
                self.buf.append(b"<X t=\"A\">");
                for item in &array.items {
                    self.buf.append(b"<P>");
                    self.write_element(cx, item, element);
                    self.buf.append(b"</P>");
                }
                self.buf.append(b"</X>");
            }
            Value::Bytes(bytes) => {
                self.buf.append(b"<X t=\"A\">");
                for &b in bytes.iter() {
                    self.buf.append(b"<P>");
                    self.write_element(cx, &Value::Byte(b as i8), element);
                    self.buf.append(b"</P>");
                }
                self.buf.append(b"</X>");
            }
            Value::Composite(map) => {
                self.buf.append(b"<X t=\"H\">");
                for (key, item) in map.iter() {
                    match key {
                        ArrayKey::Int(i) => self.write_int_key(*i),
                        ArrayKey::Str(s) => self.write_str_key(cx, s),
                    }
                    self.write_element(cx, item, element);
                    self.buf.append(b"</P>");
                }
                self.buf.append(b"</X>");
            }
            Value::Object(_) => {
                if let Some(map) = value.as_object::<MapObject>() {
                    self.buf.append(b"<X t=\"H\">");
                    for (key, item) in map.snapshot() {
                        match &key {
                            Value::Float(_) | Value::Double(_) => {
                                self.write_str_key(cx, &key.display_string())
                            }
                            k if k.is_number() => self.write_int_key(k.as_i64().unwrap_or(0)),
                            other => self.write_str_key(cx, &other.display_string()),
                        }
                        self.write_element(cx, &item, element);
                        self.buf.append(b"</P>");
                    }
                    self.buf.append(b"</X>");
                } else if let Some(list) = value.as_object::<ListObject>() {
                    self.buf.append(b"<X t=\"H\">");
                    for (i, item) in list.snapshot().iter().enumerate() {
                        self.write_int_key(i as i64);
                        self.write_element(cx, item, element);
                        self.buf.append(b"</P>");
                    }
                    self.buf.append(b"</X>");
                } else {
                    return false;
                }
            }
            _ => return false,
        }
        true
    }

    fn write_int_key(&mut self, key: i64) {
        self.buf.append(b"<P t=\"N\" v=\"");
        if key < 0 {
            self.buf.append(b"-");
        }
        self.buf.append_hex(key.unsigned_abs());
        self.buf.append(b"\">");
    }

    fn write_str_key(&mut self, cx: &WriteContext<'_>, key: &str) {
        self.buf.append(b"<P t=\"S\" v=\"");
        self.buf.append_quoted(&cx.options.encoding.encode(key));
        self.buf.append(b"\">");
    }

    fn write_text(&mut self, cx: &WriteContext<'_>, text: &str) {
        self.buf.append_string(&cx.options.encoding.encode(text));
    }

    fn write_void(&mut self, declared: bool) {
        self.buf.append(if declared { b"<V n=\"T\"/>" } else { b"<V n=\"F\"/>" });
    }

    /// `<O v="handle" m="class" p="kind" n="declared"/>`, or `<N />`.
    fn write_object(&mut self, cx: &mut WriteContext<'_>, value: &Value, declared: bool) {
        let Some(ty) = value.runtime_type() else {
            self.buf.append(b"<N />");
            return;
        };
        let (class, kind): (String, &[u8]) = match value {
            Value::Class(own) => (own.to_string(), b"O"),
            _ => (ty.to_string(), object_kind(cx.registry, value, &ty)),
        };
        let handle = cx.refs.append(value.clone());
        self.buf.append(b"<O v=\"");
        self.buf.append_hex(handle as u64);
        self.buf.append(b"\" m=\"");
        self.buf.append(class.as_bytes());
        self.buf.append(b"\" p=\"");
        self.buf.append(kind);
        self.buf.append(if declared { b"\" n=\"T\"/>" } else { b"\" n=\"F\"/>" });
    }
}

/// `A` for arrays, lists and maps, `C` for other collections, `E` for
/// errors, `O` for everything else.
fn object_kind(registry: &Registry, value: &Value, ty: &NativeType) -> &'static [u8] {
    match value {
        Value::Array(_) | Value::Bytes(_) | Value::Composite(_) => return b"A",
        Value::Error(_) => return b"E",
        _ => {}
    }
    let is = |class: &str| registry.is_assignable(&NativeType::class(class), ty);
    if is(names::LIST) || is(names::MAP) {
        b"A"
    } else if is(names::COLLECTION) {
        b"C"
    } else if is(exceptions::THROWABLE) {
        b"E"
    } else {
        b"O"
    }
}

/// Mark an error that the called method did not declare.
fn wrap_undeclared(cx: &mut WriteContext<'_>, error: Arc<Throwable>, declared: bool) -> Arc<Throwable> {
    if declared || cx.options.prefer_values {
        return error;
    }
    cx.errors.record_async(error.clone());
    warn!(
        "Undeclared native error detected: {}. Declare the error in the method signature or \
         check the last error from the peer after each call.",
        error
    );
    let mut wrapped = Throwable::new(exceptions::UNDECLARED, error.message.clone());
    wrapped.trace = error.trace.clone();
    Arc::new(wrapped.with_cause(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TextEncoding;
    use crate::types::{NativeArray, PeerArray, PeerString};

    struct Fixture {
        refs: ReferenceTable,
        registry: Arc<Registry>,
        options: BridgeOptions,
        errors: LastErrors,
        response: Response,
    }

    impl Fixture {
        fn new(options: BridgeOptions) -> Self {
            Self {
                refs: ReferenceTable::new(),
                registry: Registry::with_builtins(),
                options,
                errors: LastErrors::default(),
                response: Response::new(options.base64_data),
            }
        }

        fn result(&mut self, value: Value, ty: NativeType, declared: bool) -> String {
            let mut cx = WriteContext {
                refs: &mut self.refs,
                registry: &self.registry,
                options: self.options,
                errors: &mut self.errors,
            };
            self.response.set_result(&mut cx, &value, &ty, declared);
            self.take()
        }

        fn exception(&mut self, error: Throwable, declared: bool) -> String {
            let mut cx = WriteContext {
                refs: &mut self.refs,
                registry: &self.registry,
                options: self.options,
                errors: &mut self.errors,
            };
            self.response.set_result_exception(&mut cx, Arc::new(error), declared);
            self.take()
        }

        fn take(&mut self) -> String {
            let mut out = Vec::new();
            self.response.flush(&mut out).unwrap();
            String::from_utf8(out).unwrap()
        }
    }

    fn values() -> BridgeOptions {
        BridgeOptions {
            prefer_values: true,
            ..BridgeOptions::default()
        }
    }

    #[test]
    fn test_object_writer_uses_handles() {
        let mut f = Fixture::new(BridgeOptions::default());
        assert_eq!(
            f.result(Value::string("x"), NativeType::string(), false),
            r#"<O v="1" m="String" p="O" n="F"/>"#
        );
        assert_eq!(f.result(Value::Null, NativeType::object(), true), r#"<O v="2" m="PeerNull" p="O" n="T"/>"#);
        assert_eq!(f.refs.get(2).unwrap(), &Value::PeerNull);
        assert_eq!(f.result(Value::Null, NativeType::VOID, false), r#"<V n="F"/>"#);
    }

    #[test]
    fn test_object_kinds() {
        let mut f = Fixture::new(BridgeOptions::default());
        let list = Value::object(ListObject::new("ArrayList", vec![]));
        assert!(f.result(list, NativeType::object(), true).contains(r#"p="A""#));
        let class = Value::Class(NativeType::class("HashMap"));
        assert!(f
            .result(class, NativeType::object(), true)
            .contains(r#"m="HashMap" p="O""#));
    }

    #[test]
    fn test_value_writer() {
        let mut f = Fixture::new(values());
        assert_eq!(f.result(Value::Int(-3), NativeType::INT, false), r#"<L v="3" p="A"/>"#);
        assert_eq!(f.result(Value::Long(10), NativeType::LONG, false), r#"<L v="a" p="O"/>"#);
        assert_eq!(f.result(Value::Boolean(true), NativeType::BOOLEAN, false), r#"<B v="T"/>"#);
        assert_eq!(f.result(Value::Double(0.5), NativeType::DOUBLE, false), r#"<D v="0.5"/>"#);
        assert_eq!(f.result(Value::Null, NativeType::VOID, false), r#"<V n="T"/>"#);
        let peer = Value::PeerString(PeerString::new(b"abc".to_vec(), TextEncoding::Utf8));
        assert_eq!(f.result(peer, NativeType::object(), false), r#"<S v="abc"/>"#);
        assert_eq!(f.result(Value::Null, NativeType::object(), false), "<N />");
    }

    #[test]
    fn test_async_writer_stores_without_writing() {
        let mut f = Fixture::new(BridgeOptions::default());
        f.response.set_writer(WriterMode::Async);
        assert_eq!(f.result(Value::Int(1), NativeType::INT, false), "");
        f.response.set_writer(WriterMode::Async);
        assert_eq!(f.result(Value::Null, NativeType::VOID, false), "");
        assert_eq!(f.refs.len(), 2);
        assert_eq!(f.refs.get(2).unwrap(), &Value::PeerNull);
        assert_eq!(f.response.writer(), &WriterMode::Default);
    }

    #[test]
    fn test_async_void_writer_writes_nothing() {
        let mut f = Fixture::new(BridgeOptions::default());
        f.response.set_writer(WriterMode::AsyncVoid);
        assert_eq!(f.result(Value::Int(1), NativeType::INT, false), "");
        assert!(f.refs.is_empty());
    }

    #[test]
    fn test_coerce_writer() {
        let mut f = Fixture::new(BridgeOptions::default());
        f.response.set_writer(WriterMode::Coerce(NativeType::BOOLEAN));
        assert_eq!(f.result(Value::string(""), NativeType::object(), false), r#"<B v="F"/>"#);
        f.response.set_writer(WriterMode::Coerce(NativeType::LONG));
        assert_eq!(f.result(Value::string("12"), NativeType::object(), false), r#"<L v="c" p="O"/>"#);
        f.response.set_writer(WriterMode::Coerce(NativeType::LONG));
        assert_eq!(f.result(Value::string("x"), NativeType::object(), false), r#"<L v="0" p="O"/>"#);
        f.response.set_writer(WriterMode::Coerce(NativeType::string()));
        assert_eq!(f.result(Value::Int(7), NativeType::INT, false), r#"<S v="7"/>"#);
        f.response.set_writer(WriterMode::Coerce(NativeType::string()));
        assert_eq!(f.result(Value::Null, NativeType::object(), false), r#"<S v="null"/>"#);
    }

    #[test]
    fn test_array_values_writer_expands_containers() {
        let mut f = Fixture::new(BridgeOptions::default());
        let inner = Value::Array(Arc::new(NativeArray {
            component: NativeType::INT,
            items: vec![Value::Int(1), Value::Int(2)],
        }));
        let mut map = PeerArray::new();
        map.insert(ArrayKey::Str("k".into()), inner);
        map.insert(ArrayKey::Int(3), Value::Boolean(false));
        f.response.set_writer(WriterMode::ArrayValues);
        assert_eq!(
            f.result(Value::composite(map), NativeType::object(), false),
            concat!(
                r#"<X t="H"><P t="S" v="k"><X t="A"><P><L v="1" p="O"/></P><P><L v="2" p="O"/></P></X></P>"#,
                r#"<P t="N" v="3"><B v="F"/></P></X>"#
            )
        );
    }

    #[test]
    fn test_array_value_writer_wraps_scalars() {
        let mut f = Fixture::new(BridgeOptions::default());
        f.response.set_writer(WriterMode::ArrayValue);
        assert_eq!(
            f.result(Value::Exact(5), NativeType::object(), false),
            r#"<X t="A"><P><L v="5" p="O"/></P></X>"#
        );
    }

    #[test]
    fn test_declared_exception_is_not_wrapped() {
        let mut f = Fixture::new(BridgeOptions::default());
        let out = f.exception(Throwable::new("IllegalStateException", "bad"), true);
        assert_eq!(out, r#"<E v="1" m="T"/>"#);
        assert!(f.errors.last_async.is_none());
        assert!(matches!(f.refs.get(1).unwrap(), Value::Error(t) if &*t.class == "IllegalStateException"));
    }

    #[test]
    fn test_undeclared_exception_is_wrapped_and_remembered() {
        let mut f = Fixture::new(BridgeOptions::default());
        let out = f.exception(Throwable::new("RuntimeException", "oops"), false);
        assert_eq!(out, r#"<E v="1" m="F"/>"#);
        let Value::Error(wrapped) = f.refs.get(1).unwrap() else {
            panic!("expected error");
        };
        assert_eq!(&*wrapped.class, exceptions::UNDECLARED);
        assert_eq!(wrapped.message, "oops");
        assert_eq!(&*wrapped.cause.as_ref().unwrap().class, "RuntimeException");
        assert_eq!(f.errors.last_async.as_ref().unwrap().message, "oops");
    }

    #[test]
    fn test_prefer_values_passes_errors_through() {
        let mut f = Fixture::new(values());
        f.exception(Throwable::new("RuntimeException", "oops"), false);
        assert!(f.errors.last_async.is_none());
        assert!(matches!(f.refs.get(1).unwrap(), Value::Error(t) if &*t.class == "RuntimeException"));
    }

    #[test]
    fn test_finish_flags() {
        let mut f = Fixture::new(BridgeOptions::default());
        let cx = WriteContext {
            refs: &mut f.refs,
            registry: &f.registry,
            options: f.options,
            errors: &mut f.errors,
        };
        f.response.set_finish(&cx, true);
        assert_eq!(f.response.as_bytes(), br#"<F p="A"/>"#);

        f.response.reset();
        f.response.recycle(true);
        f.response.set_finish(&cx, false);
        assert_eq!(f.response.as_bytes(), br#"<F p="e"/>"#);
    }

    #[test]
    fn test_procedure_packet() {
        let mut f = Fixture::new(BridgeOptions::default());
        let mut cx = WriteContext {
            refs: &mut f.refs,
            registry: &f.registry,
            options: f.options,
            errors: &mut f.errors,
        };
        f.response
            .set_result_procedure(&mut cx, 0x12, "call", "run", &[Value::Null, Value::Int(2)])
            .unwrap();
        assert_eq!(
            f.response.as_bytes(),
            br#"<A v="12" p="call" m="run" n="2"><P><N /></P><P><O v="1" m="Integer" p="O" n="T"/></P></A>"#
        );
    }

    #[test]
    fn test_procedure_rejected_in_stream_mode() {
        let mut f = Fixture::new(BridgeOptions::default());
        let mut cx = WriteContext {
            refs: &mut f.refs,
            registry: &f.registry,
            options: f.options,
            errors: &mut f.errors,
        };
        f.response.set_writer(WriterMode::AsyncVoid);
        let err = f.response.set_result_procedure(&mut cx, 1, "f", "f", &[]).unwrap_err();
        assert!(err.to_string().contains("callbacks not allowed in stream mode"));
    }

    #[test]
    fn test_nested_restores_writer() {
        let mut f = Fixture::new(BridgeOptions::default());
        f.response.set_writer(WriterMode::Async);
        let saved = f.response.enter_nested();
        assert_eq!(f.response.writer(), &WriterMode::Default);
        f.response.restore(saved);
        assert_eq!(f.response.writer(), &WriterMode::Async);
    }
}
