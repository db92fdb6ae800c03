//! End-to-end exchanges over an in-memory stream.

use std::any::Any;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use javabridge_core::cache::StringCache;
use javabridge_core::protocol::{Parser, RequestBuilder, Status};
use javabridge_core::registry::args;
use javabridge_core::types::names;
use javabridge_core::{
    Bridge, Exit, Fault, NativeObject, NativeType, ReferenceTable, Registry, TextEncoding, Value,
};
use tracing_test::traced_test;

#[derive(Debug, Default)]
struct Counter {
    hits: AtomicI64,
}

impl NativeObject for Counter {
    fn class_name(&self) -> &str {
        "Counter"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn registry() -> Arc<Registry> {
    let mut b = Registry::builder().with_builtins();
    b.class("Counter")
        .constructor(&[], |_, _| Ok(Value::object(Counter::default())))
        .method("increment", &[], NativeType::VOID, |_, this, _| {
            args::receiver::<Counter>(this)?
                .hits
                .fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
        .method("value", &[], NativeType::LONG, |_, this, _| {
            let hits = args::receiver::<Counter>(this)?.hits.load(Ordering::SeqCst);
            Ok(Value::Long(hits))
        })
        .method("ask", &[NativeType::object()], NativeType::LONG, |ctx, _, a| {
            ctx.invoke(&args::value(&a, 0), "compute", Vec::new())
        })
        .method(
            "runTask",
            &[NativeType::class(names::RUNNABLE)],
            NativeType::VOID,
            |ctx, _, a| {
                ctx.invoke(&args::value(&a, 0), "run", Vec::new())?;
                Ok(Value::Null)
            },
        )
        .method("fail", &[], NativeType::VOID, |_, _, _| {
            Err(Fault::illegal_argument("counter is broken"))
        })
        .register();
    b.build()
}

#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Session {
    bridge: Bridge,
    exit: Exit,
    out: String,
}

fn exchange(header: &[u8], requests: &str) -> Session {
    let mut input = header.to_vec();
    input.extend_from_slice(requests.as_bytes());
    let sink = Sink::default();
    let mut bridge = Bridge::new(registry(), Cursor::new(input), sink.clone());
    let exit = bridge.run();
    let out = String::from_utf8_lossy(&sink.0.lock().unwrap()).into_owned();
    Session { bridge, exit, out }
}

/// Prefer values, no base64, default encoding.
const VALUES: &[u8] = &[0x81];

const NEW_COUNTER: &str = r#"<C v="Counter" p="I"></C>"#;
const COUNTER_REPLY: &str = r#"<O v="1" m="Counter" p="O" n="T"/>"#;

#[test]
fn test_ping_is_answered_with_zero_byte() {
    let session = exchange(&[0], "");
    assert_eq!(session.exit, Exit::Ping);
    assert_eq!(session.out.as_bytes(), &[0]);
}

#[test]
fn test_create_and_invoke() {
    let session = exchange(
        VALUES,
        &format!(
            r#"{}<I v="1" m="increment" p="I"></I><I v="1" m="value" p="I"></I><F p="E"/>"#,
            NEW_COUNTER
        ),
    );
    assert_eq!(session.exit, Exit::Finished);
    assert_eq!(
        session.out,
        format!(r#"{}<V n="T"/><L v="1" p="O"/><F p="E"/>"#, COUNTER_REPLY)
    );
}

#[test]
fn test_void_reply_style_writes_nothing() {
    let session = exchange(
        VALUES,
        &format!(
            r#"{}<Y p="3" v="1" m="increment"></Y><I v="1" m="value" p="I"></I>"#,
            NEW_COUNTER
        ),
    );
    assert_eq!(session.exit, Exit::Eof);
    assert_eq!(session.out, format!(r#"{}<L v="1" p="O"/>"#, COUNTER_REPLY));
    assert_eq!(session.bridge.refs().len(), 1);
}

#[test]
fn test_deferred_reply_style_stores_result() {
    let session = exchange(
        VALUES,
        &format!(r#"{}<Y p="2" v="1" m="value"></Y>"#, NEW_COUNTER),
    );
    assert_eq!(session.out, COUNTER_REPLY);
    // The deferred result took the next handle.
    assert_eq!(session.bridge.refs().len(), 2);
    assert_eq!(session.bridge.refs().peek_next_handle(), 3);
}

#[test]
fn test_callback_result_resumes_outer_call() {
    let session = exchange(
        VALUES,
        &format!(
            concat!(
                "{}",
                r#"<I v="0" m="makeClosure" p="I"><L v="5" p="O"/></I>"#,
                r#"<I v="1" m="ask" p="I"><O v="2"/></I>"#,
                r#"<R><L v="2a" p="O"/></R>"#,
                r#"<F p="E"/>"#
            ),
            NEW_COUNTER
        ),
    );
    assert_eq!(session.exit, Exit::Finished);
    assert!(session.out.contains(
        r#"<A v="5" p="compute" m="compute" n="0"></A><L v="2a" p="O"/><F p="E"/>"#
    ));
}

#[test]
fn test_typed_closure_uses_peer_name() {
    let session = exchange(
        VALUES,
        concat!(
            r#"<C v="Runnable" p="C"></C>"#,
            r#"<I v="0" m="makeClosure" p="I"><L v="5" p="O"/><S v="myRun"/><O v="1"/></I>"#,
            r#"<C v="Counter" p="I"></C>"#,
            r#"<I v="3" m="runTask" p="I"><O v="2"/></I>"#,
            r#"<R><N/></R>"#,
        ),
    );
    assert!(session.out.starts_with(r#"<O v="1" m="Runnable" p="O" n="T"/>"#));
    assert!(session
        .out
        .ends_with(r#"<A v="5" p="myRun" m="run" n="0"></A><V n="T"/>"#));
}

#[test]
fn test_callback_error_fails_outer_call() {
    let session = exchange(
        VALUES,
        &format!(
            concat!(
                "{}",
                r#"<I v="0" m="makeClosure" p="I"><L v="5" p="O"/></I>"#,
                r#"<I v="1" m="ask" p="I"><O v="2"/></I>"#,
                r#"<R><E v="0" m="boom"/></R>"#,
                r#"<I v="0" m="castToString" p="I"><O v="3"/></I>"#,
            ),
            NEW_COUNTER
        ),
    );
    assert!(session.out.contains(r#"</A><E v="3" m="F"/>"#));
    assert!(session.out.contains("Invoke failed: [Counter]->ask("));
    assert!(session.out.contains("Cause: Exception: boom"));
}

#[test]
fn test_finish_during_callback_aborts() {
    let session = exchange(
        VALUES,
        &format!(
            concat!(
                "{}",
                r#"<I v="0" m="makeClosure" p="I"><L v="5" p="O"/></I>"#,
                r#"<I v="1" m="ask" p="I"><O v="2"/></I>"#,
                r#"<F p="E"/>"#,
            ),
            NEW_COUNTER
        ),
    );
    assert_eq!(session.exit, Exit::Aborted);
    assert!(session.out.ends_with(r#"</A><F p="E"/>"#));
}

#[test]
fn test_callbacks_rejected_in_void_style() {
    let session = exchange(
        VALUES,
        &format!(
            concat!(
                "{}",
                r#"<I v="0" m="makeClosure" p="I"><L v="5" p="O"/></I>"#,
                r#"<Y p="3" v="1" m="ask"><O v="2"/></Y>"#,
                r#"<I v="0" m="getLastException" p="I"></I>"#,
            ),
            NEW_COUNTER
        ),
    );
    assert!(!session.out.contains("<A "));
    assert!(session.out.ends_with(r#"<O v="3" m="Exception" p="E" n="T"/>"#));
}

#[test]
fn test_keep_alive_recycles_connection_state() {
    let mut header = vec![0x89, 10];
    header.extend_from_slice(b"ISO-8859-1");
    let session = exchange(
        &header,
        &format!(r#"{}<F p="A"/>{}<F p="E"/>"#, NEW_COUNTER, NEW_COUNTER),
    );
    assert_eq!(session.exit, Exit::Finished);
    assert_eq!(
        session.out,
        format!(r#"{}<F p="A"/>{}<F p="E"/>"#, COUNTER_REPLY, COUNTER_REPLY)
    );
    assert_eq!(session.bridge.options().encoding, TextEncoding::Latin1);
    assert_eq!(session.bridge.refs().len(), 1);
}

#[test]
fn test_released_handle_gets_error_reply() {
    let session = exchange(
        VALUES,
        &format!(r#"<I v="7" m="value" p="I"></I>{}"#, NEW_COUNTER),
    );
    assert_eq!(session.exit, Exit::Eof);
    assert_eq!(
        session.out,
        r#"<E v="1" m="T"/><O v="2" m="Counter" p="O" n="T"/>"#
    );
}

#[test]
fn test_unknown_method_reports_candidates() {
    let session = exchange(
        VALUES,
        &format!(
            r#"{}<I v="1" m="nope" p="I"></I><I v="0" m="castToString" p="I"><O v="2"/></I>"#,
            NEW_COUNTER
        ),
    );
    assert!(session.out.contains(r#"<E v="2" m="T"/>"#));
    assert!(session.out.contains("NoSuchMethodException: nope()"));
}

#[test]
fn test_unknown_class_reports_class_not_found() {
    let session = exchange(
        VALUES,
        r#"<C v="Nope" p="I"></C><I v="0" m="castToString" p="I"><O v="1"/></I>"#,
    );
    assert!(session.out.starts_with(r#"<E v="1" m="T"/>"#));
    assert!(session.out.contains("CreateInstance failed: new Nope()"));
    assert!(session
        .out
        .contains("Cause: ClassNotFoundException: Class not found: Nope"));
}

#[test]
fn test_return_outside_callback_is_an_error() {
    let session = exchange(VALUES, r#"<R></R>"#);
    assert_eq!(session.out, r#"<E v="1" m="T"/>"#);
}

#[test]
fn test_get_values_expands_composites() {
    let session = exchange(
        VALUES,
        r#"<I v="0" m="getValues" p="I"><X t="A"><P><S v="a"/></P><P><L v="2" p="O"/></P></X></I>"#,
    );
    assert_eq!(
        session.out,
        r#"<X t="H"><P t="N" v="0"><S v="a"/></P><P t="N" v="1"><L v="2" p="O"/></P></X>"#
    );
}

/// Composite structure with keys and leaves as text, in entry order.
#[derive(Debug, PartialEq)]
enum Shape {
    Leaf(String),
    Tree(Vec<(String, Shape)>),
}

fn shape(value: &Value) -> Shape {
    match value {
        Value::Composite(array) => Shape::Tree(
            array
                .iter()
                .map(|(k, v)| (k.to_value().display_string(), shape(v)))
                .collect(),
        ),
        other => Shape::Leaf(other.display_string()),
    }
}

/// Decode a reply fragment the way the peer's values come back in.
fn decode_reply(reply: &str) -> Value {
    let mut refs = ReferenceTable::new();
    let mut strings = StringCache::new();
    let root = Value::Null;
    let mut builder = RequestBuilder::new(&mut refs, &mut strings, TextEncoding::Utf8, &root);
    let mut parser = Parser::new(Cursor::new(reply.as_bytes().to_vec()));
    assert_eq!(parser.parse(&mut builder).unwrap(), Status::Ok);
    let mut call = builder.finish();
    assert_eq!(call.args.len(), 1);
    call.args.remove(0)
}

#[test]
fn test_nested_composite_round_trip() {
    let composite = concat!(
        r#"<X t="A">"#,
        r#"<P><X t="H">"#,
        r#"<P t="S" v="name"><S v="a"/></P>"#,
        r#"<P t="N" v="7"><X t="A"><P><L v="1" p="O"/></P><P><S v="b"/></P></X></P>"#,
        r#"</X></P>"#,
        r#"<P><X t="H">"#,
        r#"<P t="N" v="0"><S v="z"/></P>"#,
        r#"<P t="S" v="k"><L v="2" p="O"/></P>"#,
        r#"</X></P>"#,
        r#"</X>"#,
    );
    let sent = decode_reply(composite);
    let session = exchange(
        VALUES,
        &format!(r#"<I v="0" m="getValues" p="I">{}</I>"#, composite),
    );
    let received = decode_reply(&session.out);

    let expected = Shape::Tree(vec![
        (
            "0".to_string(),
            Shape::Tree(vec![
                ("name".to_string(), Shape::Leaf("a".to_string())),
                (
                    "7".to_string(),
                    Shape::Tree(vec![
                        ("0".to_string(), Shape::Leaf("1".to_string())),
                        ("1".to_string(), Shape::Leaf("b".to_string())),
                    ]),
                ),
            ]),
        ),
        (
            "1".to_string(),
            Shape::Tree(vec![
                ("0".to_string(), Shape::Leaf("z".to_string())),
                ("k".to_string(), Shape::Leaf("2".to_string())),
            ]),
        ),
    ]);
    assert_eq!(shape(&sent), expected);
    assert_eq!(shape(&received), expected);
}

#[test]
fn test_base64_text_replies() {
    let session = exchange(
        &[0x83],
        r#"<I v="0" m="castToString" p="I"><S v="abc"/></I>"#,
    );
    assert_eq!(session.out, "<S v=\"YWJj\n\"/>");
}

#[test]
#[traced_test]
fn test_undeclared_error_is_wrapped_and_flagged() {
    let session = exchange(
        b"",
        &format!(r#"{}<I v="1" m="fail" p="I"></I><F p="E"/>"#, NEW_COUNTER),
    );
    assert_eq!(
        session.out,
        r#"<O v="1" m="Counter" p="O" n="F"/><E v="2" m="F"/><F p="e"/>"#
    );
    assert!(logs_contain("Undeclared native error detected"));
}
