//! One peer connection: read a request, run it, write the reply.
//!
//! A [`Bridge`] owns everything scoped to a connection: the reference
//! table, the lookup caches, the last-error slots and the reply buffer. It
//! runs on a single thread. Callbacks into the peer are nested exchanges on
//! the same stream, so a native body that calls the peer re-enters the
//! dispatcher on this thread until the peer answers with `R`.

mod context;
mod dispatch;
mod invoke;
mod root;

pub use context::{CallContext, Session};
pub use root::{register_root, BridgeRoot};

use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing::{debug, error};

use crate::cache::{ConstructorCache, MethodCache, StringCache};
use crate::config::PoolConfig;
use crate::error::{Fault, Result};
use crate::pool::ResourceGroup;
use crate::protocol::{
    BridgeOptions, LastErrors, Parser, PendingCall, RequestBuilder, Response, Status, WriteContext,
};
use crate::refs::ReferenceTable;
use crate::registry::Registry;
use crate::types::Value;

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// The peer sent a liveness probe and was answered.
    Ping,
    /// The stream ended between requests.
    Eof,
    IoError,
    /// The peer finished the connection with `F`.
    Finished,
    /// The peer gave up while a callback was outstanding.
    Aborted,
    ProtocolError(String),
    Exhausted(String),
}

pub struct Bridge {
    registry: Arc<Registry>,
    parser: Parser<Box<dyn BufRead + Send>>,
    out: Box<dyn Write + Send>,
    options: BridgeOptions,
    refs: ReferenceTable,
    methods: MethodCache,
    constructors: ConstructorCache,
    strings: StringCache,
    errors: LastErrors,
    response: Response,
    root: Value,
    /// Resource group used when the bridge does not run on a pool worker.
    group: Option<ResourceGroup>,
    depth: usize,
}

impl Bridge {
    pub fn new(
        registry: Arc<Registry>,
        reader: impl BufRead + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        let options = BridgeOptions::default();
        Self {
            registry,
            parser: Parser::new(Box::new(reader)),
            out: Box::new(writer),
            options,
            refs: ReferenceTable::new(),
            methods: MethodCache::new(),
            constructors: ConstructorCache::new(),
            strings: StringCache::new(),
            errors: LastErrors::default(),
            response: Response::new(options.base64_data),
            root: Value::object(BridgeRoot),
            group: None,
            depth: 0,
        }
    }

    pub fn options(&self) -> BridgeOptions {
        self.options
    }

    pub fn refs(&self) -> &ReferenceTable {
        &self.refs
    }

    /// Serve the connection until the peer finishes it or the stream fails.
    pub fn run(&mut self) -> Exit {
        let exit = self.serve();
        if let Some(group) = self.group.take() {
            group.destroy(PoolConfig::GROUP_DESTROY_TIMEOUT);
        }
        debug!("Connection closed: {:?}", exit);
        exit
    }

    fn serve(&mut self) -> Exit {
        let (status, options) = match self.parser.read_header() {
            Ok(header) => header,
            Err(e) => {
                error!("Invalid connection header: {}", e);
                return Exit::ProtocolError(e.to_string());
            }
        };
        match status {
            Status::Ok => {}
            Status::Ping => return self.answer_ping(),
            Status::Eof => return Exit::Eof,
            Status::IoError => return Exit::IoError,
        }
        self.options = options;
        self.response.set_base64(options.base64_data);

        loop {
            if let Some(exit) = self.handle_request() {
                return exit;
            }
        }
    }

    fn answer_ping(&mut self) -> Exit {
        match self.out.write_all(&[0]).and_then(|_| self.out.flush()) {
            Ok(()) => Exit::Ping,
            Err(e) => {
                debug!("Cannot answer ping: {}", e);
                Exit::IoError
            }
        }
    }

    /// Run one top-level request. `Some` ends the connection.
    fn handle_request(&mut self) -> Option<Exit> {
        let (status, call) = match self.parse_request() {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("Protocol error: {}", e);
                return Some(Exit::ProtocolError(e.to_string()));
            }
        };
        match status {
            Status::Ok => {}
            Status::Eof => return Some(Exit::Eof),
            Status::IoError | Status::Ping => return Some(Exit::IoError),
        }

        if call.kind == b'F' {
            return self.finish(call.predicate == b'A');
        }
        match self.dispatch(call) {
            Ok(()) => None,
            Err(Fault::Abort) => Some(Exit::Aborted),
            Err(Fault::Protocol(m)) => {
                error!("Protocol error: {}", m);
                Some(Exit::ProtocolError(m))
            }
            Err(Fault::Exhausted(m)) => {
                error!("Resource exhausted: {}", m);
                Some(Exit::Exhausted(m))
            }
            Err(Fault::Thrown(t)) => {
                error!("Unreported error escaped dispatch: {}", t);
                None
            }
        }
    }

    fn parse_request(&mut self) -> Result<(Status, PendingCall)> {
        let mut builder = RequestBuilder::new(
            &mut self.refs,
            &mut self.strings,
            self.options.encoding,
            &self.root,
        )
        .with_context_ids(self.options.pass_context);
        let status = self.parser.parse(&mut builder)?;
        let call = builder.finish();
        match call.context_id {
            Some(id) => debug!("{:>width$}--> [{:x}] {}", "", id, call.summary(), width = self.depth),
            None if status == Status::Ok => {
                debug!("{:>width$}--> {}", "", call.summary(), width = self.depth)
            }
            None => {}
        }
        Ok((status, call))
    }

    /// Answer `F`. Keep-alive replaces the connection state and waits for
    /// the next exchange on the same stream.
    fn finish(&mut self, keep_alive: bool) -> Option<Exit> {
        if keep_alive {
            self.recycle();
            if crate::pool::set_current_persistent() {
                debug!("Connection now runs on a dedicated thread");
            }
        }
        self.respond(|response, cx| response.set_finish(cx, keep_alive));
        if let Err(e) = self.response.flush(&mut *self.out) {
            debug!("Cannot send finish packet: {}", e);
            return Some(Exit::IoError);
        }
        if keep_alive {
            None
        } else {
            Some(Exit::Finished)
        }
    }

    fn recycle(&mut self) {
        let had_async = self.errors.last_async.is_some();
        self.refs = ReferenceTable::new();
        self.methods = MethodCache::new();
        self.constructors = ConstructorCache::new();
        self.strings = StringCache::new();
        self.errors.clear();
        self.response.recycle(had_async);
    }

    /// Send the reply built by the last request.
    fn flush(&mut self) -> std::result::Result<(), Fault> {
        self.response.flush(&mut *self.out).map_err(|e| {
            debug!("Cannot send reply: {}", e);
            Fault::Abort
        })
    }

    /// Run `f` on the reply buffer with the connection state it writes
    /// through.
    fn respond<T>(&mut self, f: impl FnOnce(&mut Response, &mut WriteContext<'_>) -> T) -> T {
        let mut cx = WriteContext {
            refs: &mut self.refs,
            registry: &self.registry,
            options: self.options,
            errors: &mut self.errors,
        };
        f(&mut self.response, &mut cx)
    }

    fn resource_group(&mut self) -> ResourceGroup {
        if let Some(group) = crate::pool::current_group() {
            return group;
        }
        self.group
            .get_or_insert_with(|| ResourceGroup::new("bridge"))
            .clone()
    }
}
