//! What a native body can see of the connection that called it.

use std::sync::Arc;

use super::Bridge;
use crate::cancel::CancellationToken;
use crate::error::Fault;
use crate::pool::ResourceGroup;
use crate::protocol::{BridgeOptions, TextEncoding, WriterMode};
use crate::registry::Registry;
use crate::types::{Closure, NativeType, Throwable, Value};

/// Connection services available to native code.
pub trait Session {
    fn registry(&self) -> &Arc<Registry>;
    fn options(&self) -> BridgeOptions;
    fn set_encoding(&mut self, encoding: TextEncoding);
    /// Writer for the reply to the current request.
    fn select_writer(&mut self, mode: WriterMode);
    fn last_exception(&self) -> Option<Arc<Throwable>>;
    fn clear_last_exception(&mut self);
    /// Call back into the peer and wait for its return value.
    fn call_peer(
        &mut self,
        closure: &Closure,
        method: &str,
        args: &[Value],
        ret: &NativeType,
    ) -> Result<Value, Fault>;
    /// Resolve and run a method the way a peer request would.
    fn invoke_value(&mut self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value, Fault>;
    /// Group that owns threads started on behalf of the current exchange.
    fn resource_group(&mut self) -> ResourceGroup;
}

/// Handle passed to every native method and constructor body.
pub struct CallContext<'a> {
    session: &'a mut dyn Session,
}

impl<'a> CallContext<'a> {
    pub fn new(session: &'a mut dyn Session) -> Self {
        Self { session }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.session.registry().clone()
    }

    pub fn options(&self) -> BridgeOptions {
        self.session.options()
    }

    /// Encoding used for peer text on this connection.
    pub fn encoding(&self) -> TextEncoding {
        self.session.options().encoding
    }

    pub fn set_encoding(&mut self, encoding: TextEncoding) {
        self.session.set_encoding(encoding);
    }

    pub fn select_writer(&mut self, mode: WriterMode) {
        self.session.select_writer(mode);
    }

    pub fn last_exception(&self) -> Option<Arc<Throwable>> {
        self.session.last_exception()
    }

    pub fn clear_last_exception(&mut self) {
        self.session.clear_last_exception();
    }

    pub fn call(
        &mut self,
        closure: &Closure,
        method: &str,
        args: &[Value],
        ret: &NativeType,
    ) -> Result<Value, Fault> {
        self.session.call_peer(closure, method, args, ret)
    }

    /// Call `method` on `target`. Closures forward to the peer.
    pub fn invoke(&mut self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        self.session.invoke_value(target, method, args)
    }

    /// Start a thread owned by the current exchange. It receives a token
    /// that is cancelled when the exchange ends.
    pub fn spawn<F>(&mut self, name: &str, work: F) -> Result<(), Fault>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        self.session.resource_group().spawn(name, work)?;
        Ok(())
    }
}

impl Session for Bridge {
    fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn options(&self) -> BridgeOptions {
        self.options
    }

    fn set_encoding(&mut self, encoding: TextEncoding) {
        self.options.encoding = encoding;
    }

    fn select_writer(&mut self, mode: WriterMode) {
        self.response.set_writer(mode);
    }

    fn last_exception(&self) -> Option<Arc<Throwable>> {
        self.errors.current()
    }

    fn clear_last_exception(&mut self) {
        self.errors.clear();
    }

    fn call_peer(
        &mut self,
        closure: &Closure,
        method: &str,
        args: &[Value],
        ret: &NativeType,
    ) -> Result<Value, Fault> {
        self.call_closure(closure, method, args, ret)
    }

    fn invoke_value(&mut self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value, Fault> {
        self.invoke_method(target, method, args)
            .map(|(value, _, _)| value)
            .map_err(|failure| failure.fault)
    }

    fn resource_group(&mut self) -> ResourceGroup {
        Bridge::resource_group(self)
    }
}
