//! Routing of parsed requests to the invocation paths.

use std::sync::Arc;

use tracing::debug;

use super::Bridge;
use crate::error::{BridgeError, Fault};
use crate::protocol::{CallTarget, PendingCall, WriterMode};
use crate::refs::Handle;
use crate::types::{exceptions, Throwable, Value};

fn bad_predicate(kind: u8, predicate: u8) -> Fault {
    Fault::Protocol(format!(
        "invalid predicate {:?} for <{}>",
        predicate as char, kind as char
    ))
}

impl Bridge {
    /// Run one request and send its reply.
    pub(super) fn dispatch(&mut self, call: PendingCall) -> Result<(), Fault> {
        let PendingCall {
            kind,
            predicate,
            target,
            method,
            args,
            unresolved,
            ..
        } = call;

        match kind {
            b'I' => {
                let property = match predicate {
                    b'P' => true,
                    b'I' => false,
                    other => return Err(bad_predicate(kind, other)),
                };
                self.call_on(target, &method, args, unresolved, property)?;
            }
            b'G' | b'Y' => {
                self.select_reply_style(kind, predicate)?;
                self.call_on(target, &method, args, unresolved, kind == b'G')?;
            }
            b'C' => {
                let instantiate = match predicate {
                    b'I' => true,
                    b'C' => false,
                    other => return Err(bad_predicate(kind, other)),
                };
                self.create(target, args, unresolved, instantiate)?;
            }
            b'H' | b'K' => {
                self.select_reply_style(kind, predicate)?;
                self.create(target, args, unresolved, kind == b'K')?;
            }
            b'R' => {
                let error = Arc::new(Throwable::new(
                    exceptions::ILLEGAL_STATE,
                    "peer callback returned outside of a callback",
                ));
                self.errors.record(error.clone());
                self.respond(|response, cx| response.set_result_exception(cx, error, true));
            }
            other => {
                return Err(Fault::Protocol(format!(
                    "unexpected request <{}>",
                    other as char
                )))
            }
        }
        self.flush()
    }

    /// Writer for the compact request forms: `1` replies as usual, `2`
    /// sends nothing and keeps errors for later, `3` also forbids
    /// callbacks.
    fn select_reply_style(&mut self, kind: u8, predicate: u8) -> Result<(), Fault> {
        match predicate {
            b'1' => {}
            b'2' => self.response.set_writer(WriterMode::Async),
            b'3' => self.response.set_writer(WriterMode::AsyncVoid),
            other => return Err(bad_predicate(kind, other)),
        }
        Ok(())
    }

    fn call_on(
        &mut self,
        target: CallTarget,
        method: &str,
        args: Vec<Value>,
        unresolved: Option<Handle>,
        property: bool,
    ) -> Result<(), Fault> {
        if let Some(handle) = unresolved {
            self.report_released(handle);
            return Ok(());
        }
        let CallTarget::Value(target) = target else {
            return Err(Fault::Protocol("call without a receiver".to_string()));
        };
        if property {
            self.get_set_property(target, method, args)
        } else {
            self.invoke(target, method, args)
        }
    }

    fn create(
        &mut self,
        target: CallTarget,
        args: Vec<Value>,
        unresolved: Option<Handle>,
        instantiate: bool,
    ) -> Result<(), Fault> {
        if let Some(handle) = unresolved {
            self.report_released(handle);
            return Ok(());
        }
        let CallTarget::Class(class) = target else {
            return Err(Fault::Protocol("creation without a class name".to_string()));
        };
        self.create_object(&class, args, instantiate)
    }

    /// The request named a handle the peer already released.
    fn report_released(&mut self, handle: Handle) {
        debug!("Request refers to released handle #{}", handle);
        let error = Arc::new(BridgeError::HandleReleased { handle }.to_throwable());
        self.errors.record(error.clone());
        self.respond(|response, cx| response.set_result_exception(cx, error, true));
    }
}
