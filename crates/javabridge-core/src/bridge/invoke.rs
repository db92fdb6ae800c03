//! Method calls, object creation, property access and peer callbacks.

use std::sync::Arc;

use tracing::{debug, trace};

use super::context::CallContext;
use super::Bridge;
use crate::cache::{ConstructorKey, MethodKey};
use crate::error::{BridgeError, Fault};
use crate::protocol::Status;
use crate::registry::{Candidate, FieldDescriptor, MethodDescriptor};
use crate::resolve::{Coercer, Resolver};
use crate::types::{exceptions, names, Closure, NativeType, Throwable, Value};

/// A failed call, with whether the callee declared the error it raised.
/// Errors raised before a callee is chosen count as declared.
pub(super) struct Failure {
    pub fault: Fault,
    pub declared: bool,
}

impl Failure {
    fn raised_by(declared: bool) -> impl FnOnce(Fault) -> Failure {
        move |fault| Failure { fault, declared }
    }
}

impl From<Fault> for Failure {
    fn from(fault: Fault) -> Self {
        Failure {
            fault,
            declared: true,
        }
    }
}

/// Value, declared type and error declaration of a finished call.
type Outcome = (Value, NativeType, bool);

fn describe_args(args: &[Value]) -> String {
    args.iter()
        .map(Value::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_receiver(target: &Value) -> String {
    match target {
        Value::Class(ty) => format!("class {}", ty),
        other => other
            .runtime_type()
            .map(|ty| ty.to_string())
            .unwrap_or_else(|| "null".to_string()),
    }
}

fn signatures<C: Candidate>(candidates: &[Arc<C>]) -> String {
    candidates
        .iter()
        .map(|c| c.signature())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Receiver type for member lookup and whether only statics apply.
fn owner_of(target: &Value) -> Option<(NativeType, bool)> {
    match target {
        Value::Class(ty) => Some((ty.clone(), true)),
        other => other.runtime_type().map(|ty| (ty, false)),
    }
}

impl Bridge {
    pub(super) fn invoke(&mut self, target: Value, name: &str, args: Vec<Value>) -> Result<(), Fault> {
        match self.invoke_method(&target, name, args.clone()) {
            Ok((value, ty, declared)) => {
                self.respond(|response, cx| response.set_result(cx, &value, &ty, declared));
                Ok(())
            }
            Err(failure) => self.report_failure("Invoke", Some(&target), name, &args, failure),
        }
    }

    pub(super) fn create_object(&mut self, class: &str, args: Vec<Value>, instantiate: bool) -> Result<(), Fault> {
        match self.construct(class, args.clone(), instantiate) {
            Ok((value, ty, declared)) => {
                self.respond(|response, cx| response.set_result(cx, &value, &ty, declared));
                Ok(())
            }
            Err(failure) => {
                let action = if instantiate { "CreateInstance" } else { "ReferenceClass" };
                self.report_failure(action, None, class, &args, failure)
            }
        }
    }

    pub(super) fn get_set_property(&mut self, target: Value, name: &str, args: Vec<Value>) -> Result<(), Fault> {
        match self.access_property(&target, name, args.clone()) {
            Ok((value, ty, declared)) => {
                self.respond(|response, cx| response.set_result(cx, &value, &ty, declared));
                Ok(())
            }
            Err(failure) => {
                let action = if args.is_empty() { "GetProperty" } else { "SetProperty" };
                self.report_failure(action, Some(&target), name, &args, failure)
            }
        }
    }

    /// Reply with a wrapped error, or pass an unwinding fault on.
    fn report_failure(
        &mut self,
        action: &str,
        target: Option<&Value>,
        name: &str,
        args: &[Value],
        failure: Failure,
    ) -> Result<(), Fault> {
        let cause = match failure.fault {
            Fault::Thrown(cause) => cause,
            unwinding => return Err(unwinding),
        };
        let subject = match target {
            Some(target) => format!("[{}]->{}", describe_receiver(target), name),
            None => format!("new {}", name),
        };
        let message = format!(
            "{} failed: {}({}). Cause: {}",
            action,
            subject,
            describe_args(args),
            cause
        );
        debug!("{}", message);
        let mut error = Throwable::new(exceptions::EXCEPTION, message);
        error.trace = cause.trace.clone();
        let error = Arc::new(error.with_cause(cause));
        self.errors.record(error.clone());
        self.respond(|response, cx| response.set_result_exception(cx, error, failure.declared));
        Ok(())
    }

    /// Resolve and run `name` on `target` without writing a reply.
    pub(super) fn invoke_method(&mut self, target: &Value, name: &str, args: Vec<Value>) -> Result<Outcome, Failure> {
        let Some((owner, is_static)) = owner_of(target) else {
            return Err(Fault::thrown(
                exceptions::NULL_POINTER,
                format!("cannot call \"{}()\" on a null object", name),
            )
            .into());
        };

        let key = MethodKey::for_call(name, &owner, is_static, &args);
        let method = match self.methods.get(&key) {
            Some(method) => method,
            None => {
                let mut candidates = self.registry.methods_named(&owner, name, is_static);
                if is_static {
                    let class = NativeType::class(names::CLASS);
                    candidates.extend(self.registry.methods_named(&class, name, false));
                }
                let matching: Vec<_> = candidates
                    .iter()
                    .filter(|m| m.params.len() == args.len())
                    .cloned()
                    .collect();
                let selection = Resolver::new(&self.registry).select(&matching, &args);
                match selection {
                    Some(selection) => {
                        self.methods.put(key, selection.selected.clone());
                        selection.selected
                    }
                    None => {
                        if let Value::Closure(closure) = target {
                            // Untyped closures accept any method name.
                            let closure = closure.clone();
                            return self
                                .call_closure(&closure, name, &args, &NativeType::object())
                                .map(|value| (value, NativeType::object(), false))
                                .map_err(Failure::raised_by(false));
                        }
                        return Err(Fault::thrown(
                            exceptions::NO_SUCH_METHOD,
                            format!(
                                "{}({}). Candidates: [{}]",
                                name,
                                describe_args(&args),
                                signatures(&candidates)
                            ),
                        )
                        .into());
                    }
                }
            }
        };
        trace!("Selected {}", method.signature());

        let args = Coercer::new(&self.registry, self.options.encoding).coerce_all(&method.params, args)?;
        let value = self
            .call_body(&method, target, args)
            .map_err(Failure::raised_by(method.declares_errors))?;
        Ok((value, method.return_type.clone(), method.declares_errors))
    }

    fn call_body(&mut self, method: &MethodDescriptor, target: &Value, args: Vec<Value>) -> Result<Value, Fault> {
        match (&method.body, target) {
            (Some(body), _) => {
                let body = body.clone();
                let mut ctx = CallContext::new(self);
                body(&mut ctx, target, args)
            }
            (None, Value::Closure(closure)) => {
                let closure = closure.clone();
                self.call_closure(&closure, &method.name, &args, &method.return_type)
            }
            (None, _) => Err(Fault::thrown(
                exceptions::ILLEGAL_STATE,
                format!("{} has no implementation", method.signature()),
            )),
        }
    }

    fn construct(&mut self, class: &str, args: Vec<Value>, instantiate: bool) -> Result<Outcome, Failure> {
        let ty = NativeType::parse(class);
        let known = match &ty {
            NativeType::Class(name) => self.registry.class(name).is_some(),
            _ => self.registry.type_exists(class),
        };
        if !known {
            return Err(Fault::from(BridgeError::ClassNotFound(class.to_string())).into());
        }

        let mut candidates = Vec::new();
        let constructor = match &ty {
            NativeType::Class(name) if instantiate => {
                let key = ConstructorKey::for_call(name, &args);
                match self.constructors.get(&key) {
                    Some(found) => Some(found),
                    None => {
                        candidates = self.registry.constructors(name);
                        let matching: Vec<_> = candidates
                            .iter()
                            .filter(|c| c.params.len() == args.len())
                            .cloned()
                            .collect();
                        let selected = Resolver::new(&self.registry)
                            .select(&matching, &args)
                            .map(|selection| selection.selected);
                        if let Some(found) = &selected {
                            self.constructors.put(key, found.clone());
                        }
                        selected
                    }
                }
            }
            _ => None,
        };

        let Some(constructor) = constructor else {
            if args.is_empty() {
                return Ok((Value::Class(ty), NativeType::class(names::CLASS), true));
            }
            let fault = if instantiate {
                Fault::thrown(
                    exceptions::INSTANTIATION,
                    format!(
                        "No matching constructor found. Candidates: [{}]",
                        signatures(&candidates)
                    ),
                )
            } else {
                Fault::illegal_argument("ReferenceClass must be called without arguments")
            };
            return Err(fault.into());
        };

        let args = Coercer::new(&self.registry, self.options.encoding)
            .coerce_all(&constructor.params, args)?;
        let body = constructor.body.clone();
        let value = body(&mut CallContext::new(self), args)
            .map_err(Failure::raised_by(constructor.declares_errors))?;
        Ok((value, ty, constructor.declares_errors))
    }

    fn access_property(&mut self, target: &Value, name: &str, args: Vec<Value>) -> Result<Outcome, Failure> {
        let Some((owner, is_static)) = owner_of(target) else {
            return Err(Fault::thrown(
                exceptions::NULL_POINTER,
                format!("cannot access property \"{}\" of a null object", name),
            )
            .into());
        };

        if let Some(field) = self.registry.find_field(&owner, name, false, is_static) {
            return self.access_field(&field, target, args);
        }

        let accessor = if args.is_empty() {
            ["get", "is"].iter().find_map(|prefix| {
                self.registry
                    .methods_named(&owner, &format!("{}{}", prefix, name), is_static)
                    .into_iter()
                    .find(|m| m.params.is_empty())
            })
        } else {
            self.registry
                .methods_named(&owner, &format!("set{}", name), is_static)
                .into_iter()
                .find(|m| m.params.len() == 1)
        };
        if let Some(method) = accessor {
            let args = Coercer::new(&self.registry, self.options.encoding)
                .coerce_all(&method.params, args)?;
            let value = self
                .call_body(&method, target, args)
                .map_err(Failure::raised_by(method.declares_errors))?;
            return Ok((value, method.return_type.clone(), method.declares_errors));
        }

        if let Some(field) = self.registry.find_field(&owner, name, true, is_static) {
            return self.access_field(&field, target, args);
        }
        Err(Fault::thrown(
            exceptions::NO_SUCH_FIELD,
            format!("{} on {}", name, owner),
        )
        .into())
    }

    fn access_field(&mut self, field: &FieldDescriptor, target: &Value, args: Vec<Value>) -> Result<Outcome, Failure> {
        let Some(value) = args.into_iter().next() else {
            let value = (field.getter)(target)?;
            return Ok((value, field.ty.clone(), false));
        };
        let setter = field.setter.as_ref().ok_or_else(|| {
            Fault::thrown(
                exceptions::ILLEGAL_STATE,
                format!("field {} is read-only", field.name),
            )
        })?;
        let value = Coercer::new(&self.registry, self.options.encoding).coerce(&field.ty, value)?;
        setter(target, value)?;
        Ok((Value::Null, field.ty.clone(), false))
    }

    /// Ask the peer to run `method` on `closure` and wait for its answer,
    /// serving any requests the peer makes meanwhile.
    pub(super) fn call_closure(
        &mut self,
        closure: &Closure,
        method: &str,
        args: &[Value],
        ret: &NativeType,
    ) -> Result<Value, Fault> {
        let cname = closure.peer_name(method).to_string();
        self.respond(|response, cx| {
            response.set_result_procedure(cx, closure.object, &cname, method, args)
        })?;
        let returned = self.sub_requests()?;
        if ret.is_void() {
            return Ok(Value::Null);
        }
        let value = returned.into_iter().next().unwrap_or(Value::Null);
        Coercer::new(&self.registry, self.options.encoding).coerce(ret, value)
    }

    /// Send the pending callback and serve the peer until it returns.
    fn sub_requests(&mut self) -> Result<Vec<Value>, Fault> {
        self.response.flush_raw(&mut *self.out).map_err(|e| {
            debug!("Cannot send callback: {}", e);
            Fault::Abort
        })?;
        let saved = self.response.enter_nested();
        self.depth += 1;
        let outcome = self.serve_nested();
        self.depth -= 1;
        self.response.restore(saved);
        outcome
    }

    fn serve_nested(&mut self) -> Result<Vec<Value>, Fault> {
        loop {
            let (status, call) = self.parse_request()?;
            if status != Status::Ok {
                self.abandon_exchange();
                return Err(Fault::Abort);
            }
            match call.kind {
                b'R' => {
                    self.response.reset();
                    return match call.error {
                        Some(error) => Err(Fault::Thrown(error)),
                        None => Ok(call.args),
                    };
                }
                b'F' => {
                    self.abandon_exchange();
                    return Err(Fault::Abort);
                }
                _ => self.dispatch(call)?,
            }
        }
    }

    /// Tell the peer the connection is over while a callback is pending.
    fn abandon_exchange(&mut self) {
        self.respond(|response, cx| response.set_finish(cx, false));
        if let Err(e) = self.response.flush(&mut *self.out) {
            trace!("Cannot send finish packet: {}", e);
        }
    }
}
