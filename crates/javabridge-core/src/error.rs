//! Error types for the bridge.
//!
//! `BridgeError` covers failures of the engine itself (transport, protocol,
//! configuration). `Fault` is what a native call produces when it does not
//! return normally: either an error the peer should see, or one of the
//! unwinding signals that end the current exchange.

use std::sync::Arc;
use thiserror::Error;

use crate::types::{exceptions, Throwable};

/// Main error type for the bridge engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    // Reference errors
    #[error("cannot manipulate the object #{handle} which has already been released by the peer")]
    HandleReleased { handle: u32 },

    // Resolution errors
    #[error("Class not found: {0}")]
    ClassNotFound(String),

    // Resource errors
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Resource group {name} has been destroyed")]
    GroupDestroyed { name: String },

    #[error("Worker pool error: {0}")]
    Pool(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Create a protocol error from anything printable.
    pub fn protocol(message: impl Into<String>) -> Self {
        BridgeError::Protocol(message.into())
    }

    /// Name of the native exception class used when this error is reported
    /// to the peer as a reply.
    pub fn exception_class(&self) -> &'static str {
        match self {
            BridgeError::HandleReleased { .. } => exceptions::NULL_POINTER,
            BridgeError::ClassNotFound(_) => exceptions::CLASS_NOT_FOUND,
            BridgeError::GroupDestroyed { .. } | BridgeError::Pool(_) => exceptions::ILLEGAL_STATE,
            _ => exceptions::RUNTIME,
        }
    }

    /// Convert into a throwable the peer can receive.
    pub fn to_throwable(&self) -> Throwable {
        Throwable::new(self.exception_class(), self.to_string())
    }
}

/// Outcome of a native call that did not return a value.
///
/// Only `Thrown` is ever reported back to the peer. The remaining variants
/// unwind the whole exchange; native code must pass them on with `?` and
/// must never turn them into an ordinary error.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The native side raised an error.
    Thrown(Arc<Throwable>),
    /// The peer terminated the exchange while a callback was outstanding.
    Abort,
    /// The peer sent something the codec cannot accept.
    Protocol(String),
    /// The native side ran out of a resource.
    Exhausted(String),
}

impl Fault {
    /// Shorthand for raising a fresh throwable.
    pub fn thrown(class: &str, message: impl Into<String>) -> Self {
        Fault::Thrown(Arc::new(Throwable::new(class, message)))
    }

    /// Shorthand for an `IllegalArgumentException`.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::thrown(exceptions::ILLEGAL_ARGUMENT, message)
    }

    /// Whether this fault must propagate through native code untouched.
    pub fn is_unwinding(&self) -> bool {
        !matches!(self, Fault::Thrown(_))
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Thrown(t) => write!(f, "{}", t),
            Fault::Abort => write!(f, "exchange aborted by the peer"),
            Fault::Protocol(m) => write!(f, "protocol error: {}", m),
            Fault::Exhausted(m) => write!(f, "resource exhausted: {}", m),
        }
    }
}

impl From<Throwable> for Fault {
    fn from(t: Throwable) -> Self {
        Fault::Thrown(Arc::new(t))
    }
}

impl From<BridgeError> for Fault {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io { .. } => Fault::Abort,
            BridgeError::Protocol(m) => Fault::Protocol(m),
            BridgeError::ResourceExhausted(m) => Fault::Exhausted(m),
            other => Fault::Thrown(Arc::new(other.to_throwable())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::HandleReleased { handle: 7 };
        assert_eq!(
            err.to_string(),
            "cannot manipulate the object #7 which has already been released by the peer"
        );
    }

    #[test]
    fn test_exception_classes() {
        assert_eq!(
            BridgeError::HandleReleased { handle: 1 }.exception_class(),
            exceptions::NULL_POINTER
        );
        assert_eq!(
            BridgeError::ClassNotFound("Foo".into()).exception_class(),
            exceptions::CLASS_NOT_FOUND
        );
    }

    #[test]
    fn test_fault_from_bridge_error() {
        assert!(matches!(
            Fault::from(BridgeError::protocol("x")),
            Fault::Protocol(_)
        ));
        match Fault::from(BridgeError::ClassNotFound("Foo".into())) {
            Fault::Thrown(t) => assert_eq!(&*t.class, exceptions::CLASS_NOT_FOUND),
            other => panic!("unexpected fault: {:?}", other),
        }
    }

    #[test]
    fn test_unwinding_faults() {
        assert!(Fault::Abort.is_unwinding());
        assert!(Fault::Exhausted("memory".into()).is_unwinding());
        assert!(!Fault::illegal_argument("x").is_unwinding());
    }
}
