//! Native errors as values.

use std::fmt;
use std::sync::Arc;

/// Exception class names raised by the bridge itself.
pub mod exceptions {
    pub const THROWABLE: &str = "Throwable";
    pub const EXCEPTION: &str = "Exception";
    pub const RUNTIME: &str = "RuntimeException";
    pub const ILLEGAL_ARGUMENT: &str = "IllegalArgumentException";
    pub const ILLEGAL_STATE: &str = "IllegalStateException";
    pub const NULL_POINTER: &str = "NullPointerException";
    pub const NO_SUCH_METHOD: &str = "NoSuchMethodException";
    pub const NO_SUCH_FIELD: &str = "NoSuchFieldException";
    pub const INSTANTIATION: &str = "InstantiationException";
    pub const CLASS_NOT_FOUND: &str = "ClassNotFoundException";
    pub const INTERRUPTED: &str = "InterruptedException";
    /// Marker wrapped around errors a method did not declare.
    pub const UNDECLARED: &str = "UndeclaredError";

    /// Every class above, with its superclass.
    pub const HIERARCHY: &[(&str, &str)] = &[
        (EXCEPTION, THROWABLE),
        (RUNTIME, EXCEPTION),
        (ILLEGAL_ARGUMENT, RUNTIME),
        (ILLEGAL_STATE, RUNTIME),
        (NULL_POINTER, RUNTIME),
        (NO_SUCH_METHOD, EXCEPTION),
        (NO_SUCH_FIELD, EXCEPTION),
        (INSTANTIATION, EXCEPTION),
        (CLASS_NOT_FOUND, EXCEPTION),
        (INTERRUPTED, EXCEPTION),
        (UNDECLARED, THROWABLE),
    ];
}

/// An error raised on the native side or received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Throwable {
    pub class: Arc<str>,
    pub message: String,
    pub cause: Option<Arc<Throwable>>,
    /// Frames recorded while the error travelled through the bridge.
    pub trace: Vec<String>,
}

impl Throwable {
    pub fn new(class: &str, message: impl Into<String>) -> Self {
        Self {
            class: Arc::from(class),
            message: message.into(),
            cause: None,
            trace: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: Arc<Throwable>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.trace.push(frame.into());
        self
    }

    /// Innermost error of the cause chain.
    pub fn root_cause(&self) -> &Throwable {
        let mut current = self;
        while let Some(cause) = &current.cause {
            current = cause;
        }
        current
    }

    /// Multi-line description with the cause chain and recorded frames.
    pub fn stack_trace(&self) -> String {
        let mut out = self.to_string();
        for frame in &self.trace {
            out.push_str("\n\tat ");
            out.push_str(frame);
        }
        if let Some(cause) = &self.cause {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.stack_trace());
        }
        out
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.class)
        } else {
            write!(f, "{}: {}", self.class, self.message)
        }
    }
}

impl std::error::Error for Throwable {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let t = Throwable::new(exceptions::ILLEGAL_STATE, "closed");
        assert_eq!(t.to_string(), "IllegalStateException: closed");
        assert_eq!(Throwable::new(exceptions::EXCEPTION, "").to_string(), "Exception");
    }

    #[test]
    fn test_root_cause_and_trace() {
        let inner = Arc::new(Throwable::new(exceptions::NULL_POINTER, "x").with_frame("List.get"));
        let outer = Throwable::new(exceptions::EXCEPTION, "Invoke failed").with_cause(inner);

        assert_eq!(&*outer.root_cause().class, exceptions::NULL_POINTER);
        let trace = outer.stack_trace();
        assert!(trace.contains("Caused by: NullPointerException: x"));
        assert!(trace.contains("\tat List.get"));
    }
}
