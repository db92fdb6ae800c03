//! Peer callbacks seen from the native side.

use std::collections::HashMap;
use std::sync::Arc;

use super::native_type::NativeType;

/// Adapter that makes a peer object look like an implementation of a set
/// of native interfaces. Calling a method on it issues a sub-request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Closure {
    /// Peer-side identity of the callback object.
    pub object: i64,
    /// Peer function name used for every method, if set.
    pub name: Option<String>,
    /// Per-method peer function names.
    pub names: HashMap<String, String>,
    pub interfaces: Vec<Arc<str>>,
}

impl Closure {
    pub fn new(object: i64) -> Self {
        Self {
            object,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_names(mut self, names: HashMap<String, String>) -> Self {
        self.names = names;
        self
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interfaces.push(Arc::from(interface));
        self
    }

    /// Peer function that implements `method`.
    pub fn peer_name<'a>(&'a self, method: &'a str) -> &'a str {
        self.names
            .get(method)
            .map(String::as_str)
            .or(self.name.as_deref())
            .unwrap_or(method)
    }

    pub fn runtime_type(&self) -> NativeType {
        NativeType::Proxy(Arc::from(self.interfaces.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_name_precedence() {
        let mut names = HashMap::new();
        names.insert("run".to_string(), "doRun".to_string());
        let closure = Closure::new(4).with_name("call").with_names(names);

        assert_eq!(closure.peer_name("run"), "doRun");
        assert_eq!(closure.peer_name("compare"), "call");
        assert_eq!(Closure::new(4).peer_name("compare"), "compare");
    }
}
