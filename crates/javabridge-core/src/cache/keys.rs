//! Cache keys derived from a call's shape.

use crate::types::{NativeType, Value};

/// A lookup key, or the marker for calls that must not be cached.
///
/// Calls with a composite argument always bypass the cache: the distance of
/// a composite depends on its contents, not only on its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey<K> {
    Key(K),
    Bypass,
}

impl<K> CacheKey<K> {
    pub fn is_bypass(&self) -> bool {
        matches!(self, CacheKey::Bypass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub owner: NativeType,
    pub is_static: bool,
    pub arg_types: Vec<Option<NativeType>>,
}

impl MethodKey {
    pub fn for_call(
        name: &str,
        owner: &NativeType,
        is_static: bool,
        args: &[Value],
    ) -> CacheKey<MethodKey> {
        match arg_types(args) {
            Some(arg_types) => CacheKey::Key(MethodKey {
                name: name.to_string(),
                owner: owner.clone(),
                is_static,
                arg_types,
            }),
            None => CacheKey::Bypass,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstructorKey {
    pub class: String,
    pub arg_types: Vec<Option<NativeType>>,
}

impl ConstructorKey {
    pub fn for_call(class: &str, args: &[Value]) -> CacheKey<ConstructorKey> {
        match arg_types(args) {
            Some(arg_types) => CacheKey::Key(ConstructorKey {
                class: class.to_string(),
                arg_types,
            }),
            None => CacheKey::Bypass,
        }
    }
}

fn arg_types(args: &[Value]) -> Option<Vec<Option<NativeType>>> {
    args.iter()
        .map(|arg| match arg {
            Value::Composite(_) => None,
            other => Some(other.runtime_type()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerArray;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_equal_shapes_give_equal_keys() {
        let owner = NativeType::class("ArrayList");
        let a = MethodKey::for_call("add", &owner, false, &[Value::Int(1), Value::Null]);
        let b = MethodKey::for_call("add", &owner, false, &[Value::Int(99), Value::Null]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_static_flag_and_types_distinguish() {
        let owner = NativeType::class("Math");
        let a = MethodKey::for_call("abs", &owner, true, &[Value::Int(1)]);
        let b = MethodKey::for_call("abs", &owner, false, &[Value::Int(1)]);
        let c = MethodKey::for_call("abs", &owner, true, &[Value::Double(1.0)]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_composite_argument_bypasses() {
        let args = [Value::composite(PeerArray::new())];
        assert!(MethodKey::for_call("f", &NativeType::object(), false, &args).is_bypass());
        assert!(ConstructorKey::for_call("ArrayList", &args).is_bypass());
        assert!(!ConstructorKey::for_call("ArrayList", &[]).is_bypass());
    }
}
