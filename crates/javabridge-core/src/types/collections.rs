//! Built-in native collections backing `ArrayList`, `HashMap` and friends.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::value::{NativeObject, Value};

/// A growable sequence owned by native code.
#[derive(Debug)]
pub struct ListObject {
    class: Arc<str>,
    items: Mutex<Vec<Value>>,
}

impl ListObject {
    pub fn new(class: &str, items: Vec<Value>) -> Self {
        Self {
            class: Arc::from(class),
            items: Mutex::new(items),
        }
    }

    fn items(&self) -> MutexGuard<'_, Vec<Value>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, value: Value) {
        self.items().push(value);
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items().get(index).cloned()
    }

    /// Replace the element at `index`, returning the previous one.
    pub fn set(&self, index: usize, value: Value) -> Option<Value> {
        self.items()
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value))
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.items();
        (index < items.len()).then(|| items.remove(index))
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    pub fn clear(&self) {
        self.items().clear();
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items().clone()
    }
}

impl NativeObject for ListObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_display(&self) -> String {
        let parts: Vec<String> = self.items().iter().map(Value::display_string).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// An insertion-ordered map owned by native code.
#[derive(Debug)]
pub struct MapObject {
    class: Arc<str>,
    entries: Mutex<Vec<(Value, Value)>>,
}

impl MapObject {
    pub fn new(class: &str, entries: Vec<(Value, Value)>) -> Self {
        Self {
            class: Arc::from(class),
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(Value, Value)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace, returning the previous value.
    pub fn put(&self, key: Value, value: Value) -> Option<Value> {
        let mut entries = self.entries();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries().iter().any(|(k, _)| k == key)
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        let mut entries = self.entries();
        let pos = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn snapshot(&self) -> Vec<(Value, Value)> {
        self.entries().clone()
    }
}

impl NativeObject for MapObject {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_display(&self) -> String {
        let parts: Vec<String> = self
            .entries()
            .iter()
            .map(|(k, v)| format!("{}={}", k.display_string(), v.display_string()))
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}
