//! Per-connection table mapping peer handles to native values.
//!
//! Handles are issued in strictly increasing order starting at 1; handle 0
//! names the connection root and is never stored here. The table is a
//! chained hash keyed by `handle mod capacity` that grows to `2 * old + 1`
//! buckets once three quarters of the capacity is in use. Growing relinks
//! entries without renumbering them.

use std::fmt::Write as _;

use crate::config::ProtocolConfig;
use crate::error::{BridgeError, Result};
use crate::types::Value;

pub type Handle = u32;

#[derive(Debug)]
struct RefEntry {
    handle: Handle,
    value: Value,
    next: Option<Box<RefEntry>>,
}

#[derive(Debug)]
pub struct ReferenceTable {
    buckets: Vec<Option<Box<RefEntry>>>,
    count: usize,
    threshold: usize,
    next_handle: Handle,
}

impl Default for ReferenceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceTable {
    pub fn new() -> Self {
        Self::with_capacity(ProtocolConfig::REF_TABLE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buckets: empty_buckets(capacity),
            count: 0,
            threshold: threshold_for(capacity),
            next_handle: 1,
        }
    }

    /// Store `value` under the next handle and return that handle.
    pub fn append(&mut self, value: Value) -> Handle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.put(handle, value);
        handle
    }

    fn put(&mut self, handle: Handle, value: Value) {
        let index = self.bucket_index(handle);
        let mut cursor = self.buckets[index].as_deref_mut();
        while let Some(entry) = cursor {
            if entry.handle == handle {
                entry.value = value;
                return;
            }
            cursor = entry.next.as_deref_mut();
        }

        if self.count >= self.threshold {
            self.rehash();
        }
        let index = self.bucket_index(handle);
        let next = self.buckets[index].take();
        self.buckets[index] = Some(Box::new(RefEntry {
            handle,
            value,
            next,
        }));
        self.count += 1;
    }

    /// Value stored under `handle`.
    pub fn get(&self, handle: Handle) -> Result<&Value> {
        let mut cursor = self.buckets[self.bucket_index(handle)].as_deref();
        while let Some(entry) = cursor {
            if entry.handle == handle {
                return Ok(&entry.value);
            }
            cursor = entry.next.as_deref();
        }
        Err(BridgeError::HandleReleased { handle })
    }

    /// Release `handle`. Releasing an absent handle is not an error.
    pub fn remove(&mut self, handle: Handle) {
        let index = self.bucket_index(handle);
        if unlink(&mut self.buckets[index], handle) {
            self.count -= 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Handle the next `append` will return.
    pub fn peek_next_handle(&self) -> Handle {
        self.next_handle
    }

    /// Listing of live entries ordered by handle, for debugging.
    pub fn dump(&self) -> String {
        let mut entries: Vec<(Handle, &Value)> = Vec::with_capacity(self.count);
        for bucket in &self.buckets {
            let mut cursor = bucket.as_deref();
            while let Some(entry) = cursor {
                entries.push((entry.handle, &entry.value));
                cursor = entry.next.as_deref();
            }
        }
        entries.sort_by_key(|(h, _)| *h);

        let mut out = format!(
            "refs: {} live of capacity {}, next handle {}\n",
            self.count,
            self.buckets.len(),
            self.next_handle
        );
        for (handle, value) in entries {
            let _ = writeln!(out, "  #{}: {}", handle, value.describe());
        }
        out
    }

    fn bucket_index(&self, handle: Handle) -> usize {
        (handle & 0x7FFF_FFFF) as usize % self.buckets.len()
    }

    fn rehash(&mut self) {
        let capacity = self.buckets.len() * 2 + 1;
        let old = std::mem::replace(&mut self.buckets, empty_buckets(capacity));
        self.threshold = threshold_for(capacity);

        for mut bucket in old {
            while let Some(mut entry) = bucket.take() {
                bucket = entry.next.take();
                let index = self.bucket_index(entry.handle);
                entry.next = self.buckets[index].take();
                self.buckets[index] = Some(entry);
            }
        }
    }
}

fn empty_buckets(capacity: usize) -> Vec<Option<Box<RefEntry>>> {
    std::iter::repeat_with(|| None).take(capacity).collect()
}

fn threshold_for(capacity: usize) -> usize {
    ((capacity >> 2) * 3).max(1)
}

fn unlink(link: &mut Option<Box<RefEntry>>, handle: Handle) -> bool {
    match link {
        None => false,
        Some(entry) if entry.handle == handle => {
            let next = entry.next.take();
            *link = next;
            true
        }
        Some(entry) => unlink(&mut entry.next, handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_start_at_one_and_increase() {
        let mut refs = ReferenceTable::new();
        let handles: Vec<Handle> = (0..5).map(|i| refs.append(Value::Int(i))).collect();
        assert_eq!(handles, vec![1, 2, 3, 4, 5]);
        assert_eq!(refs.peek_next_handle(), 6);
    }

    #[test]
    fn test_get_returns_appended_value() {
        let mut refs = ReferenceTable::new();
        let h = refs.append(Value::string("x"));
        assert_eq!(refs.get(h).unwrap(), &Value::string("x"));
    }

    #[test]
    fn test_removed_handle_errors_and_is_not_reused() {
        let mut refs = ReferenceTable::new();
        let h = refs.append(Value::Int(1));
        refs.remove(h);
        assert!(matches!(
            refs.get(h),
            Err(BridgeError::HandleReleased { handle }) if handle == h
        ));
        assert_eq!(refs.append(Value::Int(2)), h + 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut refs = ReferenceTable::new();
        refs.append(Value::Int(1));
        refs.remove(99);
        refs.remove(99);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_growth_keeps_every_handle() {
        let mut refs = ReferenceTable::with_capacity(7);
        let handles: Vec<Handle> = (0..100).map(|i| refs.append(Value::Int(i))).collect();

        assert!(refs.capacity() > 7);
        assert_eq!(refs.len(), 100);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(refs.get(*h).unwrap(), &Value::Int(i as i32));
        }
    }

    #[test]
    fn test_growth_sequence() {
        let mut refs = ReferenceTable::with_capacity(7);
        // Threshold for 7 buckets is 3: the fourth insert grows to 15.
        for i in 0..4 {
            refs.append(Value::Int(i));
        }
        assert_eq!(refs.capacity(), 15);
    }

    #[test]
    fn test_remove_within_chain() {
        // Handles 1, 1022 and 2043 share bucket 1 of the default table.
        let mut refs = ReferenceTable::new();
        let mut colliding = Vec::new();
        for i in 0..2043 {
            let h = refs.append(Value::Int(i));
            if h % 1021 == 1 {
                colliding.push(h);
            }
        }
        refs.remove(colliding[1]);
        assert!(refs.get(colliding[1]).is_err());
        assert!(refs.get(colliding[0]).is_ok());
        assert!(refs.get(colliding[2]).is_ok());
        assert_eq!(refs.len(), 2042);
    }

    #[test]
    fn test_unlink_middle_of_chain() {
        let mut chain = None;
        for handle in [3, 2, 1] {
            chain = Some(Box::new(RefEntry {
                handle,
                value: Value::Int(handle as i32),
                next: chain,
            }));
        }
        assert!(unlink(&mut chain, 2));
        assert!(!unlink(&mut chain, 2));
        let first = chain.as_ref().unwrap();
        assert_eq!(first.handle, 1);
        assert_eq!(first.next.as_ref().unwrap().handle, 3);
    }

    #[test]
    fn test_peer_null_is_storable() {
        let mut refs = ReferenceTable::new();
        let h = refs.append(Value::PeerNull);
        assert_eq!(refs.get(h).unwrap(), &Value::PeerNull);
    }

    #[test]
    fn test_dump_lists_entries_in_order() {
        let mut refs = ReferenceTable::new();
        refs.append(Value::Int(7));
        refs.append(Value::string("s"));
        let dump = refs.dump();
        let first = dump.find("#1: (Integer)7").unwrap();
        let second = dump.find("#2: (String)s").unwrap();
        assert!(first < second);
    }
}
