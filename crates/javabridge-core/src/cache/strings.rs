//! Decoded-string cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::TextEncoding;

/// Decoded text keyed by raw bytes and encoding. Used for method and class
/// names, which repeat on nearly every request.
#[derive(Debug, Default)]
pub struct StringCache {
    by_encoding: HashMap<TextEncoding, HashMap<Vec<u8>, Arc<str>>>,
}

impl StringCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, bytes: &[u8], encoding: TextEncoding) -> Arc<str> {
        let table = self.by_encoding.entry(encoding).or_default();
        if let Some(s) = table.get(bytes) {
            return s.clone();
        }
        let decoded: Arc<str> = Arc::from(encoding.decode(bytes));
        table.insert(bytes.to_vec(), decoded.clone());
        decoded
    }

    pub fn clear(&mut self) {
        self.by_encoding = HashMap::new();
    }

    pub fn len(&self) -> usize {
        self.by_encoding.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
