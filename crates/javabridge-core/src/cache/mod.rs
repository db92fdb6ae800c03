//! Per-connection lookup caches.
//!
//! Resolving an overload and decoding a peer string are repeated for every
//! request with the same shape, so each connection keeps:
//! - a method cache keyed by name, receiver type and argument types
//! - a constructor cache keyed by class and argument types
//! - a string cache keyed by raw bytes and encoding
//!
//! A connection uses its caches from a single thread, so nothing here locks.
//! Keep-alive recycling replaces all three.

mod keys;
mod strings;
mod symbols;

pub use keys::{CacheKey, ConstructorKey, MethodKey};
pub use strings::StringCache;
pub use symbols::{CacheStats, ConstructorCache, MethodCache, SymbolCache};
