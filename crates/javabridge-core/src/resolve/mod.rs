//! Overload resolution and argument coercion.
//!
//! [`Resolver::select`] ranks the candidates of a call by a distance summed
//! over the arguments; [`Coercer`] then converts each argument to the
//! declared parameter type of the winner.

mod coerce;
mod select;

pub use coerce::Coercer;
pub use select::{Resolver, Selection};

/// Penalties used by the distance table. Only their relative order matters
/// to callers, but changing them changes which overload wins.
pub mod weights {
    /// Each superclass step a reference argument can still take.
    pub const COVARIANT_STEP: u32 = 16;
    /// Text parameter receiving raw bytes.
    pub const TEXT_FROM_BYTES: u32 = 8;
    /// Text parameter receiving anything else.
    pub const TEXT_FALLBACK: u32 = 8000;
    /// Byte array receiving a peer string.
    pub const BYTES_FROM_TEXT: u32 = 32;
    /// Array of `Object` receiving a container with other element types.
    pub const ANY_COMPONENT: u32 = 10;
    /// Array of a specific type receiving a container with other element
    /// types, before the element distance is added.
    pub const SPECIFIC_COMPONENT: u32 = 8200;
    /// Collection receiving a peer map.
    pub const COLLECTION_FROM_MAP: u32 = 8100;
    /// Primitive receiving text.
    pub const PRIMITIVE_FROM_TEXT: u32 = 64;
    /// Numeric primitive the argument does not widen to naturally.
    pub const NUMERIC_MISMATCH: u32 = 256;
    pub const MISMATCH: u32 = 9999;
}
