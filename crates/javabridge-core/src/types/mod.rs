//! The native type universe: static types, values and errors.

mod closure;
mod collections;
mod native_type;
mod throwable;
mod value;

pub use closure::Closure;
pub use collections::{ListObject, MapObject};
pub use native_type::{names, NativeType, Primitive};
pub use throwable::{exceptions, Throwable};
pub use value::{
    zero_of, ArrayKey, NativeArray, NativeObject, ObjectRef, PeerArray, PeerString, Value,
};
