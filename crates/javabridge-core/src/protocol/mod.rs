//! Wire codec of the bridge protocol.
//!
//! Requests are read with [`Parser`] and turned into a [`PendingCall`] by a
//! [`RequestBuilder`]; replies are accumulated in a [`Response`] and flushed
//! once per request.

mod options;
mod output;
mod parser;
mod request;
mod response;

pub use options::{
    BridgeOptions, TextEncoding, FLAG_BASE64, FLAG_ENCODING, FLAG_PASS_CONTEXT,
    FLAG_PREFER_VALUES, HEADER_OPTIONS,
};
pub use output::OutputBuffer;
pub use parser::{Attribute, DocHandler, Parser, ParserTag, Status};
pub use request::{CallTarget, PendingCall, RequestBuilder};
pub use response::{LastErrors, Response, WriteContext, WriterMode};

pub(crate) use output::preview;
