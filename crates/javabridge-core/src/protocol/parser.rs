//! Incremental tag scanner for peer requests.
//!
//! The parser reads one top-level request at a time and reports start and
//! end tags to a [`DocHandler`]. Attribute values are handed over in the
//! order they appear; callers address them by position.

use std::io::{self, BufRead};

use tracing::debug;

use super::options::{BridgeOptions, FLAG_ENCODING};
use crate::config::ProtocolConfig;
use crate::error::{BridgeError, Result};

/// Outcome of reading from the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A request (or the header) was read.
    Ok,
    /// The peer sent a liveness probe instead of a header.
    Ping,
    /// The stream ended.
    Eof,
    /// The stream failed.
    IoError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserTag {
    pub name: Vec<u8>,
    pub attrs: Vec<Attribute>,
}

impl ParserTag {
    /// First byte of the tag name, which identifies the tag.
    pub fn kind(&self) -> u8 {
        self.name.first().copied().unwrap_or(0)
    }

    /// Value of the attribute at `index`, or an empty slice.
    pub fn value(&self, index: usize) -> &[u8] {
        self.attrs.get(index).map(|a| a.value.as_slice()).unwrap_or(&[])
    }

    /// First byte of the attribute at `index`, or 0.
    pub fn first_byte(&self, index: usize) -> u8 {
        self.value(index).first().copied().unwrap_or(0)
    }

    pub fn has_attrs(&self) -> bool {
        !self.attrs.is_empty()
    }
}

/// Receiver of parse events.
pub trait DocHandler {
    /// Called for every start tag. For a top-level tag the return value
    /// says whether the request expects a reply; requests that do not are
    /// consumed and parsing continues with the next one.
    fn begin(&mut self, tag: &ParserTag) -> Result<bool>;

    /// Called for every end tag.
    fn end(&mut self, name: &[u8]) -> Result<()>;
}

pub struct Parser<R> {
    reader: R,
    max_token: usize,
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_token: ProtocolConfig::MAX_TOKEN_LEN,
        }
    }

    pub fn with_max_token(mut self, max_token: usize) -> Self {
        self.max_token = max_token;
        self
    }

    /// Read the connection header.
    pub fn read_header(&mut self) -> Result<(Status, BridgeOptions)> {
        match self.read_header_inner() {
            Err(err) => io_status(err).map(|s| (s, BridgeOptions::default())),
            ok => ok,
        }
    }

    fn read_header_inner(&mut self) -> Result<(Status, BridgeOptions)> {
        let first = match self.peek_byte()? {
            Some(b) => b,
            None => return Ok((Status::Eof, BridgeOptions::default())),
        };
        match first {
            0 => {
                self.reader.consume(1);
                Ok((Status::Ping, BridgeOptions::default()))
            }
            b'<' => Ok((Status::Ok, BridgeOptions::default())),
            header => {
                self.reader.consume(1);
                let name = if header & FLAG_ENCODING != 0 {
                    let len = self.require_byte()? as usize;
                    let mut name = Vec::with_capacity(len);
                    for _ in 0..len {
                        name.push(self.require_byte()?);
                    }
                    Some(name)
                } else {
                    None
                };
                let options = BridgeOptions::from_header(header, name.as_deref())?;
                debug!("Connection options: {:?}", options);
                Ok((Status::Ok, options))
            }
        }
    }

    /// Read the next request, reporting its tags to `handler`.
    pub fn parse(&mut self, handler: &mut dyn DocHandler) -> Result<Status> {
        match self.parse_inner(handler) {
            Err(err) => io_status(err),
            ok => ok,
        }
    }

    fn parse_inner(&mut self, handler: &mut dyn DocHandler) -> Result<Status> {
        let mut level = 0usize;
        let mut reply = true;
        loop {
            let byte = match self.next_byte()? {
                Some(b) => b,
                None => return Ok(Status::Eof),
            };
            if byte != b'<' {
                if byte.is_ascii_whitespace() || byte == 0 {
                    continue;
                }
                return Err(BridgeError::protocol(format!(
                    "unexpected character {:?} outside of a tag",
                    byte as char
                )));
            }

            let first = self.require_byte()?;
            if first == b'/' {
                let name = self.read_end_tag()?;
                if level == 0 {
                    return Err(BridgeError::protocol(format!(
                        "unbalanced end tag </{}>",
                        String::from_utf8_lossy(&name)
                    )));
                }
                handler.end(&name)?;
                level -= 1;
                if level == 0 {
                    if reply {
                        return Ok(Status::Ok);
                    }
                    reply = true;
                }
                continue;
            }

            let mut tag = ParserTag {
                name: vec![first],
                attrs: Vec::new(),
            };
            let closed = self.read_start_tag(&mut tag)?;
            let wants_reply = handler.begin(&tag)?;
            if level == 0 {
                reply = wants_reply;
            }
            if closed {
                if level == 0 {
                    if reply {
                        return Ok(Status::Ok);
                    }
                    reply = true;
                }
            } else {
                level += 1;
            }
        }
    }

    /// Read the rest of a start tag; returns true for `<.../>`.
    fn read_start_tag(&mut self, tag: &mut ParserTag) -> Result<bool> {
        loop {
            let b = self.require_byte()?;
            match b {
                b'>' => return Ok(false),
                b'/' => return self.expect_close().map(|_| true),
                b if b.is_ascii_whitespace() => break,
                b => {
                    tag.name.push(b);
                    self.check_len(tag.name.len())?;
                }
            }
        }

        loop {
            let b = self.require_byte()?;
            match b {
                b'>' => return Ok(false),
                b'/' => return self.expect_close().map(|_| true),
                b if b.is_ascii_whitespace() => continue,
                b => {
                    let attr = self.read_attribute(b)?;
                    tag.attrs.push(attr);
                }
            }
        }
    }

    fn read_attribute(&mut self, first: u8) -> Result<Attribute> {
        let mut name = vec![first];
        loop {
            match self.require_byte()? {
                b'=' => break,
                b if b.is_ascii_whitespace() => continue,
                b => {
                    name.push(b);
                    self.check_len(name.len())?;
                }
            }
        }
        loop {
            match self.require_byte()? {
                b'"' => break,
                b if b.is_ascii_whitespace() => continue,
                b => {
                    return Err(BridgeError::protocol(format!(
                        "expected '\"' after attribute {}=, got {:?}",
                        String::from_utf8_lossy(&name),
                        b as char
                    )))
                }
            }
        }
        let mut value = Vec::new();
        loop {
            match self.require_byte()? {
                b'"' => break,
                b'&' => self.read_entity(&mut value)?,
                b => value.push(b),
            }
            self.check_len(value.len())?;
        }
        Ok(Attribute { name, value })
    }

    fn read_entity(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let mut entity = Vec::new();
        loop {
            let b = self.require_byte()?;
            if b == b';' {
                break;
            }
            entity.push(b);
            if entity.len() > 8 || b == b'"' {
                // Not an entity; keep the text as sent.
                out.push(b'&');
                out.extend_from_slice(&entity);
                return Ok(());
            }
        }
        match entity.as_slice() {
            b"amp" => out.push(b'&'),
            b"quot" => out.push(b'"'),
            b"lt" => out.push(b'<'),
            b"gt" => out.push(b'>'),
            b"apos" => out.push(b'\''),
            other => {
                out.push(b'&');
                out.extend_from_slice(other);
                out.push(b';');
            }
        }
        Ok(())
    }

    fn read_end_tag(&mut self) -> Result<Vec<u8>> {
        let mut name = Vec::new();
        loop {
            match self.require_byte()? {
                b'>' => return Ok(name),
                b if b.is_ascii_whitespace() => continue,
                b => {
                    name.push(b);
                    self.check_len(name.len())?;
                }
            }
        }
    }

    fn expect_close(&mut self) -> Result<()> {
        match self.require_byte()? {
            b'>' => Ok(()),
            b => Err(BridgeError::protocol(format!(
                "expected '>' after '/', got {:?}",
                b as char
            ))),
        }
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_token {
            return Err(BridgeError::protocol(format!(
                "token exceeds {} bytes",
                self.max_token
            )));
        }
        Ok(())
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.reader.consume(1);
        }
        Ok(byte)
    }

    fn require_byte(&mut self) -> Result<u8> {
        self.next_byte()?.ok_or_else(|| {
            BridgeError::from(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside a request",
            ))
        })
    }
}

/// Map transport errors to a status; other errors pass through.
fn io_status(err: BridgeError) -> Result<Status> {
    match err {
        BridgeError::Io { source, message } => {
            let eof = source
                .as_ref()
                .map(|e| e.kind() == io::ErrorKind::UnexpectedEof)
                .unwrap_or(false);
            debug!("Connection read ended: {}", message);
            Ok(if eof { Status::Eof } else { Status::IoError })
        }
        other => Err(other),
    }
}
