//! Per-connection options negotiated in the header byte.

use std::fmt;

use crate::error::{BridgeError, Result};

/// Header bit marking an options byte.
pub const HEADER_OPTIONS: u8 = 0x80;
/// Primitive results are written as values instead of handles.
pub const FLAG_PREFER_VALUES: u8 = 0x01;
/// Quoted text in replies is base64.
pub const FLAG_BASE64: u8 = 0x02;
/// Requests carry a context id the peer wants echoed in logs.
pub const FLAG_PASS_CONTEXT: u8 = 0x04;
/// A length byte and an encoding name follow the header.
pub const FLAG_ENCODING: u8 = 0x08;

/// Text encodings the bridge can convert peer bytes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl TextEncoding {
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        match normalized.as_str() {
            "UTF8" => Some(TextEncoding::Utf8),
            "ISO88591" | "LATIN1" | "ISO885915" => Some(TextEncoding::Latin1),
            "ASCII" | "USASCII" => Some(TextEncoding::Ascii),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Ascii => "US-ASCII",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        }
    }

    /// Encode text; characters the encoding cannot represent become `?`.
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options of one connection. They survive keep-alive recycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BridgeOptions {
    pub encoding: TextEncoding,
    pub prefer_values: bool,
    pub base64_data: bool,
    pub pass_context: bool,
}

impl BridgeOptions {
    /// Options from a header byte. `encoding_name` is required when the
    /// byte has [`FLAG_ENCODING`] set.
    pub fn from_header(header: u8, encoding_name: Option<&[u8]>) -> Result<Self> {
        if header & HEADER_OPTIONS == 0 {
            return Err(BridgeError::protocol(format!(
                "invalid header byte 0x{:02x}",
                header
            )));
        }
        let encoding = if header & FLAG_ENCODING != 0 {
            let raw = encoding_name
                .ok_or_else(|| BridgeError::protocol("missing encoding name in header"))?;
            let name = String::from_utf8_lossy(raw);
            TextEncoding::from_name(&name).ok_or_else(|| {
                BridgeError::protocol(format!("unsupported encoding {:?}", name))
            })?
        } else {
            TextEncoding::default()
        };
        Ok(Self {
            encoding,
            prefer_values: header & FLAG_PREFER_VALUES != 0,
            base64_data: header & FLAG_BASE64 != 0,
            pass_context: header & FLAG_PASS_CONTEXT != 0,
        })
    }

    /// Header byte (without the encoding name) describing these options.
    pub fn header_byte(&self) -> u8 {
        let mut header = HEADER_OPTIONS;
        if self.prefer_values {
            header |= FLAG_PREFER_VALUES;
        }
        if self.base64_data {
            header |= FLAG_BASE64;
        }
        if self.pass_context {
            header |= FLAG_PASS_CONTEXT;
        }
        if self.encoding != TextEncoding::default() {
            header |= FLAG_ENCODING;
        }
        header
    }
}
