//! Reply buffer with the codec's scalar encodings.

use std::io::{self, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::ProtocolConfig;

/// Bytes of input encoded per base64 output line.
const BASE64_LINE_INPUT: usize = ProtocolConfig::BASE64_LINE_QUARTETS * 3;

/// Accumulates one reply until it is flushed to the peer.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
    base64: bool,
}

impl OutputBuffer {
    pub fn new(base64: bool) -> Self {
        Self {
            bytes: Vec::with_capacity(256),
            base64,
        }
    }

    pub fn is_base64(&self) -> bool {
        self.base64
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Lower-case hex digits without prefix.
    pub fn append_hex(&mut self, value: u64) {
        self.bytes.extend_from_slice(format!("{:x}", value).as_bytes());
    }

    /// An exact number as magnitude and sign: `<L v="hex" p="O|A"/>`.
    pub fn append_long(&mut self, value: i64) {
        self.append(b"<L v=\"");
        self.append_hex(value.unsigned_abs());
        self.append(if value < 0 { b"\" p=\"A\"/>" } else { b"\" p=\"O\"/>" });
    }

    pub fn append_double(&mut self, value: f64) {
        self.append(b"<D v=\"");
        let text = if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            let sign = if value > 0.0 { "" } else { "-" };
            format!("{}INF", sign)
        } else {
            value.to_string()
        };
        self.append(text.as_bytes());
        self.append(b"\"/>");
    }

    pub fn append_bool(&mut self, value: bool) {
        self.append(if value { b"<B v=\"T\"/>" } else { b"<B v=\"F\"/>" });
    }

    /// A string leaf: `<S v="..."/>`.
    pub fn append_string(&mut self, text: &[u8]) {
        self.append(b"<S v=\"");
        self.append_quoted(text);
        self.append(b"\"/>");
    }

    /// Attribute text. Only `&` and `"` are escaped; in base64 mode the
    /// payload is base64 instead.
    pub fn append_quoted(&mut self, text: &[u8]) {
        if self.base64 {
            self.append_base64(text);
            return;
        }
        for &b in text {
            match b {
                b'&' => self.append(b"&amp;"),
                b'"' => self.append(b"&quot;"),
                b => self.bytes.push(b),
            }
        }
    }

    /// Base64 with a line break after every 76 characters and after the
    /// final group.
    pub fn append_base64(&mut self, data: &[u8]) {
        for line in data.chunks(BASE64_LINE_INPUT) {
            self.append(STANDARD.encode(line).as_bytes());
            self.bytes.push(b'\n');
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Write the buffered reply and clear the buffer.
    pub fn write_to(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if !self.bytes.is_empty() {
            out.write_all(&self.bytes)?;
        }
        out.flush()?;
        self.bytes.clear();
        Ok(())
    }

    /// Start of the buffer, for logs.
    pub fn preview(&self) -> String {
        preview(&self.bytes)
    }
}

pub(crate) fn preview(bytes: &[u8]) -> String {
    let limit = ProtocolConfig::LOG_PREVIEW_BYTES;
    if bytes.len() > limit {
        format!("{}...", String::from_utf8_lossy(&bytes[..limit]))
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(buf: &OutputBuffer) -> String {
        String::from_utf8(buf.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_long_sign_flag() {
        let mut buf = OutputBuffer::new(false);
        buf.append_long(42);
        buf.append_long(-255);
        assert_eq!(text(&buf), r#"<L v="2a" p="O"/><L v="ff" p="A"/>"#);
    }

    #[test]
    fn test_long_min_value() {
        let mut buf = OutputBuffer::new(false);
        buf.append_long(i64::MIN);
        assert_eq!(text(&buf), r#"<L v="8000000000000000" p="A"/>"#);
    }

    #[test]
    fn test_quoting_escapes_only_amp_and_quote() {
        let mut buf = OutputBuffer::new(false);
        buf.append_string(b"a&b\"c<d>");
        assert_eq!(text(&buf), r#"<S v="a&amp;b&quot;c<d>"/>"#);
    }

    #[test]
    fn test_base64_line_breaks() {
        let mut buf = OutputBuffer::new(true);
        buf.append_quoted(&[0u8; 57]);
        let out = text(&buf);
        assert_eq!(out.len(), 77);
        assert!(out.ends_with('\n'));

        buf.reset();
        buf.append_quoted(&[0u8; 58]);
        let out = text(&buf);
        let lines: Vec<&str> = out.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 76);
        assert_eq!(lines[1], "AA==");
    }

    #[test]
    fn test_base64_empty_input_writes_nothing() {
        let mut buf = OutputBuffer::new(true);
        buf.append_quoted(b"");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_base64_small_payload() {
        let mut buf = OutputBuffer::new(true);
        buf.append_string(b"hi");
        assert_eq!(text(&buf), "<S v=\"aGk=\n\"/>");
    }

    #[test]
    fn test_write_to_clears() {
        let mut buf = OutputBuffer::new(false);
        buf.append_bool(true);
        let mut out = Vec::new();
        buf.write_to(&mut out).unwrap();
        assert_eq!(out, b"<B v=\"T\"/>");
        assert!(buf.is_empty());
    }
}
