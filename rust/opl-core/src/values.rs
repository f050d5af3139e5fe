//! Reinterpretation of untyped memory cells.
//!
//! Memory stores raw byte strings. Opcodes decide how to read them: unsigned
//! and signed big-endian integers, big-endian binary32 floats, or UTF-8 text.
//! Nothing here ever refuses to *store* a value; only reads can fail.

use std::borrow::Cow;
use thiserror::Error;

/// Largest value an opcode may build by multiplying an input's length.
pub const MAX_VALUE_LEN: usize = 1 << 28;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("cannot read {len} bytes as an unsigned int (at most 4 significant bytes)")]
    Uint { len: usize },
    #[error("cannot read {len} bytes as a signed int (expected 1 to 4)")]
    Sint { len: usize },
    #[error("cannot read {len} bytes as a float (expected 4)")]
    Float { len: usize },
    #[error("value is not valid utf-8")]
    Utf8,
    #[error("cannot parse {text:?} as {kind}")]
    Parse { text: String, kind: &'static str },
}

// ---------------------------------------------------------------------------
// Byte -> number
// ---------------------------------------------------------------------------

/// Big-endian unsigned. Up to four bytes are zero-extended (empty reads as 0);
/// wider values are accepted only when the excess leading bytes are zero.
pub fn to_uint(bytes: &[u8]) -> Result<u32, ValueError> {
    let significant = if bytes.len() > 4 {
        let (excess, tail) = bytes.split_at(bytes.len() - 4);
        if excess.iter().any(|b| *b != 0) {
            return Err(ValueError::Uint { len: bytes.len() });
        }
        tail
    } else {
        bytes
    };
    Ok(significant
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
}

/// Big-endian two's complement, sign-extended from its own width.
pub fn to_sint(bytes: &[u8]) -> Result<i32, ValueError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(ValueError::Sint { len: bytes.len() });
    }
    let fill = if bytes[0] & 0x80 != 0 { 0xFF } else { 0x00 };
    let mut buf = [fill; 4];
    buf[4 - bytes.len()..].copy_from_slice(bytes);
    Ok(i32::from_be_bytes(buf))
}

pub fn to_float(bytes: &[u8]) -> Result<f32, ValueError> {
    let buf: [u8; 4] = bytes
        .try_into()
        .map_err(|_| ValueError::Float { len: bytes.len() })?;
    Ok(f32::from_be_bytes(buf))
}

pub fn to_text(bytes: &[u8]) -> Result<&str, ValueError> {
    std::str::from_utf8(bytes).map_err(|_| ValueError::Utf8)
}

/// Display-only decoding; never fails.
pub fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

// ---------------------------------------------------------------------------
// Number -> byte
// ---------------------------------------------------------------------------

pub fn uint_bytes(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn sint_bytes(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn float_bytes(value: f32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn bool_bytes(value: bool) -> Vec<u8> {
    uint_bytes(u32::from(value))
}

// ---------------------------------------------------------------------------
// Text conversions
// ---------------------------------------------------------------------------

/// Shortest round-trip text with a trailing `.0` on integral values:
/// `3.0`, `0.5`, `inf`, `NaN`.
pub fn format_float(value: f32) -> String {
    let mut text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}

pub fn parse_uint(text: &str) -> Result<u32, ValueError> {
    text.trim().parse().map_err(|_| ValueError::Parse {
        text: text.to_string(),
        kind: "unsigned int",
    })
}

pub fn parse_sint(text: &str) -> Result<i32, ValueError> {
    text.trim().parse().map_err(|_| ValueError::Parse {
        text: text.to_string(),
        kind: "signed int",
    })
}

pub fn parse_float(text: &str) -> Result<f32, ValueError> {
    text.trim().parse().map_err(|_| ValueError::Parse {
        text: text.to_string(),
        kind: "float",
    })
}

// ---------------------------------------------------------------------------
// Byte strings
// ---------------------------------------------------------------------------

/// Printable ASCII: letters, digits, punctuation, space and `\t\n\r\x0b\x0c`.
pub fn is_printable(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|b| matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C))
}

/// `1,2,3`: the body of a `b` literal.
pub fn byte_list(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse the body of a `b` literal. An empty body is a zero-length value.
pub fn parse_byte_list(text: &str) -> Result<Vec<u8>, ValueError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|part| {
            part.trim().parse::<u8>().map_err(|_| ValueError::Parse {
                text: text.to_string(),
                kind: "byte list",
            })
        })
        .collect()
}

/// Quote as `'...'`, escaping backslashes and single quotes.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

/// Whether `needle` occurs as a contiguous run inside `haystack`.
pub fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Clamp a byte-string index the way slicing does.
pub fn clamp(index: u32, len: usize) -> usize {
    (index as usize).min(len)
}
