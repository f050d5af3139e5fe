//! Typed argument encoding.
//!
//! Every argument token starts with a one-character type tag followed by its
//! literal text: `i` unsigned int, `g` signed int, `h` hex unsigned int,
//! `f` float, `s` string, `b` comma-separated byte list.

use opl_core::values::{float_bytes, parse_byte_list, sint_bytes, uint_bytes};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("invalid opcode number {0:?}")]
    InvalidOpcode(String),
    #[error("unknown type tag {0:?}")]
    UnknownTag(char),
    #[error("invalid unsigned int {0:?}")]
    InvalidUint(String),
    #[error("invalid signed int {0:?}")]
    InvalidSint(String),
    #[error("invalid hex int {0:?}")]
    InvalidHex(String),
    #[error("invalid float {0:?}")]
    InvalidFloat(String),
    #[error("invalid byte list {0:?}")]
    InvalidByteList(String),
}

/// Encode one tagged argument token into its binary value.
pub fn encode_arg(token: &str) -> Result<Vec<u8>, ArgError> {
    let mut chars = token.chars();
    let tag = chars.next().ok_or(ArgError::UnknownTag(' '))?;
    let body = chars.as_str();
    match tag {
        'i' => body
            .parse::<u32>()
            .map(uint_bytes)
            .map_err(|_| ArgError::InvalidUint(body.to_string())),
        'g' => body
            .parse::<i32>()
            .map(sint_bytes)
            .map_err(|_| ArgError::InvalidSint(body.to_string())),
        'h' => {
            let digits = body
                .strip_prefix("0x")
                .or_else(|| body.strip_prefix("0X"))
                .unwrap_or(body);
            u32::from_str_radix(digits, 16)
                .map(uint_bytes)
                .map_err(|_| ArgError::InvalidHex(body.to_string()))
        }
        'f' => body
            .parse::<f32>()
            .map(float_bytes)
            .map_err(|_| ArgError::InvalidFloat(body.to_string())),
        's' => Ok(body.as_bytes().to_vec()),
        'b' => parse_byte_list(body).map_err(|_| ArgError::InvalidByteList(body.to_string())),
        other => Err(ArgError::UnknownTag(other)),
    }
}

/// Parse the opcode column.
pub fn parse_opcode(token: &str) -> Result<u32, ArgError> {
    token
        .parse::<u32>()
        .map_err(|_| ArgError::InvalidOpcode(token.to_string()))
}
