//! Binary → text reconstruction.
//!
//! Arguments carry no type information on the wire, so the decompiler guesses:
//! printable ASCII becomes a quoted string, everything else is rendered under
//! the configured [`AssumedType`]. The output is source the compiler accepts,
//! but it is only byte-identical on recompile when the guess matches.

use num_bigint::BigUint;
use opl_core::bytecode::{decode_instructions, DecodeError, Instruction};
use opl_core::values::{byte_list, format_float, is_printable, lossy, quote};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Rendering used for arguments that are not printable strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
pub enum AssumedType {
    /// `b1,2,3`
    #[default]
    #[serde(rename = "b")]
    #[strum(serialize = "b")]
    Bytes,
    /// `i<n>`, big-endian unsigned at any width
    #[serde(rename = "i")]
    #[strum(serialize = "i")]
    Uint,
    /// `f<x>` for 4-byte values, bytes otherwise
    #[serde(rename = "f")]
    #[strum(serialize = "f")]
    Float,
    /// `s'...'`, lossy
    #[serde(rename = "s")]
    #[strum(serialize = "s")]
    Text,
}

#[derive(Debug, Clone, Copy)]
pub struct Decompiler {
    pub assume: AssumedType,
    pub try_strings: bool,
}

impl Default for Decompiler {
    fn default() -> Self {
        Self {
            assume: AssumedType::Bytes,
            try_strings: true,
        }
    }
}

impl Decompiler {
    pub fn new(assume: AssumedType, try_strings: bool) -> Self {
        Self {
            assume,
            try_strings,
        }
    }

    pub fn render_arg(&self, arg: &[u8]) -> String {
        if self.try_strings && is_printable(arg) {
            return format!("s{}", quote(&lossy(arg)));
        }
        match self.assume {
            AssumedType::Bytes => format!("b{}", byte_list(arg)),
            AssumedType::Uint => format!("i{}", BigUint::from_bytes_be(arg)),
            AssumedType::Float => match <[u8; 4]>::try_from(arg) {
                Ok(raw) => format!("f{}", format_float(f32::from_be_bytes(raw))),
                Err(_) => format!("b{}", byte_list(arg)),
            },
            AssumedType::Text => format!("s{}", quote(&lossy(arg))),
        }
    }

    pub fn render_instruction(&self, instr: &Instruction) -> String {
        let mut line = instr.opcode.to_string();
        for arg in &instr.args {
            line.push(' ');
            line.push_str(&self.render_arg(arg));
        }
        line
    }

    /// Decompile a whole binary program, one line per instruction.
    pub fn decompile(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let mut out = String::new();
        for instr in decode_instructions(bytes)? {
            out.push_str(&self.render_instruction(&instr));
            out.push('\n');
        }
        Ok(out)
    }
}

/// Decompile with the default settings (strings detected, bytes otherwise).
pub fn decompile(bytes: &[u8]) -> Result<String, DecodeError> {
    Decompiler::default().decompile(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn printable_arguments_become_strings() {
        let d = Decompiler::default();
        assert_eq!(d.render_arg(b"hi there"), "s'hi there'");
        assert_eq!(d.render_arg(br"a'b\c"), r"s'a\'b\\c'");
        assert_eq!(d.render_arg(b""), "s''");
    }

    #[test]
    fn assumed_types() {
        let raw = [0, 0, 0, 7];
        assert_eq!(Decompiler::new(AssumedType::Bytes, true).render_arg(&raw), "b0,0,0,7");
        assert_eq!(Decompiler::new(AssumedType::Uint, true).render_arg(&raw), "i7");
        assert_eq!(
            Decompiler::new(AssumedType::Uint, true).render_arg(&[1, 0, 0, 0, 0]),
            "i4294967296"
        );
        assert_eq!(
            Decompiler::new(AssumedType::Float, true).render_arg(&[0x3F, 0x80, 0, 0]),
            "f1.0"
        );
        assert_eq!(Decompiler::new(AssumedType::Float, true).render_arg(&[1, 2]), "b1,2");
    }

    #[test]
    fn string_detection_can_be_disabled() {
        let d = Decompiler::new(AssumedType::Bytes, false);
        assert_eq!(d.render_arg(b"AB"), "b65,66");
    }

    #[test]
    fn opcode_only_lines_have_no_trailing_space() {
        let mut bytes = Vec::new();
        Instruction::new(0, 1, vec![]).encode_into(&mut bytes);
        assert_eq!(decompile(&bytes).unwrap(), "1\n");
    }

    #[test]
    fn truncated_input_is_a_decode_error() {
        assert!(decompile(&[0, 0, 0]).is_err());
    }

    #[test]
    fn assumed_type_parses_from_cli_letters() {
        assert_eq!(AssumedType::from_str("i").unwrap(), AssumedType::Uint);
        assert_eq!(AssumedType::Text.to_string(), "s");
        assert!(AssumedType::from_str("x").is_err());
    }
}
