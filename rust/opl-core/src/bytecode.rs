//! Binary instruction codec and the decoded program representation.
//!
//! Wire layout per instruction, all integers big-endian `u32`:
//!
//! ```text
//! line_index | opcode | arg_count | (arg_len | arg_bytes)*
//! ```
//!
//! A program is the plain concatenation of its instructions. Jump targets are
//! indices into the decoded instruction list, never byte offsets.

use crate::opcodes::OpCode;
use crate::wire::{put_framed, put_u32, ByteReader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated {what} at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("invalid utf-8 in {what} at byte {offset}")]
    InvalidUtf8 { what: &'static str, offset: usize },
}

/// One decoded instruction. Arguments are opaque byte strings; each opcode
/// reinterprets them under its own convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub line_index: u32,
    pub opcode: u32,
    pub args: Vec<Vec<u8>>,
}

impl Instruction {
    pub fn new(line_index: u32, opcode: u32, args: Vec<Vec<u8>>) -> Self {
        Self {
            line_index,
            opcode,
            args,
        }
    }

    pub fn op(&self) -> Option<OpCode> {
        OpCode::from_u32(self.opcode)
    }

    pub fn arg(&self, n: usize) -> Option<&[u8]> {
        self.args.get(n).map(Vec::as_slice)
    }

    pub fn encoded_len(&self) -> usize {
        12 + self.args.iter().map(|a| 4 + a.len()).sum::<usize>()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        put_u32(out, self.line_index);
        put_u32(out, self.opcode);
        put_u32(out, self.args.len() as u32);
        for arg in &self.args {
            put_framed(out, arg);
        }
    }

    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let line_index = reader.u32("line index")?;
        let opcode = reader.u32("opcode")?;
        let argc = reader.u32("argument count")?;
        // Each argument needs at least its length prefix.
        let mut args = Vec::with_capacity((argc as usize).min(reader.remaining() / 4));
        for _ in 0..argc {
            args.push(reader.framed("argument")?.to_vec());
        }
        Ok(Self {
            line_index,
            opcode,
            args,
        })
    }

    /// Human-readable `opcode arg arg ...` rendering used in diagnostics.
    pub fn describe(&self) -> String {
        let mut out = self.opcode.to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&format!("{:?}", arg));
        }
        out
    }
}

/// Encode a sequence of instructions into the binary program format.
pub fn encode_instructions(instructions: &[Instruction]) -> Vec<u8> {
    let mut out = Vec::with_capacity(instructions.iter().map(Instruction::encoded_len).sum());
    for instr in instructions {
        instr.encode_into(&mut out);
    }
    out
}

/// Decode a binary program. A partial trailing instruction is an error.
pub fn decode_instructions(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
    let mut reader = ByteReader::new(bytes);
    let mut out = Vec::new();
    while !reader.is_empty() {
        out.push(Instruction::decode_from(&mut reader)?);
    }
    Ok(out)
}

/// Label name bytes → instruction index.
pub type LabelTable = HashMap<Vec<u8>, usize>;

/// Scan for label definitions. Later definitions of the same name win.
pub fn scan_labels(instructions: &[Instruction]) -> LabelTable {
    let mut labels = LabelTable::new();
    for (idx, instr) in instructions.iter().enumerate() {
        if instr.opcode == OpCode::Label.code() {
            if let Some(name) = instr.arg(0) {
                labels.insert(name.to_vec(), idx);
            }
        }
    }
    labels
}

/// An executable instruction sequence together with its label table.
///
/// The label table is always derived from the instructions; every mutation
/// goes through a method that rebuilds it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Program {
    instructions: Vec<Instruction>,
    #[serde(skip)]
    labels: LabelTable,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let labels = scan_labels(&instructions);
        Self {
            instructions,
            labels,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(Self::new(decode_instructions(bytes)?))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_instructions(&self.instructions)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Instruction> {
        self.instructions.get(idx)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn label(&self, name: &[u8]) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Remove `[start, end)` and return it as its own program with its own
    /// label table. The caller validates the bounds.
    pub fn split_off_range(&mut self, start: usize, end: usize) -> Program {
        let taken: Vec<Instruction> = self.instructions.drain(start..end).collect();
        self.labels = scan_labels(&self.instructions);
        Program::new(taken)
    }
}

impl From<Vec<Instruction>> for Program {
    fn from(instructions: Vec<Instruction>) -> Self {
        Self::new(instructions)
    }
}
