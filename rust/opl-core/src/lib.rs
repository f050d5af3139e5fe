//! OPL Core
//!
//! Shared definitions used across the compiler, VM, and CLI: the native opcode
//! table, the binary instruction codec, byte-value reinterpretation helpers,
//! and the executable bundle format.

pub mod bundle;
pub mod bytecode;
pub mod opcodes;
pub mod values;
pub mod wire;

pub use bytecode::{DecodeError, Instruction, LabelTable, Program};
pub use opcodes::OpCode;
