//! OPL Compiler
//!
//! Turns OPL source text into the binary program format and back again.

pub mod compiler;
pub mod decompiler;

pub use compiler::emit::ArgError;
pub use compiler::{compile, Compilation, CompileError};
pub use decompiler::{decompile, AssumedType, Decompiler};
