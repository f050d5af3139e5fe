pub mod emit;
pub mod lexer;

use emit::{encode_arg, parse_opcode, ArgError};
use opl_core::bytecode::Instruction;
use thiserror::Error;

/// A per-line compile failure. `line_index` counts kept (non-blank,
/// non-comment) lines, matching the index stored in the binary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} LINE: {line_index} (source line {source_line}) CODE: {tokens:?}")]
pub struct CompileError {
    pub line_index: u32,
    pub source_line: usize,
    pub tokens: Vec<String>,
    #[source]
    pub kind: ArgError,
}

/// Result of a compile. On error, `bytes` holds every instruction that
/// compiled before the failing line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compilation {
    pub bytes: Vec<u8>,
    pub instruction_count: usize,
    pub error: Option<CompileError>,
}

impl Compilation {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<u8>, CompileError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.bytes),
        }
    }
}

fn compile_line(line_index: u32, tokens: &[String]) -> Result<Instruction, ArgError> {
    let opcode = parse_opcode(&tokens[0])?;
    let args = tokens[1..]
        .iter()
        .map(|t| encode_arg(t))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Instruction::new(line_index, opcode, args))
}

/// Compile source text, stopping at the first bad line.
pub fn compile(source: &str) -> Compilation {
    let mut out = Compilation::default();
    let mut line_index = 0u32;
    for (source_idx, raw) in lexer::split_lines(source).into_iter().enumerate() {
        let tokens: Vec<String> = raw.into_iter().filter(|t| !t.is_empty()).collect();
        match tokens.first() {
            None => continue,
            Some(first) if first.starts_with("//") => continue,
            Some(_) => {}
        }
        match compile_line(line_index, &tokens) {
            Ok(instr) => {
                instr.encode_into(&mut out.bytes);
                out.instruction_count += 1;
                line_index += 1;
            }
            Err(kind) => {
                let err = CompileError {
                    line_index,
                    source_line: source_idx + 1,
                    tokens,
                    kind,
                };
                tracing::warn!(error = %err, "compilation stopped");
                out.error = Some(err);
                break;
            }
        }
    }
    out
}
