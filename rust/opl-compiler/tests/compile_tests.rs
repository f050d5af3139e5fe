//! Compiler/decompiler behaviour over whole programs.

use opl_compiler::{compile, decompile, AssumedType, Decompiler};
use opl_core::bytecode::decode_instructions;

fn compile_ok(source: &str) -> Vec<u8> {
    compile(source).into_result().expect("source should compile")
}

#[test]
fn scenario_program_layout() {
    let bytes = compile_ok("2 s'hi' i1\n30 i1 i1 b1\n1 i1\n");
    let instrs = decode_instructions(&bytes).unwrap();
    assert_eq!(instrs.len(), 3);
    assert_eq!(instrs[0].opcode, 2);
    assert_eq!(instrs[0].args, vec![b"hi".to_vec(), vec![0, 0, 0, 1]]);
    assert_eq!(instrs[1].args[2], vec![1]);
    assert_eq!(
        instrs.iter().map(|i| i.line_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn blank_and_comment_lines_do_not_count() {
    let bytes = compile_ok("// header\n\n   \n0\n// middle\n1\n");
    let instrs = decode_instructions(&bytes).unwrap();
    assert_eq!(instrs.len(), 2);
    assert_eq!(instrs[1].line_index, 1);
}

#[test]
fn compile_error_keeps_partial_output() {
    let result = compile("0\n2 i5 i1\n2 q5 i1\n1\n");
    let err = result.error.clone().expect("third line should fail");
    assert_eq!(err.line_index, 2);
    assert_eq!(err.source_line, 3);
    assert_eq!(err.tokens, vec!["2", "q5", "i1"]);
    assert_eq!(result.instruction_count, 2);
    let instrs = decode_instructions(&result.bytes).unwrap();
    assert_eq!(instrs.len(), 2);
    assert!(result.into_result().is_err());
}

#[test]
fn bad_opcode_column_fails_first_line() {
    let result = compile("abc i1\n");
    assert!(result.bytes.is_empty());
    assert!(result.error.is_some());
}

#[test]
fn default_round_trip_for_printable_strings() {
    let source = "2 s'hello world' s'it\\'s'\n30 s'x' s'y'\n1\n";
    let bytes = compile_ok(source);
    let text = decompile(&bytes).unwrap();
    assert_eq!(compile_ok(&text), bytes);
}

#[test]
fn round_trip_with_matching_assumed_type() {
    let cases = [
        ("31 i0 i1 i2\n", AssumedType::Uint),
        ("2 f1.5 f-3.25\n", AssumedType::Float),
        ("2 b0,1,2,200 i0\n", AssumedType::Bytes),
        ("2 h0xff i0\n", AssumedType::Bytes),
        ("2 g-5 i1\n", AssumedType::Bytes),
    ];
    for (source, assume) in cases {
        let bytes = compile_ok(source);
        let text = Decompiler::new(assume, true).decompile(&bytes).unwrap();
        assert_eq!(compile_ok(&text), bytes, "round trip of {:?} via {}", source, text);
    }
}

#[test]
fn multiline_string_survives_round_trip() {
    let bytes = compile_ok("2 s'a\nb' i0\n");
    let instrs = decode_instructions(&bytes).unwrap();
    assert_eq!(instrs[0].args[0], b"a\nb".to_vec());
    let text = decompile(&bytes).unwrap();
    assert_eq!(compile_ok(&text), bytes);
}
