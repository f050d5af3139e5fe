//! Command-level tests: argument parsing, settings resolution and the
//! compile / run / decompile / bundle workflow against a temp directory.

use clap::Parser;
use opl_cli::commands::{
    cmd_bundle, cmd_compile, cmd_decompile, cmd_emit, cmd_exec, cmd_init, cmd_run,
    parse_embedded_file, Cli, Commands, Settings,
};
use opl_cli::config::OplConfig;
use opl_compiler::{compile, Decompiler};
use opl_vm::{ErrorMode, ERROR_MARKER};
use std::path::{Path, PathBuf};

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("opl_cli_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn quiet(root: &Path) -> Settings {
    Settings {
        quiet: true,
        root: root.to_path_buf(),
        ..Settings::default()
    }
}

fn write_source(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, source).unwrap();
    path
}

// ─── Argument parsing ───

#[test]
fn parse_run_with_trailing_args() {
    let cli = Cli::try_parse_from(["opl", "--error-mode", "none", "run", "a.opc", "x", "-y"])
        .unwrap();
    assert_eq!(cli.global.error_mode, Some(ErrorMode::None));
    match cli.command {
        Commands::Run { file, args } => {
            assert_eq!(file, PathBuf::from("a.opc"));
            assert_eq!(args, vec!["x", "-y"]);
        }
        other => panic!("unexpected command {:?}", other),
    }
}

#[test]
fn parse_rejects_unknown_error_mode() {
    assert!(Cli::try_parse_from(["opl", "--error-mode", "loud", "init"]).is_err());
}

#[test]
fn parse_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "opl", "decompile", "a.opc", "--assume", "f", "--no-strings", "--sudo", "-vv",
    ])
    .unwrap();
    assert!(cli.global.sudo);
    assert_eq!(cli.global.verbose, 2);
    assert!(matches!(
        cli.command,
        Commands::Decompile {
            no_strings: true,
            assume: Some(opl_compiler::AssumedType::Float),
            ..
        }
    ));
}

// ─── Settings ───

#[test]
fn flags_override_config() {
    let config = OplConfig::parse(
        r#"
[runtime]
error_mode = "d"
restricted = true
max_steps = 10
plugin_dirs = ["/plugins"]
"#,
    )
    .unwrap();
    let cli = Cli::try_parse_from([
        "opl", "--error-mode", "s", "--max-steps", "99", "--plugin-dir", "/more", "init",
    ])
    .unwrap();
    let settings = Settings::resolve(&config, &cli.global);
    assert_eq!(settings.options.error_mode, ErrorMode::Stop);
    assert_eq!(settings.options.max_instructions, Some(99));
    assert!(settings.restricted);
    assert!(!settings.options.superuser);
    assert_eq!(
        settings.options.plugin_dirs,
        vec![PathBuf::from("/plugins"), PathBuf::from("/more")]
    );
    assert_eq!(settings.root, PathBuf::from("."));
}

#[test]
fn config_values_apply_without_flags() {
    let config = OplConfig::parse("[runtime]\nerror_mode = \"none\"\nsuperuser = true\n").unwrap();
    let cli = Cli::try_parse_from(["opl", "init"]).unwrap();
    let settings = Settings::resolve(&config, &cli.global);
    assert_eq!(settings.options.error_mode, ErrorMode::None);
    assert!(settings.options.superuser);
    assert!(settings.try_strings);
}

// ─── Workflow ───

#[test]
fn compile_then_run() {
    let dir = temp_dir();
    let src = write_source(&dir, "hello.opl", "2 s'hi' i1\n30 i1 i1 b1\n1 i1\n");
    let binary = cmd_compile(&src, None).unwrap();
    assert_eq!(binary, dir.join("hello.opc"));

    let mut out = Vec::new();
    cmd_run(&quiet(&dir), &binary, vec![], &mut out).unwrap();
    assert_eq!(out, b"hi");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn compile_error_keeps_partial_output() {
    let dir = temp_dir();
    let src = write_source(&dir, "bad.opl", "2 s'a' i1\n2 q1 i2\n1 i1\n");
    let err = cmd_compile(&src, None).unwrap_err();
    assert_eq!(err.primary, "compilation failed");

    let partial = std::fs::read(dir.join("bad.opc")).unwrap();
    assert_eq!(partial, compile("2 s'a' i1").bytes);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn decompile_round_trips() {
    let dir = temp_dir();
    let source = "2 s'hi there' i1\n30 i1 i1 b1\n1 i1\n";
    let src = write_source(&dir, "prog.opl", source);
    let binary = cmd_compile(&src, Some(dir.join("prog.bin"))).unwrap();

    let text_path = cmd_decompile(&Decompiler::default(), &binary, None).unwrap();
    assert_eq!(text_path, dir.join("prog.opl"));
    let text = std::fs::read_to_string(&text_path).unwrap();
    assert_eq!(compile(&text).into_result().unwrap(), std::fs::read(&binary).unwrap());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn run_reads_files_under_root_and_sees_args() {
    let dir = temp_dir();
    std::fs::write(dir.join("data.txt"), "abc").unwrap();
    let src = write_source(
        &dir,
        "read.opl",
        "2 s'data.txt' i0\n46 i0 i1\n30 i1 i1\n2 i0 i2\n28 i2 i3\n1 i3\n",
    );
    let binary = cmd_compile(&src, None).unwrap();

    let mut out = Vec::new();
    cmd_run(&quiet(&dir), &binary, vec!["first".into()], &mut out).unwrap();
    assert_eq!(out, b"abcfirst");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn run_reports_handled_error_after_printing_output() {
    let dir = temp_dir();
    let src = write_source(&dir, "fail.opl", "3 i9 i1\n");
    let binary = cmd_compile(&src, None).unwrap();

    let mut out = Vec::new();
    let err = cmd_run(&quiet(&dir), &binary, vec![], &mut out).unwrap_err();
    assert_eq!(out, ERROR_MARKER);
    assert_eq!(err.causes, vec!["undefined address: 9"]);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn run_missing_file() {
    let err = cmd_run(&quiet(Path::new(".")), Path::new("/no/such.opc"), vec![], &mut Vec::new())
        .unwrap_err();
    assert!(err.primary.starts_with("cannot read"));
}

#[test]
fn bundle_then_exec() {
    let dir = temp_dir();
    std::fs::write(dir.join("cfg.txt"), "42").unwrap();
    let src = write_source(&dir, "main.opl", "120\n2 s'cfg' i0\n46 i0 i1\n1 i1\n");
    let binary = cmd_compile(&src, None).unwrap();
    let bundle = dir.join("app.ope");
    let entry = format!("cfg={}", dir.join("cfg.txt").display());
    cmd_bundle(&binary, &[entry], &bundle).unwrap();

    let mut out = Vec::new();
    cmd_exec(&quiet(&dir), &bundle, vec![], &mut out).unwrap();
    assert_eq!(out, b"42");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn bundle_rejects_malformed_main() {
    let dir = temp_dir();
    std::fs::write(dir.join("junk.opc"), [0, 0, 1]).unwrap();
    let err = cmd_bundle(&dir.join("junk.opc"), &[], &dir.join("out.ope")).unwrap_err();
    assert_eq!(err.primary, "malformed program");
    assert!(!dir.join("out.ope").exists());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn embedded_file_parsing() {
    assert_eq!(
        parse_embedded_file("cfg=data/cfg.txt").unwrap(),
        ("cfg".to_string(), PathBuf::from("data/cfg.txt"))
    );
    assert!(parse_embedded_file("cfg").is_err());
    assert!(parse_embedded_file("=x").is_err());
}

#[test]
fn emit_prints_json_program() {
    let dir = temp_dir();
    let src = write_source(&dir, "e.opl", "2 s'a' i1\n1\n");
    let mut out = Vec::new();
    cmd_emit(&src, None, &mut out).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let instructions = json["instructions"].as_array().unwrap();
    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[0]["opcode"], 2);
    assert_eq!(instructions[1]["line_index"], 1);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn init_writes_template_once() {
    let dir = temp_dir();
    let path = cmd_init(&dir).unwrap();
    let cfg = OplConfig::load_from(&path).unwrap();
    assert_eq!(cfg.runtime.error_mode, Some(ErrorMode::DisplayStop));
    assert!(cmd_init(&dir).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn log_levels() {
    assert_eq!(opl_cli::default_log_level(0), "warn");
    assert_eq!(opl_cli::default_log_level(2), "debug");
    assert_eq!(opl_cli::default_log_level(9), "trace");
}
