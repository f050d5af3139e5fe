//! `opl` subcommands.
//!
//! Each command takes resolved [`Settings`] and a writer for program output
//! so the whole surface can be driven from tests.

use crate::colors::{bold, gray, status_label, yellow};
use crate::config::{OplConfig, CONFIG_FILE};
use crate::error_chain::{io_error, ErrorChain};
use clap::{ArgAction, Args, Parser, Subcommand};
use opl_compiler::{compile, AssumedType, Decompiler};
use opl_core::bundle::Bundle;
use opl_core::bytecode::Program;
use opl_provider_fs::HostFs;
use opl_runtime::StderrSink;
use opl_vm::{ErrorMode, ExecOptions, Execution, Vm};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "opl", version, about = "Compile, inspect and run OPL programs")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Error policy: ds, d, s or none
    #[arg(long, global = true, value_name = "MODE")]
    pub error_mode: Option<ErrorMode>,

    /// Run as superuser (bypass restricted-mode checks)
    #[arg(long, global = true)]
    pub sudo: bool,

    /// Refuse file writes, deletes, commands, imports and plugins
    #[arg(long, global = true)]
    pub restricted: bool,

    /// Do not print the live trace of write opcodes
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory the file opcodes are rooted at
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Stop after this many instructions per thread
    #[arg(long, global = true, value_name = "N")]
    pub max_steps: Option<u64>,

    /// Directory searched for extension plugins (repeatable)
    #[arg(long = "plugin-dir", global = true, value_name = "DIR")]
    pub plugin_dirs: Vec<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a binary program and print its output buffer
    Run {
        file: PathBuf,
        /// Runtime arguments visible to opcode 28
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Compile source text to a binary program
    Compile {
        file: PathBuf,
        /// Output path (default: <file>.opc)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Reconstruct source text from a binary program
    Decompile {
        file: PathBuf,
        /// Rendering for non-printable arguments: b, i, f or s
        #[arg(long, value_name = "TYPE")]
        assume: Option<AssumedType>,
        /// Never render arguments as strings
        #[arg(long)]
        no_strings: bool,
        /// Output path (default: <file>.opl)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile source and print the decoded program as JSON
    Emit {
        file: PathBuf,
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Package a program and data files into an executable bundle
    Bundle {
        main: PathBuf,
        /// Embedded file as NAME=PATH (repeatable)
        #[arg(long = "file", value_name = "NAME=PATH")]
        files: Vec<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Execute a bundle
    Exec {
        file: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Create an opl.toml config file in the current directory
    Init,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Config file values with command-line overrides applied.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub options: ExecOptions,
    pub restricted: bool,
    pub root: PathBuf,
    pub quiet: bool,
    pub assume: AssumedType,
    pub try_strings: bool,
}

impl Settings {
    pub fn resolve(config: &OplConfig, global: &GlobalArgs) -> Self {
        let runtime = &config.runtime;
        let mut plugin_dirs = runtime.plugin_dirs.clone();
        plugin_dirs.extend(global.plugin_dirs.iter().cloned());
        Self {
            options: ExecOptions {
                error_mode: global.error_mode.or(runtime.error_mode).unwrap_or_default(),
                superuser: global.sudo || runtime.superuser,
                runtime_args: Vec::new(),
                max_instructions: global.max_steps.or(runtime.max_steps),
                plugin_dirs,
            },
            restricted: global.restricted || runtime.restricted,
            root: global
                .root
                .clone()
                .or_else(|| runtime.root.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            quiet: global.quiet,
            assume: config.decompiler.assume,
            try_strings: config.decompiler.try_strings,
        }
    }

    pub fn vm(&self, runtime_args: Vec<String>) -> Vm {
        let files = HostFs::new(&self.root).restricted(self.restricted);
        let vm = Vm::new()
            .with_files(Arc::new(files))
            .with_options(ExecOptions {
                runtime_args,
                ..self.options.clone()
            });
        if self.quiet {
            vm
        } else {
            vm.with_sink(Arc::new(StderrSink))
        }
    }
}

/// Dispatch a parsed command line.
pub fn execute(cli: Cli, settings: &Settings, out: &mut dyn Write) -> Result<(), ErrorChain> {
    match cli.command {
        Commands::Run { file, args } => cmd_run(settings, &file, args, out),
        Commands::Compile { file, output } => cmd_compile(&file, output).map(|_| ()),
        Commands::Decompile {
            file,
            assume,
            no_strings,
            output,
        } => {
            let decompiler = Decompiler::new(
                assume.unwrap_or(settings.assume),
                settings.try_strings && !no_strings,
            );
            cmd_decompile(&decompiler, &file, output).map(|_| ())
        }
        Commands::Emit { file, output } => cmd_emit(&file, output, out),
        Commands::Bundle {
            main,
            files,
            output,
        } => cmd_bundle(&main, &files, &output),
        Commands::Exec { file, args } => cmd_exec(settings, &file, args, out),
        Commands::Init => {
            let dir = std::env::current_dir()?;
            cmd_init(&dir).map(|_| ())
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn read_bytes(path: &Path) -> Result<Vec<u8>, ErrorChain> {
    std::fs::read(path).map_err(|e| io_error("read", path, e))
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), ErrorChain> {
    std::fs::write(path, bytes).map_err(|e| io_error("write", path, e))
}

/// Write the output buffer, then report a handled error as a failure.
fn finish(exec: Execution, file: &Path, out: &mut dyn Write) -> Result<(), ErrorChain> {
    exec.wait_threads()?;
    out.write_all(&exec.output)?;
    out.flush()?;
    match (exec.errored, exec.error) {
        (true, Some(err)) => Err(ErrorChain::new(format!(
            "'{}' stopped on an error",
            file.display()
        ))
        .caused_by(err.to_string())),
        _ => Ok(()),
    }
}

pub fn cmd_run(
    settings: &Settings,
    file: &Path,
    args: Vec<String>,
    out: &mut dyn Write,
) -> Result<(), ErrorChain> {
    let bytes = read_bytes(file)?;
    let exec = settings.vm(args).execute(&bytes)?;
    finish(exec, file, out)
}

pub fn cmd_exec(
    settings: &Settings,
    file: &Path,
    args: Vec<String>,
    out: &mut dyn Write,
) -> Result<(), ErrorChain> {
    let bytes = read_bytes(file)?;
    let exec = settings.vm(args).execute_bundle(&bytes)?;
    finish(exec, file, out)
}

/// Compile `file`. Partial output is written even when a line fails.
pub fn cmd_compile(file: &Path, output: Option<PathBuf>) -> Result<PathBuf, ErrorChain> {
    let source = std::fs::read_to_string(file).map_err(|e| io_error("read", file, e))?;
    let output = output.unwrap_or_else(|| file.with_extension("opc"));
    let compilation = compile(&source);
    write_bytes(&output, &compilation.bytes)?;
    match compilation.error {
        Some(err) => Err(ErrorChain::from(err).caused_by(format!(
            "{} instruction(s) before the failing line were written to '{}'",
            compilation.instruction_count,
            output.display()
        ))),
        None => {
            println!(
                "{} {} {}",
                status_label("Compiled"),
                bold(&file.display().to_string()),
                gray(&format!("({} instructions)", compilation.instruction_count))
            );
            Ok(output)
        }
    }
}

pub fn cmd_decompile(
    decompiler: &Decompiler,
    file: &Path,
    output: Option<PathBuf>,
) -> Result<PathBuf, ErrorChain> {
    let bytes = read_bytes(file)?;
    let text = decompiler.decompile(&bytes)?;
    let output = output.unwrap_or_else(|| file.with_extension("opl"));
    write_bytes(&output, text.as_bytes())?;
    println!("{} {}", status_label("Decompiled"), output.display());
    Ok(output)
}

pub fn cmd_emit(file: &Path, output: Option<PathBuf>, out: &mut dyn Write) -> Result<(), ErrorChain> {
    let source = std::fs::read_to_string(file).map_err(|e| io_error("read", file, e))?;
    let bytes = compile(&source).into_result()?;
    let program = Program::decode(&bytes)?;
    let json = serde_json::to_string_pretty(&program)?;
    match output {
        Some(path) => write_bytes(&path, json.as_bytes()),
        None => {
            writeln!(out, "{}", json)?;
            Ok(())
        }
    }
}

/// Parse `NAME=PATH`.
pub fn parse_embedded_file(entry: &str) -> Result<(String, PathBuf), ErrorChain> {
    match entry.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(ErrorChain::new(format!(
            "invalid --file '{}' (expected NAME=PATH)",
            entry
        ))),
    }
}

pub fn cmd_bundle(main: &Path, files: &[String], output: &Path) -> Result<(), ErrorChain> {
    let program = read_bytes(main)?;
    Program::decode(&program)?;
    let mut bundle = Bundle::new(program);
    for entry in files {
        let (name, path) = parse_embedded_file(entry)?;
        if bundle.files.contains_key(&name) {
            eprintln!("{} '{}' given twice, keeping the last", yellow("warning:"), name);
        }
        bundle = bundle.with_file(name, read_bytes(&path)?);
    }
    write_bytes(output, &bundle.encode())?;
    println!(
        "{} {} {}",
        status_label("Bundled"),
        output.display(),
        gray(&format!("({} file(s))", bundle.files.len()))
    );
    Ok(())
}

/// Write a default `opl.toml` into `dir`. Never overwrites.
pub fn cmd_init(dir: &Path) -> Result<PathBuf, ErrorChain> {
    let path = dir.join(CONFIG_FILE);
    if path.exists() {
        return Err(ErrorChain::new(format!(
            "{} already exists, not overwriting",
            path.display()
        )));
    }
    write_bytes(&path, OplConfig::default_template().as_bytes())?;
    println!("{} {}", status_label("Created"), path.display());
    Ok(path)
}
