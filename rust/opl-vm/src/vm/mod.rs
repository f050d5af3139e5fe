//! OPL executor: the instruction-pointer loop over a decoded [`Program`].
//!
//! One [`Executor`] runs one instruction sequence with its own [`Context`].
//! Threads, imports and nested runs each get their own executor, sharing the
//! namespace table, the global stop flag and the detached-thread list through
//! [`Shared`].

mod helpers;
mod intrinsics;
mod ops;
mod processes;

use crate::extension::{ExtensionError, ExtensionRegistry};
use crate::namespace::{NamespaceTable, SharedNamespaces};
use opl_compiler::CompileError;
use opl_core::bundle::Bundle;
use opl_core::bytecode::{DecodeError, Instruction, Program};
use opl_core::opcodes::OpCode;
use opl_core::values::ValueError;
use opl_runtime::panic_boundary::join_thread;
use opl_runtime::{FileProvider, InputSource, MemoryFiles, PrintSink, ProviderError, StdinInput};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

use helpers::Cmp;
use ops::{ArithOp, Domain};

/// Appended to the output when an error is displayed.
pub const ERROR_MARKER: [u8; 4] = [0, 0, 0, 1];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("decode error: {0}")]
    Decode(String),
    #[error("undefined address: {0}")]
    UndefinedAddress(u32),
    #[error("type decode error: {0}")]
    TypeDecode(String),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u32),
    #[error("cannot delete active namespace: {0}")]
    CannotDeleteActiveNamespace(u32),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("thread join failed: {0}")]
    Join(String),
    #[error("undefined namespace: {0}")]
    UndefinedNamespace(u32),
    #[error("undefined label: {0}")]
    UndefinedLabel(String),
    #[error("arithmetic error: {0}")]
    Arithmetic(String),
    #[error("extension error: {0}")]
    Extension(String),
    #[error("compile error: {0}")]
    Compile(String),
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        VmError::Decode(err.to_string())
    }
}

impl From<ValueError> for VmError {
    fn from(err: ValueError) -> Self {
        VmError::TypeDecode(err.to_string())
    }
}

impl From<ProviderError> for VmError {
    fn from(err: ProviderError) -> Self {
        VmError::Io(err.to_string())
    }
}

impl From<ExtensionError> for VmError {
    fn from(err: ExtensionError) -> Self {
        VmError::Extension(err.0)
    }
}

impl From<CompileError> for VmError {
    fn from(err: CompileError) -> Self {
        VmError::Compile(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorMode {
    /// Marker, diagnostic, halt.
    #[default]
    #[serde(rename = "ds")]
    DisplayStop,
    /// Marker, diagnostic, continue.
    #[serde(rename = "d")]
    Display,
    /// Halt silently.
    #[serde(rename = "s")]
    Stop,
    /// Continue silently.
    #[serde(rename = "none")]
    None,
}

impl ErrorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorMode::DisplayStop => "ds",
            ErrorMode::Display => "d",
            ErrorMode::Stop => "s",
            ErrorMode::None => "none",
        }
    }

    fn displays(self) -> bool {
        matches!(self, ErrorMode::DisplayStop | ErrorMode::Display)
    }

    fn halts(self) -> bool {
        matches!(self, ErrorMode::DisplayStop | ErrorMode::Stop)
    }
}

impl FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ds" | "display-stop" => Ok(ErrorMode::DisplayStop),
            "d" | "display" => Ok(ErrorMode::Display),
            "s" | "stop" => Ok(ErrorMode::Stop),
            "none" => Ok(ErrorMode::None),
            other => Err(format!(
                "unknown error mode '{}' (expected ds, d, s or none)",
                other
            )),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Host configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub error_mode: ErrorMode,
    /// Bypass restricted-mode checks in providers, imports and plugins.
    pub superuser: bool,
    pub runtime_args: Vec<String>,
    /// Per-executor step budget. Exceeding it always halts.
    pub max_instructions: Option<u64>,
    /// Directories searched for plugin libraries. Empty disables plugins.
    pub plugin_dirs: Vec<PathBuf>,
}

/// Host capabilities and options. Cheap to clone; every spawned thread gets
/// its own copy.
#[derive(Clone)]
pub struct Vm {
    sink: Option<Arc<dyn PrintSink>>,
    files: Arc<dyn FileProvider>,
    bundle_files: Option<Arc<dyn FileProvider>>,
    input: Arc<dyn InputSource>,
    extensions: ExtensionRegistry,
    options: ExecOptions,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            sink: None,
            files: Arc::new(MemoryFiles::new()),
            bundle_files: None,
            input: Arc::new(StdinInput),
            extensions: ExtensionRegistry::new(),
            options: ExecOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PrintSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileProvider>) -> Self {
        self.files = files;
        self
    }

    pub fn with_bundle_files(mut self, files: Arc<dyn FileProvider>) -> Self {
        self.bundle_files = Some(files);
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = input;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Decode and run a binary program with a fresh namespace table.
    pub fn execute(&self, bytes: &[u8]) -> Result<Execution, VmError> {
        let program = Program::decode(bytes)?;
        Ok(self.execute_program(program))
    }

    pub fn execute_program(&self, program: Program) -> Execution {
        self.execute_shared(program, NamespaceTable::shared(), 0)
    }

    /// Run against an existing namespace table with `active` selected.
    pub fn execute_shared(
        &self,
        program: Program,
        namespaces: SharedNamespaces,
        active: u32,
    ) -> Execution {
        let shared = Arc::new(Shared {
            namespaces,
            stop: AtomicBool::new(false),
            threads: Mutex::new(Vec::new()),
        });
        let ctx = Context::new(program, active, self.options.error_mode, false);
        tracing::debug!(instructions = ctx.program.len(), "execute");
        let outcome = Executor::new(self, shared.clone(), ctx).run();
        Execution {
            output: outcome.output,
            errored: outcome.errored,
            error: outcome.error,
            namespaces: shared.namespaces.clone(),
            shared,
        }
    }

    /// Run a bundle's main program with its embedded files available to
    /// the bundle-file opcodes.
    pub fn execute_bundle(&self, bytes: &[u8]) -> Result<Execution, VmError> {
        let bundle = Bundle::decode(bytes)?;
        let vm = self
            .clone()
            .with_bundle_files(Arc::new(MemoryFiles::from_map(bundle.files)));
        vm.execute(&bundle.main)
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

pub struct Execution {
    pub output: Vec<u8>,
    /// Set when an error was handled in a mode other than `None`.
    pub errored: bool,
    /// The last error raised, in any mode.
    pub error: Option<VmError>,
    pub namespaces: SharedNamespaces,
    shared: Arc<Shared>,
}

impl Execution {
    /// Join every detached thread, including threads spawned while waiting.
    pub fn wait_threads(&self) -> Result<(), VmError> {
        let mut failure = None;
        loop {
            let handles = std::mem::take(&mut *self.shared.threads.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(panic) = join_thread(handle) {
                    failure.get_or_insert(VmError::Join(panic.message().to_string()));
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Ask every thread of this execution to stop before its next instruction.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    pub fn read(&self, namespace: u32, addr: u32) -> Option<Vec<u8>> {
        let table = self.namespaces.lock();
        table.get(namespace)?.get(addr).map(<[u8]>::to_vec)
    }

    pub fn namespace_ids(&self) -> Vec<u32> {
        self.namespaces.lock().ids()
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("output", &self.output)
            .field("errored", &self.errored)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Executor internals
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    namespaces: SharedNamespaces,
    stop: AtomicBool,
    threads: Mutex<Vec<JoinHandle<Outcome>>>,
}

#[derive(Debug, Default)]
pub(crate) struct Outcome {
    output: Vec<u8>,
    errored: bool,
    error: Option<VmError>,
}

pub(crate) struct Context {
    program: Program,
    ip: usize,
    active: u32,
    running: bool,
    errored: bool,
    last_error: Option<VmError>,
    error_mode: ErrorMode,
    output: Vec<u8>,
    use_bundle_files: bool,
    steps: u64,
}

impl Context {
    fn new(program: Program, active: u32, error_mode: ErrorMode, use_bundle_files: bool) -> Self {
        Self {
            program,
            ip: 0,
            active,
            running: true,
            errored: false,
            last_error: None,
            error_mode,
            output: Vec::new(),
            use_bundle_files,
            steps: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Jump(usize),
    Halt,
}

pub(crate) struct Executor<'v> {
    vm: &'v Vm,
    shared: Arc<Shared>,
    ctx: Context,
}

impl<'v> Executor<'v> {
    fn new(vm: &'v Vm, shared: Arc<Shared>, ctx: Context) -> Self {
        Self { vm, shared, ctx }
    }

    fn run(mut self) -> Outcome {
        while self.ctx.running && self.ctx.ip < self.ctx.program.len() {
            if self.shared.stop.load(Ordering::SeqCst) {
                tracing::debug!(ip = self.ctx.ip, "stop flag set");
                break;
            }
            if let Some(limit) = self.vm.options.max_instructions {
                if self.ctx.steps >= limit {
                    self.handle_error(VmError::InstructionLimitExceeded(limit));
                    self.ctx.running = false;
                    break;
                }
            }
            self.ctx.steps += 1;
            match self.step() {
                Ok(Flow::Next) => self.ctx.ip += 1,
                Ok(Flow::Jump(target)) => self.ctx.ip = target,
                Ok(Flow::Halt) => self.ctx.running = false,
                Err(err) => self.handle_error(err),
            }
        }
        Outcome {
            output: self.ctx.output,
            errored: self.ctx.errored,
            error: self.ctx.last_error,
        }
    }

    fn step(&mut self) -> Result<Flow, VmError> {
        let instr = match self.ctx.program.get(self.ctx.ip) {
            Some(instr) => instr.clone(),
            None => return Ok(Flow::Halt),
        };
        tracing::trace!(ip = self.ctx.ip, opcode = instr.opcode, "dispatch");

        if let Some(ext) = self.extension(self.ctx.active) {
            self.call_extension(&ext, processes::Hook::Begin, &instr)?;
        }
        let flow = self.dispatch(&instr)?;
        if let Some(ext) = self.extension(self.ctx.active) {
            self.call_extension(&ext, processes::Hook::End, &instr)?;
        }
        Ok(flow)
    }

    fn handle_error(&mut self, err: VmError) {
        let mode = self.ctx.error_mode;
        let code = self
            .ctx
            .program
            .get(self.ctx.ip)
            .map(Instruction::describe)
            .unwrap_or_default();
        tracing::warn!(ip = self.ctx.ip, error = %err, mode = %mode, "instruction failed");

        if mode.displays() {
            self.ctx.output.extend_from_slice(&ERROR_MARKER);
            self.print(&format!("ERROR: {} LINE: {} CODE: {}", err, self.ctx.ip, code));
        }
        if mode != ErrorMode::None {
            self.ctx.errored = true;
        }
        let terminal = matches!(err, VmError::InstructionLimitExceeded(_));
        self.ctx.last_error = Some(err);
        if mode.halts() || terminal {
            self.ctx.running = false;
        } else {
            self.ctx.ip += 1;
        }
    }

    fn print(&self, text: &str) {
        if let Some(sink) = &self.vm.sink {
            sink.write(text);
        }
    }

    fn dispatch(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        match OpCode::from_u32(instr.opcode) {
            Some(op) => self.dispatch_native(op, instr),
            None => self.dispatch_extension(instr),
        }
    }

    fn dispatch_native(&mut self, op: OpCode, instr: &Instruction) -> Result<Flow, VmError> {
        use OpCode::*;
        match op {
            Start | Nop | Label => Ok(Flow::Next),
            Halt => self.op_halt(instr),
            StopAll => {
                tracing::debug!(ip = self.ctx.ip, "stop all threads");
                self.shared.stop.store(true, Ordering::SeqCst);
                Ok(Flow::Halt)
            }

            // memory
            Store => self.op_store(instr),
            Copy => self.op_copy(instr),
            Concat => self.op_concat(instr),
            Insert => self.op_insert(instr),
            KeepFront => self.op_keep_front(instr),
            DropFront => self.op_drop_front(instr),
            RemoveRange => self.op_remove_range(instr),
            Length => self.op_length(instr),
            Delete => self.op_delete(instr),
            Slice => self.op_slice(instr),
            Repeat => self.op_repeat(instr),
            LoadIndirect => self.op_load_indirect(instr),
            StoreIndirect => self.op_store_indirect(instr),
            ListAddresses => self.op_list_addresses(instr),
            ClearMemory => self.op_clear_memory(),
            Reverse => self.op_reverse(instr),
            Compare => self.op_compare(instr),
            Snapshot => self.op_snapshot(instr),
            Restore => self.op_restore(instr),
            Not => self.op_not(instr),

            // arithmetic
            FloatAdd => self.arith(instr, Domain::Float, ArithOp::Add),
            FloatSub => self.arith(instr, Domain::Float, ArithOp::Sub),
            FloatMul => self.arith(instr, Domain::Float, ArithOp::Mul),
            FloatDiv => self.arith(instr, Domain::Float, ArithOp::Div),
            FloatPow => self.arith(instr, Domain::Float, ArithOp::Pow),
            FloatMod => self.arith(instr, Domain::Float, ArithOp::Mod),
            FloatAnd => self.arith(instr, Domain::Float, ArithOp::And),
            FloatOr => self.arith(instr, Domain::Float, ArithOp::Or),
            FloatXor => self.arith(instr, Domain::Float, ArithOp::Xor),
            UintAdd => self.arith(instr, Domain::Uint, ArithOp::Add),
            UintSub => self.arith(instr, Domain::Uint, ArithOp::Sub),
            UintMul => self.arith(instr, Domain::Uint, ArithOp::Mul),
            UintDiv => self.arith(instr, Domain::Uint, ArithOp::Div),
            UintPow => self.arith(instr, Domain::Uint, ArithOp::Pow),
            UintMod => self.arith(instr, Domain::Uint, ArithOp::Mod),
            UintAnd => self.arith(instr, Domain::Uint, ArithOp::And),
            UintOr => self.arith(instr, Domain::Uint, ArithOp::Or),
            UintXor => self.arith(instr, Domain::Uint, ArithOp::Xor),
            ShiftLeft => self.arith(instr, Domain::Uint, ArithOp::Shl),
            ShiftRight => self.arith(instr, Domain::Uint, ArithOp::Shr),
            SintAdd => self.arith(instr, Domain::Sint, ArithOp::Add),
            SintSub => self.arith(instr, Domain::Sint, ArithOp::Sub),
            SintMul => self.arith(instr, Domain::Sint, ArithOp::Mul),
            SintDiv => self.arith(instr, Domain::Sint, ArithOp::Div),
            SintPow => self.arith(instr, Domain::Sint, ArithOp::Pow),
            SintAnd => self.arith(instr, Domain::Sint, ArithOp::And),
            SintOr => self.arith(instr, Domain::Sint, ArithOp::Or),
            SintXor => self.arith(instr, Domain::Sint, ArithOp::Xor),
            BigAdd => self.op_big(instr, false),
            BigSub => self.op_big(instr, true),

            // conversion
            UintToString | FloatToString | StringToUint | StringToFloat | UintToFloat
            | FloatToUint | SintToString | SintToFloat | SintToUint | StringToSint
            | FloatToSint | UintToSint => self.convert(op, instr),

            // control flow
            Jump => self.jump_if(instr, |_, _| Ok(true)),
            JumpEq => self.jump_if(instr, helpers::bytes_eq),
            JumpFloatGt => self.jump_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Gt)),
            JumpFloatLt => self.jump_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Lt)),
            JumpFloatGe => self.jump_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Ge)),
            JumpFloatLe => self.jump_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Le)),
            JumpFloatEq => self.jump_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Eq)),
            BranchEq => self.branch(instr, helpers::bytes_eq),
            BranchFloatGt => self.branch(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Gt)),
            BranchFloatLt => self.branch(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Lt)),
            BranchFloatGe => self.branch(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Ge)),
            BranchFloatLe => self.branch(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Le)),
            BranchFloatEq => self.branch(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Eq)),
            BranchContains => self.branch(instr, helpers::contains),
            JumpLabel => self.jump_label_if(instr, |_, _| Ok(true)),
            JumpLabelEq => self.jump_label_if(instr, helpers::bytes_eq),
            JumpLabelNe => self.jump_label_if(instr, |ns, i| helpers::bytes_eq(ns, i).map(|eq| !eq)),
            JumpLabelFloatGt => self.jump_label_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Gt)),
            JumpLabelFloatLt => self.jump_label_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Lt)),
            JumpLabelFloatGe => self.jump_label_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Ge)),
            JumpLabelFloatLe => self.jump_label_if(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Le)),
            BranchLabelEq => self.branch_label(instr, helpers::bytes_eq),
            BranchLabelNe => self.branch_label(instr, |ns, i| helpers::bytes_eq(ns, i).map(|eq| !eq)),
            BranchLabelFloatGt => self.branch_label(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Gt)),
            BranchLabelFloatLt => self.branch_label(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Lt)),
            BranchLabelFloatGe => self.branch_label(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Ge)),
            BranchLabelFloatLe => self.branch_label(instr, |ns, i| helpers::float_cmp(ns, i, Cmp::Le)),
            BranchLabelUintGt => self.branch_label(instr, |ns, i| helpers::uint_cmp(ns, i, Cmp::Gt)),
            BranchLabelUintLt => self.branch_label(instr, |ns, i| helpers::uint_cmp(ns, i, Cmp::Lt)),
            BranchLabelUintGe => self.branch_label(instr, |ns, i| helpers::uint_cmp(ns, i, Cmp::Ge)),
            BranchLabelUintLe => self.branch_label(instr, |ns, i| helpers::uint_cmp(ns, i, Cmp::Le)),
            ErrorDisplayStop => self.set_error_mode(ErrorMode::DisplayStop),
            ErrorDisplay => self.set_error_mode(ErrorMode::Display),
            ErrorStop => self.set_error_mode(ErrorMode::Stop),
            ErrorNone => self.set_error_mode(ErrorMode::None),

            // I/O
            ReadLine => self.op_read_line(instr),
            ReadChars => self.op_read_chars(instr),
            RuntimeArg => self.op_runtime_arg(instr),
            RuntimeArgCount => self.op_runtime_arg_count(instr),
            DumpMemory => self.op_dump_memory(),
            Write => self.op_write(instr),
            ReadFile => self.op_read_file(instr),
            WriteFile => self.op_write_file(instr),
            DeleteFile => self.op_delete_file(instr),
            ListFiles => self.op_list_files(instr),
            RunCommand => self.op_run_command(instr),
            DumpProgram => self.op_dump_program(instr),
            LoadProgram => self.op_load_program(instr),
            GetOutput => self.op_get_output(instr),
            SetOutput => self.op_set_output(instr),
            EpochTime => self.op_epoch_time(instr),
            LocalTime => self.op_local_time(instr),
            Sleep => self.op_sleep(instr),
            UseBundleFiles => self.use_files(true),
            UsePrimaryFiles => self.use_files(false),

            // namespaces
            SwitchNamespace => self.op_switch_namespace(instr),
            CreateNamespace => self.op_create_namespace(instr),
            DeleteNamespace => self.op_delete_namespace(instr),
            ListNamespaces => self.op_list_namespaces(instr),
            PruneNamespaces => self.op_prune_namespaces(),
            CopyToNamespace => self.op_copy_to_namespace(instr),

            // concurrency
            Spawn => self.op_spawn(instr, false),
            SpawnJoin => self.op_spawn(instr, true),
            SpawnLabel => self.op_spawn_label(instr, false),
            SpawnLabelJoin => self.op_spawn_label(instr, true),

            // sub-executions
            Import => self.op_import(instr),
            RunSource => self.op_run_source(instr),
            CompileSource => self.op_compile_source(instr),
            RunBinary => self.op_run_binary(instr),

            // extensions
            BindExtension => self.op_bind_extension(instr),
            UnbindExtension => self.op_unbind_extension(),
        }
    }

    fn op_halt(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        if instr.arg(0).is_some() {
            let value = self.with_memory(|ns| Ok(helpers::value(ns, instr, 0)?.to_vec()))?;
            self.ctx.output.extend_from_slice(&value);
        }
        Ok(Flow::Halt)
    }

    fn set_error_mode(&mut self, mode: ErrorMode) -> Result<Flow, VmError> {
        self.ctx.error_mode = mode;
        Ok(Flow::Next)
    }
}
