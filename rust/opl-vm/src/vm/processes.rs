//! Threads, nested executions and extension dispatch.

use super::helpers::{addr, text, uint, value};
use super::*;
use crate::extension::{ExtensionContext, ExtensionHandler};
use crate::plugin::{find_plugin, PluginHandler};
use opl_compiler::compile;
use opl_runtime::panic_boundary::{with_panic_boundary, PanicPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Hook {
    Begin,
    End,
    Handle,
}

impl Executor<'_> {
    // -----------------------------------------------------------------------
    // Extensions
    // -----------------------------------------------------------------------

    pub(super) fn extension(&self, namespace: u32) -> Option<Arc<dyn ExtensionHandler>> {
        self.shared.namespaces.lock().extension(namespace)
    }

    /// Call one hook with the namespace table unlocked. Panics come back as
    /// `Extension` errors.
    pub(super) fn call_extension(
        &mut self,
        ext: &Arc<dyn ExtensionHandler>,
        hook: Hook,
        instr: &Instruction,
    ) -> Result<(), VmError> {
        let mut ctx = ExtensionContext {
            namespaces: &self.shared.namespaces,
            active: self.ctx.active,
            ip: self.ctx.ip,
            output: &mut self.ctx.output,
            sink: self.vm.sink.as_deref(),
        };
        let opcode = instr.opcode;
        let result = with_panic_boundary(PanicPolicy::LogAndCatch, || match hook {
            Hook::Begin => ext.on_begin(&mut ctx, opcode, &instr.args),
            Hook::End => ext.on_end(&mut ctx, opcode, &instr.args),
            Hook::Handle => ext.handle(&mut ctx, opcode, &instr.args),
        });
        match result {
            Ok(outcome) => outcome.map_err(VmError::from),
            Err(panic) => Err(VmError::Extension(format!(
                "{} panicked: {}",
                ext.name(),
                panic.message()
            ))),
        }
    }

    pub(super) fn dispatch_extension(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        match self.extension(self.ctx.active) {
            Some(ext) if ext.claims(instr.opcode) => {
                self.call_extension(&ext, Hook::Handle, instr)?;
                Ok(Flow::Next)
            }
            _ => Err(VmError::UnknownOpcode(instr.opcode)),
        }
    }

    fn restricted_guard(&self, what: &str) -> Result<(), VmError> {
        if self.vm.files.is_restricted() && !self.vm.options.superuser {
            return Err(VmError::Io(format!(
                "permission denied: {} (restricted mode)",
                what
            )));
        }
        Ok(())
    }

    fn resolve_extension(&self, name: &str) -> Result<Arc<dyn ExtensionHandler>, VmError> {
        if let Some(handler) = self.vm.extensions.create(name) {
            return Ok(handler);
        }
        let dirs = &self.vm.options.plugin_dirs;
        if dirs.is_empty() {
            return Err(VmError::Extension(format!("unknown extension '{}'", name)));
        }
        self.restricted_guard(&format!("load plugin {}", name))?;
        let path = find_plugin(name, dirs).ok_or_else(|| {
            VmError::Extension(format!("no extension or plugin named '{}'", name))
        })?;
        let plugin =
            PluginHandler::load(name, &path).map_err(|e| VmError::Extension(e.to_string()))?;
        Ok(Arc::new(plugin))
    }

    pub(super) fn op_bind_extension(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let name = self.with_memory(|ns| text(ns, instr, 0))?;
        let handler = self.resolve_extension(&name)?;
        let active = self.ctx.active;
        self.with_table(|table| table.bind(active, handler))?;
        tracing::debug!(namespace = active, extension = %name, "bind extension");
        Ok(Flow::Next)
    }

    pub(super) fn op_unbind_extension(&mut self) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        if let Some(old) = self.shared.namespaces.lock().unbind(active) {
            tracing::debug!(namespace = active, extension = old.name(), "unbind extension");
        }
        Ok(Flow::Next)
    }

    // -----------------------------------------------------------------------
    // Threads
    // -----------------------------------------------------------------------

    pub(super) fn op_spawn(&mut self, instr: &Instruction, join: bool) -> Result<Flow, VmError> {
        let (start, end) =
            self.with_memory(|ns| Ok((uint(ns, instr, 0)? as usize, uint(ns, instr, 1)? as usize)))?;
        self.spawn_range(start, end, join)
    }

    pub(super) fn op_spawn_label(&mut self, instr: &Instruction, join: bool) -> Result<Flow, VmError> {
        let start = self.label(instr, 0)?;
        let end = self.label(instr, 1)?;
        self.spawn_range(start, end, join)
    }

    /// Move `[start, end)` out of the executing sequence onto a new thread.
    fn spawn_range(&mut self, start: usize, end: usize, join: bool) -> Result<Flow, VmError> {
        let len = self.ctx.program.len();
        if start > end || end > len {
            return Err(VmError::Decode(format!(
                "thread range {}..{} outside program of {} instructions",
                start, end, len
            )));
        }
        let ip = self.ctx.ip;
        if (start..end).contains(&ip) {
            return Err(VmError::Decode(format!(
                "thread range {}..{} contains the spawning instruction {}",
                start, end, ip
            )));
        }

        let child = self.ctx.program.split_off_range(start, end);
        if end <= ip {
            self.ctx.ip -= end - start;
        }
        let ctx = Context::new(
            child,
            self.ctx.active,
            self.ctx.error_mode,
            self.ctx.use_bundle_files,
        );
        let vm = self.vm.clone();
        let shared = self.shared.clone();
        tracing::debug!(start, end, join, "spawn thread");
        let handle = std::thread::Builder::new()
            .name("opl-thread".into())
            .spawn(move || Executor::new(&vm, shared, ctx).run())
            .map_err(|e| VmError::Io(format!("cannot spawn thread: {}", e)))?;

        if join {
            let outcome = join_thread(handle).map_err(|e| VmError::Join(e.message().to_string()))?;
            self.ctx.output.extend_from_slice(&outcome.output);
        } else {
            self.shared.threads.lock().push(handle);
        }
        Ok(Flow::Next)
    }

    // -----------------------------------------------------------------------
    // Nested executions
    // -----------------------------------------------------------------------

    /// Run `program` to completion on this thread with a fresh context.
    fn run_nested(&self, program: Program, active: u32) -> Outcome {
        let ctx = Context::new(
            program,
            active,
            self.ctx.error_mode,
            self.ctx.use_bundle_files,
        );
        Executor::new(self.vm, self.shared.clone(), ctx).run()
    }

    pub(super) fn op_import(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let (name, target) = self.with_table(|table| {
            let ns = table.memory(active)?;
            let name = text(ns, instr, 0)?;
            let target = uint(ns, instr, 1)?;
            if !table.contains(target) {
                return Err(VmError::UndefinedNamespace(target));
            }
            Ok((name, target))
        })?;
        self.restricted_guard(&format!("import {}", name))?;
        let bytes = self.files()?.read(&name)?;
        let program = Program::decode(&bytes)?;
        tracing::debug!(module = %name, namespace = target, "import");
        self.run_nested(program, target);
        Ok(Flow::Next)
    }

    pub(super) fn op_run_source(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let source = self.with_memory(|ns| text(ns, instr, 0))?;
        let compilation = compile(&source);
        let program = Program::decode(&compilation.bytes)?;
        let outcome = self.run_nested(program, self.ctx.active);
        self.ctx.output.extend_from_slice(&outcome.output);
        match compilation.error {
            Some(err) => Err(err.into()),
            None => Ok(Flow::Next),
        }
    }

    pub(super) fn op_compile_source(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        let source = self.with_memory(|ns| text(ns, instr, 0))?;
        let compilation = compile(&source);
        self.with_memory(|ns| {
            ns.set(dest, compilation.bytes);
            Ok(())
        })?;
        match compilation.error {
            Some(err) => Err(err.into()),
            None => Ok(Flow::Next),
        }
    }

    pub(super) fn op_run_binary(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let bytes = self.with_memory(|ns| Ok(value(ns, instr, 0)?.to_vec()))?;
        let program = Program::decode(&bytes)?;
        let outcome = self.run_nested(program, self.ctx.active);
        self.ctx.output.extend_from_slice(&outcome.output);
        Ok(Flow::Next)
    }
}
