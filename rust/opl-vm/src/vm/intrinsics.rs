//! Host-facing opcodes: input, printing, files, program self-access, output
//! buffer, time and runtime arguments.

use super::helpers::{addr, arg, count_byte, float, text, uint, value};
use super::*;
use num_bigint::{BigInt, BigUint};
use opl_core::values::{format_float, lossy, to_float, to_uint};
use opl_core::wire::put_framed;
use opl_runtime::Access;
use std::time::Duration;

/// Rendering selected by the second argument of the write opcode.
fn render(mode: u32, bytes: &[u8]) -> Result<Option<String>, VmError> {
    Ok(match mode {
        0 => Some(format!("{:?}", bytes)),
        1 => Some(lossy(bytes).into_owned()),
        2 => Some(BigUint::from_bytes_be(bytes).to_string()),
        3 => Some(format_float(to_float(bytes)?)),
        4 => Some(BigInt::from_signed_bytes_be(bytes).to_string()),
        _ => None,
    })
}

impl Executor<'_> {
    fn access(&self) -> Access {
        Access {
            superuser: self.vm.options.superuser,
        }
    }

    /// The provider the file opcodes currently target.
    pub(super) fn files(&self) -> Result<Arc<dyn FileProvider>, VmError> {
        if self.ctx.use_bundle_files {
            self.vm
                .bundle_files
                .clone()
                .ok_or_else(|| VmError::Io("no bundle files in this execution".into()))
        } else {
            Ok(self.vm.files.clone())
        }
    }

    fn store(&self, dest: u32, bytes: Vec<u8>) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            ns.set(dest, bytes);
            Ok(Flow::Next)
        })
    }

    // -----------------------------------------------------------------------
    // Input and printing
    // -----------------------------------------------------------------------

    pub(super) fn op_read_line(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let line = self.vm.input.read_line()?;
        self.store(dest, line.into_bytes())
    }

    pub(super) fn op_read_chars(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        let count = self.with_memory(|ns| uint(ns, instr, 0))?;
        let chars = self.vm.input.read_chars(count as usize)?;
        self.store(dest, chars.into_bytes())
    }

    pub(super) fn op_runtime_arg(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        let index = self.with_memory(|ns| uint(ns, instr, 0))? as usize;
        let args = &self.vm.options.runtime_args;
        let value = args.get(index).ok_or_else(|| {
            VmError::Decode(format!(
                "runtime argument {} requested, {} given",
                index,
                args.len()
            ))
        })?;
        self.store(dest, value.clone().into_bytes())
    }

    pub(super) fn op_runtime_arg_count(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.store(dest, count_byte(self.vm.options.runtime_args.len()))
    }

    pub(super) fn op_dump_memory(&mut self) -> Result<Flow, VmError> {
        let rendered = self.with_memory(|ns| Ok(ns.debug_render()))?;
        self.print(&rendered);
        Ok(Flow::Next)
    }

    pub(super) fn op_write(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let mode = to_uint(arg(instr, 1)?)?;
        // Only the exact flag `01` suppresses the append.
        let suppress = instr.arg(2) == Some(&[1u8][..]);
        let bytes = self.with_memory(|ns| Ok(value(ns, instr, 0)?.to_vec()))?;
        if !suppress {
            self.ctx.output.extend_from_slice(&bytes);
        }
        if self.vm.sink.is_some() {
            if let Some(rendered) = render(mode, &bytes)? {
                self.print(&rendered);
            }
        }
        Ok(Flow::Next)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    pub(super) fn op_read_file(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        let name = self.with_memory(|ns| text(ns, instr, 0))?;
        let data = self.files()?.read(&name)?;
        self.store(dest, data)
    }

    pub(super) fn op_write_file(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let (name, data) =
            self.with_memory(|ns| Ok((text(ns, instr, 0)?, value(ns, instr, 1)?.to_vec())))?;
        self.files()?.write(&name, &data, self.access())?;
        Ok(Flow::Next)
    }

    pub(super) fn op_delete_file(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let name = self.with_memory(|ns| text(ns, instr, 0))?;
        self.files()?.delete(&name, self.access())?;
        Ok(Flow::Next)
    }

    pub(super) fn op_list_files(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let mut encoded = Vec::new();
        for name in self.files()?.list()? {
            put_framed(&mut encoded, name.as_bytes());
        }
        self.store(dest, encoded)
    }

    pub(super) fn op_run_command(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        let command = self.with_memory(|ns| text(ns, instr, 0))?;
        let status = self.files()?.run_command(&command, self.access())?;
        self.store(dest, vec![status])
    }

    pub(super) fn use_files(&mut self, bundle: bool) -> Result<Flow, VmError> {
        if bundle && self.vm.bundle_files.is_none() {
            return Err(VmError::Io("no bundle files in this execution".into()));
        }
        self.ctx.use_bundle_files = bundle;
        Ok(Flow::Next)
    }

    // -----------------------------------------------------------------------
    // Program and output
    // -----------------------------------------------------------------------

    pub(super) fn op_dump_program(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let encoded = self.ctx.program.encode();
        self.store(dest, encoded)
    }

    /// Replace the executing sequence and jump into it.
    pub(super) fn op_load_program(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let (bytes, target) =
            self.with_memory(|ns| Ok((value(ns, instr, 0)?.to_vec(), uint(ns, instr, 1)?)))?;
        let program = Program::decode(&bytes)?;
        let target = target as usize;
        if target >= program.len() {
            return Err(VmError::Decode(format!(
                "jump target {} outside program of {} instructions",
                target,
                program.len()
            )));
        }
        tracing::debug!(instructions = program.len(), target, "load program");
        self.ctx.program = program;
        Ok(Flow::Jump(target))
    }

    pub(super) fn op_get_output(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let output = self.ctx.output.clone();
        self.store(dest, output)
    }

    pub(super) fn op_set_output(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        self.ctx.output = self.with_memory(|ns| Ok(value(ns, instr, 0)?.to_vec()))?;
        Ok(Flow::Next)
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    pub(super) fn op_epoch_time(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let seconds = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        self.store(dest, (seconds as f32).to_be_bytes().to_vec())
    }

    pub(super) fn op_local_time(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        self.store(dest, now.into_bytes())
    }

    pub(super) fn op_sleep(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let seconds = self.with_memory(|ns| float(ns, instr, 0))?;
        let duration = Duration::try_from_secs_f32(seconds)
            .map_err(|e| VmError::TypeDecode(format!("cannot sleep {} seconds: {}", seconds, e)))?;
        std::thread::sleep(duration);
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_renderings() {
        assert_eq!(render(0, b"hi").unwrap().unwrap(), "[104, 105]");
        assert_eq!(render(1, b"hi").unwrap().unwrap(), "hi");
        assert_eq!(render(2, &[1, 0]).unwrap().unwrap(), "256");
        assert_eq!(render(2, &[]).unwrap().unwrap(), "0");
        assert_eq!(render(3, &2.5f32.to_be_bytes()).unwrap().unwrap(), "2.5");
        assert_eq!(render(4, &[0xFF, 0xFE]).unwrap().unwrap(), "-2");
        assert_eq!(render(9, b"x").unwrap(), None);
        assert!(matches!(render(3, b"x"), Err(VmError::TypeDecode(_))));
    }
}
