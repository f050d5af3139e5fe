//! Operand decoding, memory locking, jumps and namespace opcodes.

use super::*;
use crate::namespace::Namespace;
use opl_core::values::{contains_subsequence, lossy, to_float, to_sint, to_uint, uint_bytes};

// ---------------------------------------------------------------------------
// Operands
// ---------------------------------------------------------------------------

pub(super) fn arg(instr: &Instruction, n: usize) -> Result<&[u8], VmError> {
    instr
        .arg(n)
        .ok_or_else(|| VmError::Decode(format!("missing argument {}", n)))
}

/// Argument `n` as a literal address.
pub(super) fn addr(instr: &Instruction, n: usize) -> Result<u32, VmError> {
    Ok(to_uint(arg(instr, n)?)?)
}

/// M[n]: the value stored at the address in argument `n`.
pub(super) fn value<'n>(ns: &'n Namespace, instr: &Instruction, n: usize) -> Result<&'n [u8], VmError> {
    ns.load(addr(instr, n)?)
}

pub(super) fn uint(ns: &Namespace, instr: &Instruction, n: usize) -> Result<u32, VmError> {
    Ok(to_uint(value(ns, instr, n)?)?)
}

pub(super) fn sint(ns: &Namespace, instr: &Instruction, n: usize) -> Result<i32, VmError> {
    Ok(to_sint(value(ns, instr, n)?)?)
}

pub(super) fn float(ns: &Namespace, instr: &Instruction, n: usize) -> Result<f32, VmError> {
    Ok(to_float(value(ns, instr, n)?)?)
}

pub(super) fn text(ns: &Namespace, instr: &Instruction, n: usize) -> Result<String, VmError> {
    let bytes = value(ns, instr, n)?;
    Ok(opl_core::values::to_text(bytes)?.to_string())
}

/// `id:u32` for each id, concatenated.
pub(super) fn u32_list(ids: impl IntoIterator<Item = u32>) -> Vec<u8> {
    ids.into_iter().flat_map(u32::to_be_bytes).collect()
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Cmp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
}

impl Cmp {
    fn holds<T: PartialOrd>(self, a: T, b: T) -> bool {
        match self {
            Cmp::Gt => a > b,
            Cmp::Lt => a < b,
            Cmp::Ge => a >= b,
            Cmp::Le => a <= b,
            Cmp::Eq => a == b,
        }
    }
}

pub(super) fn bytes_eq(ns: &Namespace, instr: &Instruction) -> Result<bool, VmError> {
    Ok(value(ns, instr, 1)? == value(ns, instr, 2)?)
}

pub(super) fn float_cmp(ns: &Namespace, instr: &Instruction, cmp: Cmp) -> Result<bool, VmError> {
    Ok(cmp.holds(float(ns, instr, 1)?, float(ns, instr, 2)?))
}

pub(super) fn uint_cmp(ns: &Namespace, instr: &Instruction, cmp: Cmp) -> Result<bool, VmError> {
    Ok(cmp.holds(uint(ns, instr, 1)?, uint(ns, instr, 2)?))
}

/// M[1] occurs inside M[2].
pub(super) fn contains(ns: &Namespace, instr: &Instruction) -> Result<bool, VmError> {
    Ok(contains_subsequence(value(ns, instr, 2)?, value(ns, instr, 1)?))
}

// ---------------------------------------------------------------------------
// Locking and control flow
// ---------------------------------------------------------------------------

impl Executor<'_> {
    /// Run `f` over the whole namespace table under a single lock.
    pub(super) fn with_table<T>(
        &self,
        f: impl FnOnce(&mut NamespaceTable) -> Result<T, VmError>,
    ) -> Result<T, VmError> {
        let mut table = self.shared.namespaces.lock();
        f(&mut table)
    }

    /// Run `f` over the active namespace under a single lock.
    pub(super) fn with_memory<T>(
        &self,
        f: impl FnOnce(&mut Namespace) -> Result<T, VmError>,
    ) -> Result<T, VmError> {
        let active = self.ctx.active;
        self.with_table(|table| f(table.memory_mut(active)?))
    }

    pub(super) fn check_target(&self, target: usize) -> Result<usize, VmError> {
        let len = self.ctx.program.len();
        if target < len {
            Ok(target)
        } else {
            Err(VmError::Decode(format!(
                "jump target {} outside program of {} instructions",
                target, len
            )))
        }
    }

    /// T(n): the instruction index stored at M[n].
    fn target(&self, ns: &Namespace, instr: &Instruction, n: usize) -> Result<usize, VmError> {
        self.check_target(uint(ns, instr, n)? as usize)
    }

    /// L(n): the index of the label named by argument `n`.
    pub(super) fn label(&self, instr: &Instruction, n: usize) -> Result<usize, VmError> {
        let name = arg(instr, n)?;
        self.ctx
            .program
            .label(name)
            .ok_or_else(|| VmError::UndefinedLabel(lossy(name).into_owned()))
    }

    pub(super) fn jump_if(
        &self,
        instr: &Instruction,
        cond: impl FnOnce(&Namespace, &Instruction) -> Result<bool, VmError>,
    ) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            if cond(ns, instr)? {
                Ok(Flow::Jump(self.target(ns, instr, 0)?))
            } else {
                Ok(Flow::Next)
            }
        })
    }

    pub(super) fn branch(
        &self,
        instr: &Instruction,
        cond: impl FnOnce(&Namespace, &Instruction) -> Result<bool, VmError>,
    ) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            let which = if cond(ns, instr)? { 0 } else { 3 };
            Ok(Flow::Jump(self.target(ns, instr, which)?))
        })
    }

    pub(super) fn jump_label_if(
        &self,
        instr: &Instruction,
        cond: impl FnOnce(&Namespace, &Instruction) -> Result<bool, VmError>,
    ) -> Result<Flow, VmError> {
        if self.with_memory(|ns| cond(ns, instr))? {
            Ok(Flow::Jump(self.label(instr, 0)?))
        } else {
            Ok(Flow::Next)
        }
    }

    pub(super) fn branch_label(
        &self,
        instr: &Instruction,
        cond: impl FnOnce(&Namespace, &Instruction) -> Result<bool, VmError>,
    ) -> Result<Flow, VmError> {
        let which = if self.with_memory(|ns| cond(ns, instr))? { 0 } else { 3 };
        Ok(Flow::Jump(self.label(instr, which)?))
    }

    // -----------------------------------------------------------------------
    // Namespace opcodes
    // -----------------------------------------------------------------------

    pub(super) fn op_switch_namespace(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let id = self.with_table(|table| {
            let id = uint(table.memory(active)?, instr, 0)?;
            if !table.contains(id) {
                return Err(VmError::UndefinedNamespace(id));
            }
            Ok(id)
        })?;
        tracing::debug!(from = active, to = id, "switch namespace");
        self.ctx.active = id;
        Ok(Flow::Next)
    }

    pub(super) fn op_create_namespace(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let id = self.with_table(|table| {
            let id = uint(table.memory(active)?, instr, 0)?;
            table.create(id);
            Ok(id)
        })?;
        tracing::debug!(id, "create namespace");
        Ok(Flow::Next)
    }

    pub(super) fn op_delete_namespace(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let id = self.with_table(|table| {
            let id = uint(table.memory(active)?, instr, 0)?;
            table.delete(id, active)?;
            Ok(id)
        })?;
        tracing::debug!(id, "delete namespace");
        Ok(Flow::Next)
    }

    pub(super) fn op_list_namespaces(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let dest = addr(instr, 0)?;
        self.with_table(|table| {
            let ids = u32_list(table.ids());
            table.memory_mut(active)?.set(dest, ids);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_prune_namespaces(&mut self) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        tracing::debug!(keep = active, "prune namespaces");
        self.with_table(|table| {
            table.retain_only(active);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_copy_to_namespace(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let active = self.ctx.active;
        let dest = addr(instr, 1)?;
        self.with_table(|table| {
            let source = table.memory(active)?;
            let copied = value(source, instr, 0)?.to_vec();
            let id = uint(source, instr, 2)?;
            table.memory_mut(id)?.set(dest, copied);
            Ok(Flow::Next)
        })
    }
}

/// One-byte count, saturating.
pub(super) fn count_byte(n: usize) -> Vec<u8> {
    vec![u8::try_from(n).unwrap_or(u8::MAX)]
}

/// Length as a 4-byte value.
pub(super) fn length_bytes(len: usize) -> Result<Vec<u8>, VmError> {
    u32::try_from(len)
        .map(uint_bytes)
        .map_err(|_| VmError::Arithmetic(format!("length {} does not fit in 32 bits", len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(args: &[u32]) -> Instruction {
        Instruction::new(0, 0, args.iter().map(|a| uint_bytes(*a)).collect())
    }

    #[test]
    fn missing_argument_is_decode_error() {
        let err = arg(&instr(&[]), 0).unwrap_err();
        assert_eq!(err, VmError::Decode("missing argument 0".into()));
    }

    #[test]
    fn operand_reinterpretation() {
        let mut ns = Namespace::new();
        ns.set(1, vec![0xFF]);
        ns.set(2, 1.5f32.to_be_bytes().to_vec());
        let i = instr(&[1, 2]);
        assert_eq!(uint(&ns, &i, 0).unwrap(), 255);
        assert_eq!(sint(&ns, &i, 0).unwrap(), -1);
        assert_eq!(float(&ns, &i, 1).unwrap(), 1.5);
        assert!(matches!(float(&ns, &i, 0), Err(VmError::TypeDecode(_))));
    }

    #[test]
    fn comparisons() {
        assert!(Cmp::Gt.holds(2, 1));
        assert!(Cmp::Le.holds(1.0, 1.0));
        assert!(!Cmp::Eq.holds(f32::NAN, f32::NAN));
    }

    #[test]
    fn contains_checks_second_operand_for_first() {
        let mut ns = Namespace::new();
        ns.set(1, b"ell".to_vec());
        ns.set(2, b"hello".to_vec());
        assert!(contains(&ns, &instr(&[0, 1, 2])).unwrap());
        assert!(!contains(&ns, &instr(&[0, 2, 1])).unwrap());
    }

    #[test]
    fn count_byte_saturates() {
        assert_eq!(count_byte(3), vec![3]);
        assert_eq!(count_byte(1000), vec![255]);
    }

    #[test]
    fn id_list_is_big_endian() {
        assert_eq!(u32_list([0, 258]), vec![0, 0, 0, 0, 0, 0, 1, 2]);
    }
}
