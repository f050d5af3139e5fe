//! Memory, arithmetic, and conversion opcodes.

use super::helpers::{addr, arg, float, length_bytes, sint, text, u32_list, uint, value};
use super::*;
use num_bigint::BigUint;
use num_traits::CheckedSub;
use opl_core::values::{
    bool_bytes, clamp, float_bytes, format_float, parse_float, parse_sint, parse_uint, sint_bytes,
    uint_bytes, MAX_VALUE_LEN,
};
use std::cmp::Ordering as CmpOrdering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Uint,
    Sint,
    Float,
}

fn overflow(domain: &str, op: ArithOp) -> VmError {
    VmError::Arithmetic(format!("{} {:?} out of 32-bit range", domain, op))
}

fn division_by_zero() -> VmError {
    VmError::Arithmetic("division by zero".into())
}

pub(super) fn uint_arith(op: ArithOp, a: u32, b: u32) -> Result<u32, VmError> {
    let checked = |r: Option<u32>| r.ok_or_else(|| overflow("unsigned", op));
    match op {
        ArithOp::Add => checked(a.checked_add(b)),
        ArithOp::Sub => checked(a.checked_sub(b)),
        ArithOp::Mul => checked(a.checked_mul(b)),
        ArithOp::Div => a.checked_div(b).ok_or_else(division_by_zero),
        ArithOp::Mod => a.checked_rem(b).ok_or_else(division_by_zero),
        ArithOp::Pow => checked(a.checked_pow(b)),
        ArithOp::And => Ok(a & b),
        ArithOp::Or => Ok(a | b),
        ArithOp::Xor => Ok(a ^ b),
        // Shifting zero never loses bits.
        ArithOp::Shl if a == 0 => Ok(0),
        ArithOp::Shl if b >= 32 || (a << b) >> b != a => Err(overflow("unsigned", op)),
        ArithOp::Shl => Ok(a << b),
        ArithOp::Shr => Ok(a.checked_shr(b).unwrap_or(0)),
    }
}

pub(super) fn sint_arith(op: ArithOp, a: i32, b: i32) -> Result<i32, VmError> {
    let checked = |r: Option<i32>| r.ok_or_else(|| overflow("signed", op));
    match op {
        ArithOp::Add => checked(a.checked_add(b)),
        ArithOp::Sub => checked(a.checked_sub(b)),
        ArithOp::Mul => checked(a.checked_mul(b)),
        ArithOp::Div if b == 0 => Err(division_by_zero()),
        ArithOp::Div => checked(a.checked_div(b)),
        ArithOp::Pow if b < 0 => Err(VmError::Arithmetic(format!(
            "negative exponent {} for signed pow",
            b
        ))),
        ArithOp::Pow => checked(a.checked_pow(b.unsigned_abs())),
        ArithOp::And => Ok(a & b),
        ArithOp::Or => Ok(a | b),
        ArithOp::Xor => Ok(a ^ b),
        ArithOp::Mod | ArithOp::Shl | ArithOp::Shr => Err(VmError::Arithmetic(format!(
            "{:?} is not defined for signed ints",
            op
        ))),
    }
}

pub(super) fn float_arith(op: ArithOp, a: f32, b: f32) -> Result<f32, VmError> {
    let bits = |f: fn(u32, u32) -> u32| f32::from_bits(f(a.to_bits(), b.to_bits()));
    match op {
        ArithOp::Add => Ok(a + b),
        ArithOp::Sub => Ok(a - b),
        ArithOp::Mul => Ok(a * b),
        ArithOp::Div => Ok(a / b),
        ArithOp::Pow => Ok(a.powf(b)),
        ArithOp::Mod => {
            // Floored: the result takes the divisor's sign.
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                Ok(r + b)
            } else {
                Ok(r)
            }
        }
        ArithOp::And => Ok(bits(|x, y| x & y)),
        ArithOp::Or => Ok(bits(|x, y| x | y)),
        ArithOp::Xor => Ok(bits(|x, y| x ^ y)),
        ArithOp::Shl | ArithOp::Shr => Err(VmError::Arithmetic(format!(
            "{:?} is not defined for floats",
            op
        ))),
    }
}

pub(super) fn big_arith(a: &[u8], b: &[u8], subtract: bool) -> Result<Vec<u8>, VmError> {
    let a = BigUint::from_bytes_be(a);
    let b = BigUint::from_bytes_be(b);
    let result = if subtract {
        a.checked_sub(&b)
            .ok_or_else(|| VmError::Arithmetic("unbounded subtraction went negative".into()))?
    } else {
        a + b
    };
    Ok(result.to_bytes_be())
}

fn float_to_uint(f: f32) -> Result<u32, VmError> {
    let t = f.trunc();
    if (0.0..4_294_967_296.0).contains(&t) {
        Ok(t as u32)
    } else {
        Err(VmError::Arithmetic(format!("{} does not fit an unsigned int", f)))
    }
}

fn float_to_sint(f: f32) -> Result<i32, VmError> {
    let t = f.trunc();
    if (-2_147_483_648.0..2_147_483_648.0).contains(&t) {
        Ok(t as i32)
    } else {
        Err(VmError::Arithmetic(format!("{} does not fit a signed int", f)))
    }
}

impl Executor<'_> {
    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    pub(super) fn op_store(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let literal = arg(instr, 0)?.to_vec();
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            ns.set(dest, literal);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_copy(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 0)?.to_vec();
            ns.set(dest, v);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_concat(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 2)?;
        self.with_memory(|ns| {
            let mut joined = value(ns, instr, 1)?.to_vec();
            joined.extend_from_slice(value(ns, instr, 0)?);
            ns.set(dest, joined);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_insert(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let piece = value(ns, instr, 0)?;
            let target = value(ns, instr, 1)?;
            let at = clamp(uint(ns, instr, 2)?, target.len());
            let mut out = Vec::with_capacity(target.len() + piece.len());
            out.extend_from_slice(&target[..at]);
            out.extend_from_slice(piece);
            out.extend_from_slice(&target[at..]);
            ns.set(dest, out);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_keep_front(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 0)?;
            let n = clamp(uint(ns, instr, 1)?, v.len());
            let kept = v[..n].to_vec();
            ns.set(dest, kept);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_drop_front(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 0)?;
            let n = clamp(uint(ns, instr, 1)?, v.len());
            let rest = v[n..].to_vec();
            ns.set(dest, rest);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_remove_range(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 0)?;
            let count = uint(ns, instr, 1)?;
            let start_raw = uint(ns, instr, 2)?;
            let start = clamp(start_raw, v.len());
            let end = clamp(start_raw.saturating_add(count), v.len());
            let mut out = v[..start].to_vec();
            out.extend_from_slice(&v[end..]);
            ns.set(dest, out);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_length(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let len = length_bytes(value(ns, instr, 0)?.len())?;
            ns.set(dest, len);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_delete(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let target = addr(instr, 0)?;
        self.with_memory(|ns| {
            ns.remove(target).ok_or(VmError::UndefinedAddress(target))?;
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_slice(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 3)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 2)?;
            let start = clamp(uint(ns, instr, 0)?, v.len());
            let end = clamp(uint(ns, instr, 1)?, v.len());
            let piece = if start < end { v[start..end].to_vec() } else { Vec::new() };
            ns.set(dest, piece);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_repeat(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let v = value(ns, instr, 0)?;
            let times = uint(ns, instr, 1)? as usize;
            match v.len().checked_mul(times) {
                Some(total) if total <= MAX_VALUE_LEN => {}
                _ => {
                    return Err(VmError::Arithmetic(format!(
                        "repeating {} bytes {} times exceeds {} bytes",
                        v.len(),
                        times,
                        MAX_VALUE_LEN
                    )))
                }
            }
            let repeated = v.repeat(times);
            ns.set(dest, repeated);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_load_indirect(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let pointer = uint(ns, instr, 0)?;
            let v = ns.load(pointer)?.to_vec();
            ns.set(dest, v);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_store_indirect(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            let pointer = uint(ns, instr, 0)?;
            let v = value(ns, instr, 1)?.to_vec();
            ns.set(pointer, v);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_list_addresses(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let list = u32_list(ns.addresses());
            ns.set(dest, list);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_clear_memory(&mut self) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            ns.clear();
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_reverse(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let mut v = value(ns, instr, 0)?.to_vec();
            v.reverse();
            ns.set(dest, v);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_compare(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 2)?;
        self.with_memory(|ns| {
            let order = match value(ns, instr, 0)?.cmp(value(ns, instr, 1)?) {
                CmpOrdering::Equal => 0,
                CmpOrdering::Less => 1,
                CmpOrdering::Greater => 2,
            };
            ns.set(dest, vec![order]);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_snapshot(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 0)?;
        self.with_memory(|ns| {
            let snap = ns.snapshot();
            ns.set(dest, snap);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_restore(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        self.with_memory(|ns| {
            let snap = value(ns, instr, 0)?.to_vec();
            ns.restore(&snap)?;
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_not(&mut self, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let zero = uint(ns, instr, 0)? == 0;
            ns.set(dest, bool_bytes(zero));
            Ok(Flow::Next)
        })
    }

    // -----------------------------------------------------------------------
    // Arithmetic
    // -----------------------------------------------------------------------

    /// addr(2) ← M[0] op M[1] in `domain`.
    pub(super) fn arith(
        &mut self,
        instr: &Instruction,
        domain: Domain,
        op: ArithOp,
    ) -> Result<Flow, VmError> {
        let dest = addr(instr, 2)?;
        self.with_memory(|ns| {
            let result = match domain {
                Domain::Uint => uint_bytes(uint_arith(op, uint(ns, instr, 0)?, uint(ns, instr, 1)?)?),
                Domain::Sint => sint_bytes(sint_arith(op, sint(ns, instr, 0)?, sint(ns, instr, 1)?)?),
                Domain::Float => {
                    float_bytes(float_arith(op, float(ns, instr, 0)?, float(ns, instr, 1)?)?)
                }
            };
            ns.set(dest, result);
            Ok(Flow::Next)
        })
    }

    pub(super) fn op_big(&mut self, instr: &Instruction, subtract: bool) -> Result<Flow, VmError> {
        let dest = addr(instr, 2)?;
        self.with_memory(|ns| {
            let result = big_arith(value(ns, instr, 0)?, value(ns, instr, 1)?, subtract)?;
            ns.set(dest, result);
            Ok(Flow::Next)
        })
    }

    // -----------------------------------------------------------------------
    // Conversion
    // -----------------------------------------------------------------------

    /// addr(1) ← converted M[0].
    pub(super) fn convert(&mut self, op: OpCode, instr: &Instruction) -> Result<Flow, VmError> {
        let dest = addr(instr, 1)?;
        self.with_memory(|ns| {
            let converted = match op {
                OpCode::UintToString => uint(ns, instr, 0)?.to_string().into_bytes(),
                OpCode::FloatToString => format_float(float(ns, instr, 0)?).into_bytes(),
                OpCode::SintToString => sint(ns, instr, 0)?.to_string().into_bytes(),
                OpCode::StringToUint => uint_bytes(parse_uint(&text(ns, instr, 0)?)?),
                OpCode::StringToFloat => float_bytes(parse_float(&text(ns, instr, 0)?)?),
                OpCode::StringToSint => sint_bytes(parse_sint(&text(ns, instr, 0)?)?),
                OpCode::UintToFloat => float_bytes(uint(ns, instr, 0)? as f32),
                OpCode::SintToFloat => float_bytes(sint(ns, instr, 0)? as f32),
                OpCode::FloatToUint => uint_bytes(float_to_uint(float(ns, instr, 0)?)?),
                OpCode::FloatToSint => sint_bytes(float_to_sint(float(ns, instr, 0)?)?),
                OpCode::SintToUint => {
                    let s = sint(ns, instr, 0)?;
                    let u = u32::try_from(s).map_err(|_| {
                        VmError::Arithmetic(format!("{} is negative", s))
                    })?;
                    uint_bytes(u)
                }
                OpCode::UintToSint => {
                    let u = uint(ns, instr, 0)?;
                    let s = i32::try_from(u).map_err(|_| {
                        VmError::Arithmetic(format!("{} exceeds the signed range", u))
                    })?;
                    sint_bytes(s)
                }
                other => return Err(VmError::UnknownOpcode(other.code())),
            };
            ns.set(dest, converted);
            Ok(Flow::Next)
        })
    }
}
