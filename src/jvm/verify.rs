// This module re-verifies emitted methods independently of the encoder that produced
// them. The bytecode is decoded back into instructions (including wide local accesses
// and goto_w), every branch target is checked to land on an instruction boundary and a
// worklist abstract interpreter walks all paths with a typed operand stack and typed
// locals, the way the JVM's type-inferencing verifier does for version 49 classes.
// Operand kinds of every instruction, local variable reads, constant pool entries loaded
// by ldc and the descriptors of invoked methods and accessed fields are checked against
// the types on the stack. Stacks must agree exactly where paths merge; locals that
// disagree become unusable. The largest depth reached on any path must equal the
// max_stack the encoder declared.

//! Bytecode re-verification.

use super::class_writer::MethodInfo;
use super::constant_pool::{ConstantPool, PoolEntry};
use super::descriptor::{parse_field_descriptor, parse_method_descriptor, MethodType};
use super::opcodes::{self as op, Form, VType};
use crate::core::error::{CodegenError, CodegenResult};
use log::trace;

#[derive(Debug, Clone, Copy)]
struct Decoded {
    pc: usize,
    opcode: u8,
    /// Local index, constant pool index, immediate or absolute branch target.
    operand: i64,
}

#[derive(Debug, Clone, PartialEq)]
struct Frame {
    stack: Vec<VType>,
    locals: Vec<Option<VType>>,
}

impl Frame {
    fn depth(&self) -> u16 {
        self.stack.iter().map(|t| t.size()).sum()
    }

    /// Merge `other` into `self`; returns whether `self` changed.
    fn merge(&mut self, other: &Frame) -> Result<bool, String> {
        if self.stack != other.stack {
            return Err(format!(
                "inconsistent stack at merge point: {:?} vs {:?}",
                self.stack, other.stack
            ));
        }
        let mut changed = false;
        for (mine, theirs) in self.locals.iter_mut().zip(&other.locals) {
            if mine.is_some() && *mine != *theirs {
                *mine = None;
                changed = true;
            }
        }
        Ok(changed)
    }
}

struct Verifier<'a> {
    pool: &'a ConstantPool,
    method: &'a MethodInfo,
    signature: MethodType,
    max: u16,
}

/// Re-verify one method of a class whose constants live in `pool`.
pub fn verify_method(pool: &ConstantPool, method: &MethodInfo) -> CodegenResult<()> {
    let fail = |reason: String| CodegenError::Emission {
        method: method.name.clone(),
        reason,
    };
    let signature = parse_method_descriptor(&method.descriptor)
        .ok_or_else(|| fail(format!("malformed descriptor {}", method.descriptor)))?;
    let mut v = Verifier {
        pool,
        method,
        signature,
        max: 0,
    };
    v.run().map_err(fail)?;
    if v.max != method.max_stack {
        return Err(fail(format!(
            "declared max_stack {} but paths reach {}",
            method.max_stack, v.max
        )));
    }
    trace!("📊 {} verified, max_stack {}", method.name, v.max);
    Ok(())
}

fn decode(code: &[u8]) -> Result<Vec<Decoded>, String> {
    let byte = |at: usize| {
        code.get(at)
            .copied()
            .ok_or_else(|| format!("truncated instruction at {at}"))
    };
    let u16_at =
        |at: usize| -> Result<u16, String> { Ok(u16::from_be_bytes([byte(at)?, byte(at + 1)?])) };

    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let mut opcode = code[pc];
        let (operand, len) = if opcode == op::WIDE {
            opcode = byte(pc + 1)?;
            if !matches!(opcode, op::ILOAD..=op::DLOAD | op::ISTORE..=op::DSTORE) {
                return Err(format!("wide applied to opcode {opcode:#04x} at {pc}"));
            }
            (i64::from(u16_at(pc + 2)?), 4)
        } else {
            let info = op::info(opcode)
                .ok_or_else(|| format!("unknown opcode {opcode:#04x} at {pc}"))?;
            match info.form {
                Form::Simple => (0, 1),
                Form::Local => (i64::from(byte(pc + 1)?), 2),
                Form::Immediate if opcode == op::BIPUSH => (i64::from(byte(pc + 1)? as i8), 2),
                Form::Immediate => (i64::from(u16_at(pc + 1)? as i16), 3),
                Form::Constant if opcode == op::LDC => (i64::from(byte(pc + 1)?), 2),
                Form::Constant | Form::Member => (i64::from(u16_at(pc + 1)?), 3),
                Form::Branch => (pc as i64 + i64::from(u16_at(pc + 1)? as i16), 3),
                Form::BranchWide => {
                    let bytes = [byte(pc + 1)?, byte(pc + 2)?, byte(pc + 3)?, byte(pc + 4)?];
                    (pc as i64 + i64::from(i32::from_be_bytes(bytes)), 5)
                }
            }
        };
        out.push(Decoded {
            pc,
            opcode,
            operand,
        });
        pc += len;
    }
    Ok(out)
}

fn is_branch(opcode: u8) -> bool {
    op::info(opcode).is_some_and(|i| matches!(i.form, Form::Branch | Form::BranchWide))
}

impl Verifier<'_> {
    fn run(&mut self) -> Result<(), String> {
        let method = self.method;
        let code = &method.code;
        if code.is_empty() {
            return Err("empty method body".into());
        }
        let insns = decode(code)?;
        let mut at_pc = vec![None; code.len()];
        for (i, insn) in insns.iter().enumerate() {
            at_pc[insn.pc] = Some(i);
        }
        let target_of = |insn: &Decoded| -> Result<usize, String> {
            usize::try_from(insn.operand)
                .ok()
                .and_then(|t| at_pc.get(t).copied().flatten())
                .ok_or_else(|| format!("branch at {} to invalid offset {}", insn.pc, insn.operand))
        };

        let max_locals = method.max_locals as usize;
        let mut locals = vec![None; max_locals];
        let mut slot = 0;
        for param in &self.signature.params {
            if slot + param.size() as usize > max_locals {
                return Err(format!("parameters need more than {max_locals} locals"));
            }
            locals[slot] = Some(*param);
            slot += param.size() as usize;
        }

        let mut frames: Vec<Option<Frame>> = vec![None; insns.len()];
        frames[0] = Some(Frame {
            stack: Vec::new(),
            locals,
        });
        let mut worklist = vec![0usize];
        while let Some(i) = worklist.pop() {
            let Some(mut frame) = frames[i].clone() else { continue };
            let insn = insns[i];
            self.execute(&insn, &mut frame)
                .map_err(|e| format!("{e} at {}", insn.pc))?;

            let mut succs = Vec::with_capacity(2);
            if is_branch(insn.opcode) {
                succs.push(target_of(&insn)?);
            }
            if !op::ends_flow(insn.opcode) {
                if i + 1 >= insns.len() {
                    return Err("control falls off the end of the code".into());
                }
                succs.push(i + 1);
            }
            for s in succs {
                match &mut frames[s] {
                    Some(existing) => {
                        if existing
                            .merge(&frame)
                            .map_err(|e| format!("{e} at {}", insns[s].pc))?
                        {
                            worklist.push(s);
                        }
                    }
                    empty => {
                        *empty = Some(frame.clone());
                        worklist.push(s);
                    }
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, frame: &mut Frame, ty: VType) {
        frame.stack.push(ty);
        self.max = self.max.max(frame.depth());
    }

    fn pop(frame: &mut Frame, want: Option<VType>) -> Result<VType, String> {
        let got = frame.stack.pop().ok_or("operand stack underflow")?;
        match want {
            Some(want) if want != got => Err(format!("expected {want:?} on the stack, found {got:?}")),
            _ => Ok(got),
        }
    }

    fn local(&self, frame: &Frame, index: usize, ty: VType) -> Result<(), String> {
        match frame.locals.get(index) {
            Some(Some(t)) if *t == ty => Ok(()),
            Some(other) => Err(format!("local {index} holds {other:?}, not {ty:?}")),
            None => Err(format!("local {index} beyond max_locals {}", self.method.max_locals)),
        }
    }

    fn store(&self, frame: &mut Frame, index: usize, ty: VType) -> Result<(), String> {
        let end = index + ty.size() as usize;
        if end > frame.locals.len() {
            return Err(format!("local {index} beyond max_locals {}", self.method.max_locals));
        }
        if index > 0 && frame.locals[index - 1].is_some_and(|t| t.size() == 2) {
            frame.locals[index - 1] = None;
        }
        frame.locals[index] = Some(ty);
        if ty.size() == 2 {
            frame.locals[index + 1] = None;
        }
        Ok(())
    }

    fn execute(&mut self, insn: &Decoded, frame: &mut Frame) -> Result<(), String> {
        let opcode = insn.opcode;
        let index = insn.operand as usize;
        match opcode {
            op::ILOAD..=op::DLOAD | op::ILOAD_0..=op::DLOAD_3 => {
                let ty = op::local_type(opcode).ok_or("bad load")?;
                let index = if opcode >= op::ILOAD_0 {
                    ((opcode - op::ILOAD_0) % 4) as usize
                } else {
                    index
                };
                self.local(frame, index, ty)?;
                self.push(frame, ty);
            }
            op::ISTORE..=op::DSTORE | op::ISTORE_0..=op::DSTORE_3 => {
                let ty = op::local_type(opcode).ok_or("bad store")?;
                let index = if opcode >= op::ISTORE_0 {
                    ((opcode - op::ISTORE_0) % 4) as usize
                } else {
                    index
                };
                Self::pop(frame, Some(ty))?;
                self.store(frame, index, ty)?;
            }
            op::LDC | op::LDC_W | op::LDC2_W => {
                let ty = match (opcode, self.pool.get(insn.operand as u16)) {
                    (op::LDC2_W, Some(PoolEntry::Long(_))) => VType::Long,
                    (op::LDC2_W, Some(PoolEntry::Double(_))) => VType::Double,
                    (op::LDC | op::LDC_W, Some(PoolEntry::Integer(_))) => VType::Int,
                    (op::LDC | op::LDC_W, Some(PoolEntry::Float(_))) => VType::Float,
                    (op::LDC | op::LDC_W, Some(PoolEntry::String(_))) => VType::Ref,
                    (_, entry) => return Err(format!("cannot load constant {entry:?}")),
                };
                self.push(frame, ty);
            }
            op::POP => {
                let top = Self::pop(frame, None)?;
                if top.size() != 1 {
                    return Err("pop of a two-slot value".into());
                }
            }
            op::POP2 => {
                let top = Self::pop(frame, None)?;
                if top.size() == 1 {
                    let next = Self::pop(frame, None)?;
                    if next.size() != 1 {
                        return Err("pop2 splits a two-slot value".into());
                    }
                }
            }
            op::INVOKESTATIC | op::GETSTATIC | op::PUTSTATIC => {
                let member = self
                    .pool
                    .member_at(insn.operand as u16)
                    .ok_or("member reference expected")?;
                if opcode == op::INVOKESTATIC {
                    let sig = parse_method_descriptor(member.descriptor)
                        .ok_or("malformed method descriptor")?;
                    for param in sig.params.iter().rev() {
                        Self::pop(frame, Some(*param))?;
                    }
                    if let Some(ret) = sig.ret {
                        self.push(frame, ret);
                    }
                } else {
                    let ty = parse_field_descriptor(member.descriptor)
                        .ok_or("malformed field descriptor")?;
                    if opcode == op::GETSTATIC {
                        self.push(frame, ty);
                    } else {
                        Self::pop(frame, Some(ty))?;
                    }
                }
            }
            op::IRETURN..=op::RETURN => {
                let info = op::info(opcode).ok_or("bad return")?;
                let returns = info.pops.first().copied();
                if returns != self.signature.ret {
                    return Err(format!(
                        "{} in a method returning {:?}",
                        info.name, self.signature.ret
                    ));
                }
                if let Some(ty) = returns {
                    Self::pop(frame, Some(ty))?;
                }
            }
            _ => {
                let info = op::info(opcode).ok_or("unknown opcode")?;
                for ty in info.pops.iter().rev() {
                    Self::pop(frame, Some(*ty))?;
                }
                for ty in info.pushes {
                    self.push(frame, *ty);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value_assignment::{LocalSlot, SlotKind};
    use crate::jvm::class_writer::AccessFlags;
    use crate::jvm::encoder::BytecodeEncoder;

    fn method(descriptor: &str, max_stack: u16, max_locals: u16, code: Vec<u8>) -> MethodInfo {
        MethodInfo {
            access: AccessFlags::PUBLIC | AccessFlags::STATIC,
            name: "m".into(),
            descriptor: descriptor.into(),
            max_stack,
            max_locals,
            code,
        }
    }

    #[test]
    fn accepts_encoder_output() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pool = ConstantPool::new();
        let mut enc = BytecodeEncoder::new();
        let a = LocalSlot {
            index: 0,
            kind: SlotKind::Long,
        };
        let done = enc.new_label();
        let other = enc.new_label();
        enc.load_local(a);
        enc.push_long(&mut pool, 1 << 40).unwrap();
        enc.op(op::LCMP);
        enc.branch(op::IFEQ, other);
        enc.push_int(&mut pool, 100_000).unwrap();
        enc.goto(done);
        enc.place_label(other);
        enc.op(op::ICONST_M1);
        enc.place_label(done);
        enc.op(op::IRETURN);
        let encoded = enc.finish("m", 65535).unwrap();
        let m = method("(J)I", encoded.max_stack, 2, encoded.code);
        verify_method(&pool, &m).unwrap();
    }

    #[test]
    fn rejects_wrong_max_stack() {
        let pool = ConstantPool::new();
        let code = vec![op::ILOAD_0, op::ILOAD_0, op::IADD, op::IRETURN];
        verify_method(&pool, &method("(I)I", 2, 1, code.clone())).unwrap();
        let err = verify_method(&pool, &method("(I)I", 3, 1, code)).unwrap_err();
        assert!(err.to_string().contains("max_stack"));
    }

    #[test]
    fn rejects_kind_mismatch() {
        let pool = ConstantPool::new();
        // iload_0 on a long parameter.
        let err = verify_method(&pool, &method("(J)I", 1, 2, vec![op::ILOAD_0, op::IRETURN]))
            .unwrap_err();
        assert!(matches!(err, CodegenError::Emission { .. }));
        // ireturn from a void method.
        assert!(verify_method(&pool, &method("()V", 1, 0, vec![op::ICONST_0, op::IRETURN])).is_err());
    }

    #[test]
    fn rejects_underflow_and_fall_through() {
        let pool = ConstantPool::new();
        let err = verify_method(&pool, &method("()V", 0, 0, vec![op::POP, op::RETURN])).unwrap_err();
        assert!(err.to_string().contains("underflow"));
        let err = verify_method(&pool, &method("()V", 1, 0, vec![op::ICONST_0, op::POP])).unwrap_err();
        assert!(err.to_string().contains("falls off"));
    }

    #[test]
    fn rejects_inconsistent_merge() {
        let pool = ConstantPool::new();
        // The return is reached with an empty stack and with one int.
        let code = vec![op::ILOAD_0, op::IFEQ, 0, 4, op::ICONST_1, op::RETURN];
        let err = verify_method(&pool, &method("(I)V", 1, 1, code)).unwrap_err();
        assert!(err.to_string().contains("inconsistent stack"));
    }

    #[test]
    fn rejects_branch_into_an_instruction() {
        let pool = ConstantPool::new();
        let code = vec![op::GOTO, 0, 2, op::RETURN];
        assert!(verify_method(&pool, &method("()V", 0, 0, code)).is_err());
    }
}
