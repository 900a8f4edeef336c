// This module provides the JVM bytecode encoder used by the function code generator.
// BytecodeEncoder records a symbolic instruction list: opcodes, local variable accesses,
// constants, static member references and branches to Labels that may not be placed
// yet. Encoding happens in two passes. The layout pass computes the byte length of every
// instruction and the offset of every label; branches start in their short form and are
// widened until a fixed point whenever the 16-bit offset does not fit (goto becomes
// goto_w, a conditional branch becomes its inverse jumping over a goto_w). The emission
// pass encodes the bytes in the same order, resolves branch offsets from the layout and
// threads an OperandStackState through every instruction to compute the method's
// maximum stack depth. The depth at a label is recorded by the first branch or fall
// through that reaches it; a label reached only by jumps restores the recorded depth,
// and any disagreement is an emission error.

//! JVM bytecode encoding with branch relaxation.

use super::constant_pool::ConstantPool;
use super::descriptor::{parse_field_descriptor, parse_method_descriptor};
use super::opcodes::{self, Form};
use crate::core::error::{CodegenError, CodegenResult};
use crate::core::value_assignment::{LocalSlot, SlotKind};
use log::trace;

/// A position in the instruction list, placed with [`BytecodeEncoder::place_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

/// Symbolic instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Insn {
    Op(u8),
    /// `opcode` is the one-byte-index form (`iload`, `lstore`, ...).
    Local { opcode: u8, index: u16 },
    Push { opcode: u8, value: i16 },
    Ldc { index: u16, slots: u16 },
    Branch { opcode: u8, target: Label },
    /// `invokestatic`, `getstatic` or `putstatic` with its stack effect in slots.
    Member { opcode: u8, index: u16, pops: u16, pushes: u16 },
    Mark(Label),
}

fn kind_offset(kind: SlotKind) -> u8 {
    match kind {
        SlotKind::Int => 0,
        SlotKind::Long => 1,
        SlotKind::Float => 2,
        SlotKind::Double => 3,
    }
}

/// Simulated operand stack depth during emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandStackState {
    /// `None` after an unconditional transfer until the next label.
    depth: Option<u16>,
    max: u16,
}

impl OperandStackState {
    pub fn new() -> Self {
        Self {
            depth: Some(0),
            max: 0,
        }
    }

    pub fn depth(&self) -> Option<u16> {
        self.depth
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    /// Pop `pops` slots and push `pushes`; fails on underflow or dead code.
    fn apply(&mut self, pops: u16, pushes: u16, method: &str, at: usize) -> CodegenResult<u16> {
        let depth = self.depth.ok_or_else(|| CodegenError::Emission {
            method: method.to_owned(),
            reason: format!("unreachable instruction at offset {at}"),
        })?;
        let base = depth.checked_sub(pops).ok_or_else(|| CodegenError::Emission {
            method: method.to_owned(),
            reason: format!("operand stack underflow at offset {at}: depth {depth}, popping {pops}"),
        })?;
        let next = base.checked_add(pushes).ok_or_else(|| CodegenError::Limit {
            what: "operand stack depth",
            count: base as usize + pushes as usize,
            max: u16::MAX as usize,
        })?;
        self.max = self.max.max(next);
        self.depth = Some(next);
        Ok(base)
    }
}

impl Default for OperandStackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    pub code: Vec<u8>,
    pub max_stack: u16,
}

/// Symbolic bytecode builder for one method.
#[derive(Debug, Default)]
pub struct BytecodeEncoder {
    insns: Vec<Insn>,
    labels: u32,
}

impl BytecodeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of symbolic instructions recorded so far.
    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    pub fn place_label(&mut self, label: Label) {
        self.insns.push(Insn::Mark(label));
    }

    /// Emit an instruction without operands.
    pub fn op(&mut self, opcode: u8) {
        self.insns.push(Insn::Op(opcode));
    }

    pub fn load_local(&mut self, slot: LocalSlot) {
        self.insns.push(Insn::Local {
            opcode: opcodes::ILOAD + kind_offset(slot.kind),
            index: slot.index,
        });
    }

    pub fn store_local(&mut self, slot: LocalSlot) {
        self.insns.push(Insn::Local {
            opcode: opcodes::ISTORE + kind_offset(slot.kind),
            index: slot.index,
        });
    }

    /// Discard a value of `slots` stack slots.
    pub fn pop_slots(&mut self, slots: u16) {
        match slots {
            0 => {}
            1 => self.op(opcodes::POP),
            _ => self.op(opcodes::POP2),
        }
    }

    pub fn push_int(&mut self, pool: &mut ConstantPool, value: i32) -> CodegenResult<()> {
        match value {
            -1..=5 => self.op((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => self.insns.push(Insn::Push {
                opcode: opcodes::BIPUSH,
                value: value as i16,
            }),
            -32768..=32767 => self.insns.push(Insn::Push {
                opcode: opcodes::SIPUSH,
                value: value as i16,
            }),
            _ => {
                let index = pool.integer(value)?;
                self.insns.push(Insn::Ldc { index, slots: 1 });
            }
        }
        Ok(())
    }

    pub fn push_long(&mut self, pool: &mut ConstantPool, value: i64) -> CodegenResult<()> {
        match value {
            0 => self.op(opcodes::LCONST_0),
            1 => self.op(opcodes::LCONST_1),
            _ => {
                let index = pool.long(value)?;
                self.insns.push(Insn::Ldc { index, slots: 2 });
            }
        }
        Ok(())
    }

    /// Push a float given by its exact bit pattern.
    pub fn push_float(&mut self, pool: &mut ConstantPool, bits: u32) -> CodegenResult<()> {
        match bits {
            0x0000_0000 => self.op(opcodes::FCONST_0),
            0x3f80_0000 => self.op(opcodes::FCONST_1),
            0x4000_0000 => self.op(opcodes::FCONST_2),
            _ => {
                let index = pool.float(bits)?;
                self.insns.push(Insn::Ldc { index, slots: 1 });
            }
        }
        Ok(())
    }

    pub fn push_double(&mut self, pool: &mut ConstantPool, bits: u64) -> CodegenResult<()> {
        match bits {
            0x0000_0000_0000_0000 => self.op(opcodes::DCONST_0),
            0x3ff0_0000_0000_0000 => self.op(opcodes::DCONST_1),
            _ => {
                let index = pool.double(bits)?;
                self.insns.push(Insn::Ldc { index, slots: 2 });
            }
        }
        Ok(())
    }

    pub fn push_string(&mut self, pool: &mut ConstantPool, s: &str) -> CodegenResult<()> {
        let index = pool.string(s)?;
        self.insns.push(Insn::Ldc { index, slots: 1 });
        Ok(())
    }

    pub fn branch(&mut self, opcode: u8, target: Label) {
        self.insns.push(Insn::Branch { opcode, target });
    }

    pub fn goto(&mut self, target: Label) {
        self.branch(opcodes::GOTO, target);
    }

    pub fn invoke_static(
        &mut self,
        pool: &mut ConstantPool,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> CodegenResult<()> {
        let method = parse_method_descriptor(descriptor).ok_or_else(|| CodegenError::Emission {
            method: format!("{class}.{name}"),
            reason: format!("malformed method descriptor {descriptor}"),
        })?;
        let index = pool.method_ref(class, name, descriptor)?;
        self.insns.push(Insn::Member {
            opcode: opcodes::INVOKESTATIC,
            index,
            pops: method.param_slots(),
            pushes: method.ret_slots(),
        });
        Ok(())
    }

    fn static_field(
        &mut self,
        pool: &mut ConstantPool,
        opcode: u8,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> CodegenResult<()> {
        let ty = parse_field_descriptor(descriptor).ok_or_else(|| CodegenError::Emission {
            method: format!("{class}.{name}"),
            reason: format!("malformed field descriptor {descriptor}"),
        })?;
        let index = pool.field_ref(class, name, descriptor)?;
        let (pops, pushes) = if opcode == opcodes::GETSTATIC {
            (0, ty.size())
        } else {
            (ty.size(), 0)
        };
        self.insns.push(Insn::Member {
            opcode,
            index,
            pops,
            pushes,
        });
        Ok(())
    }

    pub fn get_static(
        &mut self,
        pool: &mut ConstantPool,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> CodegenResult<()> {
        self.static_field(pool, opcodes::GETSTATIC, class, name, descriptor)
    }

    pub fn put_static(
        &mut self,
        pool: &mut ConstantPool,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> CodegenResult<()> {
        self.static_field(pool, opcodes::PUTSTATIC, class, name, descriptor)
    }

    fn length(insn: &Insn, wide: bool) -> usize {
        match insn {
            Insn::Op(_) => 1,
            Insn::Local { index, .. } => match index {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            },
            Insn::Push { opcode, .. } => {
                if *opcode == opcodes::BIPUSH {
                    2
                } else {
                    3
                }
            }
            Insn::Ldc { index, slots } => {
                if *slots == 1 && *index < 256 {
                    2
                } else {
                    3
                }
            }
            Insn::Branch { opcode, .. } => match (wide, *opcode == opcodes::GOTO) {
                (false, _) => 3,
                (true, true) => 5,
                (true, false) => 8,
            },
            Insn::Member { .. } => 3,
            Insn::Mark(_) => 0,
        }
    }

    /// Offsets of every instruction and label plus the total code length.
    fn layout(&self, wide: &[bool]) -> (Vec<usize>, Vec<Option<usize>>, usize) {
        let mut offsets = Vec::with_capacity(self.insns.len());
        let mut labels = vec![None; self.labels as usize];
        let mut at = 0;
        for (insn, &w) in self.insns.iter().zip(wide) {
            offsets.push(at);
            if let Insn::Mark(label) = insn {
                labels[label.0 as usize] = Some(at);
            }
            at += Self::length(insn, w);
        }
        (offsets, labels, at)
    }

    fn label_offset(labels: &[Option<usize>], label: Label, method: &str) -> CodegenResult<usize> {
        labels
            .get(label.0 as usize)
            .copied()
            .flatten()
            .ok_or_else(|| CodegenError::Emission {
                method: method.to_owned(),
                reason: format!("branch to unplaced label L{}", label.0),
            })
    }

    /// Lay out, relax and encode the method body.
    pub fn finish(self, method: &str, max_code_size: usize) -> CodegenResult<EncodedCode> {
        let mut wide = vec![false; self.insns.len()];
        let (offsets, labels, total) = loop {
            let (offsets, labels, total) = self.layout(&wide);
            let mut widened = false;
            for (i, insn) in self.insns.iter().enumerate() {
                if let Insn::Branch { target, .. } = insn {
                    let delta = Self::label_offset(&labels, *target, method)? as i64
                        - offsets[i] as i64;
                    if !wide[i] && i16::try_from(delta).is_err() {
                        wide[i] = true;
                        widened = true;
                    }
                }
            }
            if !widened {
                break (offsets, labels, total);
            }
        };
        if total > max_code_size {
            return Err(CodegenError::Limit {
                what: "method code size",
                count: total,
                max: max_code_size,
            });
        }

        let mut code = Vec::with_capacity(total);
        let mut stack = OperandStackState::new();
        let mut label_depth: Vec<Option<u16>> = vec![None; self.labels as usize];
        let mismatch = |label: Label, expected: u16, found: u16| CodegenError::Emission {
            method: method.to_owned(),
            reason: format!(
                "inconsistent stack depth at L{}: {expected} vs {found}",
                label.0
            ),
        };

        for (i, insn) in self.insns.iter().enumerate() {
            let at = offsets[i];
            match insn {
                Insn::Mark(label) => {
                    let recorded = &mut label_depth[label.0 as usize];
                    match (stack.depth, *recorded) {
                        (Some(d), Some(r)) if d != r => return Err(mismatch(*label, r, d)),
                        (Some(d), _) => *recorded = Some(d),
                        (None, Some(r)) => stack.depth = Some(r),
                        // Only reachable by a later backward jump, which is checked then.
                        (None, None) => {
                            stack.depth = Some(0);
                            *recorded = Some(0);
                        }
                    }
                }
                Insn::Op(opcode) => {
                    let (pops, pushes): (u16, u16) = match *opcode {
                        opcodes::POP => (1, 0),
                        opcodes::POP2 => (2, 0),
                        op => {
                            let info = opcodes::info(op)
                                .filter(|info| info.form == Form::Simple)
                                .ok_or_else(|| CodegenError::Emission {
                                    method: method.to_owned(),
                                    reason: format!("opcode {op:#04x} needs operands"),
                                })?;
                            (info.pop_slots(), info.push_slots())
                        }
                    };
                    stack.apply(pops, pushes, method, at)?;
                    code.push(*opcode);
                    if opcodes::ends_flow(*opcode) {
                        stack.depth = None;
                    }
                }
                Insn::Local { opcode, index } => {
                    let slots = opcodes::local_type(*opcode).map_or(1, |t| t.size());
                    let store = opcodes::is_store(*opcode);
                    if store {
                        stack.apply(slots, 0, method, at)?;
                    } else {
                        stack.apply(0, slots, method, at)?;
                    }
                    match index {
                        0..=3 => {
                            let first = if store {
                                opcodes::ISTORE_0
                            } else {
                                opcodes::ILOAD_0
                            };
                            let base = opcode - if store { opcodes::ISTORE } else { opcodes::ILOAD };
                            code.push(first + base * 4 + *index as u8);
                        }
                        4..=255 => code.extend_from_slice(&[*opcode, *index as u8]),
                        _ => {
                            code.extend_from_slice(&[opcodes::WIDE, *opcode]);
                            code.extend_from_slice(&index.to_be_bytes());
                        }
                    }
                }
                Insn::Push { opcode, value } => {
                    stack.apply(0, 1, method, at)?;
                    code.push(*opcode);
                    if *opcode == opcodes::BIPUSH {
                        code.push(*value as i8 as u8);
                    } else {
                        code.extend_from_slice(&value.to_be_bytes());
                    }
                }
                Insn::Ldc { index, slots } => {
                    stack.apply(0, *slots, method, at)?;
                    if *slots == 2 {
                        code.push(opcodes::LDC2_W);
                        code.extend_from_slice(&index.to_be_bytes());
                    } else if *index < 256 {
                        code.extend_from_slice(&[opcodes::LDC, *index as u8]);
                    } else {
                        code.push(opcodes::LDC_W);
                        code.extend_from_slice(&index.to_be_bytes());
                    }
                }
                Insn::Branch { opcode, target } => {
                    let info = opcodes::info(*opcode)
                        .filter(|info| info.form == Form::Branch)
                        .ok_or_else(|| CodegenError::Emission {
                            method: method.to_owned(),
                            reason: format!("opcode {opcode:#04x} is not a branch"),
                        })?;
                    let base = stack.apply(info.pop_slots(), 0, method, at)?;
                    let recorded = &mut label_depth[target.0 as usize];
                    match *recorded {
                        Some(r) if r != base => return Err(mismatch(*target, r, base)),
                        _ => *recorded = Some(base),
                    }

                    let dest = Self::label_offset(&labels, *target, method)? as i64;
                    let delta = dest - at as i64;
                    match (wide[i], *opcode == opcodes::GOTO) {
                        (false, _) => {
                            code.push(*opcode);
                            code.extend_from_slice(&(delta as i16).to_be_bytes());
                        }
                        (true, true) => {
                            code.push(opcodes::GOTO_W);
                            code.extend_from_slice(&(delta as i32).to_be_bytes());
                        }
                        (true, false) => {
                            let inverse = opcodes::invert_branch(*opcode).ok_or_else(|| {
                                CodegenError::Emission {
                                    method: method.to_owned(),
                                    reason: format!("cannot invert branch {opcode:#04x}"),
                                }
                            })?;
                            code.extend_from_slice(&[inverse, 0, 8, opcodes::GOTO_W]);
                            code.extend_from_slice(&((delta - 3) as i32).to_be_bytes());
                        }
                    }
                    if *opcode == opcodes::GOTO {
                        stack.depth = None;
                    }
                }
                Insn::Member {
                    opcode,
                    index,
                    pops,
                    pushes,
                } => {
                    stack.apply(*pops, *pushes, method, at)?;
                    code.push(*opcode);
                    code.extend_from_slice(&index.to_be_bytes());
                }
            }
        }

        if stack.depth.is_some() {
            return Err(CodegenError::Emission {
                method: method.to_owned(),
                reason: "control falls off the end of the code".into(),
            });
        }
        debug_assert_eq!(code.len(), total);
        trace!(
            "📊 {method}: {} bytes, max stack {}, {} widened branch(es)",
            code.len(),
            stack.max(),
            wide.iter().filter(|w| **w).count()
        );
        Ok(EncodedCode {
            code,
            max_stack: stack.max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(index: u16) -> LocalSlot {
        LocalSlot {
            index,
            kind: SlotKind::Int,
        }
    }

    #[test]
    fn encodes_a_straight_line_method() {
        let mut enc = BytecodeEncoder::new();
        enc.load_local(int(0));
        enc.load_local(int(1));
        enc.op(opcodes::IADD);
        enc.op(opcodes::IRETURN);
        let out = enc.finish("add", 65535).unwrap();
        assert_eq!(out.code, vec![0x1a, 0x1b, opcodes::IADD, opcodes::IRETURN]);
        assert_eq!(out.max_stack, 2);
    }

    #[test]
    fn local_index_forms() {
        let mut enc = BytecodeEncoder::new();
        let wide = LocalSlot {
            index: 300,
            kind: SlotKind::Double,
        };
        enc.load_local(wide);
        enc.store_local(LocalSlot {
            index: 5,
            kind: SlotKind::Double,
        });
        enc.op(opcodes::RETURN);
        let out = enc.finish("locals", 65535).unwrap();
        assert_eq!(
            out.code,
            vec![opcodes::WIDE, opcodes::DLOAD, 0x01, 0x2c, opcodes::DSTORE, 5, opcodes::RETURN]
        );
        assert_eq!(out.max_stack, 2);
    }

    #[test]
    fn constants_pick_the_shortest_form() {
        let mut pool = ConstantPool::new();
        let mut enc = BytecodeEncoder::new();
        enc.push_int(&mut pool, -1).unwrap();
        enc.push_int(&mut pool, 100).unwrap();
        enc.push_int(&mut pool, 1000).unwrap();
        enc.push_int(&mut pool, 100_000).unwrap();
        enc.pop_slots(1);
        enc.pop_slots(1);
        enc.pop_slots(1);
        enc.pop_slots(1);
        enc.push_long(&mut pool, 7).unwrap();
        enc.pop_slots(2);
        enc.op(opcodes::RETURN);
        let out = enc.finish("consts", 65535).unwrap();
        assert_eq!(
            &out.code[..8],
            &[opcodes::ICONST_M1, opcodes::BIPUSH, 100, opcodes::SIPUSH, 0x03, 0xe8, opcodes::LDC, 1]
        );
        assert_eq!(out.max_stack, 4);
    }

    #[test]
    fn forward_branches_are_patched() {
        let mut pool = ConstantPool::new();
        let mut enc = BytecodeEncoder::new();
        let target = enc.new_label();
        enc.push_int(&mut pool, 0).unwrap();
        enc.branch(opcodes::IFEQ, target);
        enc.push_int(&mut pool, 1).unwrap();
        enc.op(opcodes::IRETURN);
        enc.place_label(target);
        enc.push_int(&mut pool, 2).unwrap();
        enc.op(opcodes::IRETURN);
        let out = enc.finish("fwd", 65535).unwrap();
        // iconst_0; ifeq +5; iconst_1; ireturn; iconst_2; ireturn
        assert_eq!(out.code[1..4], [opcodes::IFEQ, 0, 5]);
        assert_eq!(out.max_stack, 1);
    }

    #[test]
    fn long_branches_are_relaxed() {
        let mut pool = ConstantPool::new();
        let mut enc = BytecodeEncoder::new();
        let far = enc.new_label();
        enc.push_int(&mut pool, 0).unwrap();
        enc.branch(opcodes::IFEQ, far);
        for _ in 0..40_000 {
            enc.op(opcodes::NOP);
        }
        enc.place_label(far);
        enc.op(opcodes::RETURN);
        let out = enc.finish("far", 100_000).unwrap();
        assert_eq!(out.code[1..5], [opcodes::IFNE, 0, 8, opcodes::GOTO_W]);
        let delta = i32::from_be_bytes([out.code[5], out.code[6], out.code[7], out.code[8]]);
        assert_eq!(delta, 40_000 + 5);
        assert_eq!(out.code.len(), 1 + 8 + 40_000 + 1);
    }

    #[test]
    fn inconsistent_depths_are_rejected() {
        let mut pool = ConstantPool::new();
        let mut enc = BytecodeEncoder::new();
        let join = enc.new_label();
        enc.push_int(&mut pool, 0).unwrap();
        enc.push_int(&mut pool, 0).unwrap();
        enc.branch(opcodes::IFEQ, join);
        enc.push_int(&mut pool, 1).unwrap();
        enc.place_label(join);
        enc.op(opcodes::IRETURN);
        let err = enc.finish("join", 65535).unwrap_err();
        assert!(matches!(err, CodegenError::Emission { .. }), "{err}");
    }

    #[test]
    fn underflow_and_size_limits() {
        let mut enc = BytecodeEncoder::new();
        enc.op(opcodes::IADD);
        assert!(enc.finish("under", 65535).is_err());

        let mut enc = BytecodeEncoder::new();
        for _ in 0..10 {
            enc.op(opcodes::NOP);
        }
        enc.op(opcodes::RETURN);
        let err = enc.finish("big", 8).unwrap_err();
        assert_eq!(
            err,
            CodegenError::Limit {
                what: "method code size",
                count: 11,
                max: 8
            }
        );
    }
}
