// This module generates the bytecode of one IR function. FunctionCodegen first runs the
// Analyzer (block order, liveness, linear live intervals), decides which values can be
// folded onto the operand stack and assigns local slots to everything else through the
// SlotAllocator. It then walks the reachable blocks in layout order, places a label per
// block and dispatches every instruction through the selection table in select.rs to one
// of the emit_* routines below. Those routines push operands (loading locals, folding
// constants, reading global address fields), emit the JVM sequence for the operation
// and finish with define(), which leaves a folded result on the stack, stores it into its
// slot or pops an unused value. Control flow resolves phis on CFG edges: the incoming
// values are pushed and then stored into the phi slots in reverse order, and conditional
// branches whose edges carry copies get a trampoline per edge. Narrow integers live
// sign-extended in int slots and are re-normalized after arithmetic. Functions that
// contain alloca bracket their body with the runtime's stack frame calls.

//! Bytecode generation for a single function.

use super::backend::ClassContext;
use super::class_writer::AccessFlags;
use super::encoder::{BytecodeEncoder, EncodedCode, Label};
use super::opcodes as op;
use super::runtime::{self, RuntimeMethod};
use super::select::select;
use crate::core::analyzer::Analyzer;
use crate::core::error::{CodegenError, CodegenResult};
use crate::core::value_assignment::{SlotAllocator, SlotAssignment};
use crate::ir::{
    BlockId, Constant, FloatPredicate, FuncId, Function, Instruction,
    IntPredicate, Opcode, Operand, Type, TypeClass, TypeId,
};
use log::{debug, trace};

/// Per-method counters reported to the compilation session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodStats {
    pub opcodes: Vec<Opcode>,
    pub phi_copies: usize,
    pub stack_folds: usize,
    pub slots_allocated: usize,
    pub calls: Vec<String>,
}

/// Bytecode and metadata of one compiled function.
#[derive(Debug, Clone)]
pub struct CompiledMethod {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub code: EncodedCode,
    pub max_locals: u16,
    pub stats: MethodStats,
}

/// The operand an instruction's emission pushes first, if any.
fn first_pushed_operand(inst: &Instruction) -> Option<&Operand> {
    match inst.opcode {
        Opcode::Store | Opcode::Call => inst.operands.get(1),
        Opcode::Alloca
        | Opcode::Phi
        | Opcode::Br
        | Opcode::Switch
        | Opcode::Unreachable => None,
        _ => inst.operands.first(),
    }
}

fn bit_width(class: TypeClass) -> u32 {
    match class {
        TypeClass::I1 => 1,
        TypeClass::I8 => 8,
        TypeClass::I16 => 16,
        TypeClass::I64 => 64,
        _ => 32,
    }
}

/// Signed-compare branch opcodes for `(int pair, compare result against zero)`.
fn int_branch(pred: IntPredicate) -> (u8, u8) {
    match pred {
        IntPredicate::Eq => (op::IF_ICMPEQ, op::IFEQ),
        IntPredicate::Ne => (op::IF_ICMPNE, op::IFNE),
        IntPredicate::Slt | IntPredicate::Ult => (op::IF_ICMPLT, op::IFLT),
        IntPredicate::Sle | IntPredicate::Ule => (op::IF_ICMPLE, op::IFLE),
        IntPredicate::Sgt | IntPredicate::Ugt => (op::IF_ICMPGT, op::IFGT),
        IntPredicate::Sge | IntPredicate::Uge => (op::IF_ICMPGE, op::IFGE),
    }
}

/// Generates one method.
pub struct FunctionCodegen<'a, 'm> {
    cx: &'a mut ClassContext<'m>,
    func: &'m Function,
    method: String,
    slots: SlotAssignment,
    folded: Vec<bool>,
    enc: BytecodeEncoder,
    labels: Vec<Label>,
    /// Reachable blocks in emission order.
    layout: Vec<BlockId>,
    current: usize,
    uses_frame: bool,
    stats: MethodStats,
}

impl<'a, 'm> FunctionCodegen<'a, 'm> {
    pub fn new(cx: &'a mut ClassContext<'m>, id: FuncId) -> CodegenResult<Self> {
        let module = cx.module;
        let func = module.function(id);
        let method = cx.method_name(id);
        let mut analyzer = Analyzer::new(func);
        analyzer.compute_liveness(func);
        let intervals = analyzer.live_intervals(func);
        let uses = func.use_counts();

        let mut folded = vec![false; func.values.len()];
        for block in &func.blocks {
            for pair in block.insts.windows(2) {
                let [producer, consumer] = pair else { continue };
                let Some(v) = producer.result else { continue };
                if producer.opcode != Opcode::Phi
                    && uses.get(v.index()) == Some(&1)
                    && first_pushed_operand(consumer) == Some(&Operand::Value(v))
                {
                    folded[v.index()] = true;
                }
            }
        }

        let slots = SlotAllocator::new(func, &module.types).assign(&intervals, |v| {
            !folded[v.index()] && uses.get(v.index()).is_some_and(|n| *n > 0)
        })?;

        let layout: Vec<BlockId> = func
            .block_ids()
            .filter(|b| analyzer.is_reachable(*b))
            .collect();
        let uses_frame = func
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .any(|i| i.opcode == Opcode::Alloca);

        let mut enc = BytecodeEncoder::new();
        let labels = func.blocks.iter().map(|_| enc.new_label()).collect();
        let stats = MethodStats {
            slots_allocated: slots.allocated(),
            ..MethodStats::default()
        };
        debug!(
            "🔧 {}: {} block(s), {} local slot(s), {} folded value(s)",
            method,
            layout.len(),
            slots.max_locals(),
            folded.iter().filter(|f| **f).count()
        );
        Ok(Self {
            cx,
            func,
            method,
            slots,
            folded,
            enc,
            labels,
            layout,
            current: 0,
            uses_frame,
            stats,
        })
    }

    /// Emit every reachable block and encode the method.
    pub fn compile(mut self) -> CodegenResult<CompiledMethod> {
        let func = self.func;
        let descriptor = self
            .cx
            .descriptor_of(func)
            .ok_or_else(|| self.unsupported("signature has no JVM descriptor".into()))?;
        if self.uses_frame {
            self.invoke_memory(runtime::CREATE_STACK_FRAME)?;
        }

        for pos in 0..self.layout.len() {
            self.current = pos;
            let block = self.layout[pos];
            self.enc.place_label(self.labels[block.index()]);
            trace!("🔧 {}: block {}", self.method, func.block(block).name);
            for inst in &func.block(block).insts {
                let class = self.selection_class(inst);
                let emit = select(inst.opcode, class).ok_or_else(|| {
                    self.unsupported(format!("{} on {class:?} operands", inst.opcode.name()))
                })?;
                emit(&mut self, inst)?;
                self.stats.opcodes.push(inst.opcode);
            }
        }

        let max_locals = self.slots.max_locals() as u16;
        let code = self.enc.finish(&self.method, self.cx.config.max_method_size)?;
        Ok(CompiledMethod {
            access: AccessFlags::PUBLIC | AccessFlags::STATIC,
            name: self.method,
            descriptor,
            code,
            max_locals,
            stats: self.stats,
        })
    }

    fn unsupported(&self, detail: String) -> CodegenError {
        CodegenError::Unsupported {
            function: self.func.name.clone(),
            detail,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> CodegenError {
        CodegenError::Emission {
            method: self.method.clone(),
            reason: reason.into(),
        }
    }

    fn class_of(&self, ty: TypeId) -> TypeClass {
        self.cx.module.types.class(ty)
    }

    fn operand_class(&self, operand: &Operand) -> TypeClass {
        self.func
            .operand_type(operand)
            .map_or(TypeClass::Void, |ty| self.class_of(ty))
    }

    /// Type class keying the selection table: the source type for compares, casts,
    /// stores and returns, the result type otherwise.
    fn selection_class(&self, inst: &Instruction) -> TypeClass {
        match inst.opcode {
            Opcode::Br | Opcode::CondBr | Opcode::Switch | Opcode::Unreachable => TypeClass::Void,
            Opcode::ICmp | Opcode::FCmp | Opcode::Store | Opcode::Ret => inst
                .operands
                .first()
                .map_or(TypeClass::Void, |o| self.operand_class(o)),
            opcode if opcode.is_cast() => inst
                .operands
                .first()
                .map_or(TypeClass::Void, |o| self.operand_class(o)),
            _ => self.class_of(inst.ty),
        }
    }

    fn operand<'i>(&self, inst: &'i Instruction, index: usize) -> CodegenResult<&'i Operand> {
        inst.operands.get(index).ok_or_else(|| {
            self.malformed(format!("{} is missing operand {index}", inst.opcode.name()))
        })
    }

    fn stack_slots(class: TypeClass) -> u16 {
        match class {
            TypeClass::Void => 0,
            TypeClass::I64 | TypeClass::F64 => 2,
            _ => 1,
        }
    }

    // Operand stack helpers

    fn push_int(&mut self, value: i32) -> CodegenResult<()> {
        self.enc.push_int(&mut self.cx.pool, value)
    }

    fn push_long(&mut self, value: i64) -> CodegenResult<()> {
        self.enc.push_long(&mut self.cx.pool, value)
    }

    fn invoke(&mut self, class: &str, method: RuntimeMethod) -> CodegenResult<()> {
        self.enc
            .invoke_static(&mut self.cx.pool, class, method.name, method.descriptor)
    }

    fn invoke_memory(&mut self, method: RuntimeMethod) -> CodegenResult<()> {
        let class = self.cx.config.memory_class.clone();
        self.invoke(&class, method)
    }

    fn push_zero(&mut self, class: TypeClass) -> CodegenResult<()> {
        match class {
            TypeClass::I1 | TypeClass::I8 | TypeClass::I16 | TypeClass::I32 | TypeClass::Ptr => {
                self.enc.op(op::ICONST_0)
            }
            TypeClass::I64 => self.enc.op(op::LCONST_0),
            TypeClass::F32 => self.enc.op(op::FCONST_0),
            TypeClass::F64 => self.enc.op(op::DCONST_0),
            other => return Err(self.unsupported(format!("{other:?} constant operand"))),
        }
        Ok(())
    }

    fn push_constant(&mut self, constant: &Constant) -> CodegenResult<()> {
        let module = self.cx.module;
        let types = &module.types;
        match constant {
            Constant::Int { ty, bits } => match types.class(*ty) {
                TypeClass::I64 => self.push_long(*bits as i64),
                TypeClass::I1 | TypeClass::I8 | TypeClass::I16 | TypeClass::I32 => {
                    let value = constant.as_signed(types).unwrap_or(0);
                    self.push_int(value as i32)
                }
                other => Err(self.unsupported(format!("{other:?} integer constant"))),
            },
            Constant::Float { ty, bits } => match types.class(*ty) {
                TypeClass::F32 => self.enc.push_float(&mut self.cx.pool, *bits as u32),
                _ => self.enc.push_double(&mut self.cx.pool, *bits),
            },
            Constant::Null { .. } => self.push_int(0),
            Constant::Undef { ty } | Constant::Zero { ty } => self.push_zero(types.class(*ty)),
            Constant::GlobalAddr { global, .. } => {
                let class = self.cx.class_name().to_owned();
                let field = self
                    .cx
                    .global_field(*global)
                    .ok_or_else(|| self.malformed(format!("unknown global #{}", global.0)))?
                    .to_owned();
                self.enc.get_static(&mut self.cx.pool, &class, &field, "I")
            }
            Constant::FuncAddr { .. } => {
                Err(self.unsupported("function address used as a value".into()))
            }
            Constant::Array { .. } | Constant::Struct { .. } | Constant::Bytes { .. } => {
                Err(self.unsupported("aggregate SSA value".into()))
            }
        }
    }

    fn push_operand(&mut self, operand: &Operand) -> CodegenResult<()> {
        match operand {
            Operand::Value(v) if self.folded.get(v.index()) == Some(&true) => Ok(()),
            Operand::Value(v) => {
                let slot = self
                    .slots
                    .slot(*v)
                    .ok_or_else(|| self.malformed(format!("value {v} has no local slot")))?;
                self.enc.load_local(slot);
                Ok(())
            }
            Operand::Const(c) => self.push_constant(c),
            Operand::Block(_) | Operand::Func(_) => {
                Err(self.malformed("block or function used as a value"))
            }
        }
    }

    /// Push operand `index` of `inst`.
    fn push(&mut self, inst: &Instruction, index: usize) -> CodegenResult<()> {
        let operand = self.operand(inst, index)?;
        self.push_operand(operand)
    }

    /// Dispose of the value `inst` left on the stack.
    fn define(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let width = Self::stack_slots(self.class_of(inst.ty));
        match inst.result {
            Some(v) if self.folded.get(v.index()) == Some(&true) => {
                self.stats.stack_folds += 1;
            }
            Some(v) => match self.slots.slot(v) {
                Some(slot) => self.enc.store_local(slot),
                None => self.enc.pop_slots(width),
            },
            None => self.enc.pop_slots(width),
        }
        Ok(())
    }

    /// Re-normalize a narrow integer on top of the stack.
    fn normalize(&mut self, class: TypeClass) -> CodegenResult<()> {
        match class {
            TypeClass::I1 => {
                self.enc.op(op::ICONST_1);
                self.enc.op(op::IAND);
            }
            TypeClass::I8 => self.enc.op(op::I2B),
            TypeClass::I16 => self.enc.op(op::I2S),
            _ => {}
        }
        Ok(())
    }

    /// Zero-extend a narrow integer on top of the stack within the int.
    fn mask_narrow(&mut self, class: TypeClass) -> CodegenResult<()> {
        let mask = match class {
            TypeClass::I8 => 0xff,
            TypeClass::I16 => 0xffff,
            _ => return Ok(()),
        };
        self.push_int(mask)?;
        self.enc.op(op::IAND);
        Ok(())
    }

    /// Zero-extend an int-sized value on top of the stack to a long.
    fn zero_extend_to_long(&mut self, class: TypeClass) -> CodegenResult<()> {
        self.mask_narrow(class)?;
        self.enc.op(op::I2L);
        if matches!(class, TypeClass::I32 | TypeClass::Ptr) {
            self.push_long(0xffff_ffff)?;
            self.enc.op(op::LAND);
        }
        Ok(())
    }

    /// Turn the branch `opcode` into a 0/1 int on the stack.
    fn materialize_condition(&mut self, opcode: u8) {
        let taken = self.enc.new_label();
        let done = self.enc.new_label();
        self.enc.branch(opcode, taken);
        self.enc.op(op::ICONST_0);
        self.enc.goto(done);
        self.enc.place_label(taken);
        self.enc.op(op::ICONST_1);
        self.enc.place_label(done);
    }

    // Control flow helpers

    fn next_block(&self) -> Option<BlockId> {
        self.layout.get(self.current + 1).copied()
    }

    fn block_label(&self, block: BlockId) -> CodegenResult<Label> {
        self.labels
            .get(block.index())
            .copied()
            .ok_or_else(|| self.malformed(format!("branch to unknown block #{}", block.0)))
    }

    fn jump_to(&mut self, block: BlockId) -> CodegenResult<()> {
        if self.next_block() != Some(block) {
            let label = self.block_label(block)?;
            self.enc.goto(label);
        }
        Ok(())
    }

    fn has_phi_copies(&self, to: BlockId) -> bool {
        self.func.blocks.get(to.index()).is_some_and(|b| {
            b.phis()
                .iter()
                .any(|phi| phi.result.and_then(|r| self.slots.slot(r)).is_some())
        })
    }

    /// Parallel copy of the incoming values of `to`'s phis along the edge from `from`.
    fn phi_copies(&mut self, from: BlockId, to: BlockId) -> CodegenResult<()> {
        let func = self.func;
        let mut targets = Vec::new();
        for phi in func.block(to).phis() {
            let Some(slot) = phi.result.and_then(|r| self.slots.slot(r)) else {
                continue;
            };
            let (value, _) = phi
                .phi_incoming()
                .find(|(_, b)| *b == from)
                .ok_or_else(|| self.malformed(format!("phi in {} lacks an entry", func.block(to).name)))?;
            self.push_operand(value)?;
            targets.push(slot);
        }
        for slot in targets.iter().rev() {
            self.enc.store_local(*slot);
        }
        self.stats.phi_copies += targets.len();
        Ok(())
    }

    // Emission routines, dispatched by the selection table.

    pub(super) fn emit_nothing(&mut self, _inst: &Instruction) -> CodegenResult<()> {
        Ok(())
    }

    pub(super) fn emit_int_binary(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let class = self.class_of(inst.ty);
        let wide = class == TypeClass::I64;
        let narrow = matches!(class, TypeClass::I1 | TypeClass::I8 | TypeClass::I16);
        let pick = |int: u8, long: u8| if wide { long } else { int };

        match inst.opcode {
            Opcode::UDiv | Opcode::URem if !narrow => {
                let name = if inst.opcode == Opcode::UDiv {
                    "divideUnsigned"
                } else {
                    "remainderUnsigned"
                };
                self.push(inst, 0)?;
                self.push(inst, 1)?;
                let (owner, method) = runtime::unsigned_helper(name, wide);
                self.invoke(owner, method)?;
            }
            Opcode::UDiv | Opcode::URem => {
                self.push(inst, 0)?;
                self.mask_narrow(class)?;
                self.push(inst, 1)?;
                self.mask_narrow(class)?;
                self.enc.op(if inst.opcode == Opcode::UDiv {
                    op::IDIV
                } else {
                    op::IREM
                });
            }
            Opcode::Shl | Opcode::LShr | Opcode::AShr => {
                self.push(inst, 0)?;
                if inst.opcode == Opcode::LShr {
                    self.mask_narrow(class)?;
                }
                self.push(inst, 1)?;
                if wide {
                    self.enc.op(op::L2I);
                }
                self.enc.op(match inst.opcode {
                    Opcode::Shl => pick(op::ISHL, op::LSHL),
                    Opcode::LShr => pick(op::IUSHR, op::LUSHR),
                    _ => pick(op::ISHR, op::LSHR),
                });
            }
            opcode => {
                let jvm = match opcode {
                    Opcode::Add => pick(op::IADD, op::LADD),
                    Opcode::Sub => pick(op::ISUB, op::LSUB),
                    Opcode::Mul => pick(op::IMUL, op::LMUL),
                    Opcode::SDiv => pick(op::IDIV, op::LDIV),
                    Opcode::SRem => pick(op::IREM, op::LREM),
                    Opcode::And => pick(op::IAND, op::LAND),
                    Opcode::Or => pick(op::IOR, op::LOR),
                    Opcode::Xor => pick(op::IXOR, op::LXOR),
                    other => {
                        return Err(self.unsupported(format!("integer {}", other.name())))
                    }
                };
                self.push(inst, 0)?;
                self.push(inst, 1)?;
                self.enc.op(jvm);
            }
        }
        self.normalize(class)?;
        self.define(inst)
    }

    pub(super) fn emit_float_binary(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let double = self.class_of(inst.ty) == TypeClass::F64;
        let pick = |f: u8, d: u8| if double { d } else { f };
        let jvm = match inst.opcode {
            Opcode::FAdd => pick(op::FADD, op::DADD),
            Opcode::FSub => pick(op::FSUB, op::DSUB),
            Opcode::FMul => pick(op::FMUL, op::DMUL),
            Opcode::FDiv => pick(op::FDIV, op::DDIV),
            Opcode::FRem => pick(op::FREM, op::DREM),
            other => return Err(self.unsupported(format!("float {}", other.name()))),
        };
        self.push(inst, 0)?;
        self.push(inst, 1)?;
        self.enc.op(jvm);
        self.define(inst)
    }

    pub(super) fn emit_fneg(&mut self, inst: &Instruction) -> CodegenResult<()> {
        self.push(inst, 0)?;
        self.enc.op(if self.class_of(inst.ty) == TypeClass::F64 {
            op::DNEG
        } else {
            op::FNEG
        });
        self.define(inst)
    }

    pub(super) fn emit_icmp(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let pred = inst
            .icmp_predicate()
            .ok_or_else(|| self.malformed("icmp without a predicate"))?;
        let class = self.operand_class(self.operand(inst, 0)?);
        let unsigned = pred.is_unsigned();
        let (pair, zero) = int_branch(pred);
        // i1 is held as 0/1 but a signed i1 `true` is -1.
        let signed_bool = class == TypeClass::I1
            && matches!(
                pred,
                IntPredicate::Slt | IntPredicate::Sle | IntPredicate::Sgt | IntPredicate::Sge
            );

        for index in 0..2 {
            self.push(inst, index)?;
            if unsigned {
                self.mask_narrow(class)?;
            }
            if signed_bool {
                self.enc.op(op::INEG);
            }
        }
        let branch = match class {
            TypeClass::I64 if unsigned => {
                let (owner, method) = runtime::unsigned_helper("compareUnsigned", true);
                self.invoke(owner, method)?;
                zero
            }
            TypeClass::I64 => {
                self.enc.op(op::LCMP);
                zero
            }
            TypeClass::I32 | TypeClass::Ptr if unsigned => {
                let (owner, method) = runtime::unsigned_helper("compareUnsigned", false);
                self.invoke(owner, method)?;
                zero
            }
            _ => pair,
        };
        self.materialize_condition(branch);
        self.define(inst)
    }

    pub(super) fn emit_fcmp(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let pred = inst
            .fcmp_predicate()
            .ok_or_else(|| self.malformed("fcmp without a predicate"))?;
        let double = self.operand_class(self.operand(inst, 0)?) == TypeClass::F64;
        // `*cmpl` yields -1 and `*cmpg` yields 1 when either operand is NaN.
        let (nan_low, nan_high) = if double {
            (op::DCMPL, op::DCMPG)
        } else {
            (op::FCMPL, op::FCMPG)
        };
        let (compare, branch) = match pred {
            FloatPredicate::Oeq => (nan_low, op::IFEQ),
            FloatPredicate::Une => (nan_low, op::IFNE),
            FloatPredicate::Ogt => (nan_low, op::IFGT),
            FloatPredicate::Oge => (nan_low, op::IFGE),
            FloatPredicate::Olt => (nan_high, op::IFLT),
            FloatPredicate::Ole => (nan_high, op::IFLE),
            FloatPredicate::Ugt => (nan_high, op::IFGT),
            FloatPredicate::Uge => (nan_high, op::IFGE),
            FloatPredicate::Ult => (nan_low, op::IFLT),
            FloatPredicate::Ule => (nan_low, op::IFLE),
            FloatPredicate::One => return self.emit_fcmp_distance(inst, double, op::IFGT),
            FloatPredicate::Ueq => return self.emit_fcmp_distance(inst, double, op::IFLE),
            FloatPredicate::Ord => return self.emit_fcmp_nan(inst, double, op::IFEQ),
            FloatPredicate::Uno => return self.emit_fcmp_nan(inst, double, op::IFNE),
            FloatPredicate::False | FloatPredicate::True => {
                let slots = if double { 2 } else { 1 };
                for index in 0..2 {
                    self.push(inst, index)?;
                    self.enc.pop_slots(slots);
                }
                let constant = if pred == FloatPredicate::True {
                    op::ICONST_1
                } else {
                    op::ICONST_0
                };
                self.enc.op(constant);
                return self.define(inst);
            }
        };
        self.push(inst, 0)?;
        self.push(inst, 1)?;
        self.enc.op(compare);
        self.materialize_condition(branch);
        self.define(inst)
    }

    /// `one` and `ueq` compare `|a - b|` against zero. The distance is NaN
    /// exactly when the operands are unordered (or both the same infinity,
    /// which is equal) and zero exactly when they are equal.
    fn emit_fcmp_distance(
        &mut self,
        inst: &Instruction,
        double: bool,
        branch: u8,
    ) -> CodegenResult<()> {
        self.push(inst, 0)?;
        self.push(inst, 1)?;
        let (sub, zero, compare) = if double {
            (op::DSUB, op::DCONST_0, op::DCMPL)
        } else {
            (op::FSUB, op::FCONST_0, op::FCMPL)
        };
        self.enc.op(sub);
        let (owner, method) = runtime::abs_helper(double);
        self.invoke(owner, method)?;
        self.enc.op(zero);
        // NaN distance compares as -1, failing `ifgt` and taking `ifle`.
        self.enc.op(compare);
        self.materialize_condition(branch);
        self.define(inst)
    }

    /// `ord` and `uno` test whether either operand is NaN.
    fn emit_fcmp_nan(&mut self, inst: &Instruction, double: bool, branch: u8) -> CodegenResult<()> {
        let (owner, method) = runtime::nan_helper(double);
        self.push(inst, 0)?;
        self.invoke(owner, method)?;
        self.push(inst, 1)?;
        self.invoke(owner, method)?;
        self.enc.op(op::IOR);
        self.materialize_condition(branch);
        self.define(inst)
    }

    /// trunc, zext, sext, ptrtoint and inttoptr.
    pub(super) fn emit_int_cast(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let src = self.operand_class(self.operand(inst, 0)?);
        let dst = self.class_of(inst.ty);
        let zero_extend = matches!(
            inst.opcode,
            Opcode::ZExt | Opcode::PtrToInt | Opcode::IntToPtr
        );
        if !(dst.is_int_like() || matches!(dst, TypeClass::I64 | TypeClass::Ptr)) {
            return Err(self.unsupported(format!("{} to {dst:?}", inst.opcode.name())));
        }

        self.push(inst, 0)?;
        if src == TypeClass::I1 && inst.opcode == Opcode::SExt {
            self.enc.op(op::INEG);
        }
        match (src == TypeClass::I64, dst == TypeClass::I64) {
            (true, true) => {}
            (true, false) => {
                self.enc.op(op::L2I);
                self.normalize(dst)?;
            }
            (false, true) if zero_extend => self.zero_extend_to_long(src)?,
            (false, true) => self.enc.op(op::I2L),
            (false, false) => {
                if zero_extend {
                    self.mask_narrow(src)?;
                }
                if bit_width(dst) < bit_width(src) {
                    self.normalize(dst)?;
                }
            }
        }
        self.define(inst)
    }

    pub(super) fn emit_float_cast(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let src = self.operand_class(self.operand(inst, 0)?);
        let dst = self.class_of(inst.ty);
        self.push(inst, 0)?;
        match (src, dst) {
            (TypeClass::F64, TypeClass::F32) => self.enc.op(op::D2F),
            (TypeClass::F32, TypeClass::F64) => self.enc.op(op::F2D),
            (a, b) if a == b => {}
            _ => return Err(self.unsupported(format!("{} to {dst:?}", inst.opcode.name()))),
        }
        self.define(inst)
    }

    pub(super) fn emit_float_to_int(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let double = self.operand_class(self.operand(inst, 0)?) == TypeClass::F64;
        let dst = self.class_of(inst.ty);
        let unsigned = inst.opcode == Opcode::FPToUI;
        let (to_int, to_long) = if double {
            (op::D2I, op::D2L)
        } else {
            (op::F2I, op::F2L)
        };
        match dst {
            TypeClass::I64 if unsigned => {
                return Err(self.unsupported("fptoui to a 64-bit integer".into()));
            }
            TypeClass::I64 => {
                self.push(inst, 0)?;
                self.enc.op(to_long);
            }
            TypeClass::I32 if unsigned => {
                self.push(inst, 0)?;
                self.enc.op(to_long);
                self.enc.op(op::L2I);
            }
            TypeClass::I1 | TypeClass::I8 | TypeClass::I16 | TypeClass::I32 => {
                self.push(inst, 0)?;
                self.enc.op(to_int);
                self.normalize(dst)?;
            }
            other => {
                return Err(self.unsupported(format!("{} to {other:?}", inst.opcode.name())));
            }
        }
        self.define(inst)
    }

    pub(super) fn emit_int_to_float(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let src = self.operand_class(self.operand(inst, 0)?);
        let double = self.class_of(inst.ty) == TypeClass::F64;
        let unsigned = inst.opcode == Opcode::UIToFP;
        if unsigned && src == TypeClass::I64 {
            return Err(self.unsupported("uitofp from a 64-bit integer".into()));
        }
        self.push(inst, 0)?;
        let from_long = if double { op::L2D } else { op::L2F };
        let from_int = if double { op::I2D } else { op::I2F };
        match src {
            TypeClass::I64 => self.enc.op(from_long),
            TypeClass::I32 if unsigned => {
                self.zero_extend_to_long(src)?;
                self.enc.op(from_long);
            }
            _ => {
                if unsigned {
                    self.mask_narrow(src)?;
                } else if src == TypeClass::I1 {
                    self.enc.op(op::INEG);
                }
                self.enc.op(from_int);
            }
        }
        self.define(inst)
    }

    pub(super) fn emit_bitcast(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let src = self.operand_class(self.operand(inst, 0)?);
        let dst = self.class_of(inst.ty);
        self.push(inst, 0)?;
        use TypeClass::{F32, F64, I32, I64, Ptr};
        match (src, dst) {
            (a, b) if a == b => {}
            (I32, Ptr) | (Ptr, I32) => {}
            (I32, F32) => self.invoke(runtime::FLOAT_CLASS, runtime::BITS_TO_FLOAT)?,
            (F32, I32) => self.invoke(runtime::FLOAT_CLASS, runtime::FLOAT_TO_BITS)?,
            (I64, F64) => self.invoke(runtime::DOUBLE_CLASS, runtime::BITS_TO_DOUBLE)?,
            (F64, I64) => self.invoke(runtime::DOUBLE_CLASS, runtime::DOUBLE_TO_BITS)?,
            _ => return Err(self.unsupported(format!("bitcast {src:?} to {dst:?}"))),
        }
        self.define(inst)
    }

    pub(super) fn emit_load(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let class = self.class_of(inst.ty);
        let accessor = runtime::load_accessor(class)
            .ok_or_else(|| self.unsupported(format!("load of {class:?}")))?;
        self.push(inst, 0)?;
        self.invoke_memory(accessor)?;
        if class == TypeClass::I1 {
            self.normalize(class)?;
        }
        self.define(inst)
    }

    pub(super) fn emit_store(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let class = self.operand_class(self.operand(inst, 0)?);
        let accessor = runtime::store_accessor(class)
            .ok_or_else(|| self.unsupported(format!("store of {class:?}")))?;
        self.push(inst, 1)?;
        self.push(inst, 0)?;
        self.invoke_memory(accessor)
    }

    pub(super) fn emit_alloca(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let ty = inst
            .type_attr()
            .ok_or_else(|| self.malformed("alloca without an allocated type"))?;
        let size = self
            .cx
            .layout
            .alloc_size(&self.cx.module.types, ty)
            .map_err(|e| self.malformed(e.to_string()))?;
        let too_large = || CodegenError::Limit {
            what: "stack allocation size",
            count: usize::try_from(size).unwrap_or(usize::MAX),
            max: i32::MAX as usize,
        };
        let elem_size = i32::try_from(size).map_err(|_| too_large())?;

        match inst.operands.first() {
            None => self.push_int(elem_size)?,
            Some(Operand::Const(count)) => {
                let count = count.as_signed(&self.cx.module.types).unwrap_or(1);
                let total = i32::try_from(count.saturating_mul(size as i64))
                    .map_err(|_| too_large())?;
                self.push_int(total)?;
            }
            Some(count) => {
                let wide = self.operand_class(count) == TypeClass::I64;
                self.push_operand(count)?;
                if wide {
                    self.enc.op(op::L2I);
                }
                if elem_size != 1 {
                    self.push_int(elem_size)?;
                    self.enc.op(op::IMUL);
                }
            }
        }
        self.invoke_memory(runtime::ALLOCATE_STACK)?;
        self.define(inst)
    }

    pub(super) fn emit_gep(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let source = inst
            .type_attr()
            .ok_or_else(|| self.malformed("getelementptr without a source type"))?;
        let module = self.cx.module;
        let types = &module.types;
        self.push(inst, 0)?;

        let mut offset: i64 = 0;
        let mut current = source;
        for (k, index) in inst.operands.iter().enumerate().skip(1) {
            let size = |ty: TypeId| {
                self.cx
                    .layout
                    .alloc_size(types, ty)
                    .map_err(|e| self.malformed(e.to_string()))
            };
            let scale = if k == 1 {
                size(source)?
            } else {
                match types.get(current) {
                    Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                        current = *elem;
                        size(*elem)?
                    }
                    Type::Struct { fields } => {
                        let field = index
                            .as_const()
                            .and_then(|c| c.as_signed(types))
                            .and_then(|f| usize::try_from(f).ok())
                            .ok_or_else(|| self.malformed("struct index must be a constant"))?;
                        let field_offset = self
                            .cx
                            .layout
                            .field_offset(types, current, field)
                            .ok_or_else(|| self.malformed(format!("no struct field {field}")))?;
                        current = fields[field];
                        offset = offset.wrapping_add(field_offset as i64);
                        continue;
                    }
                    _ => {
                        return Err(self.malformed(format!(
                            "cannot index into {}",
                            types.display(current)
                        )))
                    }
                }
            };
            match index {
                Operand::Const(c) => {
                    let value = c
                        .as_signed(types)
                        .ok_or_else(|| self.malformed("non-integer index"))?;
                    offset = offset.wrapping_add(value.wrapping_mul(scale as i64));
                }
                _ => {
                    let wide = self.operand_class(index) == TypeClass::I64;
                    self.push_operand(index)?;
                    if wide {
                        self.enc.op(op::L2I);
                    }
                    if scale != 1 {
                        self.push_int(scale as i32)?;
                        self.enc.op(op::IMUL);
                    }
                    self.enc.op(op::IADD);
                }
            }
        }
        // Pointer arithmetic wraps at 32 bits.
        if offset as i32 != 0 {
            self.push_int(offset as i32)?;
            self.enc.op(op::IADD);
        }
        self.define(inst)
    }

    pub(super) fn emit_select(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let otherwise = self.enc.new_label();
        let done = self.enc.new_label();
        self.push(inst, 0)?;
        self.enc.branch(op::IFEQ, otherwise);
        self.push(inst, 1)?;
        self.enc.goto(done);
        self.enc.place_label(otherwise);
        self.push(inst, 2)?;
        self.enc.place_label(done);
        self.define(inst)
    }

    pub(super) fn emit_call(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let Some(Operand::Func(callee)) = inst.operands.first() else {
            return Err(self.unsupported("indirect call".into()));
        };
        let site = self.cx.call_site(&self.func.name, *callee)?;
        for arg in &inst.operands[1..] {
            self.push_operand(arg)?;
        }
        self.enc
            .invoke_static(&mut self.cx.pool, &site.class, &site.name, &site.descriptor)?;
        trace!("🔧 {}: call {}.{}{}", self.method, site.class, site.name, site.descriptor);
        self.stats.calls.push(format!("{}.{}", site.class, site.name));
        self.define(inst)
    }

    pub(super) fn emit_ret(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let class = self.class_of(self.func.ret);
        if let Some(value) = inst.operands.first() {
            self.push_operand(value)?;
        }
        if self.uses_frame {
            self.invoke_memory(runtime::DESTROY_STACK_FRAME)?;
        }
        self.enc.op(match class {
            TypeClass::Void => op::RETURN,
            TypeClass::I64 => op::LRETURN,
            TypeClass::F32 => op::FRETURN,
            TypeClass::F64 => op::DRETURN,
            _ => op::IRETURN,
        });
        Ok(())
    }

    pub(super) fn emit_br(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let target = self
            .operand(inst, 0)?
            .as_block()
            .ok_or_else(|| self.malformed("br without a target block"))?;
        let from = self.layout[self.current];
        self.phi_copies(from, target)?;
        self.jump_to(target)
    }

    pub(super) fn emit_cond_br(&mut self, inst: &Instruction) -> CodegenResult<()> {
        let block = |i: usize| -> CodegenResult<BlockId> {
            self.operand(inst, i)?
                .as_block()
                .ok_or_else(|| self.malformed("conditional br without target blocks"))
        };
        let (on_true, on_false) = (block(1)?, block(2)?);
        let from = self.layout[self.current];
        self.push(inst, 0)?;

        if !self.has_phi_copies(on_true) && !self.has_phi_copies(on_false) {
            if self.next_block() == Some(on_true) {
                let label = self.block_label(on_false)?;
                self.enc.branch(op::IFEQ, label);
            } else {
                let label = self.block_label(on_true)?;
                self.enc.branch(op::IFNE, label);
                self.jump_to(on_false)?;
            }
            return Ok(());
        }

        // One trampoline per edge so each carries its own phi copies.
        let false_edge = self.enc.new_label();
        self.enc.branch(op::IFEQ, false_edge);
        self.phi_copies(from, on_true)?;
        let label = self.block_label(on_true)?;
        self.enc.goto(label);
        self.enc.place_label(false_edge);
        self.phi_copies(from, on_false)?;
        self.jump_to(on_false)
    }

    pub(super) fn emit_unreachable(&mut self, _inst: &Instruction) -> CodegenResult<()> {
        self.enc.op(op::ACONST_NULL);
        self.enc.op(op::ATHROW);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::ir::parser::parse_module;
    use crate::ir::Module;

    fn compile_first(module: &Module) -> CodegenResult<CompiledMethod> {
        let _ = env_logger::builder().is_test(true).try_init();
        let config = PipelineConfig::default();
        let mut cx = ClassContext::new(module, &config);
        let (id, _) = module
            .definitions()
            .next()
            .expect("module defines a function");
        FunctionCodegen::new(&mut cx, id)?.compile()
    }

    fn compile_text(text: &str) -> CodegenResult<CompiledMethod> {
        compile_first(&parse_module(text).unwrap())
    }

    #[test]
    fn add_uses_parameter_slots_only() {
        let m = compile_text("define i32 @add(i32 %a, i32 %b) {\nentry:\n  %s = add i32 %a, %b\n  ret i32 %s\n}\n")
            .unwrap();
        assert_eq!(m.descriptor, "(II)I");
        assert_eq!(m.max_locals, 2);
        assert_eq!(m.code.code, vec![op::ILOAD_0, op::ILOAD_1, op::IADD, op::IRETURN]);
        assert_eq!(m.code.max_stack, 2);
        assert_eq!(m.stats.stack_folds, 1);
    }

    #[test]
    fn narrow_arithmetic_is_renormalized() {
        let m = compile_text("define i8 @inc(i8 %a) {\nentry:\n  %s = add i8 %a, 1\n  ret i8 %s\n}\n")
            .unwrap();
        assert_eq!(
            m.code.code,
            vec![op::ILOAD_0, op::ICONST_1, op::IADD, op::I2B, op::IRETURN]
        );
    }

    #[test]
    fn multiply_used_values_get_slots() {
        let m = compile_text(
            "define i64 @sq(i64 %a) {\nentry:\n  %b = add i64 %a, 1\n  %c = mul i64 %b, %b\n  ret i64 %c\n}\n",
        )
        .unwrap();
        // %a occupies 0-1, %b needs its own long slot.
        assert_eq!(m.max_locals, 4);
        assert_eq!(m.code.code.last(), Some(&op::LRETURN));
    }

    #[test]
    fn loops_resolve_phis_on_edges() {
        let m = compile_text(
            "define i32 @sum(i32 %n) {\nentry:\n  br label %loop\nloop:\n  \
             %i = phi i32 [ 0, %entry ], [ %next, %loop ]\n  \
             %acc = phi i32 [ 0, %entry ], [ %acc2, %loop ]\n  \
             %acc2 = add i32 %acc, %i\n  %next = add i32 %i, 1\n  \
             %done = icmp sge i32 %next, %n\n  \
             br i1 %done, label %exit, label %loop\nexit:\n  ret i32 %acc2\n}\n",
        )
        .unwrap();
        assert_eq!(m.stats.phi_copies, 4);
        assert!(m.code.code.contains(&op::IF_ICMPGE));
        assert_eq!(m.code.code.last(), Some(&op::IRETURN));
    }

    #[test]
    fn memory_access_goes_through_the_runtime() {
        let m = compile_text(
            "define i32 @peek(ptr %p) {\nentry:\n  %v = load i32, ptr %p\n  ret i32 %v\n}\n",
        )
        .unwrap();
        assert_eq!(m.code.code[..2], [op::ILOAD_0, op::INVOKESTATIC]);
        assert_eq!(m.stats.opcodes, vec![Opcode::Load, Opcode::Ret]);
    }

    #[test]
    fn alloca_brackets_the_frame() {
        let m = compile_text(
            "define void @local() {\nentry:\n  %p = alloca i32\n  store i32 5, ptr %p\n  ret void\n}\n",
        )
        .unwrap();
        let calls = m.code.code.iter().filter(|b| **b == op::INVOKESTATIC).count();
        // createStackFrame, allocateStack, store, destroyStackFrame
        assert_eq!(calls, 4);
    }

    #[test]
    fn unsupported_constructs_are_reported() {
        let err = compile_text(
            "define i64 @conv(double %d) {\nentry:\n  %v = fptoui double %d to i64\n  ret i64 %v\n}\n",
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::Unsupported { .. }));

        let err = compile_text(
            "define float @conv(i64 %v) {\nentry:\n  %f = uitofp i64 %v to float\n  ret float %f\n}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("uitofp"));
    }

    // Short-form loads: iload_<n>, lload_<n>, fload_<n>, dload_<n>.
    const FLOAD_0: u8 = op::ILOAD_0 + 8;
    const FLOAD_1: u8 = op::ILOAD_0 + 9;
    const DLOAD_0: u8 = op::ILOAD_0 + 12;
    const DLOAD_2: u8 = op::ILOAD_0 + 14;

    fn compare_text(ty: &str, cmp: &str, pred: &str) -> String {
        format!(
            "define i1 @cmp({ty} %a, {ty} %b) {{\nentry:\n  %c = {cmp} {pred} {ty} %a, %b\n  ret i1 %c\n}}\n"
        )
    }

    #[test]
    fn signed_bool_compares_negate_both_operands() {
        let cases = [
            ("slt", op::IF_ICMPLT),
            ("sle", op::IF_ICMPLE),
            ("sgt", op::IF_ICMPGT),
            ("sge", op::IF_ICMPGE),
        ];
        for (pred, branch) in cases {
            let m = compile_text(&compare_text("i1", "icmp", pred)).unwrap();
            assert_eq!(
                m.code.code[..5],
                [op::ILOAD_0, op::INEG, op::ILOAD_1, op::INEG, branch],
                "icmp {pred} i1"
            );
        }

        // Unsigned and equality predicates keep the 0/1 encoding.
        let m = compile_text(&compare_text("i1", "icmp", "ult")).unwrap();
        assert!(!m.code.code.contains(&op::INEG));
        let m = compile_text(&compare_text("i8", "icmp", "slt")).unwrap();
        assert!(!m.code.code.contains(&op::INEG));
        println!("✅ signed i1 compares treat true as -1");
    }

    #[test]
    fn ordered_and_unordered_float_predicates_compile() {
        let m = compile_text(&compare_text("float", "fcmp", "one")).unwrap();
        assert_eq!(m.code.code[..4], [FLOAD_0, FLOAD_1, op::FSUB, op::INVOKESTATIC]);
        assert_eq!(m.code.code[6..9], [op::FCONST_0, op::FCMPL, op::IFGT]);

        let m = compile_text(&compare_text("double", "fcmp", "ueq")).unwrap();
        assert_eq!(m.code.code[..4], [DLOAD_0, DLOAD_2, op::DSUB, op::INVOKESTATIC]);
        assert_eq!(m.code.code[6..9], [op::DCONST_0, op::DCMPL, op::IFLE]);

        let m = compile_text(&compare_text("double", "fcmp", "ord")).unwrap();
        assert_eq!(m.code.code[0], DLOAD_0);
        assert_eq!(m.code.code[1], op::INVOKESTATIC);
        assert_eq!(m.code.code[4], DLOAD_2);
        assert_eq!(m.code.code[5], op::INVOKESTATIC);
        assert_eq!(m.code.code[8..10], [op::IOR, op::IFEQ]);

        let m = compile_text(&compare_text("float", "fcmp", "uno")).unwrap();
        assert_eq!(m.code.code[8..10], [op::IOR, op::IFNE]);

        let m = compile_text(&compare_text("double", "fcmp", "true")).unwrap();
        assert_eq!(
            m.code.code,
            vec![DLOAD_0, op::POP2, DLOAD_2, op::POP2, op::ICONST_1, op::IRETURN]
        );
        println!("✅ every fcmp predicate has a lowering");
    }
}
