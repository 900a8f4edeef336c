// This module provides FunctionBuilder, a small cursor-style helper for appending blocks
// and instructions to a Function. It allocates result values automatically (dense
// numbering continues from the function's current value count) and offers shorthand
// constructors for the instructions lowering passes synthesize: compares and
// branches. Callers intern the TypeIds they need up front, so the builder only
// borrows the Function and never the module's TypeTable.

//! Cursor-style instruction builder.

use super::{
    BasicBlock, BlockId, Function, InstAttr, Instruction, IntPredicate, Opcode, Operand, TypeId,
    ValueId,
};

pub struct FunctionBuilder<'f> {
    func: &'f mut Function,
    void: TypeId,
    current: Option<BlockId>,
}

impl<'f> FunctionBuilder<'f> {
    pub fn new(func: &'f mut Function, void: TypeId) -> Self {
        Self {
            func,
            void,
            current: None,
        }
    }

    pub fn function(&mut self) -> &mut Function {
        &mut *self.func
    }

    /// Append an empty block and return its id (the cursor does not move).
    pub fn append_block(&mut self, name: impl Into<String>) -> BlockId {
        self.func.blocks.push(BasicBlock::new(name));
        BlockId(self.func.blocks.len() as u32 - 1)
    }

    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<BlockId> {
        self.current
    }

    /// Append an instruction at the cursor. A result value is allocated for
    /// every non-void result type.
    pub fn push(&mut self, mut inst: Instruction) -> Option<ValueId> {
        let block = self.current?;
        if inst.ty != self.void && inst.result.is_none() && !inst.is_terminator() {
            inst.result = Some(self.func.new_value(inst.ty));
        }
        let result = inst.result;
        self.func.block_mut(block).insts.push(inst);
        result
    }

    pub fn icmp(&mut self, pred: IntPredicate, i1: TypeId, lhs: Operand, rhs: Operand) -> Option<ValueId> {
        self.push(Instruction::new(Opcode::ICmp, i1, vec![lhs, rhs]).with_attr(InstAttr::ICmp(pred)))
    }

    pub fn br(&mut self, target: BlockId) {
        self.push(Instruction::new(Opcode::Br, self.void, vec![Operand::Block(target)]));
    }

    pub fn cond_br(&mut self, cond: Operand, then_block: BlockId, else_block: BlockId) {
        self.push(Instruction::new(
            Opcode::CondBr,
            self.void,
            vec![cond, Operand::Block(then_block), Operand::Block(else_block)],
        ));
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.push(Instruction::new(Opcode::Ret, self.void, value.into_iter().collect()));
    }
}
