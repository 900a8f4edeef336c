// This module is the in-memory module graph every pipeline stage works on. A Module owns
// its interned TypeTable, its GlobalVariables and its Functions; a Function owns an
// ordered list of BasicBlocks plus the dense SSA value table (parameters first, then
// instruction results in block order). Instructions are an opcode, a result type, a
// list of Operands (values, constants, block and function references) and an optional
// opcode-specific attribute (compare predicate or element type). Operand layout is fixed
// per opcode: phi is [value, block]* pairs, switch is [cond, default, (case, block)*],
// conditional br is [cond, then, else], call is [callee, args...], store is [value, ptr]
// and getelementptr is [base, indices...]. The graph is plain owned data so a lowering
// pass can clone a module, rewrite the copy and hand it back only on success.

//! IR module graph.
//!
//! The submodules provide types, opcodes, constants, the data layout, a builder
//! used by passes and tests, and the textual form (printer and parser).

pub mod builder;
pub mod constant;
pub mod layout;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod types;

pub use builder::FunctionBuilder;
pub use constant::Constant;
pub use layout::DataLayout;
pub use opcode::{FloatPredicate, IntPredicate, Opcode};
pub use types::{Type, TypeClass, TypeId, TypeTable};

use bitflags::bitflags;
use std::fmt;

/// SSA value number within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of a block within its function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(ValueId),
    Const(Constant),
    Block(BlockId),
    Func(FuncId),
}

impl Operand {
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<BlockId> {
        match self {
            Operand::Block(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Operand::Const(c) => Some(c),
            _ => None,
        }
    }
}

/// Opcode-specific instruction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstAttr {
    None,
    ICmp(IntPredicate),
    FCmp(FloatPredicate),
    /// Allocated type of an `alloca` or source element type of a `getelementptr`.
    Type(TypeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Result type, `void` when the instruction produces no value.
    pub ty: TypeId,
    pub operands: Vec<Operand>,
    pub attr: InstAttr,
    pub result: Option<ValueId>,
}

impl Instruction {
    pub fn new(opcode: Opcode, ty: TypeId, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            ty,
            operands,
            attr: InstAttr::None,
            result: None,
        }
    }

    pub fn with_attr(mut self, attr: InstAttr) -> Self {
        self.attr = attr;
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    /// Value operands in operand order.
    pub fn value_operands(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.operands.iter().filter_map(Operand::as_value)
    }

    /// Successor blocks of a terminator, in operand order (duplicates kept).
    pub fn successors(&self) -> Vec<BlockId> {
        match self.opcode {
            Opcode::Br | Opcode::CondBr | Opcode::Switch => {
                self.operands.iter().filter_map(Operand::as_block).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Incoming `(value, block)` pairs of a phi.
    pub fn phi_incoming(&self) -> impl Iterator<Item = (&Operand, BlockId)> + '_ {
        self.operands
            .chunks(2)
            .filter_map(|pair| match pair {
                [v, Operand::Block(b)] => Some((v, *b)),
                _ => None,
            })
    }

    /// Rewrite every block reference equal to `from` into `to`.
    pub fn replace_block(&mut self, from: BlockId, to: BlockId) {
        for op in &mut self.operands {
            if *op == Operand::Block(from) {
                *op = Operand::Block(to);
            }
        }
    }

    pub fn icmp_predicate(&self) -> Option<IntPredicate> {
        match self.attr {
            InstAttr::ICmp(p) => Some(p),
            _ => None,
        }
    }

    pub fn fcmp_predicate(&self) -> Option<FloatPredicate> {
        match self.attr {
            InstAttr::FCmp(p) => Some(p),
            _ => None,
        }
    }

    pub fn type_attr(&self) -> Option<TypeId> {
        match self.attr {
            InstAttr::Type(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub name: String,
    pub insts: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insts: Vec::new(),
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.insts.last().filter(|i| i.is_terminator())
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator().map(Instruction::successors).unwrap_or_default()
    }

    /// Number of leading phi instructions.
    pub fn phi_count(&self) -> usize {
        self.insts
            .iter()
            .take_while(|i| i.opcode == Opcode::Phi)
            .count()
    }

    pub fn phis(&self) -> &[Instruction] {
        &self.insts[..self.phi_count()]
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FunctionFlags: u8 {
        const VARIADIC = 1 << 0;
        const INTERNAL = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GlobalFlags: u8 {
        const CONSTANT = 1 << 0;
        const INTERNAL = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret: TypeId,
    pub params: Vec<TypeId>,
    pub flags: FunctionFlags,
    pub blocks: Vec<BasicBlock>,
    /// Type of every SSA value; the first `params.len()` entries are the parameters.
    pub values: Vec<TypeId>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret: TypeId, params: Vec<TypeId>) -> Self {
        let values = params.clone();
        Self {
            name: name.into(),
            ret,
            params,
            flags: FunctionFlags::empty(),
            blocks: Vec::new(),
            values,
        }
    }

    /// A function without blocks is an external declaration.
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_variadic(&self) -> bool {
        self.flags.contains(FunctionFlags::VARIADIC)
    }

    pub fn param(&self, index: usize) -> ValueId {
        ValueId(index as u32)
    }

    pub fn value_type(&self, value: ValueId) -> Option<TypeId> {
        self.values.get(value.index()).copied()
    }

    /// Type of an operand; block and function references have none.
    pub fn operand_type(&self, op: &Operand) -> Option<TypeId> {
        match op {
            Operand::Value(v) => self.value_type(*v),
            Operand::Const(c) => Some(c.ty()),
            Operand::Block(_) | Operand::Func(_) => None,
        }
    }

    pub fn new_value(&mut self, ty: TypeId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ty);
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn num_insts(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }

    /// Renumber values densely: parameters first, then results in block order.
    ///
    /// Values that are referenced but no longer defined keep a fresh number
    /// after all definitions so that the verifier can still report them.
    pub fn renumber_values(&mut self) {
        let mut map: Vec<Option<u32>> = vec![None; self.values.len()];
        let mut values = Vec::with_capacity(self.values.len());
        for (i, ty) in self.params.iter().enumerate() {
            map[i] = Some(i as u32);
            values.push(*ty);
        }
        for block in &self.blocks {
            for inst in &block.insts {
                if let Some(r) = inst.result {
                    if let Some(slot) = map.get_mut(r.index()) {
                        *slot = Some(values.len() as u32);
                        values.push(self.values[r.index()]);
                    }
                }
            }
        }
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                if let Some(r) = inst.result.as_mut() {
                    if let Some(Some(n)) = map.get(r.index()) {
                        *r = ValueId(*n);
                    }
                }
                for op in &mut inst.operands {
                    if let Operand::Value(v) = op {
                        let old = v.index();
                        let new = match map.get(old) {
                            Some(Some(n)) => *n,
                            _ => {
                                let n = values.len() as u32;
                                let ty = self.values.get(old).copied().unwrap_or(self.ret);
                                values.push(ty);
                                if let Some(slot) = map.get_mut(old) {
                                    *slot = Some(n);
                                }
                                n
                            }
                        };
                        *v = ValueId(new);
                    }
                }
            }
        }
        self.values = values;
    }

    /// Number of uses of every value, counting each operand occurrence.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.values.len()];
        for block in &self.blocks {
            for inst in &block.insts {
                for v in inst.value_operands() {
                    if let Some(c) = counts.get_mut(v.index()) {
                        *c += 1;
                    }
                }
            }
        }
        counts
    }

    /// Replace every use of `from` with `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: &Operand) {
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                for op in &mut inst.operands {
                    if *op == Operand::Value(from) {
                        *op = to.clone();
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: TypeId,
    pub flags: GlobalFlags,
    pub init: Option<Constant>,
}

impl GlobalVariable {
    pub fn is_constant(&self) -> bool {
        self.flags.contains(GlobalFlags::CONSTANT)
    }
}

/// A translation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub types: TypeTable,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.0 as usize]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(|i| GlobalId(i as u32))
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        self.functions.push(func);
        FuncId(self.functions.len() as u32 - 1)
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() as u32 - 1)
    }

    pub fn definitions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn contains_switch(&self) -> bool {
        self.functions.iter().any(|f| {
            f.blocks
                .iter()
                .any(|b| b.terminator().map(|t| t.opcode) == Some(Opcode::Switch))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Module, FuncId) {
        let mut m = Module::new();
        let i32t = m.types.i32();
        let void = m.types.void();
        let mut f = Function::new("f", i32t, vec![i32t, i32t]);
        let mut entry = BasicBlock::new("entry");
        let mut add = Instruction::new(
            Opcode::Add,
            i32t,
            vec![Operand::Value(ValueId(0)), Operand::Value(ValueId(1))],
        );
        add.result = Some(f.new_value(i32t));
        entry.insts.push(add);
        entry.insts.push(Instruction::new(
            Opcode::Ret,
            void,
            vec![Operand::Value(ValueId(2))],
        ));
        f.blocks.push(entry);
        let id = m.add_function(f);
        (m, id)
    }

    #[test]
    fn use_counts_and_successors() {
        let (m, id) = sample();
        let f = m.function(id);
        assert_eq!(f.use_counts(), vec![1, 1, 1]);
        assert!(f.blocks[0].successors().is_empty());
        assert!(!f.is_declaration());
    }

    #[test]
    fn renumbering_compacts_gaps() {
        let (mut m, id) = sample();
        let f = &mut m.functions[id.0 as usize];
        // Pretend an earlier pass left a hole at %2.
        let i32t = f.values[0];
        f.values.push(i32t);
        f.blocks[0].insts[0].result = Some(ValueId(3));
        f.blocks[0].insts[1].operands[0] = Operand::Value(ValueId(3));
        f.renumber_values();
        assert_eq!(f.values.len(), 3);
        assert_eq!(f.blocks[0].insts[0].result, Some(ValueId(2)));
        assert_eq!(f.blocks[0].insts[1].operands[0], Operand::Value(ValueId(2)));
    }
}
