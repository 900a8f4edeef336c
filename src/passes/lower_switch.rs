// This module implements switch lowering. Every switch terminator becomes a chain of
// `icmp eq` compares and conditional branches, one per case in case order; the first
// compare stays in the switch's block, each further compare gets a new block placed
// directly after it, and the last compare falls through to the default destination. A
// switch without cases becomes an unconditional branch to its default. Phis in the
// destinations get one incoming entry per compare block that now branches to them,
// carrying the value the switch block used to provide. The backend never sees a
// switch, so it never needs tableswitch or lookupswitch.

//! Switch lowering.

use super::{reorder_blocks, retarget_phi_entries, Pass};
use crate::core::error::LoweringError;
use crate::ir::printer::print_instruction;
use crate::ir::{
    BlockId, Constant, Function, FunctionBuilder, Instruction, IntPredicate, Module, Opcode,
    Operand, TypeId,
};
use log::trace;

/// Rewrites `switch` terminators into compare-and-branch chains.
pub struct LowerSwitch;

struct SwitchShape {
    cond: Operand,
    default: BlockId,
    cases: Vec<(Constant, BlockId)>,
}

fn decode(inst: &Instruction) -> Option<SwitchShape> {
    let cond = inst.operands.first()?.clone();
    let default = inst.operands.get(1)?.as_block()?;
    let mut cases = Vec::new();
    for pair in inst.operands.get(2..)?.chunks(2) {
        match pair {
            [Operand::Const(c), Operand::Block(b)] => cases.push((c.clone(), *b)),
            _ => return None,
        }
    }
    Some(SwitchShape {
        cond,
        default,
        cases,
    })
}

impl LowerSwitch {
    fn error(
        &self,
        module: &Module,
        func: &Function,
        term: &Instruction,
        reason: &str,
    ) -> LoweringError {
        LoweringError {
            pass: self.name(),
            function: func.name.clone(),
            instruction: print_instruction(module, func, term),
            reason: reason.to_string(),
        }
    }

    fn lower_function(
        &self,
        module: &Module,
        i1: TypeId,
        func: &mut Function,
    ) -> Result<bool, LoweringError> {
        let original = func.blocks.len();
        let mut extra: Vec<Vec<BlockId>> = vec![Vec::new(); original];
        let mut changed = false;

        for bi in 0..original {
            let b = BlockId(bi as u32);
            let is_switch = func.blocks[bi]
                .insts
                .last()
                .is_some_and(|t| t.opcode == Opcode::Switch);
            if !is_switch {
                continue;
            }
            let Some(term) = func.blocks[bi].insts.pop() else {
                continue;
            };
            let Some(shape) = decode(&term) else {
                return Err(self.error(module, func, &term, "malformed switch"));
            };
            changed = true;
            let base_name = func.blocks[bi].name.clone();
            let mut builder = FunctionBuilder::new(func, term.ty);
            builder.position_at_end(b);

            if shape.cases.is_empty() {
                builder.br(shape.default);
                continue;
            }

            // (from, to) edges of the new chain, in emission order.
            let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
            let count = shape.cases.len();
            let mut current = b;
            for (k, (value, target)) in shape.cases.into_iter().enumerate() {
                let next = if k + 1 == count {
                    shape.default
                } else {
                    let id = builder.append_block(format!("{base_name}.case{}", k + 1));
                    extra[bi].push(id);
                    id
                };
                builder.position_at_end(current);
                let flag =
                    builder.icmp(IntPredicate::Eq, i1, shape.cond.clone(), Operand::Const(value));
                let Some(flag) = flag else {
                    let func = builder.function();
                    return Err(self.error(module, func, &term, "compare without a result"));
                };
                builder.cond_br(Operand::Value(flag), target, next);
                edges.push((current, target));
                if k + 1 == count {
                    edges.push((current, shape.default));
                }
                current = next;
            }

            let mut targets: Vec<BlockId> = Vec::new();
            for &(_, to) in &edges {
                if !targets.contains(&to) {
                    targets.push(to);
                }
            }
            for target in targets {
                let mut preds: Vec<BlockId> = Vec::new();
                for &(from, to) in &edges {
                    if to == target && !preds.contains(&from) {
                        preds.push(from);
                    }
                }
                retarget_phi_entries(func, target, b, &preds);
            }
            trace!("📊 Lowered switch in {} into {} compare(s)", base_name, count);
        }

        if changed {
            let mut order = Vec::with_capacity(func.blocks.len());
            for (bi, added) in extra.iter().enumerate() {
                order.push(BlockId(bi as u32));
                order.extend_from_slice(added);
            }
            reorder_blocks(func, &order);
            func.renumber_values();
        }
        Ok(changed)
    }
}

impl Pass for LowerSwitch {
    fn name(&self) -> &'static str {
        "lower-switch"
    }

    fn run(&self, module: &mut Module) -> Result<bool, LoweringError> {
        if !module.contains_switch() {
            return Ok(false);
        }
        let i1 = module.types.i1();
        let mut functions = std::mem::take(&mut module.functions);
        let mut changed = false;
        let mut result = Ok(());
        for func in &mut functions {
            match self.lower_function(module, i1, func) {
                Ok(c) => changed |= c,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        module.functions = functions;
        result.map(|()| changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::printer::print_module;
    use crate::verifier::{verify_module, Profile};

    const FOUR_WAY: &str = "define i32 @pick(i32 %v) {\n\
        entry:\n  switch i32 %v, label %other [ i32 0, label %zero i32 1, label %one i32 2, label %join ]\n\
        zero:\n  br label %join\n\
        one:\n  br label %join\n\
        other:\n  br label %join\n\
        join:\n  %r = phi i32 [ 10, %zero ], [ 11, %one ], [ 12, %entry ], [ 13, %other ]\n  ret i32 %r\n}\n";

    #[test]
    fn four_way_switch_becomes_three_compares() {
        let mut m = parse_module(FOUR_WAY).unwrap();
        assert!(LowerSwitch.run(&mut m).unwrap());
        assert!(!m.contains_switch());
        let f = &m.functions[0];
        let compares = f
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| i.icmp_predicate() == Some(IntPredicate::Eq))
            .count();
        assert_eq!(compares, 3);
        // entry, entry.case1, entry.case2 follow each other
        assert_eq!(f.blocks[1].name, "entry.case1");
        assert_eq!(f.blocks[2].name, "entry.case2");
        let diags = verify_module(&m, Profile::Lowered);
        assert!(diags.is_empty(), "{diags:?}");
    }

    #[test]
    fn phi_entry_moves_to_the_last_compare() {
        let mut m = parse_module(FOUR_WAY).unwrap();
        LowerSwitch.run(&mut m).unwrap();
        let f = &m.functions[0];
        let join = f.blocks.iter().position(|b| b.name == "join").unwrap();
        let incoming: Vec<String> = f.blocks[join].insts[0]
            .phi_incoming()
            .map(|(_, b)| f.blocks[b.index()].name.clone())
            .collect();
        assert!(incoming.contains(&"entry.case2".to_string()));
        assert!(!incoming.contains(&"entry".to_string()));
    }

    #[test]
    fn empty_switch_becomes_branch() {
        let mut m = parse_module(
            "define void @f(i32 %v) {\nentry:\n  switch i32 %v, label %d [ ]\nd:\n  ret void\n}\n",
        )
        .unwrap();
        assert!(LowerSwitch.run(&mut m).unwrap());
        assert_eq!(m.functions[0].blocks[0].insts[0].opcode, Opcode::Br);
    }

    #[test]
    fn switch_free_modules_are_untouched() {
        let text = "define i32 @id(i32 %x) {\nentry:\n  ret i32 %x\n}\n";
        let mut m = parse_module(text).unwrap();
        let before = print_module(&m);
        assert!(!LowerSwitch.run(&mut m).unwrap());
        assert_eq!(print_module(&m), before);
    }
}
