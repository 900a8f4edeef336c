// This module implements CFG simplification, iterated to a fixed point per function:
// unreachable blocks are deleted (and their phi entries dropped), conditional branches
// with identical targets or a constant condition become unconditional, a block is merged
// into its unique predecessor when that predecessor branches only to it, and blocks that
// contain nothing but an unconditional branch are bypassed when the destination's phis
// stay consistent. Afterwards blocks and values are renumbered densely in block order.

//! CFG simplification.

use super::{reorder_blocks, remove_phi_entries, retarget_phi_entries, Pass};
use crate::core::analyzer::Analyzer;
use crate::core::error::LoweringError;
use crate::ir::{BlockId, Constant, Function, Instruction, Module, Opcode, Operand};
use log::trace;

/// Removes dead and trivial control flow.
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplify-cfg"
    }

    fn run(&self, module: &mut Module) -> Result<bool, LoweringError> {
        let mut changed = false;
        for func in module.functions.iter_mut().filter(|f| !f.is_declaration()) {
            let mut rounds = 0;
            while simplify_once(func) {
                rounds += 1;
            }
            if rounds > 0 {
                trace!("📊 Simplified @{} in {} round(s)", func.name, rounds);
                changed = true;
            }
            func.renumber_values();
        }
        Ok(changed)
    }
}

/// One round of every rewrite; true when anything changed.
fn simplify_once(func: &mut Function) -> bool {
    remove_unreachable(func)
        | fold_branches(func)
        | merge_into_predecessor(func)
        | bypass_forwarders(func)
}

fn remove_unreachable(func: &mut Function) -> bool {
    let analyzer = Analyzer::new(func);
    let dead: Vec<BlockId> = func
        .block_ids()
        .filter(|b| !analyzer.is_reachable(*b))
        .collect();
    if dead.is_empty() {
        return false;
    }
    for &d in &dead {
        for &succ in analyzer.succs(d) {
            if analyzer.is_reachable(succ) {
                remove_phi_entries(func, succ, d);
            }
        }
    }
    let order: Vec<BlockId> = func
        .block_ids()
        .filter(|b| analyzer.is_reachable(*b))
        .collect();
    reorder_blocks(func, &order);
    true
}

fn fold_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let b = BlockId(bi as u32);
        let Some(term) = func.blocks[bi].insts.last() else {
            continue;
        };
        if term.opcode != Opcode::CondBr {
            continue;
        }
        let (Some(t), Some(f)) = (
            term.operands.get(1).and_then(Operand::as_block),
            term.operands.get(2).and_then(Operand::as_block),
        ) else {
            continue;
        };
        let void = term.ty;
        let constant = match term.operands.first() {
            Some(Operand::Const(Constant::Int { bits, .. })) => Some(bits & 1 == 1),
            _ => None,
        };
        let taken = match constant {
            _ if t == f => t,
            Some(cond) => {
                let (taken, dropped) = if cond { (t, f) } else { (f, t) };
                remove_phi_entries(func, dropped, b);
                taken
            }
            None => continue,
        };
        if let Some(last) = func.blocks[bi].insts.last_mut() {
            *last = Instruction::new(Opcode::Br, void, vec![Operand::Block(taken)]);
            changed = true;
        }
    }
    changed
}

fn merge_into_predecessor(func: &mut Function) -> bool {
    let analyzer = Analyzer::new(func);
    for bi in 1..func.blocks.len() {
        let b = BlockId(bi as u32);
        let [p] = analyzer.preds(b) else {
            continue;
        };
        let p = *p;
        if p == b || analyzer.succs(p) != [b].as_slice() {
            continue;
        }
        if func.blocks[p.index()].insts.last().map(|i| i.opcode) != Some(Opcode::Br) {
            continue;
        }

        // Single-entry phis are copies of their only incoming value.
        let phi_count = func.blocks[bi].phi_count();
        let phis: Vec<Instruction> = func.blocks[bi].insts.drain(..phi_count).collect();
        for phi in phis {
            if let (Some(result), Some((value, _))) = (phi.result, phi.phi_incoming().next()) {
                let value = value.clone();
                func.replace_all_uses(result, &value);
            }
        }

        let moved = std::mem::take(&mut func.blocks[bi].insts);
        let pred = &mut func.blocks[p.index()].insts;
        pred.pop();
        pred.extend(moved);

        for &succ in analyzer.succs(b) {
            retarget_phi_entries(func, succ, b, &[p]);
        }
        // `b` is now empty and unreachable; the next round deletes it.
        return true;
    }
    false
}

fn bypass_forwarders(func: &mut Function) -> bool {
    let analyzer = Analyzer::new(func);
    for bi in 1..func.blocks.len() {
        let f = BlockId(bi as u32);
        let block = &func.blocks[bi];
        let [only] = block.insts.as_slice() else {
            continue;
        };
        if only.opcode != Opcode::Br {
            continue;
        }
        let Some(target) = only.operands.first().and_then(Operand::as_block) else {
            continue;
        };
        let preds = analyzer.preds(f);
        if target == f || preds.is_empty() {
            continue;
        }
        let target_preds = analyzer.preds(target);

        // Each phi must agree on the value for predecessors that reach the target
        // both directly and through `f`.
        let consistent = func.blocks[target.index()].phis().iter().all(|phi| {
            let value_from = |from: BlockId| {
                phi.phi_incoming()
                    .find(|(_, b)| *b == from)
                    .map(|(v, _)| v.clone())
            };
            let via_f = value_from(f);
            preds
                .iter()
                .filter(|p| target_preds.contains(p))
                .all(|p| value_from(*p) == via_f)
        });
        if !consistent {
            continue;
        }

        let new_preds: Vec<BlockId> = preds
            .iter()
            .copied()
            .filter(|p| !target_preds.contains(p))
            .collect();
        retarget_phi_entries(func, target, f, &new_preds);
        for &p in preds {
            if let Some(term) = func.blocks[p.index()].insts.last_mut() {
                term.replace_block(f, target);
            }
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::printer::print_module;
    use crate::passes::LowerSwitch;
    use crate::verifier::{verify_module, Profile};

    fn simplify(text: &str) -> Module {
        let mut m = parse_module(text).unwrap();
        SimplifyCfg.run(&mut m).unwrap();
        let diags = verify_module(&m, Profile::Input);
        assert!(diags.is_empty(), "{diags:?}");
        m
    }

    #[test]
    fn removes_unreachable_blocks() {
        let m = simplify(
            "define i32 @f() {\n\
             entry:\n  ret i32 1\n\
             dead:\n  %x = add i32 1, 2\n  ret i32 %x\n}\n",
        );
        assert_eq!(m.functions[0].blocks.len(), 1);
    }

    #[test]
    fn straight_line_chain_collapses() {
        let m = simplify(
            "define i32 @f(i32 %a) {\n\
             entry:\n  br label %mid\n\
             mid:\n  %x = add i32 %a, 1\n  br label %end\n\
             end:\n  %p = phi i32 [ %x, %mid ]\n  ret i32 %p\n}\n",
        );
        let f = &m.functions[0];
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(
            print_module(&m),
            "define i32 @f(i32 %0) {\nentry:\n  %1 = add i32 %0, 1\n  ret i32 %1\n}\n"
        );
    }

    #[test]
    fn identical_targets_fold() {
        let m = simplify(
            "define i32 @f(i1 %c) {\n\
             entry:\n  br i1 %c, label %x, label %x\n\
             x:\n  ret i32 0\n}\n",
        );
        assert_eq!(m.functions[0].blocks.len(), 1);
    }

    #[test]
    fn forwarding_block_with_conflicting_phi_is_kept() {
        let m = simplify(
            "define i32 @f(i1 %c) {\n\
             entry:\n  br i1 %c, label %fwd, label %join\n\
             fwd:\n  br label %join\n\
             join:\n  %p = phi i32 [ 1, %fwd ], [ 2, %entry ]\n  ret i32 %p\n}\n",
        );
        assert_eq!(m.functions[0].blocks.len(), 3);
    }

    #[test]
    fn lowered_switch_stays_valid_and_is_idempotent() {
        let mut m = parse_module(
            "define i32 @f(i32 %v) {\n\
             entry:\n  switch i32 %v, label %d [ i32 1, label %a i32 2, label %a ]\n\
             a:\n  br label %d\n\
             d:\n  %r = phi i32 [ 0, %entry ], [ 1, %a ]\n  ret i32 %r\n}\n",
        )
        .unwrap();
        LowerSwitch.run(&mut m).unwrap();
        SimplifyCfg.run(&mut m).unwrap();
        assert!(verify_module(&m, Profile::Lowered).is_empty());
        let once = print_module(&m);
        assert!(!SimplifyCfg.run(&mut m).unwrap());
        assert_eq!(print_module(&m), once);
    }
}
