// This module implements the Lowering Pipeline: an ordered, fixed list of module passes
// (GC intrinsic lowering, switch lowering, CFG simplification) selected by the PassSet
// of the PipelineConfig. The PassManager runs the enabled passes on a private clone of
// the input module and hands the clone back only when every pass succeeded, so callers
// never observe a partially lowered module. Each pass reports whether it changed the
// module; the session counts runs and changes. The shared block reordering helper used
// by switch lowering (to place new compare blocks after their origin) and by CFG
// simplification (to drop dead blocks and renumber densely) lives here as well.

//! Lowering passes.

pub mod gc_lowering;
pub mod lower_switch;
pub mod simplify_cfg;

use crate::core::config::PassSet;
use crate::core::error::LoweringError;
use crate::core::session::CompilationSession;
use crate::ir::{BasicBlock, BlockId, Function, Module, Operand};
use log::debug;

pub use gc_lowering::GcLowering;
pub use lower_switch::LowerSwitch;
pub use simplify_cfg::SimplifyCfg;

/// A module-level rewrite.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Rewrite `module` in place and report whether anything changed.
    fn run(&self, module: &mut Module) -> Result<bool, LoweringError>;
}

/// Runs the enabled passes in their fixed order.
pub struct PassManager {
    passes: Vec<Box<dyn Pass + Send + Sync>>,
}

impl PassManager {
    pub fn new(enabled: PassSet) -> Self {
        let mut passes: Vec<Box<dyn Pass + Send + Sync>> = Vec::new();
        if enabled.contains(PassSet::GC_LOWERING) {
            passes.push(Box::new(GcLowering));
        }
        if enabled.contains(PassSet::LOWER_SWITCH) {
            passes.push(Box::new(LowerSwitch));
        }
        if enabled.contains(PassSet::SIMPLIFY_CFG) {
            passes.push(Box::new(SimplifyCfg));
        }
        Self { passes }
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Lower a copy of `module`; the input is never modified.
    pub fn run(
        &self,
        module: &Module,
        session: &CompilationSession<'_>,
    ) -> Result<Module, LoweringError> {
        let mut lowered = module.clone();
        for pass in &self.passes {
            let changed = pass.run(&mut lowered)?;
            session.record_pass_run(changed);
            debug!(
                "🔧 Pass {} {}",
                pass.name(),
                if changed { "changed the module" } else { "made no changes" }
            );
        }
        Ok(lowered)
    }
}

/// Rebuild `func.blocks` in `order` (old ids) and remap every block reference.
///
/// Blocks missing from `order` are dropped; nothing may still refer to them.
pub(crate) fn reorder_blocks(func: &mut Function, order: &[BlockId]) {
    let mut map: Vec<Option<BlockId>> = vec![None; func.blocks.len()];
    for (new, old) in order.iter().enumerate() {
        if let Some(slot) = map.get_mut(old.index()) {
            *slot = Some(BlockId(new as u32));
        }
    }
    let mut old_blocks: Vec<Option<BasicBlock>> =
        std::mem::take(&mut func.blocks).into_iter().map(Some).collect();
    for old in order {
        if let Some(block) = old_blocks.get_mut(old.index()).and_then(Option::take) {
            func.blocks.push(block);
        }
    }
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            for op in &mut inst.operands {
                if let Operand::Block(b) = op {
                    if let Some(Some(new)) = map.get(b.index()) {
                        *b = *new;
                    }
                }
            }
        }
    }
}

/// Rewrite the incoming entry for `old` in every phi of `block` into one entry per
/// block of `new_preds`, keeping its value.
pub(crate) fn retarget_phi_entries(
    func: &mut Function,
    block: BlockId,
    old: BlockId,
    new_preds: &[BlockId],
) {
    let target = func.block_mut(block);
    let phi_count = target.phi_count();
    for phi in &mut target.insts[..phi_count] {
        let Some(pos) = phi
            .operands
            .chunks(2)
            .position(|pair| pair.get(1) == Some(&Operand::Block(old)))
        else {
            continue;
        };
        let value = phi.operands[pos * 2].clone();
        let replacement: Vec<Operand> = new_preds
            .iter()
            .flat_map(|p| [value.clone(), Operand::Block(*p)])
            .collect();
        phi.operands.splice(pos * 2..pos * 2 + 2, replacement);
    }
}

/// Remove the incoming entry for `pred` from every phi of `block`.
pub(crate) fn remove_phi_entries(func: &mut Function, block: BlockId, pred: BlockId) {
    retarget_phi_entries(func, block, pred, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::ir::printer::print_module;
    use bumpalo::Bump;

    #[test]
    fn pipeline_leaves_input_untouched() {
        let m = parse_module(
            "define i32 @f(i32 %v) {\n\
             entry:\n  switch i32 %v, label %d [ i32 1, label %one ]\n\
             one:\n  ret i32 10\n\
             d:\n  ret i32 0\n}\n",
        )
        .unwrap();
        let before = print_module(&m);
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let lowered = PassManager::new(PassSet::all()).run(&m, &session).unwrap();
        assert_eq!(print_module(&m), before);
        assert!(!lowered.contains_switch());
        assert_eq!(session.stats().passes_run, 3);
    }

    #[test]
    fn pass_selection_follows_the_set() {
        let pm = PassManager::new(PassSet::LOWER_SWITCH | PassSet::SIMPLIFY_CFG);
        assert_eq!(pm.pass_names(), vec!["lower-switch", "simplify-cfg"]);
    }

    #[test]
    fn retargeting_phi_entries() {
        let mut m = parse_module(
            "define i32 @f(i1 %c) {\n\
             entry:\n  br i1 %c, label %a, label %b\n\
             a:\n  br label %b\n\
             b:\n  %p = phi i32 [ 1, %entry ], [ 2, %a ]\n  ret i32 %p\n}\n",
        )
        .unwrap();
        let f = &mut m.functions[0];
        retarget_phi_entries(f, BlockId(2), BlockId(0), &[BlockId(0), BlockId(1)]);
        assert_eq!(f.blocks[2].insts[0].operands.len(), 6);
        remove_phi_entries(f, BlockId(2), BlockId(1));
        let incoming: Vec<BlockId> = f.blocks[2].insts[0].phi_incoming().map(|(_, b)| b).collect();
        assert_eq!(incoming, vec![BlockId(0), BlockId(1)]);
        remove_phi_entries(f, BlockId(2), BlockId(1));
        assert_eq!(f.blocks[2].insts[0].operands.len(), 2);
    }
}
