// This module implements GC intrinsic lowering. Generated code runs on top of the host
// VM's own collector, so the explicit GC protocol of the IR reduces to plain memory
// operations: calls to llvm.gcroot disappear, llvm.gcread(obj, addr) becomes a load from
// addr and llvm.gcwrite(value, obj, addr) becomes a store of value to addr. Any other
// llvm.gc* intrinsic has no meaning here and fails the pass with a LoweringError naming
// the offending instruction. The module is scanned for failures before anything is
// rewritten.

//! GC intrinsic lowering.

use super::Pass;
use crate::core::error::LoweringError;
use crate::ir::printer::print_instruction;
use crate::ir::{Instruction, Module, Opcode, Operand};

/// Removes or rewrites calls to the `llvm.gc*` intrinsics.
pub struct GcLowering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GcIntrinsic {
    Root,
    Read,
    Write,
    Other,
}

impl GcIntrinsic {
    fn classify(name: &str) -> Option<Self> {
        match name {
            "llvm.gcroot" => Some(GcIntrinsic::Root),
            "llvm.gcread" => Some(GcIntrinsic::Read),
            "llvm.gcwrite" => Some(GcIntrinsic::Write),
            n if n.starts_with("llvm.gc") => Some(GcIntrinsic::Other),
            _ => None,
        }
    }

    fn arity(self) -> usize {
        match self {
            GcIntrinsic::Root | GcIntrinsic::Read => 2,
            GcIntrinsic::Write => 3,
            GcIntrinsic::Other => 0,
        }
    }
}

impl GcLowering {
    fn intrinsic_of(kinds: &[Option<GcIntrinsic>], inst: &Instruction) -> Option<GcIntrinsic> {
        if inst.opcode != Opcode::Call {
            return None;
        }
        match inst.operands.first() {
            Some(Operand::Func(id)) => kinds.get(id.0 as usize).copied().flatten(),
            _ => None,
        }
    }
}

impl Pass for GcLowering {
    fn name(&self) -> &'static str {
        "gc-lowering"
    }

    fn run(&self, module: &mut Module) -> Result<bool, LoweringError> {
        let kinds: Vec<Option<GcIntrinsic>> = module
            .functions
            .iter()
            .map(|f| GcIntrinsic::classify(&f.name))
            .collect();
        if kinds.iter().all(Option::is_none) {
            return Ok(false);
        }

        for func in &module.functions {
            for inst in func.blocks.iter().flat_map(|b| &b.insts) {
                let Some(kind) = Self::intrinsic_of(&kinds, inst) else {
                    continue;
                };
                let reason = match kind {
                    GcIntrinsic::Other => Some("unsupported GC intrinsic".to_string()),
                    k if inst.operands.len() != k.arity() + 1 => {
                        Some(format!("expected {} arguments", k.arity()))
                    }
                    _ => None,
                };
                if let Some(reason) = reason {
                    return Err(LoweringError {
                        pass: self.name(),
                        function: func.name.clone(),
                        instruction: print_instruction(module, func, inst),
                        reason,
                    });
                }
            }
        }

        let void = module.types.void();
        let mut changed = false;
        for func in &mut module.functions {
            for block in &mut func.blocks {
                let insts = std::mem::take(&mut block.insts);
                for inst in insts {
                    let Some(kind) = Self::intrinsic_of(&kinds, &inst) else {
                        block.insts.push(inst);
                        continue;
                    };
                    changed = true;
                    match kind {
                        GcIntrinsic::Root => {}
                        GcIntrinsic::Read => {
                            // An unused read has no effect.
                            if let Some(result) = inst.result {
                                block.insts.push(Instruction {
                                    opcode: Opcode::Load,
                                    ty: inst.ty,
                                    operands: vec![inst.operands[2].clone()],
                                    attr: inst.attr,
                                    result: Some(result),
                                });
                            }
                        }
                        GcIntrinsic::Write => block.insts.push(Instruction::new(
                            Opcode::Store,
                            void,
                            vec![inst.operands[1].clone(), inst.operands[3].clone()],
                        )),
                        GcIntrinsic::Other => block.insts.push(inst),
                    }
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use crate::verifier::{verify_module, Profile};

    #[test]
    fn rewrites_root_read_and_write() {
        let mut m = parse_module(
            "declare void @llvm.gcroot(ptr, ptr)\n\
             declare ptr @llvm.gcread(ptr, ptr)\n\
             declare void @llvm.gcwrite(ptr, ptr, ptr)\n\
             define ptr @f(ptr %slot, ptr %obj) {\n\
             entry:\n  call void @llvm.gcroot(ptr %slot, ptr null)\n  %v = call ptr @llvm.gcread(ptr %obj, ptr %slot)\n  call void @llvm.gcwrite(ptr %v, ptr %obj, ptr %slot)\n  ret ptr %v\n}\n",
        )
        .unwrap();
        assert!(GcLowering.run(&mut m).unwrap());
        let body = &m.functions[3].blocks[0].insts;
        let ops: Vec<Opcode> = body.iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Opcode::Load, Opcode::Store, Opcode::Ret]);
        assert!(verify_module(&m, Profile::Lowered).is_empty());
        assert!(!GcLowering.run(&mut m).unwrap());
    }

    #[test]
    fn unknown_gc_intrinsic_fails() {
        let mut m = parse_module(
            "declare void @llvm.gcfoo(ptr)\n\
             define void @f(ptr %p) {\nentry:\n  call void @llvm.gcfoo(ptr %p)\n  ret void\n}\n",
        )
        .unwrap();
        let err = GcLowering.run(&mut m).unwrap_err();
        assert_eq!(err.pass, "gc-lowering");
        assert_eq!(err.function, "f");
        assert!(err.instruction.contains("llvm.gcfoo"));
    }
}
