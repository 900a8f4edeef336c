// This module is the instruction selection table of the backend: a single match keyed by
// (opcode, type class) that returns the emission routine for the pair. The type class is
// the result type for arithmetic, memory and call instructions and the source operand
// type for compares, casts, stores and returns. A pair that has no entry is an
// unsupported instruction; adding support for a new opcode or type is one new arm here
// plus an emit_* routine in FunctionCodegen.

//! Instruction selection.

use super::function_codegen::FunctionCodegen;
use crate::core::error::CodegenResult;
use crate::ir::{Instruction, Opcode, TypeClass};

/// Emission routine for one instruction.
pub type EmitFn<'a, 'm> = fn(&mut FunctionCodegen<'a, 'm>, &Instruction) -> CodegenResult<()>;

/// Look up the routine emitting `opcode` on values of class `class`.
pub fn select<'a, 'm>(opcode: Opcode, class: TypeClass) -> Option<EmitFn<'a, 'm>> {
    use Opcode as O;
    use TypeClass::*;

    let emit: EmitFn<'a, 'm> = match (opcode, class) {
        (
            O::Add | O::Sub | O::Mul | O::SDiv | O::UDiv | O::SRem | O::URem | O::Shl
            | O::LShr | O::AShr | O::And | O::Or | O::Xor,
            I1 | I8 | I16 | I32 | I64,
        ) => FunctionCodegen::emit_int_binary,
        (O::FAdd | O::FSub | O::FMul | O::FDiv | O::FRem, F32 | F64) => {
            FunctionCodegen::emit_float_binary
        }
        (O::FNeg, F32 | F64) => FunctionCodegen::emit_fneg,

        (O::ICmp, I1 | I8 | I16 | I32 | I64 | Ptr) => FunctionCodegen::emit_icmp,
        (O::FCmp, F32 | F64) => FunctionCodegen::emit_fcmp,

        (O::Trunc | O::ZExt | O::SExt, I1 | I8 | I16 | I32 | I64) => {
            FunctionCodegen::emit_int_cast
        }
        (O::PtrToInt, Ptr) | (O::IntToPtr, I1 | I8 | I16 | I32 | I64) => {
            FunctionCodegen::emit_int_cast
        }
        (O::FPTrunc | O::FPExt, F32 | F64) => FunctionCodegen::emit_float_cast,
        (O::FPToSI | O::FPToUI, F32 | F64) => FunctionCodegen::emit_float_to_int,
        (O::SIToFP | O::UIToFP, I1 | I8 | I16 | I32 | I64) => {
            FunctionCodegen::emit_int_to_float
        }
        (O::Bitcast, I32 | I64 | F32 | F64 | Ptr) => FunctionCodegen::emit_bitcast,

        (O::Load, I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => FunctionCodegen::emit_load,
        (O::Store, I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => FunctionCodegen::emit_store,
        (O::Alloca, Ptr) => FunctionCodegen::emit_alloca,
        (O::GetElementPtr, Ptr) => FunctionCodegen::emit_gep,
        (O::Select, I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => {
            FunctionCodegen::emit_select
        }
        (O::Call, Void | I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => {
            FunctionCodegen::emit_call
        }
        (O::Phi, I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => FunctionCodegen::emit_nothing,

        (O::Ret, Void | I1 | I8 | I16 | I32 | I64 | F32 | F64 | Ptr) => {
            FunctionCodegen::emit_ret
        }
        (O::Br, Void) => FunctionCodegen::emit_br,
        (O::CondBr, Void) => FunctionCodegen::emit_cond_br,
        (O::Unreachable, Void) => FunctionCodegen::emit_unreachable,
        _ => return None,
    };
    Some(emit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_pairs_are_selected() {
        assert!(select(Opcode::Add, TypeClass::I32).is_some());
        assert!(select(Opcode::Add, TypeClass::I64).is_some());
        assert!(select(Opcode::FMul, TypeClass::F64).is_some());
        assert!(select(Opcode::Load, TypeClass::Ptr).is_some());
        assert!(select(Opcode::Ret, TypeClass::Void).is_some());
    }

    #[test]
    fn unmapped_pairs_are_rejected() {
        assert!(select(Opcode::Add, TypeClass::Vector).is_none());
        assert!(select(Opcode::Add, TypeClass::OddInt).is_none());
        assert!(select(Opcode::FAdd, TypeClass::I32).is_none());
        assert!(select(Opcode::Switch, TypeClass::Void).is_none());
        assert!(select(Opcode::Load, TypeClass::Aggregate).is_none());
    }
}
