// This module implements the Verifier: a read-only pass over a Module that checks the
// structural invariants every later stage relies on. Module-level checks cover symbol
// uniqueness, global initializers and signatures; per function it checks block shape
// (exactly one terminator, at the end; phis only at the start and never in the entry
// block; the entry block has no predecessors), phi incoming lists against the real
// predecessors, operand shapes and types for every opcode, call signatures, uses of
// values defined in unreachable blocks, SSA dominance and that every global, alloca
// and getelementptr source type fits in the 32-bit address space. The Verifier runs in two
// modes: collecting (every finding, in a deterministic order) and strict (stop at the
// first finding); the Lowered profile additionally rejects constructs the lowering
// passes must have removed (switch terminators, GC intrinsic calls).

//! Module verifier.

pub mod dominance;

use crate::core::analyzer::Analyzer;
use crate::core::error::Diagnostic;
use crate::ir::layout::DataLayout;
use crate::ir::printer::block_labels;
use crate::ir::{
    BlockId, Constant, Function, InstAttr, Instruction, Module, Opcode, Operand, Type, TypeId,
};
use dominance::DominatorTree;
use hashbrown::{HashMap, HashSet};
use log::debug;

/// Which invariants to enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Invariants of any well-formed input module.
    Input,
    /// Input invariants plus the absence of constructs lowering removes.
    Lowered,
}

/// Collect every violation in `module`.
pub fn verify_module(module: &Module, profile: Profile) -> Vec<Diagnostic> {
    let mut v = Verifier::new(module, profile, false);
    // Collecting mode never stops early.
    let _ = v.run();
    debug!("📊 Verifier found {} issue(s)", v.diags.len());
    v.diags
}

/// Stop at the first violation.
pub fn verify_strict(module: &Module, profile: Profile) -> Result<(), Diagnostic> {
    let mut v = Verifier::new(module, profile, true);
    match v.run() {
        Ok(()) => Ok(()),
        Err(Stop) => match v.diags.pop() {
            Some(d) => Err(d),
            None => Ok(()),
        },
    }
}

/// Raised by `report` in strict mode to unwind the checks.
struct Stop;

type Check = Result<(), Stop>;

struct Verifier<'m> {
    module: &'m Module,
    profile: Profile,
    strict: bool,
    layout: DataLayout,
    diags: Vec<Diagnostic>,
}

/// Per-function context for diagnostics and lookups.
struct FnCtx<'f> {
    func: &'f Function,
    labels: Vec<String>,
}

impl<'m> Verifier<'m> {
    fn new(module: &'m Module, profile: Profile, strict: bool) -> Self {
        Self {
            module,
            profile,
            strict,
            layout: DataLayout::default(),
            diags: Vec::new(),
        }
    }

    fn push(&mut self, diag: Diagnostic) -> Check {
        self.diags.push(diag);
        if self.strict {
            Err(Stop)
        } else {
            Ok(())
        }
    }

    fn module_error(&mut self, message: String) -> Check {
        self.push(Diagnostic::module(message))
    }

    fn error(&mut self, ctx: &FnCtx<'_>, block: Option<BlockId>, message: String) -> Check {
        let block = block.map(|b| {
            ctx.labels
                .get(b.index())
                .cloned()
                .unwrap_or_else(|| format!("bb{}", b.0))
        });
        self.push(Diagnostic {
            function: Some(ctx.func.name.clone()),
            block,
            message,
        })
    }

    fn ty(&self, ty: TypeId) -> String {
        match self.module.types.try_get(ty) {
            Some(_) => self.module.types.display(ty).to_string(),
            None => format!("<type {}>", ty.0),
        }
    }

    fn run(&mut self) -> Check {
        self.check_symbols()?;
        for g in 0..self.module.globals.len() {
            self.check_global(g)?;
        }
        for f in &self.module.functions {
            self.check_function(f)?;
        }
        Ok(())
    }

    fn check_symbols(&mut self) -> Check {
        let mut seen: HashSet<&str> = HashSet::new();
        let names = self
            .module
            .globals
            .iter()
            .map(|g| g.name.as_str())
            .chain(self.module.functions.iter().map(|f| f.name.as_str()));
        let mut dups = Vec::new();
        for name in names {
            if name.is_empty() {
                dups.push("symbol with an empty name".to_string());
            } else if !seen.insert(name) {
                dups.push(format!("duplicate symbol @{name}"));
            }
        }
        for d in dups {
            self.module_error(d)?;
        }
        Ok(())
    }

    fn check_global(&mut self, index: usize) -> Check {
        let module = self.module;
        let g = &module.globals[index];
        let types = &module.types;
        if types.is_void(g.ty) {
            return self.module_error(format!("global @{} has void type", g.name));
        }
        if let Err(e) = self.layout.alloc_size(types, g.ty) {
            return self.module_error(format!("global @{}: {e}", g.name));
        }
        if let Some(init) = &g.init {
            if init.ty() != g.ty {
                let msg = format!(
                    "initializer of @{} has type {}, expected {}",
                    g.name,
                    self.ty(init.ty()),
                    self.ty(g.ty)
                );
                return self.module_error(msg);
            }
            if !init.shape_matches(types) {
                return self.module_error(format!("malformed initializer for @{}", g.name));
            }
        }
        Ok(())
    }

    fn check_function(&mut self, func: &'m Function) -> Check {
        let module = self.module;
        let types = &module.types;
        for (i, p) in func.params.iter().enumerate() {
            if types.is_void(*p) {
                self.module_error(format!("parameter {i} of @{} has void type", func.name))?;
            }
        }
        if func.values.len() < func.params.len() {
            return self.module_error(format!("value table of @{} is too short", func.name));
        }
        if func.is_declaration() {
            return Ok(());
        }
        let ctx = FnCtx {
            func,
            labels: block_labels(func),
        };

        let analyzer = Analyzer::new(func);
        self.check_blocks(&ctx, &analyzer)?;
        for (bi, block) in func.blocks.iter().enumerate() {
            let b = BlockId(bi as u32);
            for inst in &block.insts {
                self.check_instruction(&ctx, b, inst)?;
            }
        }
        self.check_phis(&ctx, &analyzer)?;
        self.check_ssa(&ctx, &analyzer)?;

        if self.profile == Profile::Lowered {
            for (bi, block) in func.blocks.iter().enumerate() {
                let b = BlockId(bi as u32);
                for inst in &block.insts {
                    if inst.opcode == Opcode::Switch {
                        self.error(&ctx, Some(b), "switch terminator remains after lowering".into())?;
                    }
                    if let Some(name) = self.callee_name(inst) {
                        if name.starts_with("llvm.gc") {
                            self.error(&ctx, Some(b), format!("call to @{name} remains after lowering"))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn callee_name(&self, inst: &Instruction) -> Option<&'m str> {
        if inst.opcode != Opcode::Call {
            return None;
        }
        match inst.operands.first() {
            Some(Operand::Func(id)) => self
                .module
                .functions
                .get(id.0 as usize)
                .map(|f| f.name.as_str()),
            _ => None,
        }
    }

    fn check_blocks(&mut self, ctx: &FnCtx<'_>, analyzer: &Analyzer) -> Check {
        let func = ctx.func;
        if !analyzer.preds(BlockId(0)).is_empty() {
            self.error(ctx, Some(BlockId(0)), "entry block has predecessors".into())?;
        }
        for (bi, block) in func.blocks.iter().enumerate() {
            let b = Some(BlockId(bi as u32));
            match block.insts.last() {
                None => self.error(ctx, b, "empty block (missing terminator)".into())?,
                Some(last) if !last.is_terminator() => {
                    self.error(ctx, b, "missing terminator".into())?
                }
                _ => {}
            }
            let len = block.insts.len();
            let mut seen_non_phi = false;
            for (ii, inst) in block.insts.iter().enumerate() {
                if inst.is_terminator() && ii + 1 != len {
                    self.error(ctx, b, format!("terminator '{}' before the end of the block", inst.opcode.name()))?;
                }
                if inst.opcode == Opcode::Phi {
                    if bi == 0 {
                        self.error(ctx, b, "phi in the entry block".into())?;
                    }
                    if seen_non_phi {
                        self.error(ctx, b, "phi after a non-phi instruction".into())?;
                    }
                } else {
                    seen_non_phi = true;
                }
            }
        }
        Ok(())
    }

    fn check_phis(&mut self, ctx: &FnCtx<'_>, analyzer: &Analyzer) -> Check {
        for (bi, block) in ctx.func.blocks.iter().enumerate() {
            let b = BlockId(bi as u32);
            let preds = analyzer.preds(b);
            for phi in block.phis() {
                let mut seen: Vec<BlockId> = Vec::new();
                for (_, from) in phi.phi_incoming() {
                    if !preds.contains(&from) {
                        let label = ctx.labels.get(from.index()).cloned().unwrap_or_default();
                        self.error(ctx, Some(b), format!("phi has an entry for non-predecessor %{label}"))?;
                    } else if seen.contains(&from) {
                        let label = &ctx.labels[from.index()];
                        self.error(ctx, Some(b), format!("phi has duplicate entries for %{label}"))?;
                    } else {
                        seen.push(from);
                    }
                }
                for pred in preds {
                    if !seen.contains(pred) {
                        let label = &ctx.labels[pred.index()];
                        self.error(ctx, Some(b), format!("phi has no entry for predecessor %{label}"))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Operand shapes and types of a single instruction.
    fn check_instruction(&mut self, ctx: &FnCtx<'_>, b: BlockId, inst: &Instruction) -> Check {
        let func = ctx.func;
        let module = self.module;
        let types = &module.types;
        let name = inst.opcode.name();
        let ops = &inst.operands;
        let nblocks = func.blocks.len();
        let Some(result_ty) = types.try_get(inst.ty) else {
            return self.error(ctx, Some(b), format!("{name} has an invalid type"));
        };
        let result_ty = result_ty.clone();

        // Operand kinds valid for this position.
        for (i, op) in ops.iter().enumerate() {
            let bad = match op {
                Operand::Value(v) => v.index() >= func.values.len(),
                Operand::Block(blk) => blk.index() >= nblocks,
                Operand::Func(id) => {
                    (id.0 as usize) >= self.module.functions.len()
                        || !(inst.opcode == Opcode::Call && i == 0)
                }
                Operand::Const(c) => !c.shape_matches(types),
            };
            if bad {
                return self.error(ctx, Some(b), format!("invalid operand {i} of {name}"));
            }
        }

        // Result numbering.
        match inst.result {
            Some(r) => {
                if func.value_type(r) != Some(inst.ty) {
                    return self.error(ctx, Some(b), format!("result {r} of {name} has an inconsistent type"));
                }
            }
            None => {
                if !types.is_void(inst.ty) && !inst.is_terminator() && inst.opcode != Opcode::Call {
                    return self.error(ctx, Some(b), format!("{name} produces an unnamed value"));
                }
            }
        }

        let op_ty = |i: usize| ops.get(i).and_then(|o| func.operand_type(o));
        let is_block = |i: usize| matches!(ops.get(i), Some(Operand::Block(_)));
        let is_data = |i: usize| matches!(ops.get(i), Some(Operand::Value(_)) | Some(Operand::Const(_)));
        let int_like = |t: TypeId| match types.get(t) {
            Type::Int(_) => true,
            Type::Vector { elem, .. } => types.get(*elem).is_int(),
            _ => false,
        };
        let float_like = |t: TypeId| match types.get(t) {
            Type::Float | Type::Double => true,
            Type::Vector { elem, .. } => types.get(*elem).is_float(),
            _ => false,
        };
        let expect_count = |n: usize| ops.len() == n;

        let problem: Option<String> = match inst.opcode {
            Opcode::Ret => {
                if types.is_void(func.ret) {
                    (!ops.is_empty()).then(|| "ret with a value in a void function".into())
                } else if !expect_count(1) || !is_data(0) {
                    Some("ret without a value in a non-void function".into())
                } else if op_ty(0) != Some(func.ret) {
                    Some(format!(
                        "ret value has type {}, function returns {}",
                        op_ty(0).map(|t| self.ty(t)).unwrap_or_default(),
                        self.ty(func.ret)
                    ))
                } else {
                    None
                }
            }
            Opcode::Br => (!(expect_count(1) && is_block(0))).then(|| "malformed br".into()),
            Opcode::CondBr => {
                if !(expect_count(3) && is_data(0) && is_block(1) && is_block(2)) {
                    Some("malformed conditional br".into())
                } else if op_ty(0).and_then(|t| types.int_width(t)) != Some(1) {
                    Some("branch condition is not i1".into())
                } else {
                    None
                }
            }
            Opcode::Switch => self.check_switch(func, inst),
            Opcode::Unreachable => (!ops.is_empty()).then(|| "unreachable takes no operands".into()),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::UDiv
            | Opcode::SRem
            | Opcode::URem
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::LShr
            | Opcode::AShr => {
                let ptr_arith = matches!(inst.opcode, Opcode::Add | Opcode::Sub)
                    && matches!(result_ty, Type::Ptr);
                if !(expect_count(2) && is_data(0) && is_data(1)) {
                    Some(format!("{name} expects two operands"))
                } else if !(int_like(inst.ty) || ptr_arith) {
                    Some(format!("{name} on non-integer type {}", self.ty(inst.ty)))
                } else if op_ty(0) != Some(inst.ty) || op_ty(1) != Some(inst.ty) {
                    Some(format!("operand types of {name} do not match {}", self.ty(inst.ty)))
                } else {
                    None
                }
            }
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv | Opcode::FRem => {
                if !(expect_count(2) && is_data(0) && is_data(1)) {
                    Some(format!("{name} expects two operands"))
                } else if !float_like(inst.ty) {
                    Some(format!("{name} on non-float type {}", self.ty(inst.ty)))
                } else if op_ty(0) != Some(inst.ty) || op_ty(1) != Some(inst.ty) {
                    Some(format!("operand types of {name} do not match {}", self.ty(inst.ty)))
                } else {
                    None
                }
            }
            Opcode::FNeg => {
                if !(expect_count(1) && is_data(0)) || !float_like(inst.ty) || op_ty(0) != Some(inst.ty) {
                    Some("malformed fneg".into())
                } else {
                    None
                }
            }
            Opcode::ICmp | Opcode::FCmp => {
                let pred_ok = match (inst.opcode, inst.attr) {
                    (Opcode::ICmp, InstAttr::ICmp(_)) | (Opcode::FCmp, InstAttr::FCmp(_)) => true,
                    _ => false,
                };
                let operand_ok = |t: TypeId| {
                    if inst.opcode == Opcode::ICmp {
                        int_like(t) || types.is_ptr(t)
                    } else {
                        float_like(t)
                    }
                };
                if !pred_ok {
                    Some(format!("{name} without a predicate"))
                } else if !(expect_count(2) && is_data(0) && is_data(1)) {
                    Some(format!("{name} expects two operands"))
                } else if op_ty(0) != op_ty(1) {
                    Some(format!("operand types of {name} differ"))
                } else if !op_ty(0).is_some_and(operand_ok) {
                    Some(format!("{name} on unsupported operand type"))
                } else if types.int_width(inst.ty) != Some(1) && !matches!(result_ty, Type::Vector { .. }) {
                    Some(format!("{name} must produce i1"))
                } else {
                    None
                }
            }
            op if op.is_cast() => {
                if !(expect_count(1) && is_data(0)) {
                    Some(format!("{name} expects one operand"))
                } else {
                    op_ty(0).and_then(|src| self.check_cast(inst.opcode, src, inst.ty))
                }
            }
            Opcode::Alloca => match inst.attr {
                InstAttr::Type(elem) if !types.is_void(elem) && types.try_get(elem).is_some() => {
                    if !types.is_ptr(inst.ty) {
                        Some("alloca must produce ptr".into())
                    } else if ops.len() > 1
                        || (ops.len() == 1 && !op_ty(0).is_some_and(|t| types.int_width(t).is_some()))
                    {
                        Some("alloca count must be an integer".into())
                    } else if let Err(e) = self.layout.alloc_size(types, elem) {
                        Some(format!("alloca of {e}"))
                    } else {
                        None
                    }
                }
                _ => Some("alloca without an allocated type".into()),
            },
            Opcode::Load => {
                if !(expect_count(1) && is_data(0)) || !op_ty(0).is_some_and(|t| types.is_ptr(t)) {
                    Some("load expects a ptr operand".into())
                } else if types.is_void(inst.ty) {
                    Some("load of void".into())
                } else {
                    None
                }
            }
            Opcode::Store => {
                if !(expect_count(2) && is_data(0) && is_data(1)) {
                    Some("store expects a value and a pointer".into())
                } else if !op_ty(1).is_some_and(|t| types.is_ptr(t)) {
                    Some("store address is not a ptr".into())
                } else if op_ty(0).is_some_and(|t| types.is_void(t)) {
                    Some("store of void".into())
                } else {
                    None
                }
            }
            Opcode::GetElementPtr => self.check_gep(func, inst),
            Opcode::Phi => {
                if ops.is_empty() || ops.len() % 2 != 0 {
                    Some("phi expects (value, block) pairs".into())
                } else if ops
                    .chunks(2)
                    .any(|p| !matches!(p[1], Operand::Block(_)) || matches!(p[0], Operand::Block(_) | Operand::Func(_)))
                {
                    Some("phi expects (value, block) pairs".into())
                } else if ops
                    .chunks(2)
                    .any(|p| func.operand_type(&p[0]) != Some(inst.ty))
                {
                    Some(format!("phi incoming value is not {}", self.ty(inst.ty)))
                } else {
                    None
                }
            }
            Opcode::Select => {
                if !(expect_count(3) && is_data(0) && is_data(1) && is_data(2)) {
                    Some("select expects three operands".into())
                } else if op_ty(0).and_then(|t| types.int_width(t)) != Some(1) {
                    Some("select condition is not i1".into())
                } else if op_ty(1) != Some(inst.ty) || op_ty(2) != Some(inst.ty) {
                    Some(format!("select arms are not {}", self.ty(inst.ty)))
                } else {
                    None
                }
            }
            Opcode::Call => self.check_call(func, inst),
            _ => None,
        };
        match problem {
            Some(msg) => self.error(ctx, Some(b), msg),
            None => Ok(()),
        }
    }

    fn check_cast(&self, op: Opcode, src: TypeId, dst: TypeId) -> Option<String> {
        let types = &self.module.types;
        let (s, d) = (types.get(src), types.get(dst));
        let ok = match op {
            Opcode::Trunc => matches!((s, d), (Type::Int(a), Type::Int(b)) if a > b),
            Opcode::ZExt | Opcode::SExt => matches!((s, d), (Type::Int(a), Type::Int(b)) if a < b),
            Opcode::FPTrunc => matches!((s, d), (Type::Double, Type::Float)),
            Opcode::FPExt => matches!((s, d), (Type::Float, Type::Double)),
            Opcode::FPToSI | Opcode::FPToUI => s.is_float() && d.is_int(),
            Opcode::SIToFP | Opcode::UIToFP => s.is_int() && d.is_float(),
            Opcode::PtrToInt => matches!(s, Type::Ptr) && d.is_int(),
            Opcode::IntToPtr => s.is_int() && matches!(d, Type::Ptr),
            Opcode::Bitcast => {
                let bits = |t: &Type| match t {
                    Type::Int(w) => Some(u64::from(*w)),
                    Type::Float => Some(32),
                    Type::Double => Some(64),
                    Type::Ptr => Some(32),
                    _ => None,
                };
                matches!((s, d), (Type::Vector { .. }, _) | (_, Type::Vector { .. }))
                    || (bits(s).is_some() && bits(s) == bits(d))
            }
            _ => false,
        };
        (!ok).then(|| {
            format!(
                "invalid {} from {} to {}",
                op.name(),
                self.ty(src),
                self.ty(dst)
            )
        })
    }

    fn check_switch(&self, func: &Function, inst: &Instruction) -> Option<String> {
        let types = &self.module.types;
        let ops = &inst.operands;
        if ops.len() < 2 || ops.len() % 2 != 0 || !matches!(ops[1], Operand::Block(_)) {
            return Some("malformed switch".into());
        }
        let Some(cond_ty) = func.operand_type(&ops[0]) else {
            return Some("switch condition is not a value".into());
        };
        if types.int_width(cond_ty).is_none() {
            return Some("switch condition is not an integer".into());
        }
        let mut seen = HashSet::new();
        for case in ops[2..].chunks(2) {
            match (&case[0], &case[1]) {
                (Operand::Const(Constant::Int { ty, bits }), Operand::Block(_)) => {
                    if *ty != cond_ty {
                        return Some("switch case type differs from the condition".into());
                    }
                    if !seen.insert(*bits) {
                        return Some(format!("duplicate switch case {bits}"));
                    }
                }
                _ => return Some("switch case must be an integer constant and a label".into()),
            }
        }
        None
    }

    fn check_gep(&self, func: &Function, inst: &Instruction) -> Option<String> {
        let types = &self.module.types;
        let ops = &inst.operands;
        let InstAttr::Type(source) = inst.attr else {
            return Some("getelementptr without a source element type".into());
        };
        if types.try_get(source).is_none() {
            return Some("getelementptr with an invalid source type".into());
        }
        if let Err(e) = self.layout.alloc_size(types, source) {
            return Some(format!("getelementptr over {e}"));
        }
        if !types.is_ptr(inst.ty) {
            return Some("getelementptr must produce ptr".into());
        }
        match ops.first().and_then(|o| func.operand_type(o)) {
            Some(t) if types.is_ptr(t) => {}
            _ => return Some("getelementptr base is not a ptr".into()),
        }
        let mut current = source;
        for (i, idx) in ops.iter().enumerate().skip(1) {
            let Some(idx_ty) = func.operand_type(idx) else {
                return Some("getelementptr index is not a value".into());
            };
            if types.int_width(idx_ty).is_none() {
                return Some("getelementptr index is not an integer".into());
            }
            if i == 1 {
                continue;
            }
            current = match types.get(current) {
                Type::Array { elem, .. } | Type::Vector { elem, .. } => *elem,
                Type::Struct { fields } => {
                    let field = idx
                        .as_const()
                        .and_then(|c| c.as_signed(types))
                        .and_then(|n| usize::try_from(n).ok())
                        .and_then(|n| fields.get(n));
                    match field {
                        Some(f) => *f,
                        None => return Some("struct index must be an in-range constant".into()),
                    }
                }
                _ => return Some("getelementptr indexes into a non-aggregate".into()),
            };
        }
        None
    }

    fn check_call(&self, func: &Function, inst: &Instruction) -> Option<String> {
        let types = &self.module.types;
        let ops = &inst.operands;
        let callee = match ops.first() {
            Some(Operand::Func(id)) => self.module.functions.get(id.0 as usize),
            Some(op @ Operand::Value(_)) => {
                return (!func.operand_type(op).is_some_and(|t| types.is_ptr(t)))
                    .then(|| "indirect callee is not a ptr".into());
            }
            _ => return Some("call without a callee".into()),
        };
        let callee = callee?;
        let args = &ops[1..];
        if args.len() < callee.params.len()
            || (args.len() > callee.params.len() && !callee.is_variadic())
        {
            return Some(format!(
                "call to @{} with {} arguments, expected {}",
                callee.name,
                args.len(),
                callee.params.len()
            ));
        }
        for (i, (arg, want)) in args.iter().zip(&callee.params).enumerate() {
            if matches!(arg, Operand::Block(_) | Operand::Func(_)) {
                return Some(format!("argument {i} of call to @{} is not a value", callee.name));
            }
            if func.operand_type(arg) != Some(*want) {
                return Some(format!(
                    "argument {i} of call to @{} has the wrong type",
                    callee.name
                ));
            }
        }
        if inst.ty != callee.ret {
            return Some(format!(
                "call result type {} does not match @{} returning {}",
                self.ty(inst.ty),
                callee.name,
                self.ty(callee.ret)
            ));
        }
        None
    }

    /// Unique definitions, unreachable definitions and dominance.
    fn check_ssa(&mut self, ctx: &FnCtx<'_>, analyzer: &Analyzer) -> Check {
        let func = ctx.func;
        let params = func.params.len();
        // Definition site of every instruction result: (block, index).
        let mut def: HashMap<u32, (BlockId, usize)> = HashMap::new();
        for (bi, block) in func.blocks.iter().enumerate() {
            let b = BlockId(bi as u32);
            for (ii, inst) in block.insts.iter().enumerate() {
                if let Some(r) = inst.result {
                    if r.index() < params || def.insert(r.0, (b, ii)).is_some() {
                        self.error(ctx, Some(b), format!("value {r} is defined more than once"))?;
                    }
                }
            }
        }

        let dom = DominatorTree::compute(analyzer, func.blocks.len());
        for (bi, block) in func.blocks.iter().enumerate() {
            let b = BlockId(bi as u32);
            if !analyzer.is_reachable(b) {
                continue;
            }
            for (ii, inst) in block.insts.iter().enumerate() {
                let uses: Vec<(usize, BlockId, usize)> = if inst.opcode == Opcode::Phi {
                    inst.phi_incoming()
                        .filter_map(|(op, from)| op.as_value().map(|v| (v.index(), from, usize::MAX)))
                        .collect()
                } else {
                    inst.value_operands().map(|v| (v.index(), b, ii)).collect()
                };
                for (v, use_block, use_index) in uses {
                    if v < params {
                        continue;
                    }
                    let Some(&(def_block, def_index)) = def.get(&(v as u32)) else {
                        self.error(ctx, Some(b), format!("use of undefined value %{v}"))?;
                        continue;
                    };
                    if use_block.index() >= func.blocks.len() || !analyzer.is_reachable(use_block) {
                        continue;
                    }
                    if !analyzer.is_reachable(def_block) {
                        let label = &ctx.labels[def_block.index()];
                        self.error(
                            ctx,
                            Some(b),
                            format!("value %{v} defined in unreachable block %{label} is used in a reachable block"),
                        )?;
                        continue;
                    }
                    let ok = if def_block == use_block {
                        def_index < use_index
                    } else {
                        dom.dominates(def_block, use_block)
                    };
                    if !ok {
                        self.error(ctx, Some(b), format!("use of %{v} is not dominated by its definition"))?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    fn diags(text: &str) -> Vec<String> {
        let m = parse_module(text).unwrap();
        verify_module(&m, Profile::Input)
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn accepts_well_formed_loop() {
        let d = diags(
            "define i32 @f(i32 %n) {\n\
             entry:\n  br label %head\n\
             head:\n  %i = phi i32 [ 0, %entry ], [ %j, %head ]\n  %j = add i32 %i, 1\n  %c = icmp slt i32 %j, %n\n  br i1 %c, label %head, label %exit\n\
             exit:\n  ret i32 %j\n}\n",
        );
        assert!(d.is_empty(), "{d:?}");
    }

    #[test]
    fn reports_missing_terminator_and_type_mismatch() {
        let d = diags(
            "define i32 @f(i32 %a, i64 %b) {\n\
             entry:\n  %x = add i32 %a, %b\n}\n",
        );
        assert!(d.iter().any(|m| m == "missing terminator"));
        assert!(d.iter().any(|m| m.contains("operand types of add")));
    }

    #[test]
    fn reports_types_beyond_the_address_space() {
        let d = diags(
            "@g = global { [2305843009213693952 x i64], i64 } zeroinitializer\n\
             define void @f(ptr %p) {\n\
             entry:\n  %a = alloca [8589934592 x i8]\n  \
             %q = getelementptr [4294967296 x i64], ptr %p, i32 0, i32 1\n  ret void\n}\n",
        );
        assert_eq!(d.len(), 3, "{d:?}");
        assert!(d[0].starts_with("global @g: type"));
        assert!(d.iter().all(|m| m.contains("0xffffffff")));
    }

    #[test]
    fn reports_non_dominated_use() {
        let d = diags(
            "define i32 @f(i1 %c) {\n\
             entry:\n  br i1 %c, label %a, label %b\n\
             a:\n  %x = add i32 1, 2\n  br label %b\n\
             b:\n  ret i32 %x\n}\n",
        );
        assert!(d.iter().any(|m| m.contains("not dominated")), "{d:?}");
    }

    #[test]
    fn reports_use_of_unreachable_definition() {
        let d = diags(
            "define i32 @f() {\n\
             entry:\n  br label %exit\n\
             dead:\n  %x = add i32 1, 2\n  br label %exit\n\
             exit:\n  %y = phi i32 [ 0, %entry ], [ %x, %dead ]\n  %z = add i32 %x, 1\n  ret i32 %z\n}\n",
        );
        assert!(d.iter().any(|m| m.contains("unreachable block")), "{d:?}");
    }

    #[test]
    fn phi_entries_must_match_predecessors() {
        let d = diags(
            "define i32 @f(i1 %c) {\n\
             entry:\n  br i1 %c, label %a, label %b\n\
             a:\n  br label %b\n\
             b:\n  %p = phi i32 [ 1, %a ]\n  ret i32 %p\n}\n",
        );
        assert!(d.iter().any(|m| m.contains("no entry for predecessor %entry")), "{d:?}");
    }

    #[test]
    fn strict_mode_stops_at_the_first_finding() {
        let m = parse_module(
            "@x = global i32 1\n@x = global i32 2\ndefine void @f() {\nentry:\n  unreachable\n  ret void\n}\n",
        )
        .unwrap();
        let all = verify_module(&m, Profile::Input);
        assert!(all.len() >= 2);
        let first = verify_strict(&m, Profile::Input).unwrap_err();
        assert_eq!(first, all[0]);
    }

    #[test]
    fn lowered_profile_rejects_switch() {
        let m = parse_module(
            "define void @f(i32 %v) {\nentry:\n  switch i32 %v, label %d [ i32 0, label %d ]\nd:\n  ret void\n}\n",
        )
        .unwrap();
        assert!(verify_module(&m, Profile::Input).is_empty());
        assert!(verify_strict(&m, Profile::Lowered).is_err());
    }

    #[test]
    fn call_signatures_are_checked() {
        let d = diags(
            "declare i32 @g(i32)\n\
             define i32 @f(i64 %a) {\nentry:\n  %r = call i32 @g(i64 %a)\n  ret i32 %r\n}\n",
        );
        assert!(d.iter().any(|m| m.contains("wrong type")), "{d:?}");
    }
}
