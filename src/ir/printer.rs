// This module renders a Module in the LLVM-like text form that Disassemble returns and
// that ir::parser reads back. Values always print as %N (their dense SSA number), blocks
// print under their own name when it is a plain identifier unique within the function
// and under a generated bbN label otherwise, and symbols print as @name (quoted when the
// name contains characters outside the identifier set). Floats print as exact hex bit
// patterns so text round trips are lossless. Printing never panics on a structurally
// odd module: missing operands render as a placeholder instead of indexing out of range.

//! Textual IR printer.

use super::constant::Constant;
use super::{
    BlockId, Function, GlobalFlags, InstAttr, Instruction, Module, Opcode, Operand, TypeId,
};
use hashbrown::HashSet;
use std::fmt::Write;

/// Render a whole module.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    let printer = Printer { module };
    for global in &module.globals {
        printer.global(&mut out, global);
    }
    for func in &module.functions {
        if !out.is_empty() {
            out.push('\n');
        }
        printer.function(&mut out, func);
    }
    out
}

/// Render a single function.
pub fn print_function(module: &Module, func: &Function) -> String {
    let mut out = String::new();
    Printer { module }.function(&mut out, func);
    out
}

/// Render one instruction of `func`, as used in error messages.
pub fn print_instruction(module: &Module, func: &Function, inst: &Instruction) -> String {
    let mut out = String::new();
    Printer { module }.instruction(&mut out, func, &block_labels(func), inst);
    out
}

pub(crate) fn is_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
}

/// `@name`, quoted with `\XX` escapes when it is not a plain identifier.
pub(crate) fn symbol(name: &str) -> String {
    if is_ident(name) {
        format!("@{name}")
    } else {
        format!("@\"{}\"", escape_bytes(name.as_bytes()))
    }
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            s.push(b as char);
        } else {
            let _ = write!(s, "\\{b:02X}");
        }
    }
    s
}

/// Printable labels for every block of `func`, unique within the function.
pub fn block_labels(func: &Function) -> Vec<String> {
    let mut used = HashSet::new();
    let mut labels: Vec<Option<String>> = func
        .blocks
        .iter()
        .map(|b| {
            if is_ident(&b.name) && used.insert(b.name.clone()) {
                Some(b.name.clone())
            } else {
                None
            }
        })
        .collect();
    for (i, label) in labels.iter_mut().enumerate() {
        if label.is_none() {
            let mut candidate = format!("bb{i}");
            let mut k = 1;
            while !used.insert(candidate.clone()) {
                candidate = format!("bb{i}.{k}");
                k += 1;
            }
            *label = Some(candidate);
        }
    }
    labels.into_iter().flatten().collect()
}

struct Printer<'m> {
    module: &'m Module,
}

impl Printer<'_> {
    fn ty(&self, ty: TypeId) -> String {
        match self.module.types.try_get(ty) {
            Some(_) => self.module.types.display(ty).to_string(),
            None => "<badtype>".to_string(),
        }
    }

    fn global(&self, out: &mut String, g: &super::GlobalVariable) {
        let _ = write!(out, "{} = ", symbol(&g.name));
        if g.flags.contains(GlobalFlags::INTERNAL) {
            out.push_str("internal ");
        }
        if g.init.is_none() {
            out.push_str("external ");
        }
        out.push_str(if g.is_constant() { "constant " } else { "global " });
        out.push_str(&self.ty(g.ty));
        if let Some(init) = &g.init {
            out.push(' ');
            out.push_str(&self.constant(init));
        }
        out.push('\n');
    }

    fn function(&self, out: &mut String, f: &Function) {
        let keyword = if f.is_declaration() { "declare" } else { "define" };
        let _ = write!(out, "{keyword} ");
        if f.flags.contains(super::FunctionFlags::INTERNAL) {
            out.push_str("internal ");
        }
        let _ = write!(out, "{} {}(", self.ty(f.ret), symbol(&f.name));
        for (i, p) in f.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.ty(*p));
            if !f.is_declaration() {
                let _ = write!(out, " %{i}");
            }
        }
        if f.is_variadic() {
            out.push_str(if f.params.is_empty() { "..." } else { ", ..." });
        }
        out.push(')');
        if f.is_declaration() {
            out.push('\n');
            return;
        }
        out.push_str(" {\n");
        let labels = block_labels(f);
        for (bi, block) in f.blocks.iter().enumerate() {
            let _ = writeln!(out, "{}:", labels[bi]);
            for inst in &block.insts {
                out.push_str("  ");
                self.instruction(out, f, &labels, inst);
                out.push('\n');
            }
        }
        out.push_str("}\n");
    }

    fn constant(&self, c: &Constant) -> String {
        let types = &self.module.types;
        match c {
            Constant::Int { ty, bits } => match types.int_width(*ty) {
                Some(1) => if bits & 1 == 1 { "true" } else { "false" }.to_string(),
                _ => c.as_signed(types).unwrap_or(*bits as i64).to_string(),
            },
            Constant::Float { ty, bits } => {
                if matches!(types.try_get(*ty), Some(super::Type::Float)) {
                    format!("0x{:08X}", bits)
                } else {
                    format!("0x{:016X}", bits)
                }
            }
            Constant::Null { .. } => "null".into(),
            Constant::Undef { .. } => "undef".into(),
            Constant::Zero { .. } => "zeroinitializer".into(),
            Constant::Array { elems, .. } => {
                let items: Vec<String> = elems.iter().map(|e| self.typed_const(e)).collect();
                format!("[{}]", join_padded(&items))
            }
            Constant::Struct { fields, .. } => {
                let items: Vec<String> = fields.iter().map(|e| self.typed_const(e)).collect();
                format!("{{{}}}", join_padded(&items))
            }
            Constant::Bytes { data, .. } => format!("c\"{}\"", escape_bytes(data)),
            Constant::GlobalAddr { global, .. } => match self.module.globals.get(global.0 as usize) {
                Some(g) => symbol(&g.name),
                None => "@<badglobal>".into(),
            },
            Constant::FuncAddr { func, .. } => match self.module.functions.get(func.0 as usize) {
                Some(f) => symbol(&f.name),
                None => "@<badfunc>".into(),
            },
        }
    }

    fn typed_const(&self, c: &Constant) -> String {
        format!("{} {}", self.ty(c.ty()), self.constant(c))
    }

    fn operand(&self, labels: &[String], op: Option<&Operand>) -> String {
        match op {
            Some(Operand::Value(v)) => format!("%{}", v.0),
            Some(Operand::Const(c)) => self.constant(c),
            Some(Operand::Block(b)) => match labels.get(b.index()) {
                Some(l) => format!("%{l}"),
                None => format!("%<badblock{}>", b.0),
            },
            Some(Operand::Func(id)) => match self.module.functions.get(id.0 as usize) {
                Some(f) => symbol(&f.name),
                None => "@<badfunc>".into(),
            },
            None => "<missing>".into(),
        }
    }

    fn typed(&self, f: &Function, labels: &[String], op: Option<&Operand>) -> String {
        match op.and_then(|o| f.operand_type(o)) {
            Some(ty) => format!("{} {}", self.ty(ty), self.operand(labels, op)),
            None => self.operand(labels, op),
        }
    }

    fn label(&self, labels: &[String], op: Option<&Operand>) -> String {
        format!("label {}", self.operand(labels, op))
    }

    fn instruction(&self, out: &mut String, f: &Function, labels: &[String], inst: &Instruction) {
        if let Some(r) = inst.result {
            let _ = write!(out, "%{} = ", r.0);
        }
        let ops = &inst.operands;
        let name = inst.opcode.name();
        let text = match inst.opcode {
            Opcode::Ret => match ops.first() {
                None => "ret void".to_string(),
                Some(_) => format!("ret {}", self.typed(f, labels, ops.first())),
            },
            Opcode::Br => format!("br {}", self.label(labels, ops.first())),
            Opcode::CondBr => format!(
                "br {}, {}, {}",
                self.typed(f, labels, ops.first()),
                self.label(labels, ops.get(1)),
                self.label(labels, ops.get(2))
            ),
            Opcode::Switch => {
                let mut s = format!(
                    "switch {}, {} [",
                    self.typed(f, labels, ops.first()),
                    self.label(labels, ops.get(1))
                );
                for case in ops.get(2..).unwrap_or(&[]).chunks(2) {
                    let _ = write!(
                        s,
                        " {}, {}",
                        self.typed(f, labels, case.first()),
                        self.label(labels, case.get(1))
                    );
                }
                s.push_str(" ]");
                s
            }
            Opcode::Unreachable => "unreachable".to_string(),
            Opcode::FNeg => format!("fneg {}", self.typed(f, labels, ops.first())),
            Opcode::ICmp | Opcode::FCmp => {
                let pred = match inst.attr {
                    InstAttr::ICmp(p) => p.name(),
                    InstAttr::FCmp(p) => p.name(),
                    _ => "<nopred>",
                };
                format!(
                    "{name} {pred} {}, {}",
                    self.typed(f, labels, ops.first()),
                    self.operand(labels, ops.get(1))
                )
            }
            op if op.is_cast() => format!(
                "{name} {} to {}",
                self.typed(f, labels, ops.first()),
                self.ty(inst.ty)
            ),
            Opcode::Alloca => {
                let elem = inst.type_attr().map(|t| self.ty(t)).unwrap_or_default();
                match ops.first() {
                    Some(_) => format!("alloca {elem}, {}", self.typed(f, labels, ops.first())),
                    None => format!("alloca {elem}"),
                }
            }
            Opcode::Load => format!(
                "load {}, {}",
                self.ty(inst.ty),
                self.typed(f, labels, ops.first())
            ),
            Opcode::Store => format!(
                "store {}, {}",
                self.typed(f, labels, ops.first()),
                self.typed(f, labels, ops.get(1))
            ),
            Opcode::GetElementPtr => {
                let src = inst.type_attr().map(|t| self.ty(t)).unwrap_or_default();
                let mut s = format!("getelementptr {src}");
                for op in ops {
                    let _ = write!(s, ", {}", self.typed(f, labels, Some(op)));
                }
                s
            }
            Opcode::Phi => {
                let incoming: Vec<String> = ops
                    .chunks(2)
                    .map(|pair| {
                        format!(
                            "[ {}, {} ]",
                            self.operand(labels, pair.first()),
                            self.operand(labels, pair.get(1))
                        )
                    })
                    .collect();
                format!("phi {} {}", self.ty(inst.ty), incoming.join(", "))
            }
            Opcode::Select => format!(
                "select {}, {}, {}",
                self.typed(f, labels, ops.first()),
                self.typed(f, labels, ops.get(1)),
                self.typed(f, labels, ops.get(2))
            ),
            Opcode::Call => {
                let args: Vec<String> = ops
                    .iter()
                    .skip(1)
                    .map(|a| self.typed(f, labels, Some(a)))
                    .collect();
                format!(
                    "call {} {}({})",
                    self.ty(inst.ty),
                    self.operand(labels, ops.first()),
                    args.join(", ")
                )
            }
            // Binary integer and float arithmetic.
            _ => format!(
                "{name} {}, {}",
                self.typed(f, labels, ops.first()),
                self.operand(labels, ops.get(1))
            ),
        };
        out.push_str(&text);
    }
}

fn join_padded(items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!(" {} ", items.join(", "))
    }
}

/// Label of a block as it appears in printed text.
pub fn block_label(func: &Function, block: BlockId) -> String {
    block_labels(func)
        .get(block.index())
        .cloned()
        .unwrap_or_else(|| format!("bb{}", block.0))
}
