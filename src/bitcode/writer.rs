// This module implements the canonical encoder for the binary IR container. The body is
// encoded first into a scratch buffer while symbol and block names are interned into
// the string table (first use order, deduplicated through a hashbrown map); the header
// and string table are then written in front of it. Encoding is a pure function of the
// Module, so equal modules always produce identical bytes.

//! Binary container writer.

use super::{tag, MAGIC, VERSION};
use crate::ir::{
    Constant, Function, FunctionFlags, GlobalFlags, InstAttr, Instruction, Module, Operand,
    Type,
};
use hashbrown::HashMap;

/// Encode a module into container bytes.
pub fn write_module(module: &Module) -> Vec<u8> {
    let mut writer = Writer::default();
    writer.module(module);

    let mut out = Vec::with_capacity(writer.body.len() + 64);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    write_varint(&mut out, writer.strings.len() as u64);
    for s in &writer.strings {
        write_varint(&mut out, s.len() as u64);
        out.extend_from_slice(s.as_bytes());
    }
    out.extend_from_slice(&writer.body);
    out
}

/// Unsigned LEB128.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[derive(Default)]
struct Writer {
    body: Vec<u8>,
    strings: Vec<String>,
    string_ids: HashMap<String, u32>,
}

impl Writer {
    fn varint(&mut self, value: u64) {
        write_varint(&mut self.body, value);
    }

    fn byte(&mut self, b: u8) {
        self.body.push(b);
    }

    fn string(&mut self, s: &str) {
        let id = match self.string_ids.get(s) {
            Some(id) => *id,
            None => {
                let id = self.strings.len() as u32;
                self.strings.push(s.to_string());
                self.string_ids.insert(s.to_string(), id);
                id
            }
        };
        self.varint(u64::from(id));
    }

    fn module(&mut self, module: &Module) {
        self.varint(module.types.len() as u64);
        for (_, ty) in module.types.iter() {
            self.ty(ty);
        }

        self.varint(module.globals.len() as u64);
        for g in &module.globals {
            self.string(&g.name);
            self.varint(u64::from(g.ty.0));
            let mut flags = 0u8;
            if g.flags.contains(GlobalFlags::CONSTANT) {
                flags |= tag::G_CONSTANT;
            }
            if g.flags.contains(GlobalFlags::INTERNAL) {
                flags |= tag::G_INTERNAL;
            }
            if g.init.is_some() {
                flags |= tag::G_HAS_INIT;
            }
            self.byte(flags);
            if let Some(init) = &g.init {
                self.constant(init);
            }
        }

        self.varint(module.functions.len() as u64);
        for f in &module.functions {
            self.function(f);
        }
    }

    fn ty(&mut self, ty: &Type) {
        match ty {
            Type::Void => self.byte(tag::TY_VOID),
            Type::Int(w) => {
                self.byte(tag::TY_INT);
                self.varint(u64::from(*w));
            }
            Type::Float => self.byte(tag::TY_FLOAT),
            Type::Double => self.byte(tag::TY_DOUBLE),
            Type::Ptr => self.byte(tag::TY_PTR),
            Type::Array { len, elem } => {
                self.byte(tag::TY_ARRAY);
                self.varint(*len);
                self.varint(u64::from(elem.0));
            }
            Type::Struct { fields } => {
                self.byte(tag::TY_STRUCT);
                self.varint(fields.len() as u64);
                for f in fields {
                    self.varint(u64::from(f.0));
                }
            }
            Type::Vector { len, elem } => {
                self.byte(tag::TY_VECTOR);
                self.varint(u64::from(*len));
                self.varint(u64::from(elem.0));
            }
        }
    }

    fn constant(&mut self, c: &Constant) {
        match c {
            Constant::Int { ty, bits } => {
                self.byte(tag::C_INT);
                self.varint(u64::from(ty.0));
                self.varint(*bits);
            }
            Constant::Float { ty, bits } => {
                self.byte(tag::C_FLOAT);
                self.varint(u64::from(ty.0));
                self.varint(*bits);
            }
            Constant::Null { ty } => {
                self.byte(tag::C_NULL);
                self.varint(u64::from(ty.0));
            }
            Constant::Undef { ty } => {
                self.byte(tag::C_UNDEF);
                self.varint(u64::from(ty.0));
            }
            Constant::Zero { ty } => {
                self.byte(tag::C_ZERO);
                self.varint(u64::from(ty.0));
            }
            Constant::Array { ty, elems } => {
                self.byte(tag::C_ARRAY);
                self.varint(u64::from(ty.0));
                self.varint(elems.len() as u64);
                for e in elems {
                    self.constant(e);
                }
            }
            Constant::Struct { ty, fields } => {
                self.byte(tag::C_STRUCT);
                self.varint(u64::from(ty.0));
                self.varint(fields.len() as u64);
                for e in fields {
                    self.constant(e);
                }
            }
            Constant::Bytes { ty, data } => {
                self.byte(tag::C_BYTES);
                self.varint(u64::from(ty.0));
                self.varint(data.len() as u64);
                self.body.extend_from_slice(data);
            }
            Constant::GlobalAddr { ty, global } => {
                self.byte(tag::C_GLOBAL);
                self.varint(u64::from(ty.0));
                self.varint(u64::from(global.0));
            }
            Constant::FuncAddr { ty, func } => {
                self.byte(tag::C_FUNC);
                self.varint(u64::from(ty.0));
                self.varint(u64::from(func.0));
            }
        }
    }

    fn function(&mut self, f: &Function) {
        self.string(&f.name);
        self.varint(u64::from(f.ret.0));
        self.varint(f.params.len() as u64);
        for p in &f.params {
            self.varint(u64::from(p.0));
        }
        let mut flags = 0u8;
        if f.flags.contains(FunctionFlags::VARIADIC) {
            flags |= tag::F_VARIADIC;
        }
        if f.flags.contains(FunctionFlags::INTERNAL) {
            flags |= tag::F_INTERNAL;
        }
        if !f.is_declaration() {
            flags |= tag::F_DEFINED;
        }
        self.byte(flags);
        if f.is_declaration() {
            return;
        }
        self.varint(f.blocks.len() as u64);
        for block in &f.blocks {
            self.string(&block.name);
            self.varint(block.insts.len() as u64);
            for inst in &block.insts {
                self.instruction(inst);
            }
        }
    }

    fn instruction(&mut self, inst: &Instruction) {
        self.byte(inst.opcode.into());
        self.varint(u64::from(inst.ty.0));
        self.byte(if inst.result.is_some() { tag::I_HAS_RESULT } else { 0 });
        match inst.attr {
            InstAttr::None => self.byte(tag::ATTR_NONE),
            InstAttr::ICmp(p) => {
                self.byte(tag::ATTR_ICMP);
                self.byte(p.into());
            }
            InstAttr::FCmp(p) => {
                self.byte(tag::ATTR_FCMP);
                self.byte(p.into());
            }
            InstAttr::Type(t) => {
                self.byte(tag::ATTR_TYPE);
                self.varint(u64::from(t.0));
            }
        }
        self.varint(inst.operands.len() as u64);
        for op in &inst.operands {
            match op {
                Operand::Value(v) => {
                    self.byte(tag::OP_VALUE);
                    self.varint(u64::from(v.0));
                }
                Operand::Const(c) => {
                    self.byte(tag::OP_CONST);
                    self.constant(c);
                }
                Operand::Block(b) => {
                    self.byte(tag::OP_BLOCK);
                    self.varint(u64::from(b.0));
                }
                Operand::Func(id) => {
                    self.byte(tag::OP_FUNC);
                    self.varint(u64::from(id.0));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_encoding() {
        let mut out = Vec::new();
        write_varint(&mut out, 0);
        write_varint(&mut out, 127);
        write_varint(&mut out, 128);
        write_varint(&mut out, 300);
        assert_eq!(out, vec![0x00, 0x7f, 0x80, 0x01, 0xac, 0x02]);
    }

    #[test]
    fn empty_module_header() {
        let bytes = write_module(&Module::new());
        assert_eq!(&bytes[..4], b"LLIR");
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        // strings, types, globals, functions: all empty
        assert_eq!(&bytes[8..], &[0, 0, 0, 0]);
    }
}
