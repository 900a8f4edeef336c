// This module implements the Module Loader: it decodes container bytes into a Module.
// Decoding is strictly structural and total: every read is bounds-checked, element
// counts are sanity-checked against the remaining input before anything is allocated,
// varints longer than ten bytes or wider than 64 bits are rejected, nesting of types and
// aggregate constants is capped, and every index (string, type, global, function, block,
// value) is validated once the whole module is known. Any violation becomes a
// ParseError carrying the byte offset; no input can make the loader panic. The Module is
// built privately and only returned on success, so callers never see partial state.

//! Binary container reader (Module Loader).

use super::{tag, MAGIC, MAX_NESTING, VERSION};
use crate::core::error::ParseError;
use crate::ir::{
    BasicBlock, BlockId, Constant, FloatPredicate, FuncId, Function, FunctionFlags, GlobalFlags,
    GlobalId, GlobalVariable, InstAttr, Instruction, IntPredicate, Module, Opcode, Operand,
    Type, TypeId, ValueId,
};
use log::debug;

type PResult<T> = Result<T, ParseError>;

/// Decode a module from container bytes.
pub fn read_module(bytes: &[u8]) -> PResult<Module> {
    let mut reader = Reader {
        bytes,
        pos: 0,
        strings: Vec::new(),
        depths: Vec::new(),
    };
    let module = reader.module()?;
    debug!(
        "📦 Loaded module: {} types, {} globals, {} functions ({} bytes)",
        module.types.len(),
        module.globals.len(),
        module.functions.len(),
        bytes.len()
    );
    Ok(module)
}

struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
    strings: Vec<String>,
    /// Nesting depth of every decoded type.
    depths: Vec<usize>,
}

impl<'b> Reader<'b> {
    fn malformed<T>(&self, reason: impl Into<String>) -> PResult<T> {
        Err(ParseError::Malformed {
            offset: self.pos,
            reason: reason.into(),
        })
    }

    fn take(&mut self, n: usize, what: &'static str) -> PResult<&'b [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ParseError::Truncated {
                offset: self.pos,
                what,
            }),
        }
    }

    fn u8(&mut self, what: &'static str) -> PResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> PResult<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn varint(&mut self, what: &'static str) -> PResult<u64> {
        let mut result = 0u64;
        for i in 0..10 {
            let byte = self.u8(what)?;
            let payload = u64::from(byte & 0x7f);
            if i == 9 && payload > 1 {
                return self.malformed(format!("varint overflow in {what}"));
            }
            result |= payload << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        self.malformed(format!("varint overflow in {what}"))
    }

    fn u32_varint(&mut self, what: &'static str) -> PResult<u32> {
        let v = self.varint(what)?;
        match u32::try_from(v) {
            Ok(v) => Ok(v),
            Err(_) => self.malformed(format!("{what} out of range: {v}")),
        }
    }

    /// Element count, bounded by the bytes left (every element takes at least one).
    fn count(&mut self, what: &'static str) -> PResult<usize> {
        let n = self.varint(what)?;
        let remaining = (self.bytes.len() - self.pos) as u64;
        if n > remaining {
            return Err(ParseError::Truncated {
                offset: self.pos,
                what,
            });
        }
        Ok(n as usize)
    }

    fn string(&mut self, what: &'static str) -> PResult<String> {
        let id = self.varint(what)?;
        match self.strings.get(id as usize) {
            Some(s) => Ok(s.clone()),
            None => self.malformed(format!("string index {id} out of range in {what}")),
        }
    }

    fn type_ref(&mut self, types: usize, what: &'static str) -> PResult<TypeId> {
        let id = self.varint(what)?;
        if id >= types as u64 {
            return self.malformed(format!("type index {id} out of range in {what}"));
        }
        Ok(TypeId(id as u32))
    }

    // ---- Sections -------------------------------------------------------

    fn module(&mut self) -> PResult<Module> {
        let magic = self.take(4, "magic")?;
        if magic != MAGIC {
            return Err(ParseError::BadMagic);
        }
        let version = self.u16("version")?;
        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        if self.u16("reserved")? != 0 {
            return self.malformed("reserved header field must be zero");
        }

        let n = self.count("string table")?;
        for _ in 0..n {
            let len = self.count("string length")?;
            let raw = self.take(len, "string")?;
            match std::str::from_utf8(raw) {
                Ok(s) => self.strings.push(s.to_string()),
                Err(_) => return self.malformed("string is not valid UTF-8"),
            }
        }

        let mut module = Module::new();
        let n = self.count("type table")?;
        for index in 0..n {
            let ty = self.type_record(index)?;
            let id = module.types.intern(ty);
            if id.0 as usize != index {
                return self.malformed(format!("duplicate type entry {index}"));
            }
        }

        let types = module.types.len();
        let n = self.count("globals")?;
        for _ in 0..n {
            let name = self.string("global name")?;
            let ty = self.type_ref(types, "global type")?;
            let raw = self.u8("global flags")?;
            if raw & !(tag::G_CONSTANT | tag::G_INTERNAL | tag::G_HAS_INIT) != 0 {
                return self.malformed(format!("unknown global flags {raw:#x}"));
            }
            let mut flags = GlobalFlags::empty();
            flags.set(GlobalFlags::CONSTANT, raw & tag::G_CONSTANT != 0);
            flags.set(GlobalFlags::INTERNAL, raw & tag::G_INTERNAL != 0);
            let init = if raw & tag::G_HAS_INIT != 0 {
                Some(self.constant(types, 0)?)
            } else {
                None
            };
            module.globals.push(GlobalVariable {
                name,
                ty,
                flags,
                init,
            });
        }

        let n = self.count("functions")?;
        for _ in 0..n {
            let f = self.function(&module)?;
            module.functions.push(f);
        }

        if self.pos != self.bytes.len() {
            return self.malformed(format!(
                "{} trailing bytes after module",
                self.bytes.len() - self.pos
            ));
        }
        self.check_references(&module)?;
        Ok(module)
    }

    fn type_record(&mut self, index: usize) -> PResult<Type> {
        let earlier = |r: &mut Self, what: &'static str| -> PResult<(TypeId, usize)> {
            let id = r.type_ref(index, what)?;
            let depth = r.depths[id.0 as usize];
            Ok((id, depth))
        };
        let (ty, depth) = match self.u8("type tag")? {
            tag::TY_VOID => (Type::Void, 0),
            tag::TY_INT => {
                let w = self.u32_varint("integer width")?;
                if !(1..=64).contains(&w) {
                    return self.malformed(format!("unsupported integer width {w}"));
                }
                (Type::Int(w), 0)
            }
            tag::TY_FLOAT => (Type::Float, 0),
            tag::TY_DOUBLE => (Type::Double, 0),
            tag::TY_PTR => (Type::Ptr, 0),
            tag::TY_ARRAY => {
                let len = self.varint("array length")?;
                let (elem, d) = earlier(self, "array element type")?;
                (Type::Array { len, elem }, d + 1)
            }
            tag::TY_VECTOR => {
                let len = self.u32_varint("vector length")?;
                let (elem, d) = earlier(self, "vector element type")?;
                (Type::Vector { len, elem }, d + 1)
            }
            tag::TY_STRUCT => {
                let n = self.count("struct fields")?;
                let mut fields = Vec::with_capacity(n);
                let mut depth = 0;
                for _ in 0..n {
                    let (f, d) = earlier(self, "struct field type")?;
                    fields.push(f);
                    depth = depth.max(d);
                }
                (Type::Struct { fields }, depth + 1)
            }
            other => return self.malformed(format!("unknown type tag {other}")),
        };
        if depth > MAX_NESTING {
            return self.malformed("type nesting too deep");
        }
        self.depths.push(depth);
        Ok(ty)
    }

    fn constant(&mut self, types: usize, depth: usize) -> PResult<Constant> {
        if depth > MAX_NESTING {
            return self.malformed("constant nesting too deep");
        }
        let t = self.u8("constant tag")?;
        let ty = self.type_ref(types, "constant type")?;
        let c = match t {
            tag::C_INT => Constant::Int {
                ty,
                bits: self.varint("integer constant")?,
            },
            tag::C_FLOAT => Constant::Float {
                ty,
                bits: self.varint("float constant")?,
            },
            tag::C_NULL => Constant::Null { ty },
            tag::C_UNDEF => Constant::Undef { ty },
            tag::C_ZERO => Constant::Zero { ty },
            tag::C_ARRAY | tag::C_STRUCT => {
                let n = self.count("aggregate elements")?;
                let mut elems = Vec::with_capacity(n);
                for _ in 0..n {
                    elems.push(self.constant(types, depth + 1)?);
                }
                if t == tag::C_ARRAY {
                    Constant::Array { ty, elems }
                } else {
                    Constant::Struct { ty, fields: elems }
                }
            }
            tag::C_BYTES => {
                let n = self.count("byte string")?;
                let data = self.take(n, "byte string")?.to_vec();
                Constant::Bytes { ty, data }
            }
            tag::C_GLOBAL => Constant::GlobalAddr {
                ty,
                global: GlobalId(self.u32_varint("global reference")?),
            },
            tag::C_FUNC => Constant::FuncAddr {
                ty,
                func: FuncId(self.u32_varint("function reference")?),
            },
            other => return self.malformed(format!("unknown constant tag {other}")),
        };
        Ok(c)
    }

    fn function(&mut self, module: &Module) -> PResult<Function> {
        let types = module.types.len();
        let name = self.string("function name")?;
        let ret = self.type_ref(types, "return type")?;
        let n = self.count("parameters")?;
        let mut params = Vec::with_capacity(n);
        for _ in 0..n {
            params.push(self.type_ref(types, "parameter type")?);
        }
        let raw = self.u8("function flags")?;
        if raw & !(tag::F_VARIADIC | tag::F_INTERNAL | tag::F_DEFINED) != 0 {
            return self.malformed(format!("unknown function flags {raw:#x}"));
        }
        let mut func = Function::new(name, ret, params);
        func.flags.set(FunctionFlags::VARIADIC, raw & tag::F_VARIADIC != 0);
        func.flags.set(FunctionFlags::INTERNAL, raw & tag::F_INTERNAL != 0);
        if raw & tag::F_DEFINED == 0 {
            return Ok(func);
        }

        let nblocks = self.count("blocks")?;
        if nblocks == 0 {
            return self.malformed(format!("definition of @{} has no blocks", func.name));
        }
        for _ in 0..nblocks {
            let mut block = BasicBlock::new(self.string("block name")?);
            let ninsts = self.count("instructions")?;
            block.insts.reserve(ninsts);
            for _ in 0..ninsts {
                let inst = self.instruction(module, &mut func)?;
                block.insts.push(inst);
            }
            func.blocks.push(block);
        }
        Ok(func)
    }

    fn instruction(&mut self, module: &Module, func: &mut Function) -> PResult<Instruction> {
        let types = module.types.len();
        let byte = self.u8("opcode")?;
        let Ok(opcode) = Opcode::try_from(byte) else {
            return self.malformed(format!("unknown opcode {byte}"));
        };
        let ty = self.type_ref(types, "instruction type")?;
        let flags = self.u8("instruction flags")?;
        if flags & !tag::I_HAS_RESULT != 0 {
            return self.malformed(format!("unknown instruction flags {flags:#x}"));
        }
        let attr = match self.u8("attribute tag")? {
            tag::ATTR_NONE => InstAttr::None,
            tag::ATTR_ICMP => {
                let b = self.u8("icmp predicate")?;
                match IntPredicate::try_from(b) {
                    Ok(p) => InstAttr::ICmp(p),
                    Err(_) => return self.malformed(format!("unknown icmp predicate {b}")),
                }
            }
            tag::ATTR_FCMP => {
                let b = self.u8("fcmp predicate")?;
                match FloatPredicate::try_from(b) {
                    Ok(p) => InstAttr::FCmp(p),
                    Err(_) => return self.malformed(format!("unknown fcmp predicate {b}")),
                }
            }
            tag::ATTR_TYPE => InstAttr::Type(self.type_ref(types, "attribute type")?),
            other => return self.malformed(format!("unknown attribute tag {other}")),
        };
        let n = self.count("operands")?;
        let mut operands = Vec::with_capacity(n);
        for _ in 0..n {
            let op = match self.u8("operand tag")? {
                tag::OP_VALUE => Operand::Value(ValueId(self.u32_varint("value reference")?)),
                tag::OP_CONST => Operand::Const(self.constant(types, 0)?),
                tag::OP_BLOCK => Operand::Block(BlockId(self.u32_varint("block reference")?)),
                tag::OP_FUNC => Operand::Func(FuncId(self.u32_varint("function reference")?)),
                other => return self.malformed(format!("unknown operand tag {other}")),
            };
            operands.push(op);
        }
        let mut inst = Instruction {
            opcode,
            ty,
            operands,
            attr,
            result: None,
        };
        if flags & tag::I_HAS_RESULT != 0 {
            if module.types.is_void(ty) {
                return self.malformed(format!("{} produces a void result", opcode.name()));
            }
            inst.result = Some(func.new_value(ty));
        }
        Ok(inst)
    }

    // ---- Cross references -----------------------------------------------

    fn check_references(&self, module: &Module) -> PResult<()> {
        let globals = module.globals.len();
        let functions = module.functions.len();
        let check_const = |c: &Constant| -> bool { constant_refs_ok(c, globals, functions) };

        for g in &module.globals {
            if let Some(init) = &g.init {
                if !check_const(init) {
                    return self.malformed(format!("dangling symbol in initializer of @{}", g.name));
                }
            }
        }
        for f in &module.functions {
            let values = f.values.len();
            let blocks = f.blocks.len();
            for inst in f.blocks.iter().flat_map(|b| &b.insts) {
                for op in &inst.operands {
                    let ok = match op {
                        Operand::Value(v) => v.index() < values,
                        Operand::Block(b) => b.index() < blocks,
                        Operand::Func(id) => (id.0 as usize) < functions,
                        Operand::Const(c) => check_const(c),
                    };
                    if !ok {
                        return self.malformed(format!(
                            "operand of {} in @{} refers to a missing entity",
                            inst.opcode.name(),
                            f.name
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn constant_refs_ok(c: &Constant, globals: usize, functions: usize) -> bool {
    match c {
        Constant::GlobalAddr { global, .. } => (global.0 as usize) < globals,
        Constant::FuncAddr { func, .. } => (func.0 as usize) < functions,
        Constant::Array { elems, .. } => elems.iter().all(|e| constant_refs_ok(e, globals, functions)),
        Constant::Struct { fields, .. } => {
            fields.iter().all(|e| constant_refs_ok(e, globals, functions))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::write_module;
    use crate::ir::parser::parse_module;

    fn sample() -> Vec<u8> {
        let m = parse_module(
            "@g = global i32 7\n\
             define i32 @f(i32 %a) {\nentry:\n  %b = add i32 %a, 1\n  ret i32 %b\n}\n",
        )
        .unwrap();
        write_module(&m)
    }

    #[test]
    fn decodes_what_the_writer_produces() {
        let m = read_module(&sample()).unwrap();
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.functions[0].values.len(), 2);
        assert_eq!(m.globals[0].name, "g");
    }

    #[test]
    fn header_errors() {
        let mut bytes = sample();
        bytes[0] = b'X';
        assert_eq!(read_module(&bytes), Err(ParseError::BadMagic));

        let mut bytes = sample();
        bytes[4] = 2;
        assert_eq!(read_module(&bytes), Err(ParseError::UnsupportedVersion(2)));

        assert!(matches!(
            read_module(b"LL"),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = sample();
        bytes.push(0);
        assert!(matches!(
            read_module(&bytes),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn varint_overflow_is_rejected() {
        let mut bytes = b"LLIR\x01\x00\x00\x00".to_vec();
        bytes.extend_from_slice(&[0xff; 11]);
        assert!(matches!(
            read_module(&bytes),
            Err(ParseError::Malformed { .. }) | Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn forward_type_references_are_rejected() {
        // one array type whose element refers to itself
        let mut bytes = b"LLIR\x01\x00\x00\x00".to_vec();
        bytes.extend_from_slice(&[0, 1, tag::TY_ARRAY, 4, 0, 0, 0]);
        assert!(matches!(
            read_module(&bytes),
            Err(ParseError::Malformed { .. })
        ));
    }
}
