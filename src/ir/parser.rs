// This module implements the parser for the textual IR form produced by ir::printer. It
// is a hand-written cursor parser over the input bytes: whitespace and `;` comments are
// skipped between tokens, identifiers are read greedily and every construct is parsed
// by a small recursive routine (types, constants, operands, instructions). Symbols are
// collected in a pre-scan so globals and calls may refer to functions defined later,
// and each function body is pre-scanned for block labels and value definitions so phis
// can refer to values defined further down. Value names may be numeric (%7, as printed)
// or symbolic (%sum, handy in hand-written tests); either way values are numbered
// densely in definition order, parameters first. Errors carry the line number.

//! Textual IR parser.

use super::constant::{truncate_bits, Constant};
use super::{
    BasicBlock, BlockId, FuncId, Function, FunctionFlags, GlobalFlags, GlobalId,
    GlobalVariable, InstAttr, Instruction, IntPredicate, FloatPredicate, Module, Opcode,
    Operand, Type, TypeId, ValueId,
};
use crate::core::error::ParseError;
use hashbrown::HashMap;

/// Parse a module from its text form.
pub fn parse_module(text: &str) -> Result<Module, ParseError> {
    let mut parser = Parser::new(text);
    parser.prescan_symbols()?;
    parser.parse()?;
    Ok(parser.module)
}

type PResult<T> = Result<T, ParseError>;

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    module: Module,

    // Global maps
    globals: HashMap<String, GlobalId>,
    funcs: HashMap<String, FuncId>,

    // Per-function maps
    blocks: HashMap<&'a str, BlockId>,
    values: HashMap<&'a str, ValueId>,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b'-')
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            module: Module::new(),
            globals: HashMap::new(),
            funcs: HashMap::new(),
            blocks: HashMap::new(),
            values: HashMap::new(),
        }
    }

    fn error<T>(&self, reason: impl Into<String>) -> PResult<T> {
        let line = self.text.as_bytes()[..self.pos.min(self.text.len())]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1;
        Err(ParseError::Syntax {
            line,
            reason: reason.into(),
        })
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if b == b';' {
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: u8) -> bool {
        self.skip_whitespace();
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: u8) -> PResult<()> {
        if !self.try_read(ch) {
            let found = self.peek().map(|b| (b as char).to_string());
            return self.error(format!(
                "expected '{}' but found {}",
                ch as char,
                found.as_deref().unwrap_or("end of input")
            ));
        }
        Ok(())
    }

    /// Read a run of identifier bytes at the cursor (may be empty).
    fn read_ident(&mut self) -> &'a str {
        self.skip_whitespace();
        let text = self.text;
        let start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        &text[start..self.pos]
    }

    fn read_word(&mut self) -> PResult<&'a str> {
        let word = self.read_ident();
        if word.is_empty() {
            return self.error("expected a keyword");
        }
        Ok(word)
    }

    /// Consume `kw` when it is the next complete word.
    fn try_keyword(&mut self, kw: &str) -> bool {
        let saved = self.pos;
        if self.read_ident() == kw {
            true
        } else {
            self.pos = saved;
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if !self.try_keyword(kw) {
            return self.error(format!("expected '{kw}'"));
        }
        Ok(())
    }

    fn read_u64(&mut self) -> PResult<u64> {
        let word = self.read_word()?;
        match word.parse::<u64>() {
            Ok(n) => Ok(n),
            Err(_) => self.error(format!("expected a number, found '{word}'")),
        }
    }

    /// `"..."` with `\XX` escapes, cursor on the opening quote.
    fn read_quoted_bytes(&mut self) -> PResult<Vec<u8>> {
        self.expect(b'"')?;
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None => return self.error("unterminated string"),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(bytes);
                }
                Some(b'\\') => {
                    let hex = self.text.get(self.pos + 1..self.pos + 3);
                    match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                        Some(b) => bytes.push(b),
                        None => return self.error("invalid escape in string"),
                    }
                    self.pos += 3;
                }
                Some(b) => {
                    bytes.push(b);
                    self.pos += 1;
                }
            }
        }
    }

    /// `@name` or `@"quoted name"`.
    fn read_symbol(&mut self) -> PResult<String> {
        self.expect(b'@')?;
        if self.peek() == Some(b'"') {
            let bytes = self.read_quoted_bytes()?;
            return match String::from_utf8(bytes) {
                Ok(s) => Ok(s),
                Err(_) => self.error("symbol name is not valid UTF-8"),
            };
        }
        let start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        if start == self.pos {
            return self.error("expected a symbol name after '@'");
        }
        Ok(self.text[start..self.pos].to_string())
    }

    /// `%name`.
    fn read_local(&mut self) -> PResult<&'a str> {
        self.expect(b'%')?;
        let start = self.pos;
        while self.peek().is_some_and(is_ident_byte) {
            self.pos += 1;
        }
        if start == self.pos {
            return self.error("expected a name after '%'");
        }
        let text = self.text;
        Ok(&text[start..self.pos])
    }

    // ---- Pre-scan -------------------------------------------------------

    /// Record every global and function name in definition order.
    fn prescan_symbols(&mut self) -> PResult<()> {
        let text = self.text;
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_start();
            let indent = line.len() - trimmed.len();
            let is_global = trimmed.starts_with('@');
            let is_func = trimmed.starts_with("define ") || trimmed.starts_with("declare ");
            if is_global || is_func {
                let at = if is_global { Some(0) } else { trimmed.find('@') };
                if let Some(at) = at {
                    self.pos = offset + indent + at;
                    let name = self.read_symbol()?;
                    if is_global {
                        let id = GlobalId(self.module.globals.len() as u32);
                        self.globals.entry(name).or_insert(id);
                        self.module.globals.push(GlobalVariable {
                            name: String::new(),
                            ty: TypeId(0),
                            flags: GlobalFlags::empty(),
                            init: None,
                        });
                    } else {
                        let id = FuncId(self.module.functions.len() as u32);
                        self.funcs.entry(name).or_insert(id);
                        self.module
                            .functions
                            .push(Function::new(String::new(), TypeId(0), Vec::new()));
                    }
                }
            }
            offset += line.len();
        }
        self.pos = 0;
        Ok(())
    }

    /// Assign block and value ids for the body starting at the cursor.
    fn prescan_body(&mut self, params: usize) -> (Vec<&'a str>, usize) {
        let mut labels = Vec::new();
        let mut next_value = params;
        let text = self.text;
        let body = &text[self.pos..];
        for line in body.lines() {
            let code = line.split(';').next().unwrap_or("").trim();
            if code == "}" {
                break;
            }
            if let Some(rest) = code.strip_prefix('%') {
                if let Some(eq) = rest.find('=') {
                    let name = rest[..eq].trim_end();
                    if !name.is_empty() && name.bytes().all(is_ident_byte) {
                        self.values.entry(name).or_insert(ValueId(next_value as u32));
                        next_value += 1;
                    }
                }
            } else if let Some(label) = code.strip_suffix(':') {
                if !label.is_empty() && label.bytes().all(is_ident_byte) {
                    let id = BlockId(labels.len() as u32);
                    self.blocks.entry(label).or_insert(id);
                    labels.push(label);
                }
            }
        }
        (labels, next_value)
    }

    // ---- Top level ------------------------------------------------------

    fn parse(&mut self) -> PResult<()> {
        let mut global_index = 0usize;
        let mut func_index = 0usize;
        loop {
            self.skip_whitespace();
            if self.is_eof() {
                break;
            }
            if self.peek() == Some(b'@') {
                let global = self.parse_global()?;
                match self.module.globals.get_mut(global_index) {
                    Some(slot) => *slot = global,
                    None => return self.error("global definition missed by pre-scan"),
                }
                global_index += 1;
                continue;
            }
            let word = self.read_word()?;
            match word {
                "define" | "declare" => {
                    let func = self.parse_function(word == "define")?;
                    match self.module.functions.get_mut(func_index) {
                        Some(slot) => *slot = func,
                        None => return self.error("function definition missed by pre-scan"),
                    }
                    func_index += 1;
                }
                other => return self.error(format!("unexpected '{other}' at top level")),
            }
        }
        Ok(())
    }

    fn parse_global(&mut self) -> PResult<GlobalVariable> {
        let name = self.read_symbol()?;
        self.expect(b'=')?;
        let mut flags = GlobalFlags::empty();
        let mut external = false;
        loop {
            match self.read_word()? {
                "internal" | "private" => flags |= GlobalFlags::INTERNAL,
                "external" => external = true,
                "global" => break,
                "constant" => {
                    flags |= GlobalFlags::CONSTANT;
                    break;
                }
                other => return self.error(format!("unexpected '{other}' in global definition")),
            }
        }
        let ty = self.parse_type()?;
        let init = if external {
            None
        } else {
            Some(self.parse_constant(ty)?)
        };
        Ok(GlobalVariable {
            name,
            ty,
            flags,
            init,
        })
    }

    fn parse_function(&mut self, define: bool) -> PResult<Function> {
        let mut flags = FunctionFlags::empty();
        if self.try_keyword("internal") || self.try_keyword("private") {
            flags |= FunctionFlags::INTERNAL;
        }
        let ret = self.parse_type()?;
        let name = self.read_symbol()?;
        self.expect(b'(')?;

        self.values.clear();
        self.blocks.clear();
        let mut params = Vec::new();
        if !self.try_read(b')') {
            loop {
                self.skip_whitespace();
                if self.text[self.pos..].starts_with("...") {
                    self.pos += 3;
                    flags |= FunctionFlags::VARIADIC;
                    self.expect(b')')?;
                    break;
                }
                params.push(self.parse_type()?);
                self.skip_whitespace();
                if self.peek() == Some(b'%') {
                    let pname = self.read_local()?;
                    let id = ValueId(params.len() as u32 - 1);
                    if self.values.insert(pname, id).is_some() {
                        return self.error(format!("duplicate parameter %{pname}"));
                    }
                }
                if self.try_read(b')') {
                    break;
                }
                self.expect(b',')?;
            }
        }

        let mut func = Function::new(name, ret, params);
        func.flags = flags;
        if !define {
            return Ok(func);
        }

        self.expect(b'{')?;
        let (labels, value_count) = self.prescan_body(func.params.len());
        func.blocks = labels.iter().map(|l| BasicBlock::new(*l)).collect();
        let mut current: Option<BlockId> = None;
        loop {
            self.skip_whitespace();
            if self.try_read(b'}') {
                break;
            }
            if self.is_eof() {
                return self.error("unterminated function body");
            }
            // Label?
            let saved = self.pos;
            let word = self.read_ident();
            if !word.is_empty() && self.peek() == Some(b':') {
                self.pos += 1;
                current = self.blocks.get(word).copied();
                continue;
            }
            self.pos = saved;
            let Some(block) = current else {
                return self.error("instruction outside of a block");
            };
            let inst = self.parse_instruction(&mut func)?;
            func.block_mut(block).insts.push(inst);
        }
        if func.values.len() != value_count {
            return self.error(format!("inconsistent value numbering in @{}", func.name));
        }
        Ok(func)
    }

    // ---- Types and constants --------------------------------------------

    fn parse_type(&mut self) -> PResult<TypeId> {
        self.skip_whitespace();
        let ty = match self.peek() {
            Some(b'[') | Some(b'<') => {
                let vector = self.peek() == Some(b'<');
                self.pos += 1;
                let len = self.read_u64()?;
                self.expect_keyword("x")?;
                let elem = self.parse_type()?;
                if vector {
                    self.expect(b'>')?;
                    let len = match u32::try_from(len) {
                        Ok(l) => l,
                        Err(_) => return self.error("vector length out of range"),
                    };
                    self.module.types.intern(Type::Vector { len, elem })
                } else {
                    self.expect(b']')?;
                    self.module.types.array(len, elem)
                }
            }
            Some(b'{') => {
                self.pos += 1;
                let mut fields = Vec::new();
                if !self.try_read(b'}') {
                    loop {
                        fields.push(self.parse_type()?);
                        if self.try_read(b'}') {
                            break;
                        }
                        self.expect(b',')?;
                    }
                }
                self.module.types.structure(fields)
            }
            _ => {
                let word = self.read_word()?;
                match word {
                    "void" => self.module.types.void(),
                    "f32" | "float" => self.module.types.f32(),
                    "f64" | "double" => self.module.types.f64(),
                    "ptr" => self.module.types.ptr(),
                    w if w.starts_with('i') => match w[1..].parse::<u32>() {
                        Ok(width) if (1..=64).contains(&width) => self.module.types.int(width),
                        _ => return self.error(format!("unsupported type '{w}'")),
                    },
                    other => return self.error(format!("unknown type '{other}'")),
                }
            }
        };
        // Legacy typed pointer spelling (`i8*`) collapses to the opaque pointer.
        let mut ty = ty;
        while self.try_read(b'*') {
            ty = self.module.types.ptr();
        }
        Ok(ty)
    }

    fn parse_typed_constant(&mut self) -> PResult<Constant> {
        let ty = self.parse_type()?;
        self.parse_constant(ty)
    }

    fn parse_constant(&mut self, ty: TypeId) -> PResult<Constant> {
        self.skip_whitespace();
        let types = &self.module.types;
        let shape = types.get(ty).clone();
        match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                let mut elems = Vec::new();
                if !self.try_read(b']') {
                    loop {
                        elems.push(self.parse_typed_constant()?);
                        if self.try_read(b']') {
                            break;
                        }
                        self.expect(b',')?;
                    }
                }
                if !matches!(shape, Type::Array { .. }) {
                    return self.error("array constant for a non-array type");
                }
                return Ok(Constant::Array { ty, elems });
            }
            Some(b'{') => {
                self.pos += 1;
                let mut fields = Vec::new();
                if !self.try_read(b'}') {
                    loop {
                        fields.push(self.parse_typed_constant()?);
                        if self.try_read(b'}') {
                            break;
                        }
                        self.expect(b',')?;
                    }
                }
                if !matches!(shape, Type::Struct { .. }) {
                    return self.error("struct constant for a non-struct type");
                }
                return Ok(Constant::Struct { ty, fields });
            }
            Some(b'@') => {
                let name = self.read_symbol()?;
                if let Some(&global) = self.globals.get(&name) {
                    return Ok(Constant::GlobalAddr { ty, global });
                }
                if let Some(&func) = self.funcs.get(&name) {
                    return Ok(Constant::FuncAddr { ty, func });
                }
                return self.error(format!("undefined symbol @{name}"));
            }
            Some(b'c') if self.text[self.pos..].starts_with("c\"") => {
                self.pos += 1;
                let data = self.read_quoted_bytes()?;
                return Ok(Constant::Bytes { ty, data });
            }
            _ => {}
        }

        let negative = self.try_read(b'-');
        let word = self.read_word()?;
        match word {
            "true" | "false" if !negative => {
                return Ok(Constant::Int {
                    ty,
                    bits: u64::from(word == "true"),
                })
            }
            "null" if !negative => return Ok(Constant::Null { ty }),
            "undef" | "poison" if !negative => return Ok(Constant::Undef { ty }),
            "zeroinitializer" if !negative => return Ok(Constant::Zero { ty }),
            _ => {}
        }

        match shape {
            Type::Int(width) => {
                let magnitude = if let Some(hex) = word.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16).ok()
                } else {
                    word.parse::<u64>().ok()
                };
                let Some(magnitude) = magnitude else {
                    return self.error(format!("invalid integer literal '{word}'"));
                };
                let value = if negative {
                    magnitude.wrapping_neg()
                } else {
                    magnitude
                };
                Ok(Constant::Int {
                    ty,
                    bits: truncate_bits(value, width),
                })
            }
            Type::Float | Type::Double => {
                let single = matches!(shape, Type::Float);
                let bits = if let Some(hex) = word.strip_prefix("0x") {
                    match u64::from_str_radix(hex, 16) {
                        Ok(b) if !negative => b,
                        _ => return self.error(format!("invalid float literal '{word}'")),
                    }
                } else {
                    // `1e+3` splits at the plus sign.
                    let mut literal = word.to_string();
                    if literal.ends_with(['e', 'E']) && self.peek() == Some(b'+') {
                        self.pos += 1;
                        literal.push_str(self.read_ident());
                    }
                    let Ok(mut value) = literal.parse::<f64>() else {
                        return self.error(format!("invalid float literal '{literal}'"));
                    };
                    if negative {
                        value = -value;
                    }
                    if single {
                        u64::from((value as f32).to_bits())
                    } else {
                        value.to_bits()
                    }
                };
                Ok(Constant::Float { ty, bits })
            }
            _ => self.error(format!("literal '{word}' does not fit the type")),
        }
    }

    // ---- Operands -------------------------------------------------------

    fn parse_operand(&mut self, ty: TypeId) -> PResult<Operand> {
        self.skip_whitespace();
        match self.peek() {
            Some(b'%') => {
                let name = self.read_local()?;
                match self.values.get(name) {
                    Some(v) => Ok(Operand::Value(*v)),
                    None => self.error(format!("undefined value %{name}")),
                }
            }
            _ => Ok(Operand::Const(self.parse_constant(ty)?)),
        }
    }

    fn parse_typed_operand(&mut self) -> PResult<(TypeId, Operand)> {
        let ty = self.parse_type()?;
        let op = self.parse_operand(ty)?;
        Ok((ty, op))
    }

    fn parse_label(&mut self) -> PResult<Operand> {
        self.expect_keyword("label")?;
        self.parse_block_ref()
    }

    fn parse_block_ref(&mut self) -> PResult<Operand> {
        let name = self.read_local()?;
        match self.blocks.get(name) {
            Some(b) => Ok(Operand::Block(*b)),
            None => self.error(format!("undefined label %{name}")),
        }
    }

    /// Optional trailing `, align N`, accepted and ignored.
    fn skip_align(&mut self) -> PResult<()> {
        let saved = self.pos;
        if self.try_read(b',') {
            if self.try_keyword("align") {
                self.read_u64()?;
            } else {
                self.pos = saved;
            }
        }
        Ok(())
    }

    // ---- Instructions ---------------------------------------------------

    fn parse_instruction(&mut self, func: &mut Function) -> PResult<Instruction> {
        self.skip_whitespace();
        let result_name = if self.peek() == Some(b'%') {
            let name = self.read_local()?;
            self.expect(b'=')?;
            Some(name)
        } else {
            None
        };

        let word = self.read_word()?;
        let mut inst = self.parse_body(word)?;

        if let Some(name) = result_name {
            if self.module.types.is_void(inst.ty) {
                return self.error(format!("%{name} names a void result"));
            }
            let expected = self.values.get(name).copied();
            let id = func.new_value(inst.ty);
            if expected != Some(id) {
                return self.error(format!("value %{name} is defined more than once"));
            }
            inst.result = Some(id);
        } else if !self.module.types.is_void(inst.ty)
            && !inst.is_terminator()
            && inst.opcode != Opcode::Call
        {
            // Only calls may discard their result.
            return self.error(format!("result of '{word}' must be named"));
        }
        Ok(inst)
    }

    fn parse_body(&mut self, word: &str) -> PResult<Instruction> {
        let void = self.module.types.void();
        let i1 = self.module.types.i1();
        let ptr = self.module.types.ptr();

        if word == "br" {
            if self.try_keyword("label") {
                let target = self.parse_block_ref()?;
                return Ok(Instruction::new(Opcode::Br, void, vec![target]));
            }
            let (_, cond) = self.parse_typed_operand()?;
            self.expect(b',')?;
            let then_block = self.parse_label()?;
            self.expect(b',')?;
            let else_block = self.parse_label()?;
            return Ok(Instruction::new(
                Opcode::CondBr,
                void,
                vec![cond, then_block, else_block],
            ));
        }

        let Some(opcode) = Opcode::from_name(word) else {
            return self.error(format!("unknown instruction '{word}'"));
        };

        let inst = match opcode {
            Opcode::Ret => {
                if self.try_keyword("void") {
                    Instruction::new(Opcode::Ret, void, vec![])
                } else {
                    let (_, value) = self.parse_typed_operand()?;
                    Instruction::new(Opcode::Ret, void, vec![value])
                }
            }
            Opcode::Switch => {
                let (ty, cond) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let default = self.parse_label()?;
                let mut ops = vec![cond, default];
                self.expect(b'[')?;
                while !self.try_read(b']') {
                    let case_ty = self.parse_type()?;
                    if case_ty != ty {
                        return self.error("switch case type differs from the condition type");
                    }
                    ops.push(Operand::Const(self.parse_constant(case_ty)?));
                    self.expect(b',')?;
                    ops.push(self.parse_label()?);
                    self.try_read(b',');
                }
                Instruction::new(Opcode::Switch, void, ops)
            }
            Opcode::Unreachable => Instruction::new(Opcode::Unreachable, void, vec![]),
            Opcode::FNeg => {
                let (ty, value) = self.parse_typed_operand()?;
                Instruction::new(Opcode::FNeg, ty, vec![value])
            }
            Opcode::ICmp | Opcode::FCmp => {
                let pred_name = self.read_word()?;
                let attr = if opcode == Opcode::ICmp {
                    match IntPredicate::from_name(pred_name) {
                        Some(p) => InstAttr::ICmp(p),
                        None => return self.error(format!("unknown icmp predicate '{pred_name}'")),
                    }
                } else {
                    match FloatPredicate::from_name(pred_name) {
                        Some(p) => InstAttr::FCmp(p),
                        None => return self.error(format!("unknown fcmp predicate '{pred_name}'")),
                    }
                };
                let (ty, lhs) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let rhs = self.parse_operand(ty)?;
                Instruction::new(opcode, i1, vec![lhs, rhs]).with_attr(attr)
            }
            op if op.is_cast() => {
                let (_, value) = self.parse_typed_operand()?;
                self.expect_keyword("to")?;
                let to = self.parse_type()?;
                Instruction::new(op, to, vec![value])
            }
            Opcode::Alloca => {
                let elem = self.parse_type()?;
                let mut ops = Vec::new();
                let saved = self.pos;
                if self.try_read(b',') {
                    if self.try_keyword("align") {
                        self.read_u64()?;
                    } else {
                        self.pos = saved;
                        self.expect(b',')?;
                        ops.push(self.parse_typed_operand()?.1);
                        self.skip_align()?;
                    }
                }
                Instruction::new(Opcode::Alloca, ptr, ops).with_attr(InstAttr::Type(elem))
            }
            Opcode::Load => {
                let ty = self.parse_type()?;
                self.expect(b',')?;
                let (_, addr) = self.parse_typed_operand()?;
                self.skip_align()?;
                Instruction::new(Opcode::Load, ty, vec![addr])
            }
            Opcode::Store => {
                let (_, value) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let (_, addr) = self.parse_typed_operand()?;
                self.skip_align()?;
                Instruction::new(Opcode::Store, void, vec![value, addr])
            }
            Opcode::GetElementPtr => {
                self.try_keyword("inbounds");
                let source = self.parse_type()?;
                let mut ops = Vec::new();
                while self.try_read(b',') {
                    ops.push(self.parse_typed_operand()?.1);
                }
                Instruction::new(Opcode::GetElementPtr, ptr, ops).with_attr(InstAttr::Type(source))
            }
            Opcode::Phi => {
                let ty = self.parse_type()?;
                let mut ops = Vec::new();
                loop {
                    self.expect(b'[')?;
                    ops.push(self.parse_operand(ty)?);
                    self.expect(b',')?;
                    ops.push(self.parse_block_ref()?);
                    self.expect(b']')?;
                    if !self.try_read(b',') {
                        break;
                    }
                }
                Instruction::new(Opcode::Phi, ty, ops)
            }
            Opcode::Select => {
                let (_, cond) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let (ty, a) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let (_, b) = self.parse_typed_operand()?;
                Instruction::new(Opcode::Select, ty, vec![cond, a, b])
            }
            Opcode::Call => {
                let ret = self.parse_type()?;
                self.skip_whitespace();
                let callee = if self.peek() == Some(b'@') {
                    let name = self.read_symbol()?;
                    match self.funcs.get(&name) {
                        Some(f) => Operand::Func(*f),
                        None => return self.error(format!("call to undefined function @{name}")),
                    }
                } else {
                    self.parse_operand(ptr)?
                };
                let mut ops = vec![callee];
                self.expect(b'(')?;
                if !self.try_read(b')') {
                    loop {
                        ops.push(self.parse_typed_operand()?.1);
                        if self.try_read(b')') {
                            break;
                        }
                        self.expect(b',')?;
                    }
                }
                Instruction::new(Opcode::Call, ret, ops)
            }
            // Binary arithmetic.
            op => {
                let (ty, lhs) = self.parse_typed_operand()?;
                self.expect(b',')?;
                let rhs = self.parse_operand(ty)?;
                Instruction::new(op, ty, vec![lhs, rhs])
            }
        };
        Ok(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer::print_module;

    #[test]
    fn parses_named_values_and_blocks() {
        let text = r#"
; running sum
define i32 @sum(i32 %n) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc2, %loop ]
  %acc2 = add i32 %acc, %i
  %next = add i32 %i, 1
  %done = icmp sge i32 %next, %n
  br i1 %done, label %exit, label %loop
exit:
  ret i32 %acc2
}
"#;
        let m = parse_module(text).unwrap();
        let f = &m.functions[0];
        assert_eq!(f.blocks.len(), 3);
        assert_eq!(f.values.len(), 6);
        let phi = &f.blocks[1].insts[0];
        assert_eq!(phi.opcode, Opcode::Phi);
        assert_eq!(phi.operands[2], Operand::Value(ValueId(4)));
    }

    #[test]
    fn print_parse_is_stable() {
        let text = r#"
@msg = internal constant [3 x i8] c"hi\00"
@tbl = global [2 x ptr] [ ptr @msg, ptr null ]
declare i32 @ext(i32, ...)

define double @f(ptr %p, i64 %k) {
entry:
  %a = getelementptr [2 x i32], ptr %p, i32 0, i64 %k
  %v = load i32, ptr %a
  %d = sitofp i32 %v to f64
  %e = fadd double %d, 1.5
  %s = select i1 true, double %e, double 0x0000000000000000
  %c = call i32 (i32, ...) @ext(i32 %v)
  ret double %s
}
"#;
        // `call i32 (i32, ...)` is not part of the dialect.
        assert!(parse_module(text).is_err());

        let text = text.replace("call i32 (i32, ...) @ext", "call i32 @ext");
        let m = parse_module(&text).unwrap();
        let printed = print_module(&m);
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(print_module(&reparsed), printed);
        assert!(printed.contains("fadd f64 %4, 0x3FF8000000000000"));
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse_module("define void @f() {\nentry:\n  bogus\n}\n").unwrap_err();
        assert_eq!(
            err,
            ParseError::Syntax {
                line: 3,
                reason: "unknown instruction 'bogus'".into()
            }
        );
    }

    #[test]
    fn rejects_undefined_values() {
        assert!(parse_module("define i32 @f() {\nentry:\n  ret i32 %x\n}\n").is_err());
    }
}
