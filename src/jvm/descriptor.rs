// This module maps IR types onto JVM field and method descriptors and back. Integer
// widths map onto the matching primitive (i1 to Z, i8 to B, i16 to S, i32 to I, i64 to
// J), floats onto F and D, and pointers onto I because every pointer is an offset into
// the emulated memory. Aggregates and vectors have no register representation and
// therefore no descriptor. The parsing direction is used by the bytecode re-verifier,
// which only needs the verification type of every argument and of the result. Symbol
// names are mangled into legal JVM member names with an injective escape.

//! Type descriptors and member name mangling.

use super::opcodes::VType;
use crate::ir::{TypeClass, TypeId, TypeTable};
use std::fmt::Write;

/// Field descriptor character of a register type.
pub fn type_descriptor(class: TypeClass) -> Option<char> {
    Some(match class {
        TypeClass::Void => 'V',
        TypeClass::I1 => 'Z',
        TypeClass::I8 => 'B',
        TypeClass::I16 => 'S',
        TypeClass::I32 | TypeClass::Ptr => 'I',
        TypeClass::I64 => 'J',
        TypeClass::F32 => 'F',
        TypeClass::F64 => 'D',
        TypeClass::OddInt | TypeClass::Aggregate | TypeClass::Vector => return None,
    })
}

/// Method descriptor of a signature; `None` if any type has no mapping.
pub fn method_descriptor(types: &TypeTable, params: &[TypeId], ret: TypeId) -> Option<String> {
    let mut desc = String::with_capacity(params.len() + 3);
    desc.push('(');
    for &p in params {
        let c = type_descriptor(types.class(p)).filter(|c| *c != 'V')?;
        desc.push(c);
    }
    desc.push(')');
    desc.push(type_descriptor(types.class(ret))?);
    Some(desc)
}

/// Verification type of a field descriptor character.
pub fn verification_type(c: u8) -> Option<VType> {
    match c {
        b'Z' | b'B' | b'C' | b'S' | b'I' => Some(VType::Int),
        b'J' => Some(VType::Long),
        b'F' => Some(VType::Float),
        b'D' => Some(VType::Double),
        b'L' | b'[' => Some(VType::Ref),
        _ => None,
    }
}

/// Argument and result types of a parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub params: Vec<VType>,
    pub ret: Option<VType>,
}

impl MethodType {
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|t| t.size()).sum()
    }

    pub fn ret_slots(&self) -> u16 {
        self.ret.map_or(0, VType::size)
    }
}

/// Skip one field type starting at `at`; returns the index after it.
fn skip_field(bytes: &[u8], mut at: usize) -> Option<usize> {
    while bytes.get(at) == Some(&b'[') {
        at += 1;
    }
    match bytes.get(at)? {
        b'L' => bytes[at..].iter().position(|b| *b == b';').map(|end| at + end + 1),
        c if verification_type(*c).is_some() => Some(at + 1),
        _ => None,
    }
}

/// Parse a method descriptor such as `(IJ)D`.
pub fn parse_method_descriptor(desc: &str) -> Option<MethodType> {
    let bytes = desc.as_bytes();
    if bytes.first() != Some(&b'(') {
        return None;
    }
    let mut at = 1;
    let mut params = Vec::new();
    while *bytes.get(at)? != b')' {
        let end = skip_field(bytes, at)?;
        params.push(verification_type(bytes[at])?);
        at = end;
    }
    at += 1;
    let ret = match bytes.get(at)? {
        b'V' => {
            at += 1;
            None
        }
        c => {
            let t = verification_type(*c)?;
            at = skip_field(bytes, at)?;
            Some(t)
        }
    };
    (at == bytes.len()).then_some(MethodType { params, ret })
}

/// Parse a field descriptor into its verification type.
pub fn parse_field_descriptor(desc: &str) -> Option<VType> {
    let bytes = desc.as_bytes();
    let end = skip_field(bytes, 0)?;
    (end == bytes.len()).then(|| verification_type(bytes[0])).flatten()
}

/// Escape a symbol into a legal, collision-free JVM member name.
///
/// ASCII letters, digits and `_` are kept; every other byte becomes `$xx`.
pub fn mangle(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    for b in symbol.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            out.push(b as char);
        } else {
            let _ = write!(out, "${b:02x}");
        }
    }
    if out.is_empty() {
        out.push_str("$");
    }
    out
}
