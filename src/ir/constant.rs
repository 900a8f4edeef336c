// This module defines IR constants: integers (stored as zero-extended bit patterns
// truncated to their width), floats (exact IEEE bit patterns so printing and
// re-parsing is lossless), null/undef/zeroinitializer, aggregate constants (arrays,
// structs, byte strings) and symbol addresses (globals and functions). Every variant
// records its TypeId so that operand types can be recovered without a side table.
// Helpers convert integer constants to the signed representation the backend keeps in
// JVM slots and detect symbol references so the backend can plan relocations.

//! Constant values.

use super::types::{Type, TypeId, TypeTable};
use super::{FuncId, GlobalId};

/// A constant operand or initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Integer bit pattern, zero-extended from the type's width.
    Int { ty: TypeId, bits: u64 },
    /// Float bit pattern (`f32` uses the low 32 bits).
    Float { ty: TypeId, bits: u64 },
    Null { ty: TypeId },
    Undef { ty: TypeId },
    Zero { ty: TypeId },
    Array { ty: TypeId, elems: Vec<Constant> },
    Struct { ty: TypeId, fields: Vec<Constant> },
    /// Raw bytes of an `[N x i8]` array.
    Bytes { ty: TypeId, data: Vec<u8> },
    GlobalAddr { ty: TypeId, global: GlobalId },
    FuncAddr { ty: TypeId, func: FuncId },
}

/// Mask a value to `width` bits.
pub fn truncate_bits(value: u64, width: u32) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

/// Sign-extend the low `width` bits of `bits`.
pub fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

impl Constant {
    pub fn int(types: &mut TypeTable, width: u32, value: i64) -> Self {
        let ty = types.int(width);
        Constant::Int {
            ty,
            bits: truncate_bits(value as u64, width),
        }
    }

    pub fn f64(types: &mut TypeTable, value: f64) -> Self {
        Constant::Float {
            ty: types.f64(),
            bits: value.to_bits(),
        }
    }

    pub fn f32(types: &mut TypeTable, value: f32) -> Self {
        Constant::Float {
            ty: types.f32(),
            bits: value.to_bits() as u64,
        }
    }

    pub fn null(types: &mut TypeTable) -> Self {
        Constant::Null { ty: types.ptr() }
    }

    pub fn ty(&self) -> TypeId {
        match self {
            Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Null { ty }
            | Constant::Undef { ty }
            | Constant::Zero { ty }
            | Constant::Array { ty, .. }
            | Constant::Struct { ty, .. }
            | Constant::Bytes { ty, .. }
            | Constant::GlobalAddr { ty, .. }
            | Constant::FuncAddr { ty, .. } => *ty,
        }
    }

    /// Signed value of an integer constant as the backend materializes it.
    ///
    /// `i1` stays `0`/`1`; other widths are sign-extended.
    pub fn as_signed(&self, types: &TypeTable) -> Option<i64> {
        match self {
            Constant::Int { ty, bits } => {
                let width = types.int_width(*ty)?;
                if width == 1 {
                    Some((*bits & 1) as i64)
                } else {
                    Some(sign_extend(*bits, width))
                }
            }
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Constant::Int { .. })
    }

    /// Whether this constant, or any nested element, refers to a symbol.
    pub fn references_symbol(&self) -> bool {
        match self {
            Constant::GlobalAddr { .. } | Constant::FuncAddr { .. } => true,
            Constant::Array { elems, .. } => elems.iter().any(Constant::references_symbol),
            Constant::Struct { fields, .. } => fields.iter().any(Constant::references_symbol),
            _ => false,
        }
    }

    /// Structural check that the constant's shape agrees with its type.
    pub fn shape_matches(&self, types: &TypeTable) -> bool {
        let Some(ty) = types.try_get(self.ty()) else {
            return false;
        };
        match (self, ty) {
            (Constant::Int { bits, .. }, Type::Int(w)) => truncate_bits(*bits, *w) == *bits,
            (Constant::Float { bits, .. }, Type::Float) => *bits <= u32::MAX as u64,
            (Constant::Float { .. }, Type::Double) => true,
            (Constant::Null { .. }, Type::Ptr) => true,
            (Constant::GlobalAddr { .. }, Type::Ptr) => true,
            (Constant::FuncAddr { .. }, Type::Ptr) => true,
            (Constant::Undef { .. }, t) | (Constant::Zero { .. }, t) => t.is_first_class(),
            (Constant::Array { elems, .. }, Type::Array { len, elem }) => {
                elems.len() as u64 == *len
                    && elems
                        .iter()
                        .all(|e| e.ty() == *elem && e.shape_matches(types))
            }
            (Constant::Bytes { data, .. }, Type::Array { len, elem }) => {
                data.len() as u64 == *len && types.int_width(*elem) == Some(8)
            }
            (Constant::Struct { fields, .. }, Type::Struct { fields: field_tys }) => {
                fields.len() == field_tys.len()
                    && fields
                        .iter()
                        .zip(field_tys)
                        .all(|(c, t)| c.ty() == *t && c.shape_matches(types))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bits_are_truncated() {
        let mut types = TypeTable::new();
        let c = Constant::int(&mut types, 8, -1);
        assert_eq!(c, Constant::Int { ty: types.i8(), bits: 0xff });
        assert_eq!(c.as_signed(&types), Some(-1));

        let t = Constant::int(&mut types, 1, 1);
        assert_eq!(t.as_signed(&types), Some(1));
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(0x7fff, 16), 32767);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn shape_checks() {
        let mut types = TypeTable::new();
        let i8 = types.i8();
        let arr = types.array(3, i8);
        let bytes = Constant::Bytes { ty: arr, data: vec![1, 2, 3] };
        assert!(bytes.shape_matches(&types));
        let short = Constant::Bytes { ty: arr, data: vec![1] };
        assert!(!short.shape_matches(&types));
    }
}
