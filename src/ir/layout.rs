// This module implements the target data layout used to size and align IR types in the
// emulated 32-bit address space. The default layout string matches the one the backend
// has always assumed: little endian, 32-bit pointers, naturally aligned integers up to
// 64 bits and IEEE floats. DataLayout::parse accepts the usual dash-separated
// layout string (e, E, p:size:abi[:pref], iN:abi[:pref], fN:abi[:pref]) so a module can
// carry its own layout. Sizes follow the usual rules: arrays are len * stride, struct
// fields are padded to their alignment and the struct is padded to its largest field
// alignment. getelementptr lowering and the global data image both rely on these numbers.
// Every size is computed with checked arithmetic and bounded by the largest address a
// pointer can hold, so absurd aggregate types fail with MemoryError::TypeTooLarge.

//! Data layout (sizes, alignment and field offsets).

use super::types::{Type, TypeId, TypeTable};
use crate::core::error::MemoryError;
use hashbrown::HashMap;

/// Sizes fail once they leave the address space of the layout.
pub type SizeResult<T> = Result<T, MemoryError>;

/// Layout string assumed when a module does not provide one.
pub const DEFAULT_LAYOUT: &str =
    "e-p:32:32:32-i1:8:8-i8:8:8-i16:16:16-i32:32:32-i64:64:64-f32:32:32-f64:64:64";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub little_endian: bool,
    pub pointer_bytes: u64,
    pub pointer_align: u64,
    int_align: HashMap<u32, u64>,
    float_align: HashMap<u32, u64>,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::parse(DEFAULT_LAYOUT).unwrap_or_else(|_| Self::empty())
    }
}

impl DataLayout {
    fn empty() -> Self {
        Self {
            little_endian: true,
            pointer_bytes: 4,
            pointer_align: 4,
            int_align: HashMap::new(),
            float_align: HashMap::new(),
        }
    }

    /// Parse a layout description such as [`DEFAULT_LAYOUT`].
    pub fn parse(desc: &str) -> Result<Self, String> {
        let mut layout = Self::empty();
        let bits = |s: &str| -> Result<u64, String> {
            s.parse::<u64>()
                .map_err(|_| format!("invalid layout number '{s}'"))
        };
        for spec in desc.split('-').filter(|s| !s.is_empty()) {
            let parts: Vec<&str> = spec.split(':').collect();
            match parts[0] {
                "e" => layout.little_endian = true,
                "E" => layout.little_endian = false,
                "p" => {
                    let size = bits(parts.get(1).copied().unwrap_or("32"))?;
                    let abi = bits(parts.get(2).copied().unwrap_or("32"))?;
                    layout.pointer_bytes = size / 8;
                    layout.pointer_align = (abi / 8).max(1);
                }
                p if p.starts_with('i') || p.starts_with('f') => {
                    let width = bits(&p[1..])? as u32;
                    let abi = bits(parts.get(1).copied().unwrap_or("8"))?;
                    let table = if p.starts_with('i') {
                        &mut layout.int_align
                    } else {
                        &mut layout.float_align
                    };
                    table.insert(width, (abi / 8).max(1));
                }
                other => return Err(format!("unsupported layout component '{other}'")),
            }
        }
        if layout.pointer_bytes == 0 {
            return Err("pointer size must be non-zero".into());
        }
        Ok(layout)
    }

    /// Largest object size a pointer of this layout can address.
    pub fn address_limit(&self) -> u64 {
        match self.pointer_bytes {
            n if n >= 8 => u64::MAX,
            n => (1u64 << (8 * n)) - 1,
        }
    }

    fn too_large(&self, types: &TypeTable, ty: TypeId) -> MemoryError {
        MemoryError::TypeTooLarge {
            ty: types.display(ty).to_string(),
            limit: self.address_limit(),
        }
    }

    fn bounded(&self, types: &TypeTable, ty: TypeId, size: Option<u64>) -> SizeResult<u64> {
        match size {
            Some(size) if size <= self.address_limit() => Ok(size),
            _ => Err(self.too_large(types, ty)),
        }
    }

    /// Number of bytes written by a store of `ty`.
    pub fn store_size(&self, types: &TypeTable, ty: TypeId) -> SizeResult<u64> {
        let size = match types.get(ty) {
            Type::Void => Some(0),
            Type::Int(w) => Some(u64::from(*w).div_ceil(8)),
            Type::Float => Some(4),
            Type::Double => Some(8),
            Type::Ptr => Some(self.pointer_bytes),
            Type::Array { len, elem } => len.checked_mul(self.alloc_size(types, *elem)?),
            Type::Vector { len, elem } => {
                u64::from(*len).checked_mul(self.alloc_size(types, *elem)?)
            }
            Type::Struct { .. } => Some(self.struct_layout(types, ty)?.size),
        };
        self.bounded(types, ty, size)
    }

    /// Size including tail padding, i.e. the array stride of `ty`.
    pub fn alloc_size(&self, types: &TypeTable, ty: TypeId) -> SizeResult<u64> {
        let size = self.store_size(types, ty)?;
        let align = self.align_of(types, ty);
        self.bounded(types, ty, align_up(size, align))
    }

    pub fn align_of(&self, types: &TypeTable, ty: TypeId) -> u64 {
        match types.get(ty) {
            Type::Void => 1,
            Type::Int(w) => self.int_align.get(w).copied().unwrap_or_else(|| {
                // Unlisted widths: byte size rounded up to a power of two, at most 8.
                let bytes = u64::from(*w).div_ceil(8);
                bytes.next_power_of_two().min(8)
            }),
            Type::Float => self.float_align.get(&32).copied().unwrap_or(4),
            Type::Double => self.float_align.get(&64).copied().unwrap_or(8),
            Type::Ptr => self.pointer_align,
            Type::Array { elem, .. } => self.align_of(types, *elem),
            Type::Vector { .. } => self
                .store_size(types, ty)
                .ok()
                .and_then(u64::checked_next_power_of_two)
                .unwrap_or(1),
            Type::Struct { fields } => fields
                .iter()
                .map(|f| self.align_of(types, *f))
                .max()
                .unwrap_or(1),
        }
    }

    pub fn struct_layout(&self, types: &TypeTable, ty: TypeId) -> SizeResult<StructLayout> {
        let Type::Struct { fields } = types.get(ty) else {
            return Ok(StructLayout::default());
        };
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0u64;
        let mut max_align = 1u64;
        for field in fields {
            let align = self.align_of(types, *field);
            max_align = max_align.max(align);
            offset = self.bounded(types, ty, align_up(offset, align))?;
            offsets.push(offset);
            let next = offset.checked_add(self.alloc_size(types, *field)?);
            offset = self.bounded(types, ty, next)?;
        }
        let size = self.bounded(types, ty, align_up(offset, max_align))?;
        Ok(StructLayout { offsets, size })
    }

    pub fn field_offset(&self, types: &TypeTable, ty: TypeId, index: usize) -> Option<u64> {
        self.struct_layout(types, ty).ok()?.offsets.get(index).copied()
    }
}

fn align_up(value: u64, align: u64) -> Option<u64> {
    value.div_ceil(align.max(1)).checked_mul(align.max(1))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructLayout {
    pub offsets: Vec<u64>,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_sizes() {
        let dl = DataLayout::default();
        let mut t = TypeTable::new();
        let i1 = t.i1();
        let i64t = t.i64();
        let p = t.ptr();
        assert_eq!(dl.store_size(&t, i1), Ok(1));
        assert_eq!(dl.store_size(&t, i64t), Ok(8));
        assert_eq!(dl.align_of(&t, i64t), 8);
        assert_eq!(dl.store_size(&t, p), Ok(4));
    }

    #[test]
    fn struct_padding() {
        let dl = DataLayout::default();
        let mut t = TypeTable::new();
        let i8 = t.i8();
        let f64 = t.f64();
        let i32t = t.i32();
        let st = t.structure(vec![i8, f64, i32t]);
        let layout = dl.struct_layout(&t, st).unwrap();
        assert_eq!(layout.offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
        let arr = t.array(3, st);
        assert_eq!(dl.alloc_size(&t, arr), Ok(72));
    }

    #[test]
    fn oversized_aggregates_are_rejected() {
        let dl = DataLayout::default();
        let mut t = TypeTable::new();
        let i64t = t.i64();
        let huge = t.array(1 << 61, i64t);
        let st = t.structure(vec![huge, i64t]);
        assert!(matches!(
            dl.alloc_size(&t, st),
            Err(MemoryError::TypeTooLarge { limit: 0xffff_ffff, .. })
        ));
        assert_eq!(dl.field_offset(&t, st, 1), None);

        // One byte past the 32-bit address space.
        let i8t = t.i8();
        let edge = t.array(1 << 32, i8t);
        assert!(dl.store_size(&t, edge).is_err());
        let fits = t.array(u64::from(u32::MAX), i8t);
        assert_eq!(dl.store_size(&t, fits), Ok(u64::from(u32::MAX)));
    }

    #[test]
    fn rejects_unknown_components() {
        assert!(DataLayout::parse("e-x:1").is_err());
        assert!(DataLayout::parse("e-p:32:32").is_ok());
    }
}
