// This module implements EmulatedMemory, the flat byte arena standing in for the IR's
// 32-bit pointer space while the backend builds the static data image, and DataImage,
// the laid-out image of every global variable. Allocation is a bump pointer with
// power-of-two alignment and never touches memory: the arena is sparse, and only pages
// that receive a non-zero byte are materialized, so zero-initialized globals cost
// nothing however large they are. The data segment is capped at i32::MAX bytes and the
// cap is checked while the globals are laid out, before any initializer is written.
// Every read and write is bounds-checked and fails with MemoryError::OutOfBounds
// instead of panicking. Addresses in the image are relative
// to the start of the data segment: the generated static initializer asks the runtime
// for the segment base, copies the image there and then applies the recorded
// relocations (pointer initializers that hold the address of another global).

//! Emulated memory and the global data image.

use crate::core::error::MemoryError;
use crate::ir::{Constant, DataLayout, FuncId, GlobalId, Module, Type, TypeId, TypeTable};
use log::debug;
use std::collections::BTreeMap;

/// Largest address representable by a 32-bit pointer.
pub const ADDRESS_LIMIT: u64 = u32::MAX as u64;

/// Largest static data segment; the runtime sizes it with a Java `int`.
pub const DATA_LIMIT: u64 = i32::MAX as u64;

/// Granularity of the sparse arena.
pub const PAGE_SIZE: u64 = 4096;

/// Flat, bounds-checked byte arena. Only pages that were written with a non-zero
/// byte are materialized; everything else reads as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatedMemory {
    pages: BTreeMap<u64, Box<[u8]>>,
    size: u64,
    limit: u64,
}

impl Default for EmulatedMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedMemory {
    pub fn new() -> Self {
        Self::with_limit(ADDRESS_LIMIT)
    }

    pub fn with_limit(limit: u64) -> Self {
        Self {
            pages: BTreeMap::new(),
            size: 0,
            limit,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes held by materialized pages.
    pub fn resident(&self) -> u64 {
        self.pages.len() as u64 * PAGE_SIZE
    }

    /// Reserve `size` zeroed bytes aligned to `align`; returns their address.
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<u64, MemoryError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(MemoryError::BadAlignment(align));
        }
        let exhausted = MemoryError::Exhausted { requested: size };
        let start = self
            .size
            .div_ceil(align)
            .checked_mul(align)
            .ok_or(exhausted.clone())?;
        match start.checked_add(size) {
            Some(end) if end <= self.limit => {
                self.size = end;
                Ok(start)
            }
            _ => Err(exhausted),
        }
    }

    fn check(&self, address: u64, len: u64) -> Result<(), MemoryError> {
        match address.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(MemoryError::OutOfBounds {
                address,
                len,
                size: self.size,
            }),
        }
    }

    pub fn read(&self, address: u64, len: u64) -> Result<Vec<u8>, MemoryError> {
        self.check(address, len)?;
        let mut out = Vec::with_capacity(len as usize);
        let mut at = address;
        let end = address + len;
        while at < end {
            let page = at / PAGE_SIZE;
            let from = (at % PAGE_SIZE) as usize;
            let take = (PAGE_SIZE - at % PAGE_SIZE).min(end - at) as usize;
            match self.pages.get(&page) {
                Some(bytes) => out.extend_from_slice(&bytes[from..from + take]),
                None => out.resize(out.len() + take, 0),
            }
            at += take as u64;
        }
        Ok(out)
    }

    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        self.check(address, data.len() as u64)?;
        let mut at = address;
        let mut rest = data;
        while !rest.is_empty() {
            let page = at / PAGE_SIZE;
            let from = (at % PAGE_SIZE) as usize;
            let take = ((PAGE_SIZE as usize) - from).min(rest.len());
            let (part, tail) = rest.split_at(take);
            if self.pages.contains_key(&page) || part.iter().any(|b| *b != 0) {
                let bytes = self
                    .pages
                    .entry(page)
                    .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
                bytes[from..from + take].copy_from_slice(part);
            }
            at += take as u64;
            rest = tail;
        }
        Ok(())
    }

    /// Materialized pages with at least one non-zero byte, in address order, clipped
    /// to the allocated size.
    pub fn nonzero_pages(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        self.pages.iter().filter_map(move |(page, bytes)| {
            let address = page * PAGE_SIZE;
            let len = (self.size.saturating_sub(address)).min(PAGE_SIZE) as usize;
            let bytes = &bytes[..len];
            bytes.iter().any(|b| *b != 0).then_some((address, bytes))
        })
    }

    /// Little-endian store of the low `len` bytes of `value`.
    pub fn write_uint(&mut self, address: u64, value: u64, len: usize) -> Result<(), MemoryError> {
        let bytes = value.to_le_bytes();
        let len = len.min(8);
        self.write(address, &bytes[..len])
    }

    pub fn read_uint(&self, address: u64, len: usize) -> Result<u64, MemoryError> {
        let len = len.min(8);
        let data = self.read(address, len as u64)?;
        let mut bytes = [0u8; 8];
        bytes[..len].copy_from_slice(&data);
        Ok(u64::from_le_bytes(bytes))
    }
}

/// What a relocated pointer slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocTarget {
    Global(GlobalId),
    Function(FuncId),
}

/// A pointer-sized slot in the image that must have the segment base added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: u64,
    pub target: RelocTarget,
}

/// Laid-out static data of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataImage {
    pub memory: EmulatedMemory,
    /// Segment-relative address of every global, by `GlobalId`.
    pub addresses: Vec<u64>,
    pub relocations: Vec<Relocation>,
}

impl DataImage {
    /// Allocate every global and write its initializer.
    pub fn build(module: &Module, layout: &DataLayout) -> Result<Self, MemoryError> {
        let mut memory = EmulatedMemory::with_limit(DATA_LIMIT);
        let mut addresses = Vec::with_capacity(module.globals.len());
        for g in &module.globals {
            let size = layout.alloc_size(&module.types, g.ty)?.max(1);
            let align = layout.align_of(&module.types, g.ty);
            addresses.push(memory.allocate(size, align)?);
        }

        let mut image = Self {
            memory,
            addresses,
            relocations: Vec::new(),
        };
        for (i, g) in module.globals.iter().enumerate() {
            if let Some(init) = &g.init {
                let address = image.addresses[i];
                image.write_constant(&module.types, layout, address, init)?;
            }
        }
        debug!(
            "📦 Data image: {} global(s), {} bytes ({} resident), {} relocation(s)",
            module.globals.len(),
            image.memory.size(),
            image.memory.resident(),
            image.relocations.len()
        );
        Ok(image)
    }

    pub fn address_of(&self, global: GlobalId) -> Option<u64> {
        self.addresses.get(global.0 as usize).copied()
    }

    fn write_constant(
        &mut self,
        types: &TypeTable,
        layout: &DataLayout,
        address: u64,
        constant: &Constant,
    ) -> Result<(), MemoryError> {
        let size = |ty: TypeId| layout.store_size(types, ty).map(|s| s as usize);
        match constant {
            Constant::Int { ty, bits } => self.memory.write_uint(address, *bits, size(*ty)?),
            Constant::Float { ty, bits } => self.memory.write_uint(address, *bits, size(*ty)?),
            // The arena is zero-initialized.
            Constant::Null { .. } | Constant::Undef { .. } | Constant::Zero { .. } => Ok(()),
            Constant::Bytes { data, .. } => self.memory.write(address, data),
            Constant::Array { ty, elems } => {
                let stride = match types.get(*ty) {
                    Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                        layout.alloc_size(types, *elem)?
                    }
                    _ => 0,
                };
                for (i, elem) in elems.iter().enumerate() {
                    let at = address.saturating_add(stride.saturating_mul(i as u64));
                    self.write_constant(types, layout, at, elem)?;
                }
                Ok(())
            }
            Constant::Struct { ty, fields } => {
                let offsets = layout.struct_layout(types, *ty)?.offsets;
                for (field, offset) in fields.iter().zip(offsets) {
                    self.write_constant(types, layout, address.saturating_add(offset), field)?;
                }
                Ok(())
            }
            Constant::GlobalAddr { ty, global } => {
                let target = self.address_of(*global).ok_or(MemoryError::OutOfBounds {
                    address: u64::from(global.0),
                    len: 0,
                    size: self.addresses.len() as u64,
                })?;
                self.memory.write_uint(address, target, size(*ty)?)?;
                self.relocations.push(Relocation {
                    offset: address,
                    target: RelocTarget::Global(*global),
                });
                Ok(())
            }
            Constant::FuncAddr { func, .. } => {
                self.relocations.push(Relocation {
                    offset: address,
                    target: RelocTarget::Function(*func),
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    #[test]
    fn allocation_respects_alignment() {
        let mut mem = EmulatedMemory::new();
        assert_eq!(mem.allocate(1, 1).unwrap(), 0);
        assert_eq!(mem.allocate(8, 8).unwrap(), 8);
        assert_eq!(mem.size(), 16);
        assert_eq!(mem.allocate(4, 3), Err(MemoryError::BadAlignment(3)));
    }

    #[test]
    fn out_of_bounds_access_is_an_error() {
        let mut mem = EmulatedMemory::new();
        mem.allocate(4, 4).unwrap();
        mem.write_uint(0, 0x1122_3344, 4).unwrap();
        assert_eq!(mem.read(0, 4).unwrap(), &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(
            mem.read(2, 4),
            Err(MemoryError::OutOfBounds {
                address: 2,
                len: 4,
                size: 4
            })
        );
        assert!(mem.write(u64::MAX, &[1]).is_err());
    }

    #[test]
    fn zero_regions_stay_sparse() {
        let mut mem = EmulatedMemory::new();
        let a = mem.allocate(1 << 30, 8).unwrap();
        assert_eq!(mem.resident(), 0);
        mem.write(a + 10, &[0, 0, 0]).unwrap();
        assert_eq!(mem.resident(), 0);
        mem.write_uint(a + PAGE_SIZE - 2, 0xaabb_ccdd, 4).unwrap();
        assert_eq!(mem.resident(), 2 * PAGE_SIZE);
        assert_eq!(mem.read_uint(a + PAGE_SIZE - 2, 4).unwrap(), 0xaabb_ccdd);
        let pages: Vec<u64> = mem.nonzero_pages().map(|(at, _)| at).collect();
        assert_eq!(pages, vec![0, PAGE_SIZE]);
    }

    #[test]
    fn last_page_is_clipped_to_the_allocation() {
        let mut mem = EmulatedMemory::new();
        mem.allocate(6, 1).unwrap();
        mem.write(4, &[7, 9]).unwrap();
        let pages: Vec<(u64, Vec<u8>)> =
            mem.nonzero_pages().map(|(at, b)| (at, b.to_vec())).collect();
        assert_eq!(pages, vec![(0, vec![0, 0, 0, 0, 7, 9])]);
    }

    #[test]
    fn data_segment_is_capped_before_writing() {
        let m = parse_module("@big = global [3221225472 x i8] zeroinitializer
").unwrap();
        assert!(matches!(
            DataImage::build(&m, &DataLayout::default()),
            Err(MemoryError::Exhausted { .. })
        ));
    }

    #[test]
    fn exhausting_the_address_space_fails() {
        let mut mem = EmulatedMemory::with_limit(16);
        mem.allocate(12, 4).unwrap();
        assert_eq!(
            mem.allocate(8, 4),
            Err(MemoryError::Exhausted { requested: 8 })
        );
    }

    #[test]
    fn image_lays_out_globals_and_relocations() {
        let m = parse_module(
            "@a = global i32 7\n\
             @b = global i64 -1\n\
             @s = constant [3 x i8] c\"hi\\00\"\n\
             @p = global ptr @b\n",
        )
        .unwrap();
        let image = DataImage::build(&m, &DataLayout::default()).unwrap();
        assert_eq!(image.addresses, vec![0, 8, 16, 20]);
        assert_eq!(image.memory.read_uint(0, 4).unwrap(), 7);
        assert_eq!(image.memory.read_uint(8, 8).unwrap(), u64::MAX);
        assert_eq!(image.memory.read(16, 3).unwrap(), b"hi\0");
        assert_eq!(image.memory.read_uint(20, 4).unwrap(), 8);
        assert_eq!(
            image.relocations,
            vec![Relocation {
                offset: 20,
                target: RelocTarget::Global(GlobalId(1))
            }]
        );
    }
}
