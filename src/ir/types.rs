// This module defines the IR type system and the per-module type table. Types are
// structural (void, integers of arbitrary width, f32/f64, opaque pointers, arrays,
// structs and vectors) and are interned in a TypeTable so that every distinct type has
// exactly one TypeId within a module. Aggregates refer to their element types by
// TypeId, which keeps Type cheap to hash and compare. TypeClass is the coarse
// classification the backend's selection table is keyed on: it collapses the type
// lattice into the handful of shapes that have distinct bytecode mappings (the JVM
// primitive kinds plus "pointer", "aggregate" and "vector").

//! IR types and type interning.

use hashbrown::HashMap;
use std::fmt;

/// Index of an interned type in a module's [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Structural IR type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    /// Integer of the given bit width.
    Int(u32),
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// Opaque pointer into emulated memory.
    Ptr,
    Array { len: u64, elem: TypeId },
    Struct { fields: Vec<TypeId> },
    Vector { len: u32, elem: TypeId },
}

impl Type {
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::Struct { .. })
    }

    /// Types that can be held in an SSA value.
    pub fn is_first_class(&self) -> bool {
        !matches!(self, Type::Void)
    }

    pub fn int_width(&self) -> Option<u32> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }
}

/// Coarse type classification used as half of the instruction selection key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    /// Integer width without a bytecode mapping (e.g. i24, i128).
    OddInt,
    Aggregate,
    Vector,
}

impl TypeClass {
    /// Integer classes that live in a JVM `int`.
    pub fn is_int_like(self) -> bool {
        matches!(self, TypeClass::I1 | TypeClass::I8 | TypeClass::I16 | TypeClass::I32)
    }

    pub fn is_wide(self) -> bool {
        matches!(self, TypeClass::I64 | TypeClass::F64)
    }
}

/// Interning table owning every type of a module.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<Type>,
    index: HashMap<Type, TypeId>,
}

impl PartialEq for TypeTable {
    fn eq(&self, other: &Self) -> bool {
        self.types == other.types
    }
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a type, returning the existing id when already present.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.index.get(&ty) {
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.index.insert(ty, id);
        id
    }

    pub fn lookup(&self, ty: &Type) -> Option<TypeId> {
        self.index.get(ty).copied()
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn try_get(&self, id: TypeId) -> Option<&Type> {
        self.types.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &Type)> {
        self.types
            .iter()
            .enumerate()
            .map(|(i, t)| (TypeId(i as u32), t))
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(Type::Void)
    }

    pub fn int(&mut self, width: u32) -> TypeId {
        self.intern(Type::Int(width))
    }

    pub fn i1(&mut self) -> TypeId {
        self.int(1)
    }

    pub fn i8(&mut self) -> TypeId {
        self.int(8)
    }

    pub fn i32(&mut self) -> TypeId {
        self.int(32)
    }

    pub fn i64(&mut self) -> TypeId {
        self.int(64)
    }

    pub fn f32(&mut self) -> TypeId {
        self.intern(Type::Float)
    }

    pub fn f64(&mut self) -> TypeId {
        self.intern(Type::Double)
    }

    pub fn ptr(&mut self) -> TypeId {
        self.intern(Type::Ptr)
    }

    pub fn array(&mut self, len: u64, elem: TypeId) -> TypeId {
        self.intern(Type::Array { len, elem })
    }

    pub fn structure(&mut self, fields: Vec<TypeId>) -> TypeId {
        self.intern(Type::Struct { fields })
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Void)
    }

    pub fn is_ptr(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Ptr)
    }

    pub fn int_width(&self, id: TypeId) -> Option<u32> {
        self.get(id).int_width()
    }

    pub fn class(&self, id: TypeId) -> TypeClass {
        match self.get(id) {
            Type::Void => TypeClass::Void,
            Type::Int(1) => TypeClass::I1,
            Type::Int(8) => TypeClass::I8,
            Type::Int(16) => TypeClass::I16,
            Type::Int(32) => TypeClass::I32,
            Type::Int(64) => TypeClass::I64,
            Type::Int(_) => TypeClass::OddInt,
            Type::Float => TypeClass::F32,
            Type::Double => TypeClass::F64,
            Type::Ptr => TypeClass::Ptr,
            Type::Array { .. } | Type::Struct { .. } => TypeClass::Aggregate,
            Type::Vector { .. } => TypeClass::Vector,
        }
    }

    /// Render a type in the textual IR syntax.
    pub fn display(&self, id: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { table: self, id }
    }
}

/// Helper returned by [`TypeTable::display`].
pub struct TypeDisplay<'a> {
    table: &'a TypeTable,
    id: TypeId,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.table.get(self.id) {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{w}"),
            Type::Float => write!(f, "f32"),
            Type::Double => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Array { len, elem } => write!(f, "[{len} x {}]", self.table.display(*elem)),
            Type::Vector { len, elem } => write!(f, "<{len} x {}>", self.table.display(*elem)),
            Type::Struct { fields } => {
                write!(f, "{{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}", self.table.display(*field))?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut table = TypeTable::new();
        let a = table.i32();
        let b = table.intern(Type::Int(32));
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);

        let arr1 = table.array(4, a);
        let arr2 = table.array(4, b);
        assert_eq!(arr1, arr2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn display_nested_types() {
        let mut table = TypeTable::new();
        let i8 = table.i8();
        let f64 = table.f64();
        let arr = table.array(3, i8);
        let st = table.structure(vec![arr, f64]);
        assert_eq!(table.display(st).to_string(), "{ [3 x i8], f64 }");
    }

    #[test]
    fn classification() {
        let mut table = TypeTable::new();
        let i1 = table.i1();
        let i24 = table.int(24);
        let p = table.ptr();
        assert_eq!(table.class(i1), TypeClass::I1);
        assert_eq!(table.class(i24), TypeClass::OddInt);
        assert_eq!(table.class(p), TypeClass::Ptr);
        assert!(TypeClass::I64.is_wide());
        assert!(TypeClass::I8.is_int_like());
    }
}
