// This module groups the codec for the binary IR container. The container is a compact,
// little-endian, LEB128-based serialization of a Module: a fixed header ("LLIR" magic,
// u16 version, u16 reserved), a string table, the type table (types may only refer to
// earlier entries), the globals and the functions with their blocks and instructions.
// Result values are implicit: every instruction flagged as producing a result receives
// the next dense value number, parameters first, so the decoder rebuilds the exact SSA
// numbering the encoder saw. The reader performs structural decoding only; semantic
// validation is the verifier's job. Tag and flag constants shared by both directions
// live here.

//! Binary IR container codec.

pub mod reader;
pub mod writer;

pub use reader::read_module;
pub use writer::write_module;

pub const MAGIC: &[u8; 4] = b"LLIR";
pub const VERSION: u16 = 1;

/// Nesting limit for types and aggregate constants.
pub const MAX_NESTING: usize = 64;

pub(crate) mod tag {
    // Type records
    pub const TY_VOID: u8 = 0;
    pub const TY_INT: u8 = 1;
    pub const TY_FLOAT: u8 = 2;
    pub const TY_DOUBLE: u8 = 3;
    pub const TY_PTR: u8 = 4;
    pub const TY_ARRAY: u8 = 5;
    pub const TY_STRUCT: u8 = 6;
    pub const TY_VECTOR: u8 = 7;

    // Constants
    pub const C_INT: u8 = 0;
    pub const C_FLOAT: u8 = 1;
    pub const C_NULL: u8 = 2;
    pub const C_UNDEF: u8 = 3;
    pub const C_ZERO: u8 = 4;
    pub const C_ARRAY: u8 = 5;
    pub const C_STRUCT: u8 = 6;
    pub const C_BYTES: u8 = 7;
    pub const C_GLOBAL: u8 = 8;
    pub const C_FUNC: u8 = 9;

    // Operands
    pub const OP_VALUE: u8 = 0;
    pub const OP_CONST: u8 = 1;
    pub const OP_BLOCK: u8 = 2;
    pub const OP_FUNC: u8 = 3;

    // Instruction attributes
    pub const ATTR_NONE: u8 = 0;
    pub const ATTR_ICMP: u8 = 1;
    pub const ATTR_FCMP: u8 = 2;
    pub const ATTR_TYPE: u8 = 3;

    // Global flags
    pub const G_CONSTANT: u8 = 1 << 0;
    pub const G_INTERNAL: u8 = 1 << 1;
    pub const G_HAS_INIT: u8 = 1 << 2;

    // Function flags
    pub const F_VARIADIC: u8 = 1 << 0;
    pub const F_INTERNAL: u8 = 1 << 1;
    pub const F_DEFINED: u8 = 1 << 2;

    // Instruction flags
    pub const I_HAS_RESULT: u8 = 1 << 0;
}
