// This module is the JVM backend of LLJVM. A lowered module enters through JvmBackend,
// which emits one static method per defined function and a static initializer for the
// data image, and leaves as a ClassArtifact that class_writer serializes. Per function,
// FunctionCodegen assigns local slots, folds single-use values onto the operand stack and
// dispatches every instruction through the (opcode, type class) selection table; the
// BytecodeEncoder lays out and encodes the symbolic instruction list with branch
// relaxation and stack depth tracking. The constant pool, descriptors and the runtime
// contract (emulated memory accessors, unsigned helpers, numeric intrinsics) are shared
// by all of them, and verify re-checks every emitted method independently.

//! JVM bytecode backend.
//!
//! # Architecture
//!
//! - [`backend`] - module-level driver, call resolution and `<clinit>`
//! - [`function_codegen`] - per-function instruction emission
//! - [`select`] - the `(opcode, type class)` selection table
//! - [`encoder`] - two-pass bytecode layout and encoding
//! - [`verify`] - bytecode re-verification
//! - [`class_writer`] - class-file serialization

pub mod backend;
pub mod class_writer;
pub mod constant_pool;
pub mod descriptor;
pub mod encoder;
pub mod function_codegen;
pub mod opcodes;
pub mod runtime;
pub mod select;
pub mod verify;

pub use backend::{ClassContext, JvmBackend};
pub use class_writer::{write_class, AccessFlags, ClassArtifact, FieldInfo, MethodInfo};
pub use constant_pool::ConstantPool;
pub use encoder::{BytecodeEncoder, EncodedCode, Label, OperandStackState};
pub use function_codegen::{CompiledMethod, FunctionCodegen, MethodStats};
pub use verify::verify_method;
