//! LLJVM - SSA IR to JVM bytecode translation.
//!
//! LLJVM takes a module of LLVM-style SSA IR, shipped in a compact binary container,
//! and produces a verifier-compliant JVM class file: one static method per defined
//! function, static fields holding the addresses of globals in an emulated flat memory,
//! and a static initializer that maps the data image at class load time.
//!
//! # Primary Usage
//!
//! ```ignore
//! use lljvm::{PipelineConfig, Translator};
//!
//! let translator = Translator::new(PipelineConfig::default().with_class_name("Kernel"));
//! let translation = translator.translate(&container_bytes)?;
//! std::fs::write("Kernel.class", &translation.class_bytes)?;
//! ```
//!
//! # Architecture
//!
//! - [`bitcode`] - binary container reader (Module Loader) and writer
//! - [`verifier`] - structural and SSA dominance checks
//! - [`passes`] - GC intrinsic lowering, switch lowering, CFG simplification
//! - [`jvm`] - instruction selection, bytecode encoding and class emission
//! - [`core`] - shared infrastructure (session, config, errors, analysis, slots)
//! - [`ir`] - module graph, types, data layout and the IR text form
//! - [`memory`] - emulated memory and the static data image

pub mod bitcode;
pub mod core;
pub mod ir;
pub mod jvm;
pub mod memory;
pub mod passes;
pub mod translator;
pub mod verifier;

pub use crate::core::{
    // Configuration
    PassSet, PipelineConfig, Verbosity,
    // Errors
    CodegenError, Diagnostic, ErrorCategory, LoweringError, MemoryError, ParseError,
    TranslateError, TranslateResult,
    // Session management
    CompilationSession, SessionStats,
};
pub use jvm::ClassArtifact;
pub use translator::{Translation, Translator};

/// Translate container bytes with the default configuration.
pub fn translate(bytes: &[u8]) -> TranslateResult<Translation> {
    Translator::default().translate(bytes)
}

/// Collect every verifier diagnostic of a container; only decoding errors abort.
pub fn verify(bytes: &[u8]) -> Result<Vec<Diagnostic>, ParseError> {
    Translator::default().verify(bytes)
}

/// Print a container in IR text form.
pub fn disassemble(bytes: &[u8]) -> Result<String, ParseError> {
    Translator::default().disassemble(bytes)
}
