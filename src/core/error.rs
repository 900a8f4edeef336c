// This module defines the error types of the LLJVM backend using the thiserror crate.
// Every pipeline stage has its own layer: ParseError for the binary container and the
// text form, Diagnostic for verifier findings, LoweringError for passes that meet a
// construct they cannot rewrite, CodegenError for instruction selection, bytecode
// layout and re-verification failures, and MemoryError for out-of-bounds accesses
// into the emulated memory arena. TranslateError is the single public error; each
// layer converts into it with #[from] and ErrorCategory gives the host the coarse
// category it reports alongside the diagnostic text. TranslateResult<T> is the usual
// Result alias for pipeline entry points.

//! Error types for the LLJVM backend.
//!
//! Using thiserror for idiomatic error handling.

use std::fmt;
use thiserror::Error;

/// Failure to decode a binary container or to parse IR text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("bad magic: expected \"LLIR\"")]
    BadMagic,

    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated input at offset {offset} while reading {what}")]
    Truncated { offset: usize, what: &'static str },

    #[error("malformed container at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("syntax error at line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

/// A single verifier finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub function: Option<String>,
    pub block: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn module(message: impl Into<String>) -> Self {
        Self {
            function: None,
            block: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.function, &self.block) {
            (Some(func), Some(block)) => write!(f, "in @{func}, block {block}: {}", self.message),
            (Some(func), None) => write!(f, "in @{func}: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// A lowering pass met a construct it cannot rewrite.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{pass}: cannot lower `{instruction}` in @{function}: {reason}")]
pub struct LoweringError {
    pub pass: &'static str,
    pub function: String,
    pub instruction: String,
    pub reason: String,
}

/// Out-of-bounds or otherwise invalid access to emulated memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("out of bounds access: address {address:#x}, {len} bytes (arena size {size})")]
    OutOfBounds { address: u64, len: u64, size: u64 },

    #[error("invalid alignment {0}")]
    BadAlignment(u64),

    #[error("emulated address space exhausted ({requested} bytes requested)")]
    Exhausted { requested: u64 },

    #[error("type {ty} does not fit in an address space of {limit:#x} bytes")]
    TypeTooLarge { ty: String, limit: u64 },
}

/// Errors raised while generating bytecode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    #[error("unsupported instruction in @{function}: {detail}")]
    Unsupported { function: String, detail: String },

    #[error("emission failed for {method}: {reason}")]
    Emission { method: String, reason: String },

    #[error("{what} limit exceeded: {count} > {max}")]
    Limit {
        what: &'static str,
        count: usize,
        max: usize,
    },
}

/// Coarse error category reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Parse,
    Verification,
    Lowering,
    UnsupportedInstruction,
    Emission,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Parse => "ParseError",
            ErrorCategory::Verification => "VerificationError",
            ErrorCategory::Lowering => "LoweringError",
            ErrorCategory::UnsupportedInstruction => "UnsupportedInstructionError",
            ErrorCategory::Emission => "EmissionError",
        };
        f.write_str(name)
    }
}

/// Main error type of a translation request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("verification failed: {0}")]
    Verification(Diagnostic),

    #[error("lowering failed: {0}")]
    Lowering(#[from] LoweringError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("emulated memory: {0}")]
    Memory(#[from] MemoryError),
}

impl From<Diagnostic> for TranslateError {
    fn from(diag: Diagnostic) -> Self {
        TranslateError::Verification(diag)
    }
}

impl TranslateError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TranslateError::Parse(_) => ErrorCategory::Parse,
            TranslateError::Verification(_) => ErrorCategory::Verification,
            TranslateError::Lowering(_) => ErrorCategory::Lowering,
            TranslateError::Codegen(CodegenError::Unsupported { .. }) => {
                ErrorCategory::UnsupportedInstruction
            }
            TranslateError::Codegen(_) | TranslateError::Memory(_) => ErrorCategory::Emission,
        }
    }
}

/// Result type alias for pipeline entry points.
pub type TranslateResult<T> = Result<T, TranslateError>;

/// Result type alias for the code generator.
pub type CodegenResult<T> = Result<T, CodegenError>;
