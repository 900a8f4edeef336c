// This module is the hub of LLJVM's shared infrastructure, used by every pipeline stage
// regardless of which part of the IR they handle: the per-request CompilationSession
// (arena-backed string interning and statistics), the explicit
// PipelineConfig, the layered error taxonomy, the Analyzer (CFG order, predecessors,
// block liveness and linear live intervals) and local slot assignment for SSA values.

//! Core LLJVM infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based string interning using `bumpalo`
//! - Translation statistics
//!
//! ## Analysis (`analyzer`)
//! - Reverse post-order, predecessors and successors
//! - Block liveness and linear live intervals
//!
//! ## Slot Assignment (`value_assignment`)
//! - Parameters in the first local slots
//! - Linear scan with per-kind free lists for everything else

pub mod analyzer;
pub mod config;
pub mod error;
pub mod session;
pub mod value_assignment;

pub use analyzer::{Analyzer, LiveInterval, ValueSet};
pub use config::{PassSet, PipelineConfig, Verbosity};
pub use error::{
    CodegenError, CodegenResult, Diagnostic, ErrorCategory, LoweringError, MemoryError,
    ParseError, TranslateError, TranslateResult,
};
pub use session::{CompilationSession, SessionStats};
pub use value_assignment::{LocalSlot, SlotAllocator, SlotAssignment, SlotKind};
