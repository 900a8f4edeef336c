// This module defines PipelineConfig, the explicit configuration value handed to the
// Translator constructor. It selects which lowering passes run (a bitflags PassSet, all
// three by default), whether the lowered module and the emitted bytecode are verified
// again, the JVM class names the generated code refers to (the generated class itself,
// the emulated memory runtime, the numeric intrinsic runtime and the fallback class
// for external symbols), the maximum method size and the logging verbosity. There is
// no global or environment-driven state: two translators with equal configs behave
// identically.

//! Pipeline configuration.

use bitflags::bitflags;

bitflags! {
    /// Lowering passes enabled for a translation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassSet: u8 {
        const GC_LOWERING = 1 << 0;
        const LOWER_SWITCH = 1 << 1;
        const SIMPLIFY_CFG = 1 << 2;
    }
}

impl Default for PassSet {
    fn default() -> Self {
        PassSet::all()
    }
}

/// How much the pipeline logs beyond per-function summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Normal,
    /// Dump the lowered module text at debug level.
    Dump,
}

/// Translation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub passes: PassSet,
    /// Re-run the verifier on the lowered module.
    pub verify_after_lowering: bool,
    /// Re-verify every emitted method with the bytecode verifier.
    pub reverify_bytecode: bool,
    pub class_name: String,
    pub memory_class: String,
    /// Class receiving calls to declared, non-intrinsic functions.
    pub extern_class: String,
    pub intrinsic_class: String,
    /// Maximum bytecode length of one method.
    pub max_method_size: usize,
    pub verbosity: Verbosity,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            passes: PassSet::default(),
            verify_after_lowering: true,
            reverify_bytecode: true,
            class_name: "GeneratedClass".to_string(),
            memory_class: "lljvm/runtime/Memory".to_string(),
            extern_class: "lljvm/runtime/Function".to_string(),
            intrinsic_class: "io/github/maropu/lljvm/runtime/NumbaRuntime".to_string(),
            max_method_size: 65535,
            verbosity: Verbosity::Normal,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_passes(mut self, passes: PassSet) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_verify_after_lowering(mut self, enabled: bool) -> Self {
        self.verify_after_lowering = enabled;
        self
    }

    pub fn with_reverify_bytecode(mut self, enabled: bool) -> Self {
        self.reverify_bytecode = enabled;
        self
    }

    /// Internal name (slash separated) of the generated class.
    pub fn with_class_name(mut self, name: impl Into<String>) -> Self {
        self.class_name = name.into();
        self
    }

    pub fn with_memory_class(mut self, name: impl Into<String>) -> Self {
        self.memory_class = name.into();
        self
    }

    pub fn with_extern_class(mut self, name: impl Into<String>) -> Self {
        self.extern_class = name.into();
        self
    }

    pub fn with_intrinsic_class(mut self, name: impl Into<String>) -> Self {
        self.intrinsic_class = name.into();
        self
    }

    pub fn with_max_method_size(mut self, size: usize) -> Self {
        self.max_method_size = size;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }
}
