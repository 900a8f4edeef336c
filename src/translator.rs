// This module provides the Translator, the public driver of the LLJVM pipeline. A
// Translator holds nothing but an immutable PipelineConfig, so it is Send + Sync and one
// instance can serve concurrent callers; every request creates its own arena and
// CompilationSession. translate() runs loader -> strict verifier -> lowering passes on a
// private copy -> post-lowering verifier -> JVM backend -> class writer and fails fast
// with the first error of any stage. verify() decodes the container and returns every
// diagnostic of the collecting verifier; only a ParseError aborts it. disassemble()
// prints the decoded module in the IR text form that ir::parser reads back.

//! Pipeline driver.

use crate::bitcode::read_module;
use crate::core::config::{PipelineConfig, Verbosity};
use crate::core::error::{Diagnostic, ParseError, TranslateResult};
use crate::core::session::{CompilationSession, SessionStats};
use crate::ir::printer::print_module;
use crate::ir::Module;
use crate::jvm::{ClassArtifact, JvmBackend};
use crate::passes::PassManager;
use crate::verifier::{verify_module, verify_strict, Profile};
use bumpalo::Bump;
use log::{debug, info};

/// Result of a successful translation.
#[derive(Debug, Clone)]
pub struct Translation {
    pub artifact: ClassArtifact,
    /// Serialized class file.
    pub class_bytes: Vec<u8>,
    pub stats: SessionStats,
}

impl Translation {
    pub fn class_name(&self) -> &str {
        &self.artifact.name
    }
}

/// Translates IR containers into JVM classes.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    config: PipelineConfig,
}

impl Translator {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Translate container bytes into a class file.
    pub fn translate(&self, bytes: &[u8]) -> TranslateResult<Translation> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let module = read_module(bytes)?;
        let artifact = self.translate_module(&module, &session)?;
        let class_bytes = artifact.to_bytes()?;
        let stats = session.stats();
        info!(
            "📦 Translated {} function(s) into {} ({} bytes)",
            stats.functions_compiled,
            artifact.name,
            class_bytes.len()
        );
        debug!("📊 {}", stats);
        Ok(Translation {
            artifact,
            class_bytes,
            stats,
        })
    }

    /// Verify, lower and compile an already decoded module.
    pub fn translate_module(
        &self,
        module: &Module,
        session: &CompilationSession<'_>,
    ) -> TranslateResult<ClassArtifact> {
        verify_strict(module, Profile::Input)?;
        debug!(
            "📊 Verified {} function(s), {} global(s)",
            module.functions.len(),
            module.globals.len()
        );

        let passes = PassManager::new(self.config.passes);
        let lowered = passes.run(module, session)?;
        debug!("🔧 Lowering ran {:?}", passes.pass_names());
        if self.config.verbosity >= Verbosity::Dump {
            debug!("🔧 Lowered module:\n{}", print_module(&lowered));
        }
        if self.config.verify_after_lowering {
            verify_strict(&lowered, Profile::Lowered)?;
        }

        JvmBackend::new(&lowered, &self.config).compile(session)
    }

    /// Decode `bytes` and collect every verifier finding.
    pub fn verify(&self, bytes: &[u8]) -> Result<Vec<Diagnostic>, ParseError> {
        let module = read_module(bytes)?;
        let diags = verify_module(&module, Profile::Input);
        info!("📊 Verification found {} issue(s)", diags.len());
        Ok(diags)
    }

    /// Decode `bytes` and print the module in IR text form.
    pub fn disassemble(&self, bytes: &[u8]) -> Result<String, ParseError> {
        let module = read_module(bytes)?;
        Ok(print_module(&module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitcode::write_module;
    use crate::core::config::PassSet;
    use crate::core::error::ErrorCategory;
    use crate::ir::parser::parse_module;

    fn container(text: &str) -> Vec<u8> {
        write_module(&parse_module(text).unwrap())
    }

    const SWITCH: &str = "define i32 @pick(i32 %x) {\nentry:\n  \
        switch i32 %x, label %other [ i32 0, label %zero ]\nzero:\n  ret i32 10\n\
        other:\n  ret i32 20\n}\n";

    #[test]
    fn translator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Translator>();
    }

    #[test]
    fn translate_produces_a_class_file() {
        let _ = env_logger::builder().is_test(true).try_init();
        let translator = Translator::new(PipelineConfig::default().with_class_name("Demo"));
        let out = translator.translate(&container(SWITCH)).unwrap();
        assert_eq!(out.class_name(), "Demo");
        assert_eq!(&out.class_bytes[..4], &[0xca, 0xfe, 0xba, 0xbe]);
        assert_eq!(out.stats.functions_compiled, 1);
        assert!(out.stats.passes_run >= 3);
    }

    #[test]
    fn switch_survives_only_without_lowering() {
        let translator = Translator::new(
            PipelineConfig::default().with_passes(PassSet::GC_LOWERING | PassSet::SIMPLIFY_CFG),
        );
        let err = translator.translate(&container(SWITCH)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Verification);

        let translator = Translator::new(
            PipelineConfig::default()
                .with_passes(PassSet::SIMPLIFY_CFG)
                .with_verify_after_lowering(false),
        );
        let err = translator.translate(&container(SWITCH)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::UnsupportedInstruction);
    }

    #[test]
    fn disassemble_matches_printer() {
        let text = "define i32 @id(i32 %x) {\nentry:\n  ret i32 %x\n}\n";
        let module = parse_module(text).unwrap();
        let printed = Translator::default().disassemble(&write_module(&module)).unwrap();
        assert_eq!(printed, print_module(&module));
    }
}
