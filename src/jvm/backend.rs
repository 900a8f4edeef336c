// This module drives code generation for a whole lowered module. JvmBackend owns the
// per-request ClassContext: the module, the configuration, the data layout, the class
// constant pool and the mangled names of every global field and function method.
// compile() lays the globals out into the static data image, emits one method per
// defined function through FunctionCodegen, optionally re-verifies each method with the
// bytecode verifier, records statistics in the session and finally synthesizes the
// static initializer. The initializer asks the memory runtime for the data segment,
// copies the non-zero pages of the image as Latin-1 strings, patches every pointer
// slot of the image by adding the segment base and stores each global's runtime address
// into its field. Call targets are resolved here as well: defined functions live on the
// generated class, declarations matching the numeric intrinsic table go to the intrinsic
// class and every other declaration goes to the external class.

//! Module-level JVM code generation.

use super::class_writer::{AccessFlags, ClassArtifact, FieldInfo, MethodInfo};
use super::constant_pool::ConstantPool;
use super::descriptor::{mangle, method_descriptor};
use super::encoder::BytecodeEncoder;
use super::function_codegen::{CompiledMethod, FunctionCodegen};
use super::opcodes as op;
use super::runtime;
use super::verify::verify_method;
use crate::core::config::PipelineConfig;
use crate::core::error::{CodegenError, CodegenResult, TranslateResult};
use crate::core::session::CompilationSession;
use crate::core::value_assignment::{LocalSlot, SlotKind};
use crate::ir::layout::DataLayout;
use crate::ir::{FuncId, Function, GlobalId, Module};
use crate::memory::{DataImage, RelocTarget};
use log::{debug, info};

pub const SUPER_CLASS: &str = "java/lang/Object";
pub const STATIC_INITIALIZER: &str = "<clinit>";

/// Resolved target of a direct call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub class: String,
    pub name: String,
    pub descriptor: String,
}

/// State shared by every method of the generated class.
pub struct ClassContext<'m> {
    pub(crate) module: &'m Module,
    pub(crate) config: &'m PipelineConfig,
    pub(crate) layout: DataLayout,
    pub(crate) pool: ConstantPool,
    methods: Vec<String>,
    fields: Vec<String>,
}

impl<'m> ClassContext<'m> {
    pub fn new(module: &'m Module, config: &'m PipelineConfig) -> Self {
        Self {
            module,
            config,
            layout: DataLayout::default(),
            pool: ConstantPool::new(),
            methods: module.functions.iter().map(|f| mangle(&f.name)).collect(),
            fields: module.globals.iter().map(|g| mangle(&g.name)).collect(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.config.class_name
    }

    pub fn method_name(&self, id: FuncId) -> String {
        self.methods
            .get(id.0 as usize)
            .cloned()
            .unwrap_or_else(|| mangle(&self.module.function(id).name))
    }

    pub fn global_field(&self, id: GlobalId) -> Option<&str> {
        self.fields.get(id.0 as usize).map(String::as_str)
    }

    pub fn descriptor_of(&self, func: &Function) -> Option<String> {
        method_descriptor(&self.module.types, &func.params, func.ret)
    }

    /// Resolve the target of a call from `caller` to `callee`.
    pub fn call_site(&self, caller: &str, callee: FuncId) -> CodegenResult<CallSite> {
        let target = self
            .module
            .functions
            .get(callee.0 as usize)
            .ok_or_else(|| CodegenError::Emission {
                method: mangle(caller),
                reason: format!("call to unknown function #{}", callee.0),
            })?;
        let unsupported = |detail: String| CodegenError::Unsupported {
            function: caller.to_owned(),
            detail,
        };
        if target.is_variadic() {
            return Err(unsupported(format!("variadic call to @{}", target.name)));
        }
        let descriptor = self
            .descriptor_of(target)
            .ok_or_else(|| unsupported(format!("@{} has no JVM descriptor", target.name)))?;

        let class = if !target.is_declaration() {
            self.config.class_name.clone()
        } else if let Some(intrinsic) = runtime::find_intrinsic(&target.name) {
            if !intrinsic.matches(&self.module.types, target) {
                return Err(unsupported(format!(
                    "@{} does not match the intrinsic signature",
                    target.name
                )));
            }
            self.config.intrinsic_class.clone()
        } else {
            self.config.extern_class.clone()
        };
        Ok(CallSite {
            class,
            name: self.method_name(callee),
            descriptor,
        })
    }
}

/// Generates the class for one lowered module.
pub struct JvmBackend<'m> {
    cx: ClassContext<'m>,
}

impl<'m> JvmBackend<'m> {
    pub fn new(module: &'m Module, config: &'m PipelineConfig) -> Self {
        Self {
            cx: ClassContext::new(module, config),
        }
    }

    pub fn compile(mut self, session: &CompilationSession<'_>) -> TranslateResult<ClassArtifact> {
        let module = self.cx.module;
        let image = DataImage::build(module, &self.cx.layout)?;

        let fields = self
            .cx
            .fields
            .iter()
            .map(|name| FieldInfo {
                access: AccessFlags::PUBLIC | AccessFlags::STATIC,
                name: name.clone(),
                descriptor: "I".to_string(),
            })
            .collect();

        let mut methods = Vec::new();
        for (id, func) in module.definitions() {
            let compiled = FunctionCodegen::new(&mut self.cx, id)?.compile()?;
            let method = self.finish_method(compiled, session)?;
            info!(
                "🔧 Compiled @{} -> {}{} ({} bytes, max_stack {}, max_locals {})",
                func.name,
                method.name,
                method.descriptor,
                method.code.len(),
                method.max_stack,
                method.max_locals
            );
            methods.push(method);
        }

        if !module.globals.is_empty() {
            let clinit = self.static_initializer(&image)?;
            methods.push(clinit);
        }

        let artifact = ClassArtifact {
            name: self.cx.config.class_name.clone(),
            super_name: SUPER_CLASS.to_string(),
            access: AccessFlags::PUBLIC
                | AccessFlags::FINAL
                | AccessFlags::SUPER
                | AccessFlags::SYNTHETIC,
            pool: self.cx.pool,
            fields,
            methods,
        };
        info!(
            "📦 Class {}: {} method(s), {} field(s), {} pool entries",
            artifact.name,
            artifact.methods.len(),
            artifact.fields.len(),
            artifact.pool.count()
        );
        Ok(artifact)
    }

    fn finish_method(
        &self,
        compiled: CompiledMethod,
        session: &CompilationSession<'_>,
    ) -> CodegenResult<MethodInfo> {
        let CompiledMethod {
            access,
            name,
            descriptor,
            code,
            max_locals,
            stats,
        } = compiled;
        let method = MethodInfo {
            access,
            name: session.intern_str(&name).to_owned(),
            descriptor,
            max_stack: code.max_stack,
            max_locals,
            code: code.code,
        };
        self.reverify(&method)?;

        session.record_function_compiled(&method.name, method.code.len());
        for opcode in &stats.opcodes {
            session.record_instruction_compiled(opcode.name());
        }
        for _ in 0..stats.phi_copies {
            session.record_phi_resolved();
        }
        for _ in 0..stats.slots_allocated {
            session.record_slot_allocated();
        }
        for _ in 0..stats.stack_folds {
            session.record_stack_fold();
        }
        for target in &stats.calls {
            session.record_call_site(target);
        }
        Ok(method)
    }

    fn reverify(&self, method: &MethodInfo) -> CodegenResult<()> {
        if self.cx.config.reverify_bytecode {
            verify_method(&self.cx.pool, method)?;
            debug!("📊 {}{} re-verified", method.name, method.descriptor);
        }
        Ok(())
    }

    /// Build `<clinit>`, which maps the data image and publishes global addresses.
    fn static_initializer(&mut self, image: &DataImage) -> CodegenResult<MethodInfo> {
        let cx = &mut self.cx;
        let memory_class = cx.config.memory_class.clone();
        let this_class = cx.config.class_name.clone();
        let base = LocalSlot {
            index: 0,
            kind: SlotKind::Int,
        };
        let size = i32::try_from(image.memory.size()).map_err(|_| CodegenError::Limit {
            what: "static data size",
            count: image.memory.size() as usize,
            max: i32::MAX as usize,
        })?;

        let mut enc = BytecodeEncoder::new();
        enc.push_int(&mut cx.pool, size)?;
        let allocate = runtime::ALLOCATE_DATA;
        enc.invoke_static(&mut cx.pool, &memory_class, allocate.name, allocate.descriptor)?;
        enc.store_local(base);

        let mut chunks = 0;
        // One Latin-1 string per non-zero page; a page stays far below the 65535-byte
        // limit of a modified UTF-8 constant.
        for (address, page) in image.memory.nonzero_pages() {
            let text: String = page.iter().map(|b| char::from(*b)).collect();
            enc.load_local(base);
            let offset = address as i32;
            if offset != 0 {
                enc.push_int(&mut cx.pool, offset)?;
                enc.op(op::IADD);
            }
            enc.push_string(&mut cx.pool, &text)?;
            let load = runtime::LOAD_IMAGE;
            enc.invoke_static(&mut cx.pool, &memory_class, load.name, load.descriptor)?;
            chunks += 1;
        }

        let store = runtime::store_accessor(crate::ir::TypeClass::Ptr).ok_or_else(|| {
            CodegenError::Emission {
                method: STATIC_INITIALIZER.to_string(),
                reason: "no pointer store accessor".to_string(),
            }
        })?;
        for reloc in &image.relocations {
            let target = match reloc.target {
                RelocTarget::Global(g) => image.address_of(g).unwrap_or(0),
                RelocTarget::Function(f) => {
                    return Err(CodegenError::Unsupported {
                        function: STATIC_INITIALIZER.to_string(),
                        detail: format!(
                            "address of @{} in a global initializer",
                            cx.module.function(f).name
                        ),
                    });
                }
            };
            // store(base + slot, base + target)
            enc.load_local(base);
            enc.push_int(&mut cx.pool, reloc.offset as i32)?;
            enc.op(op::IADD);
            enc.load_local(base);
            enc.push_int(&mut cx.pool, target as i32)?;
            enc.op(op::IADD);
            enc.invoke_static(&mut cx.pool, &memory_class, store.name, store.descriptor)?;
        }

        for (i, address) in image.addresses.iter().enumerate() {
            enc.load_local(base);
            if *address != 0 {
                enc.push_int(&mut cx.pool, *address as i32)?;
                enc.op(op::IADD);
            }
            let field = &cx.fields[i];
            enc.put_static(&mut cx.pool, &this_class, field, "I")?;
        }
        enc.op(op::RETURN);

        let code = enc.finish(STATIC_INITIALIZER, cx.config.max_method_size)?;
        debug!(
            "📦 {}: {} byte(s) of data in {} chunk(s), {} relocation(s)",
            STATIC_INITIALIZER,
            size,
            chunks,
            image.relocations.len()
        );
        let method = MethodInfo {
            access: AccessFlags::STATIC,
            name: STATIC_INITIALIZER.to_string(),
            descriptor: "()V".to_string(),
            max_stack: code.max_stack,
            max_locals: 1,
            code: code.code,
        };
        self.reverify(&method)?;
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;
    use bumpalo::Bump;

    fn compile(text: &str) -> TranslateResult<ClassArtifact> {
        let _ = env_logger::builder().is_test(true).try_init();
        let module = parse_module(text).unwrap();
        let config = PipelineConfig::default();
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        JvmBackend::new(&module, &config).compile(&session)
    }

    #[test]
    fn call_targets_resolve_by_kind() {
        let module = parse_module(
            "declare i32 @numba_xxdot(i8, i8, i64, ptr, ptr, ptr)\n\
             declare i32 @puts(ptr)\n\
             define i32 @id(i32 %x) {\nentry:\n  ret i32 %x\n}\n",
        )
        .unwrap();
        let config = PipelineConfig::default();
        let cx = ClassContext::new(&module, &config);
        let dot = cx.call_site("f", FuncId(0)).unwrap();
        assert_eq!(dot.class, config.intrinsic_class);
        assert_eq!(dot.descriptor, "(BBJIII)I");
        assert_eq!(cx.call_site("f", FuncId(1)).unwrap().class, config.extern_class);
        let id = cx.call_site("f", FuncId(2)).unwrap();
        assert_eq!(id.class, config.class_name);
        assert_eq!(id.descriptor, "(I)I");
    }

    #[test]
    fn mismatched_intrinsic_is_rejected() {
        let module = parse_module("declare void @numba_rnd_shuffle(i32)\n").unwrap();
        let config = PipelineConfig::default();
        let cx = ClassContext::new(&module, &config);
        assert!(matches!(
            cx.call_site("f", FuncId(0)),
            Err(CodegenError::Unsupported { .. })
        ));
    }

    #[test]
    fn globals_get_fields_and_an_initializer() {
        let class = compile(
            "@counter = global i32 7\n\
             @ptr = global ptr @counter\n\
             define i32 @get() {\nentry:\n  %v = load i32, ptr @counter\n  ret i32 %v\n}\n",
        )
        .unwrap();
        assert_eq!(class.field("counter").unwrap().descriptor, "I");
        assert!(class.field("ptr").is_some());
        let clinit = class.method(STATIC_INITIALIZER).unwrap();
        assert_eq!(clinit.max_locals, 1);
        assert_eq!(clinit.code.last(), Some(&op::RETURN));
        assert!(class.method("get").is_some());
    }

    #[test]
    fn module_without_globals_has_no_initializer() {
        let class = compile("define void @f() {\nentry:\n  ret void\n}\n").unwrap();
        assert!(!class.has_static_initializer());
        let f = class.method("f").unwrap();
        assert_eq!(f.code, vec![op::RETURN]);
        assert_eq!(f.max_stack, 0);
    }

    #[test]
    fn function_address_initializer_is_unsupported() {
        let err = compile(
            "@fp = global ptr @f\n\
             define void @f() {\nentry:\n  ret void\n}\n",
        )
        .unwrap_err();
        assert_eq!(
            err.category(),
            crate::core::error::ErrorCategory::UnsupportedInstruction
        );
    }
}
