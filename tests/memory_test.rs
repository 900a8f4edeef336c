//! Test the emulated memory model.
//!
//! Globals are laid out into a static data image; pointer arithmetic becomes
//! integer arithmetic and every access goes through the runtime memory class.

use lljvm::bitcode::write_module;
use lljvm::ir::layout::DataLayout;
use lljvm::ir::parser::parse_module;
use lljvm::jvm::opcodes::{self as op, Form};
use lljvm::jvm::ClassArtifact;
use lljvm::memory::{DataImage, EmulatedMemory, RelocTarget};
use lljvm::{MemoryError, PipelineConfig, Translator};

fn translate(text: &str) -> ClassArtifact {
    let _ = env_logger::builder().is_test(true).try_init();
    let bytes = write_module(&parse_module(text).unwrap());
    Translator::new(PipelineConfig::default())
        .translate(&bytes)
        .unwrap()
        .artifact
}

/// Names of the runtime members invoked by `code`, in order.
fn invoked(class: &ClassArtifact, name: &str) -> Vec<String> {
    let code = &class.method(name).unwrap().code;
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let info = op::info(code[pc]).unwrap();
        if code[pc] == op::INVOKESTATIC {
            let index = u16::from_be_bytes([code[pc + 1], code[pc + 2]]);
            out.push(class.pool.member_at(index).unwrap().name.to_string());
        }
        pc += match info.form {
            Form::Simple => 1,
            Form::Local => 2,
            Form::Immediate if code[pc] == op::BIPUSH => 2,
            Form::Constant if code[pc] == op::LDC => 2,
            Form::Immediate | Form::Constant | Form::Branch | Form::Member => 3,
            Form::BranchWide => 5,
        };
    }
    out
}

#[test]
fn arena_accesses_are_bounds_checked() {
    let mut memory = EmulatedMemory::new();
    let a = memory.allocate(4, 4).unwrap();
    memory.write_uint(a, 0xdead_beef, 4).unwrap();
    assert_eq!(memory.read_uint(a, 4).unwrap(), 0xdead_beef);
    assert!(matches!(
        memory.read(a + 2, 4),
        Err(MemoryError::OutOfBounds { .. })
    ));
}

#[test]
fn data_image_records_pointer_relocations() {
    let module = parse_module(
        "@a = global i32 5\n@pair = global { i8, ptr } { i8 1, ptr @a }\n",
    )
    .unwrap();
    let image = DataImage::build(&module, &DataLayout::default()).unwrap();
    assert_eq!(image.addresses.len(), 2);
    let reloc = image.relocations[0];
    assert_eq!(reloc.target, RelocTarget::Global(lljvm::ir::GlobalId(0)));
    // The pointer field sits after the i8, at the 4-byte aligned offset.
    assert_eq!(reloc.offset, image.addresses[1] + 4);
}

#[test]
fn gep_folds_constant_offsets() {
    let class = translate(
        "define i32 @third(ptr %p) {\nentry:\n  \
         %q = getelementptr [8 x i32], ptr %p, i32 0, i32 3\n  \
         %v = load i32, ptr %q\n  ret i32 %v\n}\n",
    );
    let code = &class.method("third").unwrap().code;
    // iload_0, bipush 12, iadd, invokestatic load_i32, ireturn
    assert_eq!(code[..4], [op::ILOAD_0, op::BIPUSH, 12, op::IADD]);
    assert_eq!(invoked(&class, "third"), vec!["load_i32"]);
}

#[test]
fn gep_scales_variable_indices() {
    let class = translate(
        "define i64 @at(ptr %p, i64 %i) {\nentry:\n  \
         %q = getelementptr i64, ptr %p, i64 %i\n  %v = load i64, ptr %q\n  ret i64 %v\n}\n",
    );
    let code = &class.method("at").unwrap().code;
    assert!(code.contains(&op::L2I));
    assert!(code.contains(&op::IMUL));
    assert_eq!(invoked(&class, "at"), vec!["load_i64"]);
}

#[test]
fn stores_pass_address_then_value() {
    let class = translate(
        "define void @put(ptr %p, i16 %v) {\nentry:\n  store i16 %v, ptr %p\n  ret void\n}\n",
    );
    let code = &class.method("put").unwrap().code;
    assert_eq!(code[..3], [op::ILOAD_0, op::ILOAD_1, op::INVOKESTATIC]);
    let index = u16::from_be_bytes([code[3], code[4]]);
    assert_eq!(class.pool.member_at(index).unwrap().descriptor, "(IS)V");
}

#[test]
fn alloca_uses_the_runtime_stack() {
    let class = translate(
        "define i32 @local(i32 %x) {\nentry:\n  %p = alloca i32\n  store i32 %x, ptr %p\n  \
         %v = load i32, ptr %p\n  ret i32 %v\n}\n",
    );
    assert_eq!(
        invoked(&class, "local"),
        vec!["createStackFrame", "allocateStack", "store", "load_i32", "destroyStackFrame"]
    );
}

#[test]
fn globals_are_published_by_the_static_initializer() {
    let class = translate(
        "@msg = constant [6 x i8] c\"hello\\00\"\n@count = global i32 0\n\
         define ptr @message() {\nentry:\n  ret ptr @msg\n}\n",
    );
    assert!(class.field("msg").is_some());
    assert!(class.field("count").is_some());
    let calls = invoked(&class, "<clinit>");
    assert_eq!(calls[0], "allocateData");
    assert!(calls.contains(&"loadImage".to_string()));
    let message = &class.method("message").unwrap().code;
    assert_eq!(message[0], op::GETSTATIC);
}

#[test]
fn zero_initialized_gigabyte_global_stays_sparse() {
    let class = translate(
        "@big = global [1073741824 x i8] zeroinitializer\n@seed = global i32 7\n\
         define i32 @read_seed() {\nentry:\n  %v = load i32, ptr @seed\n  ret i32 %v\n}\n",
    );
    let calls = invoked(&class, "<clinit>");
    assert_eq!(calls[0], "allocateData");
    // Only the page holding @seed carries non-zero bytes.
    assert_eq!(calls.iter().filter(|c| *c == "loadImage").count(), 1);
    let bytes = class.to_bytes().unwrap();
    assert!(bytes.len() < 64 * 1024, "class file is {} bytes", bytes.len());
    println!("✅ 1 GiB of zeroes in a {} byte class", bytes.len());
}

#[test]
fn oversized_data_segment_fails_before_allocating() {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(
        "@big = global [3221225472 x i8] zeroinitializer\n\
         define void @f() {\nentry:\n  ret void\n}\n",
    )
    .unwrap();
    let started = std::time::Instant::now();
    let err = Translator::new(PipelineConfig::default())
        .translate(&write_module(&module))
        .unwrap_err();
    assert!(
        matches!(err, lljvm::TranslateError::Memory(MemoryError::Exhausted { .. })),
        "{err:?}"
    );
    assert!(started.elapsed().as_secs() < 5);
}
