//! The IR text form and the container agree.
//!
//! Disassembling a container and parsing the text back yields a module that
//! serializes to the same text again.

use lljvm::bitcode::{read_module, write_module};
use lljvm::ir::parser::parse_module;
use lljvm::ir::printer::print_module;

const MODULES: &[&str] = &[
    "define void @empty() {\nentry:\n  ret void\n}\n",
    "@v = global <4 x float> zeroinitializer\n\
     @s = constant { i8, i32, ptr } { i8 7, i32 -1, ptr @v }\n\
     declare i32 @ext(i32, ...)\n\
     define i32 @caller(i32 %a) {\nentry:\n  %r = call i32 @ext(i32 %a, i32 2)\n  ret i32 %r\n}\n",
    "define float @mix(i1 %c, float %a, float %b) {\n\
     entry:\n  br i1 %c, label %l, label %r\n\
     l:\n  %x = fmul float %a, 2.5\n  br label %j\n\
     r:\n  %y = fneg float %b\n  br label %j\n\
     j:\n  %p = phi float [ %x, %l ], [ %y, %r ]\n  %q = select i1 %c, float %p, float 0.0\n  ret float %q\n}\n",
];

#[test]
fn disassembly_round_trips() {
    let _ = env_logger::builder().is_test(true).try_init();
    for text in MODULES {
        let bytes = write_module(&parse_module(text).unwrap());
        let printed = lljvm::disassemble(&bytes).unwrap();
        let reparsed = parse_module(&printed).unwrap();
        let again = lljvm::disassemble(&write_module(&reparsed)).unwrap();
        assert_eq!(printed, again);
    }
    println!("✅ {} modules round-trip through text", MODULES.len());
}

#[test]
fn container_round_trip_preserves_the_module() {
    for text in MODULES {
        let module = parse_module(text).unwrap();
        let bytes = write_module(&module);
        let decoded = read_module(&bytes).unwrap();
        assert_eq!(print_module(&decoded), print_module(&module));
        assert_eq!(write_module(&decoded), bytes);
    }
}
