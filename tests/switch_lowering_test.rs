//! Test switch lowering.
//!
//! Switches become chains of `icmp eq` and conditional branches, one per case in
//! case order, with the last compare falling through to the default block.

use bumpalo::Bump;
use lljvm::ir::parser::parse_module;
use lljvm::ir::printer::print_module;
use lljvm::ir::{IntPredicate, Module, Opcode};
use lljvm::passes::PassManager;
use lljvm::verifier::{verify_module, Profile};
use lljvm::{CompilationSession, PassSet};

const FOUR_WAY: &str = "define i32 @classify(i32 %v) {\nentry:\n  \
    switch i32 %v, label %other [ i32 0, label %zero i32 1, label %one i32 2, label %two ]\n\
    zero:\n  ret i32 10\none:\n  ret i32 20\ntwo:\n  ret i32 30\nother:\n  ret i32 -1\n}\n";

fn lower(text: &str, passes: PassSet) -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(text).unwrap();
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    PassManager::new(passes).run(&module, &session).unwrap()
}

fn count(module: &Module, opcode: Opcode) -> usize {
    module.functions[0]
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter(|i| i.opcode == opcode)
        .count()
}

#[test]
fn four_way_switch_becomes_three_equality_branches() {
    let lowered = lower(FOUR_WAY, PassSet::LOWER_SWITCH);
    assert_eq!(count(&lowered, Opcode::Switch), 0);
    assert_eq!(count(&lowered, Opcode::ICmp), 3);
    assert_eq!(count(&lowered, Opcode::CondBr), 3);
    let predicates: Vec<_> = lowered.functions[0]
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter_map(|i| i.icmp_predicate())
        .collect();
    assert!(predicates.iter().all(|p| *p == IntPredicate::Eq));
    assert!(verify_module(&lowered, Profile::Lowered).is_empty());
    println!("✅ Lowered:\n{}", print_module(&lowered));
}

#[test]
fn empty_switch_becomes_a_branch() {
    let lowered = lower(
        "define void @f(i32 %v) {\nentry:\n  switch i32 %v, label %d [ ]\nd:\n  ret void\n}\n",
        PassSet::LOWER_SWITCH,
    );
    assert_eq!(count(&lowered, Opcode::Switch), 0);
    assert_eq!(count(&lowered, Opcode::ICmp), 0);
    assert_eq!(count(&lowered, Opcode::Br), 1);
}

#[test]
fn successor_phis_follow_the_new_predecessors() {
    let lowered = lower(
        "define i32 @f(i32 %v) {\nentry:\n  \
         switch i32 %v, label %join [ i32 1, label %join i32 2, label %two ]\n\
         two:\n  br label %join\n\
         join:\n  %p = phi i32 [ 0, %entry ], [ 2, %two ]\n  ret i32 %p\n}\n",
        PassSet::LOWER_SWITCH,
    );
    assert!(verify_module(&lowered, Profile::Lowered).is_empty(), "{}", print_module(&lowered));
}

#[test]
fn lowering_is_a_no_op_without_switches() {
    let text = "define i32 @id(i32 %x) {\nentry:\n  ret i32 %x\n}\n";
    let original = parse_module(text).unwrap();
    let lowered = lower(text, PassSet::LOWER_SWITCH);
    assert_eq!(print_module(&lowered), print_module(&original));
}

#[test]
fn lowering_is_idempotent() {
    let once = lower(FOUR_WAY, PassSet::all());
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let twice = PassManager::new(PassSet::all()).run(&once, &session).unwrap();
    assert_eq!(print_module(&once), print_module(&twice));
}
