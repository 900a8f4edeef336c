//! Verifier diagnostics as seen through the public entry points.

use lljvm::bitcode::write_module;
use lljvm::ir::parser::parse_module;
use lljvm::ErrorCategory;

fn container(text: &str) -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    write_module(&parse_module(text).unwrap())
}

fn messages(text: &str) -> Vec<String> {
    lljvm::verify(&container(text))
        .unwrap()
        .into_iter()
        .map(|d| d.message)
        .collect()
}

#[test]
fn verify_collects_every_finding() {
    let text = "define i32 @broken(i32 %a, i64 %b) {\nentry:\n  %x = add i32 %a, %b\n}\n\
                define i32 @late(i1 %c) {\n\
                entry:\n  br i1 %c, label %a, label %b\n\
                a:\n  %x = add i32 1, 2\n  br label %b\n\
                b:\n  ret i32 %x\n}\n";
    let diags = lljvm::verify(&container(text)).unwrap();
    assert!(diags.len() >= 3, "{diags:?}");
    assert!(diags.iter().any(|d| d.message == "missing terminator"
        && d.function.as_deref() == Some("broken")));
    assert!(diags.iter().any(|d| d.message.contains("not dominated")
        && d.function.as_deref() == Some("late")));
}

#[test]
fn phi_predecessor_mismatch_is_reported() {
    let found = messages(
        "define i32 @f(i1 %c) {\n\
         entry:\n  br i1 %c, label %a, label %b\n\
         a:\n  br label %b\n\
         b:\n  %p = phi i32 [ 1, %a ]\n  ret i32 %p\n}\n",
    );
    assert!(found.iter().any(|m| m.contains("no entry for predecessor")), "{found:?}");
}

#[test]
fn duplicate_symbols_are_reported() {
    let found = messages("@x = global i32 1\n@x = global i32 2\n");
    assert!(found.iter().any(|m| m.contains("duplicate symbol @x")), "{found:?}");
}

#[test]
fn translate_fails_fast_on_the_first_finding() {
    let bytes = container(
        "define void @f() {\nentry:\n  unreachable\n  ret void\n}\n\
         define i32 @g(i32 %a, i64 %b) {\nentry:\n  %x = add i32 %a, %b\n  ret i32 %x\n}\n",
    );
    let first = lljvm::verify(&bytes).unwrap().remove(0);
    let err = lljvm::translate(&bytes).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Verification);
    assert!(err.to_string().contains(&first.message), "{err}");
}

#[test]
fn well_formed_module_has_no_findings() {
    let found = messages(
        "define i64 @fact(i64 %n) {\n\
         entry:\n  br label %loop\n\
         loop:\n  %i = phi i64 [ 1, %entry ], [ %i1, %loop ]\n  \
         %acc = phi i64 [ 1, %entry ], [ %acc1, %loop ]\n  \
         %acc1 = mul i64 %acc, %i\n  %i1 = add i64 %i, 1\n  \
         %more = icmp sle i64 %i1, %n\n  br i1 %more, label %loop, label %done\n\
         done:\n  ret i64 %acc1\n}\n",
    );
    assert!(found.is_empty(), "{found:?}");
}
