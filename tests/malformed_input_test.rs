//! Hostile container input.
//!
//! Truncated or corrupted containers must be rejected with an error; no byte
//! sequence may make the loader, verifier or backend panic.

use lljvm::bitcode::write_module;
use lljvm::ir::parser::parse_module;
use lljvm::{ErrorCategory, ParseError};

const SAMPLE: &str = "@table = global [3 x i32] [ i32 1, i32 2, i32 3 ]\n\
    define i32 @sum(ptr %p, i32 %n) {\n\
    entry:\n  br label %loop\n\
    loop:\n  %i = phi i32 [ 0, %entry ], [ %next, %loop ]\n  \
    %acc = phi i32 [ 0, %entry ], [ %total, %loop ]\n  \
    %q = getelementptr i32, ptr %p, i32 %i\n  %v = load i32, ptr %q\n  \
    %total = add i32 %acc, %v\n  %next = add i32 %i, 1\n  \
    %done = icmp sge i32 %next, %n\n  br i1 %done, label %exit, label %loop\n\
    exit:\n  ret i32 %total\n}\n";

fn sample() -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    write_module(&parse_module(SAMPLE).unwrap())
}

#[test]
fn sample_is_accepted() {
    let bytes = sample();
    assert!(lljvm::verify(&bytes).unwrap().is_empty());
    lljvm::translate(&bytes).unwrap();
}

#[test]
fn every_truncation_is_a_parse_error() {
    let bytes = sample();
    for len in 0..bytes.len() {
        let cut = &bytes[..len];
        let err = lljvm::translate(cut).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Parse, "prefix of {len} bytes");
        assert!(lljvm::verify(cut).is_err(), "prefix of {len} bytes");
    }
    println!("✅ {} truncations rejected", bytes.len());
}

#[test]
fn corrupted_bytes_never_panic() {
    let bytes = sample();
    let mut rejected = 0;
    for i in 0..bytes.len() {
        for mask in [0xff, 0x80, 0x01] {
            let mut corrupt = bytes.clone();
            corrupt[i] ^= mask;
            // Either outcome is fine as long as the pipeline returns.
            if lljvm::translate(&corrupt).is_err() {
                rejected += 1;
            }
            let _ = lljvm::verify(&corrupt);
        }
    }
    assert!(rejected > 0);
    println!("✅ {rejected} corrupted containers rejected without panicking");
}

#[test]
fn header_corruption_is_classified() {
    let mut bytes = sample();
    bytes[0] ^= 0xff;
    assert_eq!(lljvm::verify(&bytes), Err(ParseError::BadMagic));

    let mut bytes = sample();
    bytes[4] = 9;
    assert_eq!(lljvm::verify(&bytes), Err(ParseError::UnsupportedVersion(9)));

    let mut bytes = sample();
    bytes.extend_from_slice(&[0, 0]);
    assert!(matches!(
        lljvm::translate(&bytes).unwrap_err().category(),
        ErrorCategory::Parse
    ));
}

#[test]
fn arbitrary_noise_is_rejected() {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for _ in 0..200 {
        let len = (state % 64) as usize;
        let mut noise = Vec::with_capacity(len + 8);
        noise.extend_from_slice(b"LLIR\x01\x00");
        for _ in 0..len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            noise.push(state as u8);
        }
        let _ = lljvm::translate(&noise);
        let _ = lljvm::verify(&noise);
    }
}

#[test]
fn aggregate_larger_than_the_address_space_is_a_diagnostic() {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(
        "@g = global { [2305843009213693952 x i64], i64 } zeroinitializer\n\
         define void @f() {\nentry:\n  ret void\n}\n",
    )
    .unwrap();
    let bytes = write_module(&module);

    let diags = lljvm::verify(&bytes).unwrap();
    assert_eq!(diags.len(), 1, "{diags:?}");
    assert!(diags[0].message.contains("@g"));
    assert!(diags[0].message.contains("address space"));

    let err = lljvm::translate(&bytes).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Verification);
    println!("✅ oversized aggregate rejected: {err}");
}

#[test]
fn oversized_alloca_is_a_diagnostic() {
    let _ = env_logger::builder().is_test(true).try_init();
    let module = parse_module(
        "define void @f() {\nentry:\n  %p = alloca [4294967296 x i32]\n  ret void\n}\n",
    )
    .unwrap();
    let err = lljvm::translate(&write_module(&module)).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Verification);
    assert!(err.to_string().contains("alloca"));
}
