//! End-to-end translation scenarios.
//!
//! Each test writes a small module in IR text form, encodes it into the binary
//! container and runs the full pipeline on it.

use lljvm::bitcode::write_module;
use lljvm::ir::parser::parse_module;
use lljvm::jvm::opcodes as op;
use lljvm::jvm::{verify_method, ClassArtifact};
use lljvm::{ErrorCategory, PipelineConfig, TranslateError, Translator};

fn container(text: &str) -> Vec<u8> {
    write_module(&parse_module(text).expect("test IR parses"))
}

fn translate(text: &str) -> Result<ClassArtifact, TranslateError> {
    let _ = env_logger::builder().is_test(true).try_init();
    Translator::new(PipelineConfig::default())
        .translate(&container(text))
        .map(|t| t.artifact)
}

#[test]
fn scenario_a_add_two_ints() {
    let class = translate(
        "define i32 @add(i32 %a, i32 %b) {\nentry:\n  %s = add i32 %a, %b\n  ret i32 %s\n}\n",
    )
    .unwrap();

    assert_eq!(class.methods.len(), 1);
    let add = class.method("add").unwrap();
    assert_eq!(add.descriptor, "(II)I");
    assert_eq!(add.max_locals, 2);
    assert_eq!(add.max_stack, 2);
    assert_eq!(add.code, vec![op::ILOAD_0, op::ILOAD_1, op::IADD, op::IRETURN]);
    println!("✅ add(i32, i32) -> {:02x?}", add.code);
}

#[test]
fn scenario_b_four_way_switch() {
    let class = translate(
        "define i32 @classify(i32 %v) {\nentry:\n  \
         switch i32 %v, label %other [ i32 0, label %zero i32 1, label %one i32 2, label %two ]\n\
         zero:\n  ret i32 10\none:\n  ret i32 20\ntwo:\n  ret i32 30\nother:\n  ret i32 -1\n}\n",
    )
    .unwrap();

    let code = &class.method("classify").unwrap().code;
    let compares = code
        .iter()
        .filter(|b| matches!(**b, op::IF_ICMPEQ | op::IF_ICMPNE))
        .count();
    assert!(compares >= 3, "expected a chain of equality tests in {code:02x?}");
    // No tableswitch (0xaa) or lookupswitch (0xab).
    assert!(!code.contains(&0xaa) && !code.contains(&0xab));
}

#[test]
fn scenario_c_load_through_pointer() {
    let class = translate(
        "define i32 @deref(ptr %p) {\nentry:\n  %v = load i32, ptr %p\n  ret i32 %v\n}\n",
    )
    .unwrap();

    let method = class.method("deref").unwrap();
    assert_eq!(method.code[..2], [op::ILOAD_0, op::INVOKESTATIC]);
    let index = u16::from_be_bytes([method.code[2], method.code[3]]);
    let member = class.pool.member_at(index).unwrap();
    assert_eq!(member.class, "lljvm/runtime/Memory");
    assert_eq!(member.name, "load_i32");
    assert_eq!(member.descriptor, "(I)I");
    assert_eq!(method.code[4], op::IRETURN);
}

#[test]
fn scenario_d_corrupted_signature() {
    let mut bytes = container("define void @f() {\nentry:\n  ret void\n}\n");
    bytes[0] ^= 0xff;

    let translator = Translator::default();
    let err = translator.translate(&bytes).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Parse);
    assert!(translator.verify(&bytes).is_err());
    assert!(lljvm::verify(&bytes).is_err());
}

#[test]
fn every_emitted_method_reverifies() {
    let class = translate(
        "@table = global [4 x i32] [ i32 1, i32 2, i32 3, i32 4 ]\n\
         define i64 @mix(i64 %a, double %d, i8 %b) {\nentry:\n  \
         %w = sext i8 %b to i64\n  %s = add i64 %a, %w\n  %f = fptosi double %d to i64\n  \
         %m = mul i64 %s, %f\n  %c = icmp ult i64 %m, 100\n  br i1 %c, label %small, label %big\n\
         small:\n  ret i64 %m\nbig:\n  %h = lshr i64 %m, 3\n  ret i64 %h\n}\n\
         define float @scale(float %x) {\nentry:\n  %y = fmul float %x, 2.5\n  \
         %n = fneg float %y\n  ret float %n\n}\n",
    )
    .unwrap();

    assert!(class.has_static_initializer());
    for method in &class.methods {
        verify_method(&class.pool, method).unwrap();
    }
}

#[test]
fn unsupported_vector_is_reported() {
    let err = translate(
        "define void @v(ptr %p) {\nentry:\n  %x = load <4 x i32>, ptr %p\n  ret void\n}\n",
    )
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::UnsupportedInstruction);
    assert!(err.to_string().contains("@v"));
}

#[test]
fn calls_resolve_to_class_intrinsic_and_extern() {
    let class = translate(
        "declare i32 @numba_xxdot(i8, i8, i64, ptr, ptr, ptr)\n\
         declare void @log_value(i32)\n\
         define i32 @twice(i32 %x) {\nentry:\n  %y = add i32 %x, %x\n  ret i32 %y\n}\n\
         define i32 @driver(ptr %a) {\nentry:\n  \
         %r = call i32 @numba_xxdot(i8 1, i8 0, i64 4, ptr %a, ptr %a, ptr %a)\n  \
         call void @log_value(i32 %r)\n  %t = call i32 @twice(i32 %r)\n  ret i32 %t\n}\n",
    )
    .unwrap();

    let config = PipelineConfig::default();
    let code = &class.method("driver").unwrap().code;
    let mut owners = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        if code[pc] == op::INVOKESTATIC {
            let index = u16::from_be_bytes([code[pc + 1], code[pc + 2]]);
            owners.push(class.pool.member_at(index).unwrap().class.to_string());
            pc += 3;
        } else {
            pc += 1;
        }
    }
    assert!(owners.contains(&config.intrinsic_class));
    assert!(owners.contains(&config.extern_class));
    assert!(owners.contains(&config.class_name));
}

#[test]
fn signed_bool_compares_see_true_as_minus_one() {
    let mut text = String::new();
    for pred in ["slt", "sle", "sgt", "sge"] {
        text.push_str(&format!(
            "define i1 @b_{pred}(i1 %a, i1 %b) {{\nentry:\n  %c = icmp {pred} i1 %a, %b\n  ret i1 %c\n}}\n"
        ));
    }
    let class = translate(&text).unwrap();

    for pred in ["slt", "sle", "sgt", "sge"] {
        let method = class.method(&format!("b_{pred}")).unwrap();
        verify_method(&class.pool, method).unwrap();
        // true < false as signed i1, so both sides are negated before comparing.
        assert_eq!(
            method.code[..4],
            [op::ILOAD_0, op::INEG, op::ILOAD_1, op::INEG],
            "icmp {pred} i1 -> {:02x?}",
            method.code
        );
    }
    println!("✅ signed i1 predicates negate their operands");
}

#[test]
fn every_float_predicate_translates_and_reverifies() {
    let preds = [
        "false", "oeq", "ogt", "oge", "olt", "ole", "one", "ord", "uno", "ueq", "ugt", "uge",
        "ult", "ule", "une", "true",
    ];
    let mut text = String::new();
    for pred in preds {
        for ty in ["float", "double"] {
            text.push_str(&format!(
                "define i1 @{ty}_{pred}({ty} %a, {ty} %b) {{\nentry:\n  %c = fcmp {pred} {ty} %a, %b\n  ret i1 %c\n}}\n"
            ));
        }
    }
    let class = translate(&text).unwrap();

    assert_eq!(class.methods.len(), preds.len() * 2);
    for method in &class.methods {
        verify_method(&class.pool, method).unwrap();
    }
    let uno = class.method("double_uno").unwrap();
    let index = u16::from_be_bytes([uno.code[2], uno.code[3]]);
    let member = class.pool.member_at(index).unwrap();
    assert_eq!(
        (member.class, member.name, member.descriptor),
        ("java/lang/Double", "isNaN", "(D)Z")
    );
    println!("✅ {} fcmp methods reverified", class.methods.len());
}
