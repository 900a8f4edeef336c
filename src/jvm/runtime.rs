// This module fixes the contract between generated classes and the Java-side runtime.
// The emulated memory class exposes typed loads and an overloaded store, the stack
// allocator used by alloca (allocateStack bracketed by createStackFrame and
// destroyStackFrame) and the data segment entry points used by the static initializer
// (allocateData, loadImage). The numeric intrinsic table lists the helper routines
// provided by the embedded interpreter with their fixed IR signatures; a declaration
// that shares a name with an intrinsic must match its signature exactly. The JDK
// helpers for unsigned arithmetic and raw float bit casts live here as well so that
// every external name the backend emits is declared in one place.

//! Runtime classes and members referenced by generated code.

use crate::ir::{Function, TypeClass, TypeTable};

/// A static method of a runtime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeMethod {
    pub name: &'static str,
    pub descriptor: &'static str,
}

const fn method(name: &'static str, descriptor: &'static str) -> RuntimeMethod {
    RuntimeMethod { name, descriptor }
}

pub const ALLOCATE_STACK: RuntimeMethod = method("allocateStack", "(I)I");
pub const CREATE_STACK_FRAME: RuntimeMethod = method("createStackFrame", "()V");
pub const DESTROY_STACK_FRAME: RuntimeMethod = method("destroyStackFrame", "()V");
pub const ALLOCATE_DATA: RuntimeMethod = method("allocateData", "(I)I");
pub const LOAD_IMAGE: RuntimeMethod = method("loadImage", "(ILjava/lang/String;)V");

/// Typed load from emulated memory; `i1` is loaded as a byte.
pub fn load_accessor(class: TypeClass) -> Option<RuntimeMethod> {
    Some(match class {
        TypeClass::I1 | TypeClass::I8 => method("load_i8", "(I)B"),
        TypeClass::I16 => method("load_i16", "(I)S"),
        TypeClass::I32 | TypeClass::Ptr => method("load_i32", "(I)I"),
        TypeClass::I64 => method("load_i64", "(I)J"),
        TypeClass::F32 => method("load_f32", "(I)F"),
        TypeClass::F64 => method("load_f64", "(I)D"),
        _ => return None,
    })
}

/// Typed store into emulated memory: `store(address, value)`.
pub fn store_accessor(class: TypeClass) -> Option<RuntimeMethod> {
    Some(match class {
        TypeClass::I1 | TypeClass::I8 => method("store", "(IB)V"),
        TypeClass::I16 => method("store", "(IS)V"),
        TypeClass::I32 | TypeClass::Ptr => method("store", "(II)V"),
        TypeClass::I64 => method("store", "(IJ)V"),
        TypeClass::F32 => method("store", "(IF)V"),
        TypeClass::F64 => method("store", "(ID)V"),
        _ => return None,
    })
}

pub const INTEGER_CLASS: &str = "java/lang/Integer";
pub const LONG_CLASS: &str = "java/lang/Long";
pub const FLOAT_CLASS: &str = "java/lang/Float";
pub const DOUBLE_CLASS: &str = "java/lang/Double";
pub const MATH_CLASS: &str = "java/lang/Math";

/// Unsigned `divideUnsigned`, `remainderUnsigned` or `compareUnsigned` on int or long.
pub fn unsigned_helper(name: &'static str, wide: bool) -> (&'static str, RuntimeMethod) {
    match (name, wide) {
        ("compareUnsigned", false) => (INTEGER_CLASS, method(name, "(II)I")),
        ("compareUnsigned", true) => (LONG_CLASS, method(name, "(JJ)I")),
        (_, false) => (INTEGER_CLASS, method(name, "(II)I")),
        (_, true) => (LONG_CLASS, method(name, "(JJ)J")),
    }
}

/// `isNaN` on float or double.
pub fn nan_helper(double: bool) -> (&'static str, RuntimeMethod) {
    if double {
        (DOUBLE_CLASS, method("isNaN", "(D)Z"))
    } else {
        (FLOAT_CLASS, method("isNaN", "(F)Z"))
    }
}

pub fn abs_helper(double: bool) -> (&'static str, RuntimeMethod) {
    if double {
        (MATH_CLASS, method("abs", "(D)D"))
    } else {
        (MATH_CLASS, method("abs", "(F)F"))
    }
}

pub const FLOAT_TO_BITS: RuntimeMethod = method("floatToRawIntBits", "(F)I");
pub const BITS_TO_FLOAT: RuntimeMethod = method("intBitsToFloat", "(I)F");
pub const DOUBLE_TO_BITS: RuntimeMethod = method("doubleToRawLongBits", "(D)J");
pub const BITS_TO_DOUBLE: RuntimeMethod = method("longBitsToDouble", "(J)D");

/// Numeric helper routine with a fixed signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsic {
    pub name: &'static str,
    pub params: &'static [TypeClass],
    pub ret: TypeClass,
}

use TypeClass::{Void, I32, I64, I8, Ptr as P};

pub const INTRINSICS: &[Intrinsic] = &[
    Intrinsic {
        name: "numba_attempt_nocopy_reshape",
        params: &[I64, P, P, I64, P, P, I64, I32],
        ret: I32,
    },
    Intrinsic {
        name: "numba_get_np_random_state",
        params: &[],
        ret: P,
    },
    Intrinsic {
        name: "numba_rnd_shuffle",
        params: &[P],
        ret: Void,
    },
    Intrinsic {
        name: "numba_xxdot",
        params: &[I8, I8, I64, P, P, P],
        ret: I32,
    },
    Intrinsic {
        name: "numba_xxgemv",
        params: &[I8, I8, I64, I64, P, P, I64, P, P, P],
        ret: I32,
    },
    Intrinsic {
        name: "numba_xxgemm",
        params: &[I8, I8, I8, I64, I64, I64, P, P, I64, P, I64, P, P, I64],
        ret: I32,
    },
];

pub fn find_intrinsic(name: &str) -> Option<&'static Intrinsic> {
    INTRINSICS.iter().find(|i| i.name == name)
}

impl Intrinsic {
    /// Whether a declaration has exactly this intrinsic's signature.
    pub fn matches(&self, types: &TypeTable, decl: &Function) -> bool {
        !decl.is_variadic()
            && types.class(decl.ret) == self.ret
            && decl.params.len() == self.params.len()
            && decl
                .params
                .iter()
                .zip(self.params)
                .all(|(p, want)| types.class(*p) == *want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser::parse_module;

    #[test]
    fn accessors_cover_every_scalar() {
        assert_eq!(load_accessor(TypeClass::I8).unwrap().descriptor, "(I)B");
        assert_eq!(load_accessor(TypeClass::Ptr).unwrap().name, "load_i32");
        assert_eq!(store_accessor(TypeClass::F64).unwrap().descriptor, "(ID)V");
        assert!(load_accessor(TypeClass::Aggregate).is_none());
        assert!(store_accessor(TypeClass::Vector).is_none());
    }

    #[test]
    fn intrinsic_signatures_are_checked() {
        let m = parse_module(
            "declare i32 @numba_xxdot(i8, i8, i64, ptr, ptr, ptr)\n\
             declare i32 @numba_rnd_shuffle(ptr)\n",
        )
        .unwrap();
        let dot = find_intrinsic("numba_xxdot").unwrap();
        assert!(dot.matches(&m.types, &m.functions[0]));
        let shuffle = find_intrinsic("numba_rnd_shuffle").unwrap();
        assert!(!shuffle.matches(&m.types, &m.functions[1]));
        assert!(find_intrinsic("printf").is_none());
    }
}
