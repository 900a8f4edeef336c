// This module defines the IR instruction set: the Opcode enum (terminators, integer and
// float arithmetic, comparisons, casts, memory operations, phi/select/call) together
// with the integer and floating-point comparison predicates. Every enum carries an
// explicit u8 discriminant so the binary container can store it as a single byte;
// num_enum derives the checked byte -> enum conversion used by the loader, so an
// unknown byte surfaces as a parse error instead of undefined behavior. Opcode::info
// returns static metadata (mnemonic, category, terminator flag) that the printer,
// parser, verifier and lowering passes share, mirroring the table-driven style of the
// test IR operation descriptors.

//! Opcodes and comparison predicates.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// IR instruction opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // Terminators
    Ret = 1,
    Br = 2,
    CondBr = 3,
    Switch = 4,
    Unreachable = 5,

    // Integer arithmetic
    Add = 16,
    Sub = 17,
    Mul = 18,
    SDiv = 19,
    UDiv = 20,
    SRem = 21,
    URem = 22,
    And = 23,
    Or = 24,
    Xor = 25,
    Shl = 26,
    LShr = 27,
    AShr = 28,

    // Float arithmetic
    FAdd = 32,
    FSub = 33,
    FMul = 34,
    FDiv = 35,
    FRem = 36,
    FNeg = 37,

    // Comparisons
    ICmp = 48,
    FCmp = 49,

    // Casts
    Trunc = 64,
    ZExt = 65,
    SExt = 66,
    FPTrunc = 67,
    FPExt = 68,
    FPToSI = 69,
    FPToUI = 70,
    SIToFP = 71,
    UIToFP = 72,
    PtrToInt = 73,
    IntToPtr = 74,
    Bitcast = 75,

    // Memory
    Alloca = 96,
    Load = 97,
    Store = 98,
    GetElementPtr = 99,

    // Other
    Phi = 112,
    Select = 113,
    Call = 114,
}

/// Broad grouping of opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCategory {
    Terminator,
    IntBinary,
    FloatBinary,
    FloatUnary,
    Compare,
    Cast,
    Memory,
    Other,
}

/// Static opcode metadata.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub category: OpCategory,
}

impl Opcode {
    pub const ALL: [Opcode; 45] = [
        Opcode::Ret,
        Opcode::Br,
        Opcode::CondBr,
        Opcode::Switch,
        Opcode::Unreachable,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::SDiv,
        Opcode::UDiv,
        Opcode::SRem,
        Opcode::URem,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::LShr,
        Opcode::AShr,
        Opcode::FAdd,
        Opcode::FSub,
        Opcode::FMul,
        Opcode::FDiv,
        Opcode::FRem,
        Opcode::FNeg,
        Opcode::ICmp,
        Opcode::FCmp,
        Opcode::Trunc,
        Opcode::ZExt,
        Opcode::SExt,
        Opcode::FPTrunc,
        Opcode::FPExt,
        Opcode::FPToSI,
        Opcode::FPToUI,
        Opcode::SIToFP,
        Opcode::UIToFP,
        Opcode::PtrToInt,
        Opcode::IntToPtr,
        Opcode::Bitcast,
        Opcode::Alloca,
        Opcode::Load,
        Opcode::Store,
        Opcode::GetElementPtr,
        Opcode::Phi,
        Opcode::Select,
        Opcode::Call,
    ];

    pub const fn info(self) -> OpInfo {
        use OpCategory::*;
        use Opcode::*;
        let (name, category) = match self {
            Ret => ("ret", Terminator),
            Br => ("br", Terminator),
            CondBr => ("br", Terminator),
            Switch => ("switch", Terminator),
            Unreachable => ("unreachable", Terminator),
            Add => ("add", IntBinary),
            Sub => ("sub", IntBinary),
            Mul => ("mul", IntBinary),
            SDiv => ("sdiv", IntBinary),
            UDiv => ("udiv", IntBinary),
            SRem => ("srem", IntBinary),
            URem => ("urem", IntBinary),
            And => ("and", IntBinary),
            Or => ("or", IntBinary),
            Xor => ("xor", IntBinary),
            Shl => ("shl", IntBinary),
            LShr => ("lshr", IntBinary),
            AShr => ("ashr", IntBinary),
            FAdd => ("fadd", FloatBinary),
            FSub => ("fsub", FloatBinary),
            FMul => ("fmul", FloatBinary),
            FDiv => ("fdiv", FloatBinary),
            FRem => ("frem", FloatBinary),
            FNeg => ("fneg", FloatUnary),
            ICmp => ("icmp", Compare),
            FCmp => ("fcmp", Compare),
            Trunc => ("trunc", Cast),
            ZExt => ("zext", Cast),
            SExt => ("sext", Cast),
            FPTrunc => ("fptrunc", Cast),
            FPExt => ("fpext", Cast),
            FPToSI => ("fptosi", Cast),
            FPToUI => ("fptoui", Cast),
            SIToFP => ("sitofp", Cast),
            UIToFP => ("uitofp", Cast),
            PtrToInt => ("ptrtoint", Cast),
            IntToPtr => ("inttoptr", Cast),
            Bitcast => ("bitcast", Cast),
            Alloca => ("alloca", Memory),
            Load => ("load", Memory),
            Store => ("store", Memory),
            GetElementPtr => ("getelementptr", Memory),
            Phi => ("phi", Other),
            Select => ("select", Other),
            Call => ("call", Other),
        };
        OpInfo { name, category }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_terminator(self) -> bool {
        matches!(self.info().category, OpCategory::Terminator)
    }

    pub fn is_cast(self) -> bool {
        matches!(self.info().category, OpCategory::Cast)
    }

    /// Look up a mnemonic. `br` resolves to the unconditional form; the
    /// parser decides on the conditional form from the operand shape.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Whether the instruction may have effects beyond producing its result.
    pub fn has_side_effects(self) -> bool {
        matches!(self, Opcode::Store | Opcode::Call | Opcode::Alloca) || self.is_terminator()
    }
}

/// Integer comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum IntPredicate {
    Eq = 0,
    Ne = 1,
    Ugt = 2,
    Uge = 3,
    Ult = 4,
    Ule = 5,
    Sgt = 6,
    Sge = 7,
    Slt = 8,
    Sle = 9,
}

impl IntPredicate {
    pub const ALL: [IntPredicate; 10] = [
        IntPredicate::Eq,
        IntPredicate::Ne,
        IntPredicate::Ugt,
        IntPredicate::Uge,
        IntPredicate::Ult,
        IntPredicate::Ule,
        IntPredicate::Sgt,
        IntPredicate::Sge,
        IntPredicate::Slt,
        IntPredicate::Sle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IntPredicate::Eq => "eq",
            IntPredicate::Ne => "ne",
            IntPredicate::Ugt => "ugt",
            IntPredicate::Uge => "uge",
            IntPredicate::Ult => "ult",
            IntPredicate::Ule => "ule",
            IntPredicate::Sgt => "sgt",
            IntPredicate::Sge => "sge",
            IntPredicate::Slt => "slt",
            IntPredicate::Sle => "sle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            IntPredicate::Ugt | IntPredicate::Uge | IntPredicate::Ult | IntPredicate::Ule
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, IntPredicate::Eq | IntPredicate::Ne)
    }
}

/// Floating-point comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FloatPredicate {
    False = 0,
    Oeq = 1,
    Ogt = 2,
    Oge = 3,
    Olt = 4,
    Ole = 5,
    One = 6,
    Ord = 7,
    Uno = 8,
    Ueq = 9,
    Ugt = 10,
    Uge = 11,
    Ult = 12,
    Ule = 13,
    Une = 14,
    True = 15,
}

impl FloatPredicate {
    pub const ALL: [FloatPredicate; 16] = [
        FloatPredicate::False,
        FloatPredicate::Oeq,
        FloatPredicate::Ogt,
        FloatPredicate::Oge,
        FloatPredicate::Olt,
        FloatPredicate::Ole,
        FloatPredicate::One,
        FloatPredicate::Ord,
        FloatPredicate::Uno,
        FloatPredicate::Ueq,
        FloatPredicate::Ugt,
        FloatPredicate::Uge,
        FloatPredicate::Ult,
        FloatPredicate::Ule,
        FloatPredicate::Une,
        FloatPredicate::True,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FloatPredicate::False => "false",
            FloatPredicate::Oeq => "oeq",
            FloatPredicate::Ogt => "ogt",
            FloatPredicate::Oge => "oge",
            FloatPredicate::Olt => "olt",
            FloatPredicate::Ole => "ole",
            FloatPredicate::One => "one",
            FloatPredicate::Ord => "ord",
            FloatPredicate::Uno => "uno",
            FloatPredicate::Ueq => "ueq",
            FloatPredicate::Ugt => "ugt",
            FloatPredicate::Uge => "uge",
            FloatPredicate::Ult => "ult",
            FloatPredicate::Ule => "ule",
            FloatPredicate::Une => "une",
            FloatPredicate::True => "true",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_byte_roundtrip() {
        for op in Opcode::ALL {
            let byte: u8 = op.into();
            assert_eq!(Opcode::try_from(byte).ok(), Some(op));
        }
        assert!(Opcode::try_from(0u8).is_err());
        assert!(Opcode::try_from(200u8).is_err());
    }

    #[test]
    fn mnemonics_resolve() {
        assert_eq!(Opcode::from_name("getelementptr"), Some(Opcode::GetElementPtr));
        assert_eq!(Opcode::from_name("br"), Some(Opcode::Br));
        assert_eq!(Opcode::from_name("bogus"), None);
        assert_eq!(IntPredicate::from_name("sle"), Some(IntPredicate::Sle));
        assert_eq!(FloatPredicate::from_name("une"), Some(FloatPredicate::Une));
    }

    #[test]
    fn terminators() {
        assert!(Opcode::Switch.is_terminator());
        assert!(Opcode::Unreachable.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }
}
