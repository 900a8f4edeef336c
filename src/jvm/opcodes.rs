// This module is the JVM instruction table shared by the code generator, the bytecode
// encoder and the re-verifier. Opcode bytes are plain constants; OpInfo describes the
// subset of the instruction set the backend emits: the mnemonic, the operand layout
// class (no operands, local index, immediate, constant pool reference, branch offset)
// and, for instructions with a fixed stack signature, the verification types popped and
// pushed. Long and double values count as two operand stack slots, which is what the
// stack-depth computations need.

//! JVM opcodes and their stack signatures.

pub const NOP: u8 = 0x00;
pub const ACONST_NULL: u8 = 0x01;
pub const ICONST_M1: u8 = 0x02;
pub const ICONST_0: u8 = 0x03;
pub const ICONST_1: u8 = 0x04;
pub const ICONST_5: u8 = 0x08;
pub const LCONST_0: u8 = 0x09;
pub const LCONST_1: u8 = 0x0a;
pub const FCONST_0: u8 = 0x0b;
pub const FCONST_1: u8 = 0x0c;
pub const FCONST_2: u8 = 0x0d;
pub const DCONST_0: u8 = 0x0e;
pub const DCONST_1: u8 = 0x0f;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const LDC: u8 = 0x12;
pub const LDC_W: u8 = 0x13;
pub const LDC2_W: u8 = 0x14;

pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ILOAD_0: u8 = 0x1a;
pub const ILOAD_1: u8 = 0x1b;
pub const DLOAD_3: u8 = 0x29;
pub const ISTORE: u8 = 0x36;
pub const LSTORE: u8 = 0x37;
pub const FSTORE: u8 = 0x38;
pub const DSTORE: u8 = 0x39;
pub const ISTORE_0: u8 = 0x3b;
pub const DSTORE_3: u8 = 0x4a;

pub const POP: u8 = 0x57;
pub const POP2: u8 = 0x58;

pub const IADD: u8 = 0x60;
pub const LADD: u8 = 0x61;
pub const FADD: u8 = 0x62;
pub const DADD: u8 = 0x63;
pub const ISUB: u8 = 0x64;
pub const LSUB: u8 = 0x65;
pub const FSUB: u8 = 0x66;
pub const DSUB: u8 = 0x67;
pub const IMUL: u8 = 0x68;
pub const LMUL: u8 = 0x69;
pub const FMUL: u8 = 0x6a;
pub const DMUL: u8 = 0x6b;
pub const IDIV: u8 = 0x6c;
pub const LDIV: u8 = 0x6d;
pub const FDIV: u8 = 0x6e;
pub const DDIV: u8 = 0x6f;
pub const IREM: u8 = 0x70;
pub const LREM: u8 = 0x71;
pub const FREM: u8 = 0x72;
pub const DREM: u8 = 0x73;
pub const INEG: u8 = 0x74;
pub const LNEG: u8 = 0x75;
pub const FNEG: u8 = 0x76;
pub const DNEG: u8 = 0x77;
pub const ISHL: u8 = 0x78;
pub const LSHL: u8 = 0x79;
pub const ISHR: u8 = 0x7a;
pub const LSHR: u8 = 0x7b;
pub const IUSHR: u8 = 0x7c;
pub const LUSHR: u8 = 0x7d;
pub const IAND: u8 = 0x7e;
pub const LAND: u8 = 0x7f;
pub const IOR: u8 = 0x80;
pub const LOR: u8 = 0x81;
pub const IXOR: u8 = 0x82;
pub const LXOR: u8 = 0x83;

pub const I2L: u8 = 0x85;
pub const I2F: u8 = 0x86;
pub const I2D: u8 = 0x87;
pub const L2I: u8 = 0x88;
pub const L2F: u8 = 0x89;
pub const L2D: u8 = 0x8a;
pub const F2I: u8 = 0x8b;
pub const F2L: u8 = 0x8c;
pub const F2D: u8 = 0x8d;
pub const D2I: u8 = 0x8e;
pub const D2L: u8 = 0x8f;
pub const D2F: u8 = 0x90;
pub const I2B: u8 = 0x91;
pub const I2S: u8 = 0x93;

pub const LCMP: u8 = 0x94;
pub const FCMPL: u8 = 0x95;
pub const FCMPG: u8 = 0x96;
pub const DCMPL: u8 = 0x97;
pub const DCMPG: u8 = 0x98;

pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IFLT: u8 = 0x9b;
pub const IFGE: u8 = 0x9c;
pub const IFGT: u8 = 0x9d;
pub const IFLE: u8 = 0x9e;
pub const IF_ICMPEQ: u8 = 0x9f;
pub const IF_ICMPNE: u8 = 0xa0;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ICMPGE: u8 = 0xa2;
pub const IF_ICMPGT: u8 = 0xa3;
pub const IF_ICMPLE: u8 = 0xa4;
pub const GOTO: u8 = 0xa7;

pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const INVOKESTATIC: u8 = 0xb8;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;
pub const GOTO_W: u8 = 0xc8;

/// Verification type of an operand stack entry or local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VType {
    Int,
    Float,
    Long,
    Double,
    /// `null` (the only reference the backend produces).
    Ref,
}

impl VType {
    /// Operand stack slots taken by a value of this type.
    pub fn size(self) -> u16 {
        match self {
            VType::Long | VType::Double => 2,
            _ => 1,
        }
    }
}

/// Operand layout of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    /// No operands.
    Simple,
    /// One local variable index byte (`wide` extends it to two).
    Local,
    /// `bipush` (1 byte) or `sipush` (2 bytes) immediate.
    Immediate,
    /// Constant pool index: one byte for `ldc`, two otherwise.
    Constant,
    /// Signed 16-bit branch offset.
    Branch,
    /// Signed 32-bit branch offset.
    BranchWide,
    /// Two-byte constant pool index of a method or field.
    Member,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    pub form: Form,
    pub pops: &'static [VType],
    pub pushes: &'static [VType],
}

impl OpInfo {
    pub fn pop_slots(&self) -> u16 {
        self.pops.iter().map(|t| t.size()).sum()
    }

    pub fn push_slots(&self) -> u16 {
        self.pushes.iter().map(|t| t.size()).sum()
    }
}

use VType::{Double as D, Float as F, Int as I, Long as J, Ref as A};

const fn op(
    name: &'static str,
    form: Form,
    pops: &'static [VType],
    pushes: &'static [VType],
) -> OpInfo {
    OpInfo {
        name,
        form,
        pops,
        pushes,
    }
}

/// Look up an opcode. Local loads/stores, `ldc`, members and `pop`/`pop2` have
/// operand-dependent types; their entries carry empty signatures.
pub fn info(opcode: u8) -> Option<OpInfo> {
    use Form::*;
    let info = match opcode {
        NOP => op("nop", Simple, &[], &[]),
        ACONST_NULL => op("aconst_null", Simple, &[], &[A]),
        0x02..=0x08 => op("iconst", Simple, &[], &[I]),
        LCONST_0 | LCONST_1 => op("lconst", Simple, &[], &[J]),
        FCONST_0..=FCONST_2 => op("fconst", Simple, &[], &[F]),
        DCONST_0 | DCONST_1 => op("dconst", Simple, &[], &[D]),
        BIPUSH => op("bipush", Immediate, &[], &[I]),
        SIPUSH => op("sipush", Immediate, &[], &[I]),
        LDC => op("ldc", Constant, &[], &[]),
        LDC_W => op("ldc_w", Constant, &[], &[]),
        LDC2_W => op("ldc2_w", Constant, &[], &[]),
        ILOAD..=DLOAD => op("load", Local, &[], &[]),
        ILOAD_0..=DLOAD_3 => op("load_n", Simple, &[], &[]),
        ISTORE..=DSTORE => op("store", Local, &[], &[]),
        ISTORE_0..=DSTORE_3 => op("store_n", Simple, &[], &[]),
        POP => op("pop", Simple, &[], &[]),
        POP2 => op("pop2", Simple, &[], &[]),
        IADD => op("iadd", Simple, &[I, I], &[I]),
        LADD => op("ladd", Simple, &[J, J], &[J]),
        FADD => op("fadd", Simple, &[F, F], &[F]),
        DADD => op("dadd", Simple, &[D, D], &[D]),
        ISUB => op("isub", Simple, &[I, I], &[I]),
        LSUB => op("lsub", Simple, &[J, J], &[J]),
        FSUB => op("fsub", Simple, &[F, F], &[F]),
        DSUB => op("dsub", Simple, &[D, D], &[D]),
        IMUL => op("imul", Simple, &[I, I], &[I]),
        LMUL => op("lmul", Simple, &[J, J], &[J]),
        FMUL => op("fmul", Simple, &[F, F], &[F]),
        DMUL => op("dmul", Simple, &[D, D], &[D]),
        IDIV => op("idiv", Simple, &[I, I], &[I]),
        LDIV => op("ldiv", Simple, &[J, J], &[J]),
        FDIV => op("fdiv", Simple, &[F, F], &[F]),
        DDIV => op("ddiv", Simple, &[D, D], &[D]),
        IREM => op("irem", Simple, &[I, I], &[I]),
        LREM => op("lrem", Simple, &[J, J], &[J]),
        FREM => op("frem", Simple, &[F, F], &[F]),
        DREM => op("drem", Simple, &[D, D], &[D]),
        INEG => op("ineg", Simple, &[I], &[I]),
        LNEG => op("lneg", Simple, &[J], &[J]),
        FNEG => op("fneg", Simple, &[F], &[F]),
        DNEG => op("dneg", Simple, &[D], &[D]),
        ISHL => op("ishl", Simple, &[I, I], &[I]),
        LSHL => op("lshl", Simple, &[J, I], &[J]),
        ISHR => op("ishr", Simple, &[I, I], &[I]),
        LSHR => op("lshr", Simple, &[J, I], &[J]),
        IUSHR => op("iushr", Simple, &[I, I], &[I]),
        LUSHR => op("lushr", Simple, &[J, I], &[J]),
        IAND => op("iand", Simple, &[I, I], &[I]),
        LAND => op("land", Simple, &[J, J], &[J]),
        IOR => op("ior", Simple, &[I, I], &[I]),
        LOR => op("lor", Simple, &[J, J], &[J]),
        IXOR => op("ixor", Simple, &[I, I], &[I]),
        LXOR => op("lxor", Simple, &[J, J], &[J]),
        I2L => op("i2l", Simple, &[I], &[J]),
        I2F => op("i2f", Simple, &[I], &[F]),
        I2D => op("i2d", Simple, &[I], &[D]),
        L2I => op("l2i", Simple, &[J], &[I]),
        L2F => op("l2f", Simple, &[J], &[F]),
        L2D => op("l2d", Simple, &[J], &[D]),
        F2I => op("f2i", Simple, &[F], &[I]),
        F2L => op("f2l", Simple, &[F], &[J]),
        F2D => op("f2d", Simple, &[F], &[D]),
        D2I => op("d2i", Simple, &[D], &[I]),
        D2L => op("d2l", Simple, &[D], &[J]),
        D2F => op("d2f", Simple, &[D], &[F]),
        I2B => op("i2b", Simple, &[I], &[I]),
        I2S => op("i2s", Simple, &[I], &[I]),
        LCMP => op("lcmp", Simple, &[J, J], &[I]),
        FCMPL => op("fcmpl", Simple, &[F, F], &[I]),
        FCMPG => op("fcmpg", Simple, &[F, F], &[I]),
        DCMPL => op("dcmpl", Simple, &[D, D], &[I]),
        DCMPG => op("dcmpg", Simple, &[D, D], &[I]),
        IFEQ => op("ifeq", Branch, &[I], &[]),
        IFNE => op("ifne", Branch, &[I], &[]),
        IFLT => op("iflt", Branch, &[I], &[]),
        IFGE => op("ifge", Branch, &[I], &[]),
        IFGT => op("ifgt", Branch, &[I], &[]),
        IFLE => op("ifle", Branch, &[I], &[]),
        IF_ICMPEQ => op("if_icmpeq", Branch, &[I, I], &[]),
        IF_ICMPNE => op("if_icmpne", Branch, &[I, I], &[]),
        IF_ICMPLT => op("if_icmplt", Branch, &[I, I], &[]),
        IF_ICMPGE => op("if_icmpge", Branch, &[I, I], &[]),
        IF_ICMPGT => op("if_icmpgt", Branch, &[I, I], &[]),
        IF_ICMPLE => op("if_icmple", Branch, &[I, I], &[]),
        GOTO => op("goto", Branch, &[], &[]),
        GOTO_W => op("goto_w", BranchWide, &[], &[]),
        IRETURN => op("ireturn", Simple, &[I], &[]),
        LRETURN => op("lreturn", Simple, &[J], &[]),
        FRETURN => op("freturn", Simple, &[F], &[]),
        DRETURN => op("dreturn", Simple, &[D], &[]),
        RETURN => op("return", Simple, &[], &[]),
        GETSTATIC => op("getstatic", Member, &[], &[]),
        PUTSTATIC => op("putstatic", Member, &[], &[]),
        INVOKESTATIC => op("invokestatic", Member, &[], &[]),
        ATHROW => op("athrow", Simple, &[A], &[]),
        _ => return None,
    };
    Some(info)
}

/// Whether control never falls through to the next instruction.
pub fn ends_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        GOTO | GOTO_W | IRETURN | LRETURN | FRETURN | DRETURN | RETURN | ATHROW
    )
}

/// The conditional branch taken exactly when `opcode` is not.
pub fn invert_branch(opcode: u8) -> Option<u8> {
    Some(match opcode {
        IFEQ => IFNE,
        IFNE => IFEQ,
        IFLT => IFGE,
        IFGE => IFLT,
        IFGT => IFLE,
        IFLE => IFGT,
        IF_ICMPEQ => IF_ICMPNE,
        IF_ICMPNE => IF_ICMPEQ,
        IF_ICMPLT => IF_ICMPGE,
        IF_ICMPGE => IF_ICMPLT,
        IF_ICMPGT => IF_ICMPLE,
        IF_ICMPLE => IF_ICMPGT,
        _ => return None,
    })
}

/// Verification type handled by a load/store opcode family (`iload`, `lstore_2`, ...).
pub fn local_type(opcode: u8) -> Option<VType> {
    let kind = match opcode {
        ILOAD..=DLOAD => opcode - ILOAD,
        ISTORE..=DSTORE => opcode - ISTORE,
        ILOAD_0..=DLOAD_3 => (opcode - ILOAD_0) / 4,
        ISTORE_0..=DSTORE_3 => (opcode - ISTORE_0) / 4,
        _ => return None,
    };
    Some(match kind {
        0 => VType::Int,
        1 => VType::Long,
        2 => VType::Float,
        _ => VType::Double,
    })
}

pub fn is_store(opcode: u8) -> bool {
    matches!(opcode, ISTORE..=DSTORE | ISTORE_0..=DSTORE_3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_signatures() {
        let ladd = info(LADD).unwrap();
        assert_eq!(ladd.pop_slots(), 4);
        assert_eq!(ladd.push_slots(), 2);
        assert_eq!(info(LSHL).unwrap().pop_slots(), 3);
        assert_eq!(info(IF_ICMPLT).unwrap().form, Form::Branch);
        assert!(info(0xfe).is_none());
    }

    #[test]
    fn local_families() {
        assert_eq!(local_type(ILOAD), Some(VType::Int));
        assert_eq!(local_type(0x1e), Some(VType::Long)); // lload_0
        assert_eq!(local_type(0x4a), Some(VType::Double)); // dstore_3
        assert!(is_store(0x3c));
        assert!(!is_store(ILOAD));
    }

    #[test]
    fn branch_inversion_is_an_involution() {
        for op in IFEQ..=IF_ICMPLE {
            let inv = invert_branch(op).unwrap();
            assert_eq!(invert_branch(inv), Some(op));
        }
        assert_eq!(invert_branch(GOTO), None);
    }
}
