// This module holds ClassArtifact, the backend's in-memory description of the generated
// class, and serializes it into class-file bytes. The layout is the classic version 49.0
// format, which needs no StackMapTable: magic 0xCAFEBABE, the constant pool, access
// flags, this and super class, no interfaces, the static fields and the methods, each
// with a single Code attribute. Serialization is a pure function of the artifact: it
// works on a copy of the constant pool so that interning member names never mutates
// the artifact, and identical artifacts always produce identical bytes.

//! Class-file serialization.

use super::constant_pool::ConstantPool;
use crate::core::error::{CodegenError, CodegenResult};
use bitflags::bitflags;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;
pub const MAJOR_VERSION: u16 = 49;
pub const MINOR_VERSION: u16 = 0;

bitflags! {
    /// Class, field and method access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const SYNTHETIC = 0x1000;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access: AccessFlags,
    pub name: String,
    pub descriptor: String,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
}

/// The generated class, ready to be serialized.
#[derive(Debug, Clone)]
pub struct ClassArtifact {
    pub name: String,
    pub super_name: String,
    pub access: AccessFlags,
    pub pool: ConstantPool,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl ClassArtifact {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the class has a static initializer.
    pub fn has_static_initializer(&self) -> bool {
        self.method("<clinit>").is_some()
    }

    pub fn to_bytes(&self) -> CodegenResult<Vec<u8>> {
        write_class(self)
    }
}

fn count_u16(what: &'static str, count: usize) -> CodegenResult<[u8; 2]> {
    u16::try_from(count)
        .map(u16::to_be_bytes)
        .map_err(|_| CodegenError::Limit {
            what,
            count,
            max: u16::MAX as usize,
        })
}

/// Serialize a class artifact.
pub fn write_class(class: &ClassArtifact) -> CodegenResult<Vec<u8>> {
    let mut pool = class.pool.clone();
    let this_class = pool.class(&class.name)?;
    let super_class = pool.class(&class.super_name)?;
    let code_name = if class.methods.is_empty() {
        0
    } else {
        pool.utf8("Code")?
    };
    let fields = class
        .fields
        .iter()
        .map(|f| Ok((f.access, pool.utf8(&f.name)?, pool.utf8(&f.descriptor)?)))
        .collect::<CodegenResult<Vec<_>>>()?;
    let methods = class
        .methods
        .iter()
        .map(|m| Ok((m, pool.utf8(&m.name)?, pool.utf8(&m.descriptor)?)))
        .collect::<CodegenResult<Vec<_>>>()?;

    let mut out = Vec::new();
    out.extend_from_slice(&CLASS_MAGIC.to_be_bytes());
    out.extend_from_slice(&MINOR_VERSION.to_be_bytes());
    out.extend_from_slice(&MAJOR_VERSION.to_be_bytes());
    pool.write(&mut out);
    out.extend_from_slice(&class.access.bits().to_be_bytes());
    out.extend_from_slice(&this_class.to_be_bytes());
    out.extend_from_slice(&super_class.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // interfaces

    out.extend_from_slice(&count_u16("field", fields.len())?);
    for (access, name, descriptor) in fields {
        out.extend_from_slice(&access.bits().to_be_bytes());
        out.extend_from_slice(&name.to_be_bytes());
        out.extend_from_slice(&descriptor.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
    }

    out.extend_from_slice(&count_u16("method", methods.len())?);
    for (method, name, descriptor) in methods {
        out.extend_from_slice(&method.access.bits().to_be_bytes());
        out.extend_from_slice(&name.to_be_bytes());
        out.extend_from_slice(&descriptor.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());

        let code_len = u32::try_from(method.code.len()).map_err(|_| CodegenError::Limit {
            what: "method code size",
            count: method.code.len(),
            max: u32::MAX as usize,
        })?;
        out.extend_from_slice(&code_name.to_be_bytes());
        out.extend_from_slice(&(12 + code_len).to_be_bytes());
        out.extend_from_slice(&method.max_stack.to_be_bytes());
        out.extend_from_slice(&method.max_locals.to_be_bytes());
        out.extend_from_slice(&code_len.to_be_bytes());
        out.extend_from_slice(&method.code);
        out.extend_from_slice(&0u16.to_be_bytes()); // exception table
        out.extend_from_slice(&0u16.to_be_bytes()); // attributes
    }

    out.extend_from_slice(&0u16.to_be_bytes()); // class attributes
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::opcodes;

    fn artifact() -> ClassArtifact {
        ClassArtifact {
            name: "Demo".into(),
            super_name: "java/lang/Object".into(),
            access: AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SUPER,
            pool: ConstantPool::new(),
            fields: vec![FieldInfo {
                access: AccessFlags::PUBLIC | AccessFlags::STATIC,
                name: "g".into(),
                descriptor: "I".into(),
            }],
            methods: vec![MethodInfo {
                access: AccessFlags::PUBLIC | AccessFlags::STATIC,
                name: "f".into(),
                descriptor: "()V".into(),
                max_stack: 0,
                max_locals: 0,
                code: vec![opcodes::RETURN],
            }],
        }
    }

    #[test]
    fn header_and_code_attribute() {
        let class = artifact();
        let bytes = class.to_bytes().unwrap();
        assert_eq!(&bytes[..8], &[0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 49]);
        // Code attribute: length, max_stack, max_locals, code_length, code, two empty
        // tables, then the class attribute count.
        let tail = &bytes[bytes.len() - 17..];
        assert_eq!(
            tail,
            &[0, 0, 0, 13, 0, 0, 0, 0, 0, 0, 0, 1, opcodes::RETURN, 0, 0, 0, 0][..]
        );
        assert_eq!(&bytes[bytes.len() - 4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn serialization_is_pure() {
        let class = artifact();
        let count = class.pool.count();
        assert_eq!(class.to_bytes().unwrap(), class.to_bytes().unwrap());
        assert_eq!(class.pool.count(), count);
        assert!(class.field("g").is_some());
        assert!(!class.has_static_initializer());
    }
}
