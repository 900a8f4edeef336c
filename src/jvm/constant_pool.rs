// This module implements the class-file constant pool with content-addressed
// deduplication: every entry is hashed by value into a hashbrown map, so interning the
// same literal, name or member reference twice returns the same index. Long and double
// entries occupy two indices as the class-file format requires. The pool refuses to grow
// past the 65535-entry limit with CodegenError::Limit. UTF-8 entries are written in the
// JVM's modified UTF-8 (NUL as two bytes); a string longer than 65535 encoded bytes is
// also a limit error. Lookups by index serve the bytecode re-verifier, which resolves
// member references back to their descriptors.

//! Class-file constant pool.

use crate::core::error::{CodegenError, CodegenResult};
use hashbrown::HashMap;

/// Largest constant pool index plus one.
pub const MAX_POOL_ENTRIES: usize = 65535;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_NAME_AND_TYPE: u8 = 12;

/// One constant pool entry. Floats are kept as bit patterns so that entries hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
}

impl PoolEntry {
    fn slots(&self) -> usize {
        match self {
            PoolEntry::Long(_) | PoolEntry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Encode a string in the JVM's modified UTF-8.
pub fn modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        match c as u32 {
            0 => out.extend_from_slice(&[0xc0, 0x80]),
            1..=0xffff => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            cp => {
                // Supplementary characters become a surrogate pair, each encoded in 3 bytes.
                let v = cp - 0x10000;
                for unit in [0xd800 + (v >> 10), 0xdc00 + (v & 0x3ff)] {
                    out.push(0xe0 | (unit >> 12) as u8);
                    out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                    out.push(0x80 | (unit & 0x3f) as u8);
                }
            }
        }
    }
    out
}

/// Resolved view of a method or field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    /// Entries by index; the slot after a long/double is `None`, as is index 0.
    entries: Vec<Option<PoolEntry>>,
    index: HashMap<PoolEntry, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![None],
            index: HashMap::new(),
        }
    }

    /// The `constant_pool_count` written to the class file.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: u16) -> Option<&PoolEntry> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    fn intern(&mut self, entry: PoolEntry) -> CodegenResult<u16> {
        if let Some(&i) = self.index.get(&entry) {
            return Ok(i);
        }
        let next = self.entries.len();
        let count = next + entry.slots();
        if count > MAX_POOL_ENTRIES {
            return Err(CodegenError::Limit {
                what: "constant pool entry",
                count,
                max: MAX_POOL_ENTRIES,
            });
        }
        let i = next as u16;
        if entry.slots() == 2 {
            self.entries.push(Some(entry.clone()));
            self.entries.push(None);
        } else {
            self.entries.push(Some(entry.clone()));
        }
        self.index.insert(entry, i);
        Ok(i)
    }

    pub fn utf8(&mut self, s: &str) -> CodegenResult<u16> {
        let len = modified_utf8(s).len();
        if len > u16::MAX as usize {
            return Err(CodegenError::Limit {
                what: "UTF-8 constant length",
                count: len,
                max: u16::MAX as usize,
            });
        }
        self.intern(PoolEntry::Utf8(s.to_owned()))
    }

    pub fn integer(&mut self, v: i32) -> CodegenResult<u16> {
        self.intern(PoolEntry::Integer(v))
    }

    pub fn float(&mut self, bits: u32) -> CodegenResult<u16> {
        self.intern(PoolEntry::Float(bits))
    }

    pub fn long(&mut self, v: i64) -> CodegenResult<u16> {
        self.intern(PoolEntry::Long(v))
    }

    pub fn double(&mut self, bits: u64) -> CodegenResult<u16> {
        self.intern(PoolEntry::Double(bits))
    }

    pub fn class(&mut self, internal_name: &str) -> CodegenResult<u16> {
        let name = self.utf8(internal_name)?;
        self.intern(PoolEntry::Class(name))
    }

    pub fn string(&mut self, s: &str) -> CodegenResult<u16> {
        let utf8 = self.utf8(s)?;
        self.intern(PoolEntry::String(utf8))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> CodegenResult<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.intern(PoolEntry::NameAndType { name, descriptor })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> CodegenResult<u16> {
        let class = self.class(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(PoolEntry::Methodref {
            class,
            name_and_type,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> CodegenResult<u16> {
        let class = self.class(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.intern(PoolEntry::Fieldref {
            class,
            name_and_type,
        })
    }

    pub fn utf8_at(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::Utf8(s) => Some(s),
            _ => None,
        }
    }

    fn class_name_at(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            PoolEntry::Class(name) => self.utf8_at(*name),
            _ => None,
        }
    }

    /// Resolve a Methodref or Fieldref.
    pub fn member_at(&self, index: u16) -> Option<MemberRef<'_>> {
        let (class, nat) = match self.get(index)? {
            PoolEntry::Methodref {
                class,
                name_and_type,
            }
            | PoolEntry::Fieldref {
                class,
                name_and_type,
            } => (*class, *name_and_type),
            _ => return None,
        };
        let PoolEntry::NameAndType { name, descriptor } = self.get(nat)? else {
            return None;
        };
        Some(MemberRef {
            class: self.class_name_at(class)?,
            name: self.utf8_at(*name)?,
            descriptor: self.utf8_at(*descriptor)?,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.count() as u16).to_be_bytes());
        for entry in self.entries.iter().flatten() {
            match entry {
                PoolEntry::Utf8(s) => {
                    let bytes = modified_utf8(s);
                    out.push(TAG_UTF8);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                PoolEntry::Integer(v) => {
                    out.push(TAG_INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolEntry::Float(bits) => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolEntry::Long(v) => {
                    out.push(TAG_LONG);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                PoolEntry::Double(bits) => {
                    out.push(TAG_DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolEntry::Class(name) => {
                    out.push(TAG_CLASS);
                    out.extend_from_slice(&name.to_be_bytes());
                }
                PoolEntry::String(utf8) => {
                    out.push(TAG_STRING);
                    out.extend_from_slice(&utf8.to_be_bytes());
                }
                PoolEntry::Fieldref {
                    class,
                    name_and_type,
                } => {
                    out.push(TAG_FIELDREF);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                PoolEntry::Methodref {
                    class,
                    name_and_type,
                } => {
                    out.push(TAG_METHODREF);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                PoolEntry::NameAndType { name, descriptor } => {
                    out.push(TAG_NAME_AND_TYPE);
                    out.extend_from_slice(&name.to_be_bytes());
                    out.extend_from_slice(&descriptor.to_be_bytes());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_deduplicated() {
        let mut pool = ConstantPool::new();
        let a = pool.method_ref("java/lang/Integer", "divideUnsigned", "(II)I").unwrap();
        let b = pool.method_ref("java/lang/Integer", "divideUnsigned", "(II)I").unwrap();
        assert_eq!(a, b);
        let count = pool.count();
        pool.utf8("divideUnsigned").unwrap();
        assert_eq!(pool.count(), count);

        let member = pool.member_at(a).unwrap();
        assert_eq!(member.class, "java/lang/Integer");
        assert_eq!(member.descriptor, "(II)I");
    }

    #[test]
    fn wide_entries_take_two_indices() {
        let mut pool = ConstantPool::new();
        let l = pool.long(1 << 40).unwrap();
        let i = pool.integer(70000).unwrap();
        assert_eq!(l, 1);
        assert_eq!(i, 3);
        assert!(pool.get(2).is_none());
        assert_eq!(pool.count(), 4);
    }

    #[test]
    fn pool_limit_is_enforced() {
        let mut pool = ConstantPool::new();
        for v in 0..(MAX_POOL_ENTRIES as i32 - 1) {
            pool.integer(v).unwrap();
        }
        let err = pool.integer(-1).unwrap_err();
        assert!(matches!(
            err,
            CodegenError::Limit {
                what: "constant pool entry",
                ..
            }
        ));
    }

    #[test]
    fn modified_utf8_encodes_nul_and_latin1() {
        assert_eq!(modified_utf8("a\0"), vec![b'a', 0xc0, 0x80]);
        assert_eq!(modified_utf8("\u{ff}"), vec![0xc3, 0xbf]);
        let mut pool = ConstantPool::new();
        pool.string("\0").unwrap();
        let mut out = Vec::new();
        pool.write(&mut out);
        assert_eq!(out, vec![0, 3, TAG_UTF8, 0, 2, 0xc0, 0x80, TAG_STRING, 0, 1]);
    }
}
