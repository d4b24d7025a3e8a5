//! Module constant pool
//!
//! The pool is a single block of NUL-terminated UTF-8 strings. Every string
//! operand in a module (section names, namespaces, instruction operands) is
//! the byte offset of its first character. Offset 0 always holds the empty
//! string.

use crate::encoder::DecodeError;
use crate::module::ModuleError;
use rustc_hash::FxHashMap;

/// Interned string block shared by every section of one module
#[derive(Debug, Clone)]
pub struct ConstantPool {
    data: Vec<u8>,
    offsets: FxHashMap<String, u32>,
}

impl ConstantPool {
    /// Create a pool holding only the empty string
    pub fn new() -> Self {
        let mut offsets = FxHashMap::default();
        offsets.insert(String::new(), 0);
        Self {
            data: vec![0],
            offsets,
        }
    }

    /// Rebuild a pool from its encoded bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ModuleError> {
        if data.last().copied() != Some(0) {
            return Err(ModuleError::MalformedPool(
                "constant pool is not NUL terminated".to_string(),
            ));
        }
        let mut offsets = FxHashMap::default();
        let mut start = 0;
        for (i, byte) in data.iter().enumerate() {
            if *byte == 0 {
                let text = std::str::from_utf8(&data[start..i])
                    .map_err(|_| DecodeError::InvalidUtf8(start))?;
                offsets.entry(text.to_string()).or_insert(start as u32);
                start = i + 1;
            }
        }
        Ok(Self { data, offsets })
    }

    /// Add a string, returning its offset. Existing strings are reused.
    pub fn add(&mut self, text: &str) -> Result<u32, ModuleError> {
        if let Some(offset) = self.offsets.get(text) {
            return Ok(*offset);
        }
        if text.as_bytes().contains(&0) {
            return Err(ModuleError::InvalidString(text.to_string()));
        }
        let offset = u32::try_from(self.data.len())
            .map_err(|_| ModuleError::MalformedPool("constant pool is full".to_string()))?;
        self.data.extend_from_slice(text.as_bytes());
        self.data.push(0);
        self.offsets.insert(text.to_string(), offset);
        Ok(offset)
    }

    /// Offset of a string already in the pool
    pub fn offset_of(&self, text: &str) -> Option<u32> {
        self.offsets.get(text).copied()
    }

    /// Resolve an offset to its string
    pub fn get(&self, offset: i64) -> Result<&str, DecodeError> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|start| *start < self.data.len())
            .ok_or(DecodeError::BadStringOffset(offset))?;
        // Offsets must point at the first byte of an entry
        if start > 0 && self.data[start - 1] != 0 {
            return Err(DecodeError::BadStringOffset(offset));
        }
        let len = self.data[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::BadStringOffset(offset))?;
        std::str::from_utf8(&self.data[start..start + len]).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Encoded bytes of the pool
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size of the pool in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the pool holds only the empty string
    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for ConstantPool {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_is_offset_zero() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.add("").unwrap(), 0);
        assert_eq!(pool.get(0).unwrap(), "");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_add_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.add("public").unwrap();
        let b = pool.add("length").unwrap();
        assert_eq!(pool.add("public").unwrap(), a);
        assert_eq!(a, 1);
        assert_eq!(b, 8);
        assert_eq!(pool.get(b as i64).unwrap(), "length");
    }

    #[test]
    fn test_offset_inside_entry_rejected() {
        let mut pool = ConstantPool::new();
        pool.add("public").unwrap();
        assert_eq!(pool.get(3), Err(DecodeError::BadStringOffset(3)));
        assert_eq!(pool.get(99), Err(DecodeError::BadStringOffset(99)));
        assert_eq!(pool.get(-1), Err(DecodeError::BadStringOffset(-1)));
    }

    #[test]
    fn test_from_bytes_rebuilds_index() {
        let mut pool = ConstantPool::new();
        pool.add("Shape").unwrap();
        pool.add("area").unwrap();
        let rebuilt = ConstantPool::from_bytes(pool.as_bytes().to_vec()).unwrap();
        assert_eq!(rebuilt, pool);
        assert_eq!(rebuilt.offset_of("area"), pool.offset_of("area"));
    }

    #[test]
    fn test_interior_nul_rejected() {
        let mut pool = ConstantPool::new();
        assert!(pool.add("a\0b").is_err());
    }
}
