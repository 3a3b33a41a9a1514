//! Model identifiers and name hashing.
//!
//! Both are FNV-1a over UTF-8 bytes so that a parent document name or a
//! continuation point name hashes identically on every machine.

use serde::{Deserialize, Serialize};
use std::fmt;

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV32_OFFSET: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Identifier of a compiled Model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub u64);

impl ModelId {
    /// Derive the identifier of a document from its name
    pub fn from_name(name: &str) -> Self {
        let mut hash = FNV64_OFFSET;
        for byte in name.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV64_PRIME);
        }
        ModelId(hash)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 32-bit hash of a continuation point name
pub fn name_hash(name: &str) -> u32 {
    let mut hash = FNV32_OFFSET;
    for byte in name.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        // Reference values for FNV-1a
        assert_eq!(name_hash(""), 0x811c_9dc5);
        assert_eq!(name_hash("a"), 0xe40c_292c);
        assert_eq!(ModelId::from_name("").0, 0xcbf2_9ce4_8422_2325);
        assert_eq!(ModelId::from_name("a").0, 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_distinct_names() {
        assert_ne!(name_hash("ending_A"), name_hash("ending_B"));
        assert_ne!(ModelId::from_name("duel"), ModelId::from_name("duel_ext"));
    }
}
