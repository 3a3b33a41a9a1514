//! Value types shared by the compiler, the binary format and the runtime.
//!
//! At the VM level every value is an `f64`. The types below only exist to
//! give the compiler something to check and to tell the caller how many
//! consecutive slots a variable occupies:
//!
//! - `Number`: one slot, the value itself
//! - `Bool`: one slot, `0.0` or `1.0`
//! - `String`: one slot, an index into the Model's string table
//! - `Vector3`: three consecutive slots (x, y, z)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of an input, output, local or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ValueType {
    Number = 0,
    Bool = 1,
    String = 2,
    Vector3 = 3,
}

impl ValueType {
    /// Get type from its binary tag
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ValueType::Number),
            1 => Some(ValueType::Bool),
            2 => Some(ValueType::String),
            3 => Some(ValueType::Vector3),
            _ => None,
        }
    }

    /// Binary tag
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Number of consecutive numeric slots a value of this type occupies
    #[inline]
    pub fn width(self) -> usize {
        match self {
            ValueType::Vector3 => 3,
            _ => 1,
        }
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Bool => "bool",
            ValueType::String => "string",
            ValueType::Vector3 => "vector3",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        for ty in [
            ValueType::Number,
            ValueType::Bool,
            ValueType::String,
            ValueType::Vector3,
        ] {
            assert_eq!(ValueType::from_u8(ty.as_u8()), Some(ty));
        }
        assert_eq!(ValueType::from_u8(9), None);
    }

    #[test]
    fn test_widths() {
        assert_eq!(ValueType::Number.width(), 1);
        assert_eq!(ValueType::Vector3.width(), 3);
    }

    #[test]
    fn test_serde_names() {
        let ty: ValueType = serde_json::from_str("\"vector3\"").unwrap();
        assert_eq!(ty, ValueType::Vector3);
    }
}
