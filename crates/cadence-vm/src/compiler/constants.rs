//! Predefined constants and the constant/string pool under construction

use std::collections::HashMap;
use std::f64::consts;

/// Get a predefined constant by name (case-sensitive)
pub(crate) fn get_constant(name: &str) -> Option<f64> {
    match name {
        "PI" => Some(consts::PI),
        "TAU" => Some(consts::TAU),
        "E" => Some(consts::E),
        "Infinity" => Some(f64::INFINITY),
        _ => None,
    }
}

/// Constant pool and string table for one compilation
///
/// Constants are deduplicated by bit pattern, so `0.0` and `-0.0` stay
/// distinct; strings are interned.
#[derive(Debug, Default)]
pub(crate) struct ConstantPool {
    pub(crate) constants: Vec<f64>,
    pub(crate) strings: Vec<String>,
    constant_index: HashMap<u64, usize>,
    string_index: HashMap<String, usize>,
}

impl ConstantPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a constant value and return its index
    pub(crate) fn add_constant(&mut self, value: f64) -> usize {
        let constants = &mut self.constants;
        *self.constant_index.entry(value.to_bits()).or_insert_with(|| {
            constants.push(value);
            constants.len() - 1
        })
    }

    /// Add a string and return its index
    pub(crate) fn add_string(&mut self, s: &str) -> usize {
        if let Some(&idx) = self.string_index.get(s) {
            return idx;
        }
        self.strings.push(s.to_string());
        let idx = self.strings.len() - 1;
        self.string_index.insert(s.to_string(), idx);
        idx
    }
}
