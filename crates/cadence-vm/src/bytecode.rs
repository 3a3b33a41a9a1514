//! Compiled Model and its tables

use crate::error::EncodeError;
use crate::format;
use cadence_ast::Span;
use cadence_types::{ModelId, ValueType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Magic bytes at the start of every binary Model
pub const MAGIC: [u8; 4] = *b"CDNC";

/// Binary format version produced and accepted by this crate
pub const FORMAT_VERSION: u16 = 1;

/// Header flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModelFlags(pub u16);

impl ModelFlags {
    pub const DEBUG_INFO: ModelFlags = ModelFlags(1 << 0);
    pub const COMPRESSED: ModelFlags = ModelFlags(1 << 1);
    pub const HAS_CONTINUATION_POINTS: ModelFlags = ModelFlags(1 << 2);
    pub const IS_EXTENSION: ModelFlags = ModelFlags(1 << 3);

    /// Every bit this version understands
    pub const ALL: ModelFlags = ModelFlags(0b1111);

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn contains(self, other: ModelFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ModelFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: ModelFlags) {
        self.0 &= !other.0;
    }
}

/// Named input or output variable bound to a slot range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub name: String,
    pub ty: ValueType,
    /// First slot; the variable occupies `ty.width()` slots
    pub slot: u16,
}

impl SchemaEntry {
    /// One past the last slot occupied by this entry
    #[inline]
    pub fn end(&self) -> usize {
        self.slot as usize + self.ty.width()
    }
}

/// Intent channel written by the Model: a value range and an urgency slot,
/// both in the output vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub name: String,
    pub ty: ValueType,
    pub value_slot: u16,
    pub urgency_slot: u16,
}

/// Positional layout of the evaluation state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub inputs: Vec<SchemaEntry>,
    pub outputs: Vec<SchemaEntry>,
    pub channels: Vec<ChannelBinding>,
}

impl Schema {
    /// Number of slots the input vector must have
    pub fn input_len(&self) -> usize {
        self.inputs.iter().map(SchemaEntry::end).max().unwrap_or(0)
    }

    /// Number of slots the output vector must have
    pub fn output_len(&self) -> usize {
        let outputs = self.outputs.iter().map(SchemaEntry::end);
        let channels = self.channels.iter().map(|channel| {
            (channel.value_slot as usize + channel.ty.width()).max(channel.urgency_slot as usize + 1)
        });
        outputs.chain(channels).max().unwrap_or(0)
    }
}

/// Named pause awaiting an optional extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationPoint {
    pub name: String,
    pub name_hash: u32,
    pub timeout_ms: u32,
    /// Where execution resumes when no extension attaches in time
    pub default_offset: u32,
    /// Offset of the `Pause` instruction
    pub offset: u32,
}

impl ContinuationPoint {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }
}

/// Attachment target of an extension Model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub parent: ModelId,
    pub attach_hash: u32,
}

/// Optional source mapping, serialized with MessagePack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugMap {
    /// Code offset to source location, sorted by offset
    pub spans: Vec<(u32, Span)>,
    /// Flow start offsets, sorted by offset
    pub flows: Vec<(u32, String)>,
}

impl DebugMap {
    /// Source location of the statement that produced `offset`
    pub fn span_at(&self, offset: u32) -> Option<Span> {
        let idx = self.spans.partition_point(|(start, _)| *start <= offset);
        idx.checked_sub(1).map(|i| self.spans[i].1)
    }

    /// Name of the flow whose code begins exactly at `offset`
    pub fn flow_starting_at(&self, offset: u32) -> Option<&str> {
        self.flows
            .iter()
            .find(|(start, _)| *start == offset)
            .map(|(_, name)| name.as_str())
    }
}

/// A compiled, immutable unit of behavior logic
///
/// Models are produced by the compiler or by [`crate::load_model`] and are shared
/// read-only between interpreter instances through `Arc<Model>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub(crate) id: ModelId,
    pub(crate) version: u16,
    pub(crate) flags: ModelFlags,
    pub(crate) max_stack: u16,
    pub(crate) max_call_depth: u16,
    pub(crate) local_count: u16,
    pub(crate) entry_offset: u32,
    pub(crate) schema: Schema,
    pub(crate) continuation_points: Vec<ContinuationPoint>,
    pub(crate) constants: Vec<f64>,
    pub(crate) strings: Vec<String>,
    pub(crate) code: Vec<u32>,
    pub(crate) extension: Option<ExtensionHeader>,
    pub(crate) debug: Option<DebugMap>,
}

impl Model {
    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn flags(&self) -> ModelFlags {
        self.flags
    }

    /// Operand stack depth the interpreter must pre-allocate
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    pub fn max_call_depth(&self) -> u16 {
        self.max_call_depth
    }

    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Code offset execution starts at (replacement offset for extensions)
    pub fn entry_offset(&self) -> u32 {
        self.entry_offset
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn continuation_points(&self) -> &[ContinuationPoint] {
        &self.continuation_points
    }

    pub fn constants(&self) -> &[f64] {
        &self.constants
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    pub fn code(&self) -> &[u32] {
        &self.code
    }

    pub fn extension(&self) -> Option<&ExtensionHeader> {
        self.extension.as_ref()
    }

    pub fn debug_map(&self) -> Option<&DebugMap> {
        self.debug.as_ref()
    }

    pub fn is_extension(&self) -> bool {
        self.flags.contains(ModelFlags::IS_EXTENSION)
    }

    pub fn has_continuation_points(&self) -> bool {
        !self.continuation_points.is_empty()
    }

    pub fn input_len(&self) -> usize {
        self.schema.input_len()
    }

    pub fn output_len(&self) -> usize {
        self.schema.output_len()
    }

    pub fn input(&self, name: &str) -> Option<&SchemaEntry> {
        self.schema.inputs.iter().find(|entry| entry.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&SchemaEntry> {
        self.schema.outputs.iter().find(|entry| entry.name == name)
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelBinding> {
        self.schema.channels.iter().find(|channel| channel.name == name)
    }

    /// Index of a string in the string table
    pub fn string_index(&self, text: &str) -> Option<usize> {
        self.strings.iter().position(|s| s == text)
    }

    /// Resolve a string-typed slot value to its text
    pub fn resolve_string(&self, value: f64) -> Option<&str> {
        if !(value >= 0.0) || value.fract() != 0.0 {
            return None;
        }
        self.strings.get(value as usize).map(String::as_str)
    }

    /// Serialize to the binary format
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        format::encode(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = ModelFlags::default();
        flags.insert(ModelFlags::COMPRESSED);
        flags.insert(ModelFlags::IS_EXTENSION);
        assert!(flags.contains(ModelFlags::COMPRESSED));
        assert!(!flags.contains(ModelFlags::DEBUG_INFO));
        flags.remove(ModelFlags::COMPRESSED);
        assert_eq!(flags.bits(), 0b1000);
    }

    #[test]
    fn test_schema_lengths() {
        let schema = Schema {
            inputs: vec![
                SchemaEntry {
                    name: "pos".into(),
                    ty: ValueType::Vector3,
                    slot: 0,
                },
                SchemaEntry {
                    name: "hp".into(),
                    ty: ValueType::Number,
                    slot: 3,
                },
            ],
            outputs: vec![SchemaEntry {
                name: "action".into(),
                ty: ValueType::String,
                slot: 0,
            }],
            channels: vec![ChannelBinding {
                name: "move".into(),
                ty: ValueType::Vector3,
                value_slot: 1,
                urgency_slot: 4,
            }],
        };
        assert_eq!(schema.input_len(), 4);
        assert_eq!(schema.output_len(), 5);
    }

    #[test]
    fn test_debug_map_lookup() {
        let map = DebugMap {
            spans: vec![(0, Span::new(1, 1)), (4, Span::new(2, 5))],
            flows: vec![(0, "main".into())],
        };
        assert_eq!(map.span_at(3), Some(Span::new(1, 1)));
        assert_eq!(map.span_at(9), Some(Span::new(2, 5)));
        assert_eq!(map.flow_starting_at(0), Some("main"));
        assert_eq!(map.flow_starting_at(1), None);
    }
}
