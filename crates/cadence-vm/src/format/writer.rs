//! Model serialization

use super::{COMPRESSION_LEVEL, EXTENSION_HEADER_LEN, HEADER_LEN, SECTION_TABLE_LEN};
use crate::bytecode::{Model, ModelFlags, MAGIC};
use crate::error::EncodeError;
use byteorder::{LittleEndian, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

type Result<T> = std::result::Result<T, EncodeError>;

/// Serialize a Model, compressing the payload when its flags ask for it
pub(crate) fn encode(model: &Model) -> Result<Vec<u8>> {
    let raw = encode_payload(model)?;
    let raw_len = len_u32(raw.len(), "payload")?;

    let stored = if model.flags.contains(ModelFlags::COMPRESSED) {
        let compressed = zstd::encode_all(&raw[..], COMPRESSION_LEVEL)?;
        debug!(
            raw_bytes = raw.len(),
            compressed_bytes = compressed.len(),
            "Payload compressed with zstd"
        );
        compressed
    } else {
        raw
    };
    let payload_len = len_u32(stored.len(), "payload")?;

    let mut extension = Vec::with_capacity(EXTENSION_HEADER_LEN);
    if let Some(header) = &model.extension {
        extension.write_u64::<LittleEndian>(header.parent.0)?;
        extension.write_u32::<LittleEndian>(header.attach_hash)?;
    }

    let mut hasher = Sha256::new();
    hasher.update(&extension);
    hasher.update(&stored);
    let checksum = hasher.finalize();

    let mut out = Vec::with_capacity(HEADER_LEN + extension.len() + stored.len());
    out.extend_from_slice(&MAGIC);
    out.write_u16::<LittleEndian>(model.version)?;
    out.write_u16::<LittleEndian>(model.flags.bits())?;
    out.write_u64::<LittleEndian>(model.id.0)?;
    out.write_u16::<LittleEndian>(model.max_stack)?;
    out.write_u16::<LittleEndian>(model.max_call_depth)?;
    out.write_u16::<LittleEndian>(model.local_count)?;
    out.write_u32::<LittleEndian>(model.entry_offset)?;
    out.write_u32::<LittleEndian>(payload_len)?;
    out.write_u32::<LittleEndian>(raw_len)?;
    out.extend_from_slice(&checksum);
    out.write_u16::<LittleEndian>(0)?;
    debug_assert_eq!(out.len(), HEADER_LEN);

    out.extend_from_slice(&extension);
    out.extend_from_slice(&stored);
    Ok(out)
}

fn encode_payload(model: &Model) -> Result<Vec<u8>> {
    let index: HashMap<&str, u32> = model
        .strings
        .iter()
        .enumerate()
        .map(|(i, s)| (s.as_str(), i as u32))
        .collect();
    let string_index = |name: &str| -> Result<u32> {
        index
            .get(name)
            .copied()
            .ok_or_else(|| EncodeError::MissingString(name.to_string()))
    };

    let sections = [
        encode_schema(model, &string_index)?,
        encode_continuation_points(model, &string_index)?,
        encode_constants(model)?,
        encode_strings(model)?,
        encode_code(model)?,
        encode_debug(model)?,
    ];

    let total = SECTION_TABLE_LEN + sections.iter().map(Vec::len).sum::<usize>();
    let mut payload = Vec::with_capacity(total);
    let mut offset = SECTION_TABLE_LEN;
    for section in &sections {
        payload.write_u32::<LittleEndian>(len_u32(offset, "section offset")?)?;
        payload.write_u32::<LittleEndian>(len_u32(section.len(), "section")?)?;
        offset += section.len();
    }
    for section in &sections {
        payload.extend_from_slice(section);
    }
    Ok(payload)
}

fn encode_schema(model: &Model, string_index: &dyn Fn(&str) -> Result<u32>) -> Result<Vec<u8>> {
    let schema = &model.schema;
    let mut out = Vec::new();

    for entries in [&schema.inputs, &schema.outputs] {
        out.write_u16::<LittleEndian>(count_u16(entries.len(), "schema")?)?;
        for entry in entries.iter() {
            out.write_u32::<LittleEndian>(string_index(&entry.name)?)?;
            out.write_u8(entry.ty.as_u8())?;
            out.write_u16::<LittleEndian>(entry.slot)?;
        }
    }

    out.write_u16::<LittleEndian>(count_u16(schema.channels.len(), "channels")?)?;
    for channel in &schema.channels {
        out.write_u32::<LittleEndian>(string_index(&channel.name)?)?;
        out.write_u16::<LittleEndian>(channel.value_slot)?;
        out.write_u8(channel.ty.as_u8())?;
        out.write_u16::<LittleEndian>(channel.urgency_slot)?;
    }
    Ok(out)
}

fn encode_continuation_points(
    model: &Model,
    string_index: &dyn Fn(&str) -> Result<u32>,
) -> Result<Vec<u8>> {
    let points = &model.continuation_points;
    let mut out = Vec::with_capacity(4 + points.len() * 20);
    out.write_u32::<LittleEndian>(len_u32(points.len(), "continuation points")?)?;
    for point in points {
        out.write_u32::<LittleEndian>(point.name_hash)?;
        out.write_u32::<LittleEndian>(string_index(&point.name)?)?;
        out.write_u32::<LittleEndian>(point.timeout_ms)?;
        out.write_u32::<LittleEndian>(point.default_offset)?;
        out.write_u32::<LittleEndian>(point.offset)?;
    }
    Ok(out)
}

fn encode_constants(model: &Model) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(4 + model.constants.len() * 8);
    out.write_u32::<LittleEndian>(len_u32(model.constants.len(), "constants")?)?;
    for &value in &model.constants {
        out.write_u64::<LittleEndian>(value.to_bits())?;
    }
    Ok(out)
}

fn encode_strings(model: &Model) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(len_u32(model.strings.len(), "strings")?)?;
    for string in &model.strings {
        out.write_u32::<LittleEndian>(len_u32(string.len(), "string")?)?;
        out.extend_from_slice(string.as_bytes());
    }
    Ok(out)
}

fn encode_code(model: &Model) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(model.code.len() * 4);
    for &word in &model.code {
        out.write_u32::<LittleEndian>(word)?;
    }
    Ok(out)
}

fn encode_debug(model: &Model) -> Result<Vec<u8>> {
    match &model.debug {
        Some(map) => Ok(rmp_serde::to_vec(map)?),
        None => Ok(Vec::new()),
    }
}

fn len_u32(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| EncodeError::Overflow(what))
}

fn count_u16(len: usize, what: &'static str) -> Result<u16> {
    u16::try_from(len).map_err(|_| EncodeError::Overflow(what))
}
