//! Model deserialization
//!
//! Decoding only checks that the bytes describe well-formed tables; semantic
//! checks (operands, continuation points, stack depth) live in `verify`.

use super::{
    CHECKSUM_LEN, EXTENSION_HEADER_LEN, HEADER_LEN, MAX_PAYLOAD_LEN, SECTIONS, SECTION_COUNT,
    SECTION_TABLE_LEN,
};
use crate::bytecode::{
    ChannelBinding, ContinuationPoint, DebugMap, ExtensionHeader, Model, ModelFlags, Schema,
    SchemaEntry, FORMAT_VERSION, MAGIC,
};
use crate::error::LoadError;
use byteorder::{LittleEndian, ReadBytesExt};
use cadence_types::{ModelId, ValueType};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::io::Cursor;

type Result<T> = std::result::Result<T, LoadError>;

/// Bounded little-endian reader over one section
struct Section<'a> {
    name: &'static str,
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Section<'a> {
    fn new(name: &'static str, bytes: &'a [u8]) -> Self {
        Self {
            name,
            cursor: Cursor::new(bytes),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| LoadError::Truncated(self.name))
    }

    fn u16(&mut self) -> Result<u16> {
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| LoadError::Truncated(self.name))
    }

    fn u32(&mut self) -> Result<u32> {
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| LoadError::Truncated(self.name))
    }

    fn u64(&mut self) -> Result<u64> {
        self.cursor
            .read_u64::<LittleEndian>()
            .map_err(|_| LoadError::Truncated(self.name))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(LoadError::Truncated(self.name))?;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    fn finish(self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(LoadError::TrailingBytes(self.name))
        }
    }
}

struct Header {
    version: u16,
    flags: ModelFlags,
    model_id: ModelId,
    max_stack: u16,
    max_call_depth: u16,
    local_count: u16,
    entry_offset: u32,
    payload_len: u32,
    raw_len: u32,
    checksum: [u8; CHECKSUM_LEN],
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Model> {
    if bytes.len() < HEADER_LEN {
        return Err(LoadError::TooShort(bytes.len()));
    }
    let header = decode_header(&bytes[..HEADER_LEN])?;
    let mut rest = &bytes[HEADER_LEN..];

    let extension_bytes = if header.flags.contains(ModelFlags::IS_EXTENSION) {
        if rest.len() < EXTENSION_HEADER_LEN {
            return Err(LoadError::TooShort(bytes.len()));
        }
        let (ext, tail) = rest.split_at(EXTENSION_HEADER_LEN);
        rest = tail;
        ext
    } else {
        &[]
    };

    if rest.len() != header.payload_len as usize {
        return Err(LoadError::LengthMismatch {
            declared: header.payload_len as usize,
            actual: rest.len(),
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(extension_bytes);
    hasher.update(rest);
    if hasher.finalize().as_slice() != header.checksum {
        return Err(LoadError::ChecksumMismatch);
    }

    let extension = if extension_bytes.is_empty() {
        None
    } else {
        let mut section = Section::new("extension header", extension_bytes);
        let parent = ModelId(section.u64()?);
        let attach_hash = section.u32()?;
        section.finish()?;
        Some(ExtensionHeader {
            parent,
            attach_hash,
        })
    };

    let raw_len = header.raw_len as usize;
    if raw_len > MAX_PAYLOAD_LEN {
        return Err(LoadError::SectionLayout("payload exceeds the size limit"));
    }
    let payload: Cow<'_, [u8]> = if header.flags.contains(ModelFlags::COMPRESSED) {
        let raw = zstd::bulk::decompress(rest, raw_len)
            .map_err(|e| LoadError::Decompression(e.to_string()))?;
        Cow::Owned(raw)
    } else {
        Cow::Borrowed(rest)
    };
    if payload.len() != raw_len {
        return Err(LoadError::LengthMismatch {
            declared: raw_len,
            actual: payload.len(),
        });
    }

    let sections = split_sections(&payload)?;
    let strings = decode_strings(sections[3])?;
    let schema = decode_schema(sections[0], &strings)?;
    let continuation_points = decode_continuation_points(sections[1], &strings)?;
    let constants = decode_constants(sections[2])?;
    let code = decode_code(sections[4])?;
    let debug = decode_debug(sections[5], header.flags)?;

    Ok(Model {
        id: header.model_id,
        version: header.version,
        flags: header.flags,
        max_stack: header.max_stack,
        max_call_depth: header.max_call_depth,
        local_count: header.local_count,
        entry_offset: header.entry_offset,
        schema,
        continuation_points,
        constants,
        strings,
        code,
        extension,
        debug,
    })
}

fn decode_header(bytes: &[u8]) -> Result<Header> {
    let mut section = Section::new("header", bytes);
    if section.bytes(MAGIC.len())? != MAGIC {
        return Err(LoadError::BadMagic);
    }
    let version = section.u16()?;
    if version != FORMAT_VERSION {
        return Err(LoadError::UnsupportedVersion(version));
    }
    let flags = section.u16()?;
    if flags & !ModelFlags::ALL.bits() != 0 {
        return Err(LoadError::UnknownFlags(flags));
    }

    let model_id = ModelId(section.u64()?);
    let max_stack = section.u16()?;
    let max_call_depth = section.u16()?;
    let local_count = section.u16()?;
    let entry_offset = section.u32()?;
    let payload_len = section.u32()?;
    let raw_len = section.u32()?;
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(section.bytes(CHECKSUM_LEN)?);
    let _reserved = section.u16()?;
    section.finish()?;

    Ok(Header {
        version,
        flags: ModelFlags(flags),
        model_id,
        max_stack,
        max_call_depth,
        local_count,
        entry_offset,
        payload_len,
        raw_len,
        checksum,
    })
}

fn split_sections(payload: &[u8]) -> Result<[&[u8]; SECTION_COUNT]> {
    let mut table = Section::new("section table", payload);
    let mut sections: [&[u8]; SECTION_COUNT] = [&[]; SECTION_COUNT];
    let mut expected = SECTION_TABLE_LEN;

    for (i, section) in sections.iter_mut().enumerate() {
        let offset = table.u32()? as usize;
        let len = table.u32()? as usize;
        if offset != expected {
            return Err(LoadError::SectionLayout(SECTIONS[i]));
        }
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= payload.len())
            .ok_or(LoadError::SectionLayout(SECTIONS[i]))?;
        *section = &payload[offset..end];
        expected = end;
    }

    if expected != payload.len() {
        return Err(LoadError::SectionLayout("payload has trailing bytes"));
    }
    Ok(sections)
}

fn decode_strings(bytes: &[u8]) -> Result<Vec<String>> {
    let mut section = Section::new("strings", bytes);
    let count = section.u32()? as usize;
    // Each string needs at least its length prefix
    if count > section.remaining() / 4 {
        return Err(LoadError::Truncated("strings"));
    }
    let mut strings = Vec::with_capacity(count);
    for index in 0..count {
        let len = section.u32()? as usize;
        let text = std::str::from_utf8(section.bytes(len)?)
            .map_err(|_| LoadError::InvalidUtf8(index))?;
        strings.push(text.to_string());
    }
    section.finish()?;
    Ok(strings)
}

fn string_at(strings: &[String], index: u32) -> Result<String> {
    strings
        .get(index as usize)
        .cloned()
        .ok_or(LoadError::SectionLayout("string index out of range"))
}

fn value_type(byte: u8) -> Result<ValueType> {
    ValueType::from_u8(byte).ok_or(LoadError::InvalidType(byte))
}

fn decode_schema(bytes: &[u8], strings: &[String]) -> Result<Schema> {
    let mut section = Section::new("schema", bytes);
    let mut schema = Schema::default();

    for entries in [&mut schema.inputs, &mut schema.outputs] {
        let count = section.u16()?;
        for _ in 0..count {
            let name = string_at(strings, section.u32()?)?;
            let ty = value_type(section.u8()?)?;
            let slot = section.u16()?;
            entries.push(SchemaEntry { name, ty, slot });
        }
    }

    let count = section.u16()?;
    for _ in 0..count {
        let name = string_at(strings, section.u32()?)?;
        let value_slot = section.u16()?;
        let ty = value_type(section.u8()?)?;
        let urgency_slot = section.u16()?;
        schema.channels.push(ChannelBinding {
            name,
            ty,
            value_slot,
            urgency_slot,
        });
    }

    section.finish()?;
    Ok(schema)
}

fn decode_continuation_points(bytes: &[u8], strings: &[String]) -> Result<Vec<ContinuationPoint>> {
    let mut section = Section::new("continuation points", bytes);
    let count = section.u32()? as usize;
    if count > section.remaining() / 20 {
        return Err(LoadError::Truncated("continuation points"));
    }
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let name_hash = section.u32()?;
        let name = string_at(strings, section.u32()?)?;
        points.push(ContinuationPoint {
            name,
            name_hash,
            timeout_ms: section.u32()?,
            default_offset: section.u32()?,
            offset: section.u32()?,
        });
    }
    section.finish()?;
    Ok(points)
}

fn decode_constants(bytes: &[u8]) -> Result<Vec<f64>> {
    let mut section = Section::new("constants", bytes);
    let count = section.u32()? as usize;
    if count > section.remaining() / 8 {
        return Err(LoadError::Truncated("constants"));
    }
    let mut constants = Vec::with_capacity(count);
    for _ in 0..count {
        constants.push(f64::from_bits(section.u64()?));
    }
    section.finish()?;
    Ok(constants)
}

fn decode_code(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(LoadError::TrailingBytes("code"));
    }
    let mut section = Section::new("code", bytes);
    let mut code = Vec::with_capacity(bytes.len() / 4);
    while section.remaining() > 0 {
        code.push(section.u32()?);
    }
    Ok(code)
}

fn decode_debug(bytes: &[u8], flags: ModelFlags) -> Result<Option<DebugMap>> {
    if !flags.contains(ModelFlags::DEBUG_INFO) {
        return if bytes.is_empty() {
            Ok(None)
        } else {
            Err(LoadError::TrailingBytes("debug"))
        };
    }
    rmp_serde::from_slice(bytes)
        .map(Some)
        .map_err(|e| LoadError::DebugInfo(e.to_string()))
}
