//! Binary Model format, version 1
//!
//! ```text
//! Header (68 bytes, little-endian)
//!   magic [u8;4] | version u16 | flags u16 | model_id u64
//!   max_stack u16 | max_call_depth u16 | local_count u16
//!   entry_offset u32 | payload_len u32 | raw_len u32
//!   checksum [u8;32] | reserved u16
//! Extension header (iff IS_EXTENSION): parent u64 | attach_hash u32
//! Payload (zstd as a whole iff COMPRESSED):
//!   section table: 6 x (offset u32, len u32)
//!   schema | continuation points | constants | strings | code | debug
//! ```
//!
//! The checksum is SHA-256 over the extension header and the stored payload.

mod reader;
mod writer;

use crate::bytecode::Model;
use crate::error::LoadError;
use crate::verify;
use tracing::debug;

pub(crate) use writer::encode;

pub(crate) const HEADER_LEN: usize = 68;
pub(crate) const EXTENSION_HEADER_LEN: usize = 12;
pub(crate) const SECTION_COUNT: usize = 6;
pub(crate) const SECTION_TABLE_LEN: usize = SECTION_COUNT * 8;
pub(crate) const CHECKSUM_LEN: usize = 32;

/// Upper bound on the uncompressed payload accepted by the loader
pub(crate) const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Default zstd compression level
pub(crate) const COMPRESSION_LEVEL: i32 = 3;

/// Section names, in table order
pub(crate) const SECTIONS: [&str; SECTION_COUNT] = [
    "schema",
    "continuation points",
    "constants",
    "strings",
    "code",
    "debug",
];

/// Parse and fully validate a binary Model.
///
/// Nothing is returned unless every structural check passes, so a loaded
/// Model never faults mid-evaluation on its own account.
pub fn load_model(bytes: &[u8]) -> Result<Model, LoadError> {
    let model = reader::decode(bytes)?;
    verify::verify_model(&model)?;
    debug!(
        model = %model.id,
        bytes = bytes.len(),
        code = model.code.len(),
        max_stack = model.max_stack,
        "Model loaded"
    );
    Ok(model)
}
