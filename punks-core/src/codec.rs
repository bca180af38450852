//! Six-byte punk codec.
//!
//! Layout (multibyte fields little-endian):
//!
//! ```text
//! byte 0     [ type:3 | background:4 | reserved:1 ]   bits 7..5, 4..1, 0
//! bytes 1..4 u32 attribute bitmap
//! byte 5     u8 attribute count (= popcount of the bitmap)
//! ```
//!
//! Encoding is canonical: a given `(type, background, attribute set)` always
//! produces the same six bytes, and `punk_id_of` over those bytes is the
//! punk's permanent identity.

use sha2::{Digest, Sha256};

use crate::tables;
use crate::types::{CompressedPunk, PunkId, PunkMetadata, PunkType};
use crate::PAYLOAD_LEN;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid background index {0}")]
    InvalidBackground(u8),
    #[error("attribute index {index} is not in the {punk_type} table")]
    UnknownAttribute { punk_type: PunkType, index: u8 },
    #[error("attribute index {0} exceeds the 32-bit bitmap")]
    AttributeIndexOutOfRange(u8),
    #[error("attribute count {actual} does not match bitmap popcount {expected}")]
    CountMismatch { expected: u8, actual: u8 },
    #[error("payload must be {PAYLOAD_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid type tag {0}")]
    InvalidTypeIndex(u8),
    #[error("invalid background index {0} in payload")]
    InvalidBackgroundIndex(u8),
    #[error("reserved bit of byte 0 is set")]
    ReservedBitSet,
    #[error("payload hashes to {actual}, expected {expected}")]
    IdMismatch { expected: PunkId, actual: PunkId },
}

/// Encode metadata into the canonical six-byte payload.
///
/// The attribute list may arrive in any order; the bitmap canonicalises it.
/// Duplicate indices surface as [`CodecError::CountMismatch`] because the
/// stored count would no longer equal the bitmap popcount.
pub fn encode(meta: &PunkMetadata) -> Result<CompressedPunk, CodecError> {
    if meta.background as usize >= tables::BACKGROUNDS.len() {
        return Err(CodecError::InvalidBackground(meta.background));
    }

    let table = meta.punk_type.attribute_table();
    let mut bitmap: u32 = 0;
    for &index in &meta.attributes {
        if index > 31 {
            return Err(CodecError::AttributeIndexOutOfRange(index));
        }
        if index as usize >= table.len() {
            return Err(CodecError::UnknownAttribute {
                punk_type: meta.punk_type,
                index,
            });
        }
        let bit = 1u32 << index;
        if bitmap & bit != 0 {
            return Err(CodecError::CountMismatch {
                expected: bitmap.count_ones() as u8,
                actual: meta.attributes.len() as u8,
            });
        }
        bitmap |= bit;
    }

    let mut payload = [0u8; PAYLOAD_LEN];
    payload[0] = (meta.punk_type.tag() << 5) | ((meta.background & 0x0f) << 1);
    payload[1..5].copy_from_slice(&bitmap.to_le_bytes());
    payload[5] = bitmap.count_ones() as u8;
    Ok(CompressedPunk(payload))
}

/// Decode a payload into metadata with attributes sorted ascending.
pub fn decode(bytes: &[u8]) -> Result<PunkMetadata, CodecError> {
    if bytes.len() != PAYLOAD_LEN {
        return Err(CodecError::InvalidLength(bytes.len()));
    }
    if bytes[0] & 0x01 != 0 {
        return Err(CodecError::ReservedBitSet);
    }

    let tag = bytes[0] >> 5;
    let punk_type = PunkType::from_tag(tag).ok_or(CodecError::InvalidTypeIndex(tag))?;

    let background = (bytes[0] >> 1) & 0x0f;
    if background as usize >= tables::BACKGROUNDS.len() {
        return Err(CodecError::InvalidBackgroundIndex(background));
    }

    let bitmap = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let stored_count = bytes[5];
    if stored_count as u32 != bitmap.count_ones() {
        return Err(CodecError::CountMismatch {
            expected: bitmap.count_ones() as u8,
            actual: stored_count,
        });
    }

    let table = punk_type.attribute_table();
    let mut attributes = Vec::with_capacity(stored_count as usize);
    for index in 0u8..32 {
        if bitmap & (1u32 << index) != 0 {
            if index as usize >= table.len() {
                return Err(CodecError::UnknownAttribute { punk_type, index });
            }
            attributes.push(index);
        }
    }

    Ok(PunkMetadata {
        punk_type,
        background,
        attributes,
    })
}

/// Decode and check the payload against a claimed punk id.
pub fn decode_verified(bytes: &[u8], expected: &PunkId) -> Result<PunkMetadata, CodecError> {
    let meta = decode(bytes)?;
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(bytes);
    let actual = punk_id_of(&CompressedPunk(payload));
    if &actual != expected {
        return Err(CodecError::IdMismatch {
            expected: *expected,
            actual,
        });
    }
    Ok(meta)
}

/// Re-encode and compare byte-for-byte.
pub fn verify_integrity(meta: &PunkMetadata, bytes: &CompressedPunk) -> bool {
    match encode(meta) {
        Ok(encoded) => encoded == *bytes,
        Err(_) => false,
    }
}

/// `SHA-256` over the six payload bytes.
pub fn punk_id_of(payload: &CompressedPunk) -> PunkId {
    let digest = Sha256::digest(payload.as_bytes());
    PunkId::from_bytes(digest.into())
}
