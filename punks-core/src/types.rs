use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::tables;

/// Permanent identity of a punk: the SHA-256 digest of its canonical
/// six-byte payload. Stable across VTXO refreshes and ownership transfers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PunkId([u8; 32]);

impl PunkId {
    pub const LEN: usize = 32;

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, PunkIdError> {
        if slice.len() != Self::LEN {
            return Err(PunkIdError::BadLength(slice.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PunkIdError {
    #[error("punk id must be 32 bytes, got {0}")]
    BadLength(usize),
    #[error("punk id is not valid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

impl fmt::Display for PunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PunkId({})", self)
    }
}

impl FromStr for PunkId {
    type Err = PunkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for PunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PunkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The five punk archetypes. Wire tags are frozen protocol constants; the
/// 3-bit field in byte 0 of the payload carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PunkType {
    Male,
    Female,
    Zombie,
    Alien,
    Ape,
}

impl PunkType {
    /// Frozen wire tag. Changing these is a breaking protocol change.
    pub const fn tag(self) -> u8 {
        match self {
            PunkType::Male => 0,
            PunkType::Female => 1,
            PunkType::Zombie => 2,
            PunkType::Alien => 3,
            PunkType::Ape => 4,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PunkType::Male),
            1 => Some(PunkType::Female),
            2 => Some(PunkType::Zombie),
            3 => Some(PunkType::Alien),
            4 => Some(PunkType::Ape),
            _ => None,
        }
    }

    /// Attribute table for this type. Index = bit index in the bitmap.
    pub const fn attribute_table(self) -> &'static [&'static str] {
        match self {
            PunkType::Male => tables::MALE_ATTRIBUTES,
            PunkType::Female => tables::FEMALE_ATTRIBUTES,
            PunkType::Zombie => tables::ZOMBIE_ATTRIBUTES,
            PunkType::Alien => tables::ALIEN_ATTRIBUTES,
            PunkType::Ape => tables::APE_ATTRIBUTES,
        }
    }
}

impl fmt::Display for PunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PunkType::Male => "Male",
            PunkType::Female => "Female",
            PunkType::Zombie => "Zombie",
            PunkType::Alien => "Alien",
            PunkType::Ape => "Ape",
        };
        f.write_str(name)
    }
}

/// Decoded trait state of a punk.
///
/// `background` indexes the global background table, `attributes` are bit
/// indices into the type's attribute table. The canonical form keeps the
/// attribute indices sorted ascending; [`PunkMetadata::canonicalise`]
/// enforces that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunkMetadata {
    pub punk_type: PunkType,
    pub background: u8,
    pub attributes: Vec<u8>,
}

impl PunkMetadata {
    /// Sort attribute indices ascending. Comparison and encoding are defined
    /// over this form only.
    pub fn canonicalise(mut self) -> Self {
        self.attributes.sort_unstable();
        self
    }

    pub fn background_name(&self) -> Option<&'static str> {
        tables::BACKGROUNDS.get(self.background as usize).copied()
    }

    /// Resolve attribute indices to names. Indices outside the type's table
    /// are skipped; [`crate::codec::encode`] rejects them before they can be
    /// persisted.
    pub fn attribute_names(&self) -> Vec<&'static str> {
        let table = self.punk_type.attribute_table();
        self.attributes
            .iter()
            .filter_map(|&idx| table.get(idx as usize).copied())
            .collect()
    }
}

/// The canonical six-byte payload carried by a punk VTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedPunk(pub [u8; 6]);

impl CompressedPunk {
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for CompressedPunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for CompressedPunk {
    type Err = crate::codec::CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes =
            hex::decode(s).map_err(|_| crate::codec::CodecError::InvalidLength(s.len()))?;
        if bytes.len() != 6 {
            return Err(crate::codec::CodecError::InvalidLength(bytes.len()));
        }
        let mut payload = [0u8; 6];
        payload.copy_from_slice(&bytes);
        Ok(Self(payload))
    }
}
