//! Protocol leaves of the ArkPunks system: the six-byte trait codec, the
//! deterministic punk generator and the identifiers shared by every other
//! crate in the workspace.
//!
//! Nothing in this crate touches the network, the wallet or the registry
//! store; it is pure, deterministic and freely usable from both the chain
//! adapter and the marketplace agent.

pub mod codec;
pub mod generator;
pub mod tables;
pub mod types;

pub use codec::{decode, decode_verified, encode, punk_id_of, verify_integrity, CodecError};
pub use generator::{generate, GeneratedPunk};
pub use types::{CompressedPunk, PunkId, PunkMetadata, PunkType};

/// Length of the canonical on-chain payload.
pub const PAYLOAD_LEN: usize = 6;
