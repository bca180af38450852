//! Deterministic punk generation.
//!
//! A seed string is hashed and the digest folded into the 32-bit state of a
//! linear-congruential generator; every draw after that is a pure function of
//! the seed. Identical seeds produce bit-identical punks, including the id.

use sha2::{Digest, Sha256};

use crate::codec::{encode, punk_id_of};
use crate::tables;
use crate::types::{CompressedPunk, PunkId, PunkMetadata, PunkType};

const LCG_MULTIPLIER: u32 = 1_103_515_245;
const LCG_INCREMENT: u32 = 12_345;

/// Retries per attribute slot before giving up on filling it.
const MAX_ATTRIBUTE_RETRIES: usize = 100;

/// A generated punk: decoded metadata, canonical payload and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPunk {
    pub metadata: PunkMetadata,
    pub compressed: CompressedPunk,
    pub punk_id: PunkId,
}

struct Lcg {
    state: u32,
}

impl Lcg {
    /// Fold the 32 digest bytes into the initial state. Zero is coerced to
    /// one so the generator never sticks at the fixed point.
    fn from_digest(digest: &[u8; 32]) -> Self {
        let mut state: u32 = 0;
        for &byte in digest {
            state = state.wrapping_mul(31).wrapping_add(byte as u32);
        }
        Self {
            state: if state == 0 { 1 } else { state },
        }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Uniform draw in `[0, 1)`.
    fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }

    /// Uniform index in `[0, len)`.
    fn next_index(&mut self, len: usize) -> usize {
        (self.next_f64() * len as f64) as usize
    }
}

fn roll_type(roll: f64) -> PunkType {
    if roll < 0.01 {
        PunkType::Alien
    } else if roll < 0.03 {
        PunkType::Ape
    } else if roll < 0.06 {
        PunkType::Zombie
    } else if roll < 0.53 {
        PunkType::Male
    } else {
        PunkType::Female
    }
}

/// Generate the punk determined by `seed`.
pub fn generate(seed: &str) -> GeneratedPunk {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    let mut rng = Lcg::from_digest(&digest);

    let punk_type = roll_type(rng.next_f64());
    let background = rng.next_index(tables::BACKGROUNDS.len()) as u8;

    let table = punk_type.attribute_table();
    let count = 2 + rng.next_index(4);

    let mut attributes: Vec<u8> = Vec::with_capacity(count);
    'slots: for _ in 0..count {
        for _ in 0..MAX_ATTRIBUTE_RETRIES {
            let index = rng.next_index(table.len()) as u8;
            if !attributes.contains(&index) {
                attributes.push(index);
                continue 'slots;
            }
        }
        // Slot could not be filled; keep the set obtained so far.
        break;
    }
    attributes.sort_unstable();

    let metadata = PunkMetadata {
        punk_type,
        background,
        attributes,
    };
    let compressed = encode(&metadata).expect("generated metadata stays inside the trait tables");
    let punk_id = punk_id_of(&compressed);

    GeneratedPunk {
        metadata,
        compressed,
        punk_id,
    }
}
