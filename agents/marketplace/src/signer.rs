//! Server signing authority.
//!
//! One keypair per deployment, loaded at boot. It co-signs punk leaves at
//! the wallet layer and, here, produces the official-punk attestation: a
//! Schnorr signature over `SHA-256(punk_id bytes)`.

use bitcoin::key::Keypair;
use bitcoin::secp256k1::{schnorr, All, Message, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};

use punks_core::PunkId;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("private key must be 32-byte hex")]
    BadKeyEncoding,
    #[error("private key is not a valid secp256k1 secret")]
    BadKey,
}

pub struct ServerSigner {
    secp: Secp256k1<All>,
    keypair: Keypair,
    pubkey: XOnlyPublicKey,
}

impl std::fmt::Debug for ServerSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSigner")
            .field("pubkey", &self.pubkey)
            .finish()
    }
}

fn attestation_message(punk_id: &PunkId) -> Message {
    let digest: [u8; 32] = Sha256::digest(punk_id.as_bytes()).into();
    Message::from_digest(digest)
}

impl ServerSigner {
    pub fn from_hex(hex_key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex_key).map_err(|_| SignerError::BadKeyEncoding)?;
        if bytes.len() != 32 {
            return Err(SignerError::BadKeyEncoding);
        }
        let secret = SecretKey::from_slice(&bytes).map_err(|_| SignerError::BadKey)?;
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let pubkey = keypair.x_only_public_key().0;
        Ok(Self {
            secp,
            keypair,
            pubkey,
        })
    }

    pub fn pubkey(&self) -> XOnlyPublicKey {
        self.pubkey
    }

    /// Attest a punk id. Deterministic: no auxiliary randomness, so the same
    /// id always yields the same signature.
    pub fn attest(&self, punk_id: &PunkId) -> schnorr::Signature {
        self.secp
            .sign_schnorr_no_aux_rand(&attestation_message(punk_id), &self.keypair)
    }

    pub fn attest_hex(&self, punk_id: &PunkId) -> String {
        hex::encode(self.attest(punk_id).serialize())
    }

    /// Verify an attestation against this deployment's pubkey.
    pub fn verify(&self, punk_id: &PunkId, signature: &schnorr::Signature) -> bool {
        self.secp
            .verify_schnorr(signature, &attestation_message(punk_id), &self.pubkey)
            .is_ok()
    }

    pub fn verify_hex(&self, punk_id: &PunkId, signature_hex: &str) -> bool {
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = schnorr::Signature::from_slice(&bytes) else {
            return false;
        };
        self.verify(punk_id, &signature)
    }
}
