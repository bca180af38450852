use bitcoin::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use punks_core::{CompressedPunk, PunkId};

/// Location of a VTXO. Volatile: Ark refresh rounds rewrite it for
/// still-unspent outputs, so nothing but the deposit-verification instant may
/// key on it. A punk's durable identity is its [`PunkId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VtxoOutpoint {
    pub txid: String,
    pub vout: u32,
}

impl fmt::Display for VtxoOutpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("outpoint must be `txid:vout`, got `{0}`")]
pub struct OutpointParseError(String);

impl FromStr for VtxoOutpoint {
    type Err = OutpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s.rsplit_once(':').ok_or_else(|| OutpointParseError(s.into()))?;
        if txid.is_empty() {
            return Err(OutpointParseError(s.into()));
        }
        let vout = vout.parse().map_err(|_| OutpointParseError(s.into()))?;
        Ok(Self {
            txid: txid.to_string(),
            vout,
        })
    }
}

/// A virtual UTXO as reported by the Ark wallet daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vtxo {
    pub outpoint: VtxoOutpoint,
    pub address: String,
    pub amount_sats: u64,
    /// Not yet part of a settled round.
    #[serde(default)]
    pub is_preconfirmed: bool,
    #[serde(default)]
    pub is_spent: bool,
}

/// The full off-chain state a punk VTXO carries.
#[derive(Debug, Clone)]
pub struct PunkVtxo {
    pub punk_id: PunkId,
    pub owner: XOnlyPublicKey,
    pub server_pubkey: XOnlyPublicKey,
    /// 0 means not listed.
    pub listing_price: u64,
    pub compressed: CompressedPunk,
    /// The reserve value in sats.
    pub value: u64,
}

impl PunkVtxo {
    pub fn is_listed(&self) -> bool {
        self.listing_price > 0
    }
}
