//! Ark adapter for the ArkPunks workspace.
//!
//! The Ark layer itself is opaque to us: a wallet daemon that can send sats
//! to an Ark address, list the wallet's virtual UTXOs and report a balance.
//! This crate owns everything between that seam and the marketplace agent:
//! the [`ArkClient`] trait and its REST implementation, the punk Taproot
//! script model, and the transaction templates for every punk state
//! transition.

pub mod client;
pub mod conf;
pub mod script;
pub mod tx;
pub mod types;

pub use client::{ArkClient, ArkClientError, ArkRestClient};
pub use conf::{ArkNetwork, ConnectionConf, ConnectionConfError};
pub use script::{PunkLeaf, PunkSpendInfo, ScriptError, UNSPENDABLE_INTERNAL_KEY};
pub use tx::{PunkTxBuilder, TxTemplateError};
pub use types::{PunkVtxo, Vtxo, VtxoOutpoint};
