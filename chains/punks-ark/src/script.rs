//! Punk Taproot script model.
//!
//! Every punk VTXO sits at a P2TR output whose internal key is the BIP-341
//! NUMS point, so the key path is provably unusable and every spend must
//! reveal one of three leaves:
//!
//! - transfer: `<owner> OP_CHECKSIGVERIFY <server> OP_CHECKSIG`
//! - buy:      `<server> OP_CHECKSIG`
//! - list:     `<owner> OP_CHECKSIGVERIFY <server> OP_CHECKSIG`
//!
//! The derived address is a pure function of `(owner, server)`.

use bitcoin::opcodes::all::{OP_CHECKSIG, OP_CHECKSIGVERIFY};
use bitcoin::script::Builder as ScriptBuilder;
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, ScriptBuf, XOnlyPublicKey};
use once_cell::sync::Lazy;
use std::str::FromStr;

/// The BIP-341 "nothing up my sleeve" point. Using it as the internal key
/// makes the key path unspendable.
pub static UNSPENDABLE_INTERNAL_KEY: Lazy<XOnlyPublicKey> = Lazy::new(|| {
    XOnlyPublicKey::from_str("50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0")
        .expect("NUMS point is a valid x-only key")
});

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to build the punk taproot tree")]
    TreeBuild,
    #[error("no control block for the {0:?} leaf")]
    MissingControlBlock(PunkLeaf),
}

/// The three spending paths of a punk output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunkLeaf {
    Transfer,
    Buy,
    List,
}

/// Leaf script gating a transfer: owner consents, server co-signs.
pub fn transfer_script(owner: &XOnlyPublicKey, server: &XOnlyPublicKey) -> ScriptBuf {
    ScriptBuilder::new()
        .push_x_only_key(owner)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(server)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Leaf script for the atomic-buy path. Server-only: buyer/seller coherence
/// is enforced by the escrow policy on the spending transaction, not in
/// script.
pub fn buy_script(server: &XOnlyPublicKey) -> ScriptBuf {
    ScriptBuilder::new()
        .push_x_only_key(server)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Leaf script gating a listing-price update. Same predicate as the transfer
/// leaf: the listing price itself lives in the produced VTXO's state, so the
/// script only has to prove owner consent plus server co-signature.
pub fn list_script(owner: &XOnlyPublicKey, server: &XOnlyPublicKey) -> ScriptBuf {
    ScriptBuilder::new()
        .push_x_only_key(owner)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(server)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Finalized punk output: address, tree and per-leaf scripts.
pub struct PunkSpendInfo {
    pub address: Address,
    pub spend_info: TaprootSpendInfo,
    transfer: ScriptBuf,
    buy: ScriptBuf,
    list: ScriptBuf,
}

impl PunkSpendInfo {
    pub fn leaf_script(&self, leaf: PunkLeaf) -> &ScriptBuf {
        match leaf {
            PunkLeaf::Transfer => &self.transfer,
            PunkLeaf::Buy => &self.buy,
            PunkLeaf::List => &self.list,
        }
    }

    /// Control block proving a leaf's inclusion in the tree, needed in the
    /// witness of a script-path spend.
    pub fn control_block(&self, leaf: PunkLeaf) -> Result<ControlBlock, ScriptError> {
        self.spend_info
            .control_block(&(self.leaf_script(leaf).clone(), LeafVersion::TapScript))
            .ok_or(ScriptError::MissingControlBlock(leaf))
    }
}

/// Build the taproot output for a punk held by `owner`.
///
/// The transfer leaf sits at depth 1 (the hot path, shortest proof); buy and
/// list share depth 2.
pub fn punk_spend_info<C: Verification>(
    secp: &Secp256k1<C>,
    owner: &XOnlyPublicKey,
    server: &XOnlyPublicKey,
    network: Network,
) -> Result<PunkSpendInfo, ScriptError> {
    let transfer = transfer_script(owner, server);
    let buy = buy_script(server);
    let list = list_script(owner, server);

    let spend_info = TaprootBuilder::new()
        .add_leaf(1, transfer.clone())
        .map_err(|_| ScriptError::TreeBuild)?
        .add_leaf(2, buy.clone())
        .map_err(|_| ScriptError::TreeBuild)?
        .add_leaf(2, list.clone())
        .map_err(|_| ScriptError::TreeBuild)?
        .finalize(secp, *UNSPENDABLE_INTERNAL_KEY)
        .map_err(|_| ScriptError::TreeBuild)?;

    let address = Address::p2tr(
        secp,
        *UNSPENDABLE_INTERNAL_KEY,
        spend_info.merkle_root(),
        network,
    );

    Ok(PunkSpendInfo {
        address,
        spend_info,
        transfer,
        buy,
        list,
    })
}

/// Derive only the address for `(owner, server)`.
pub fn punk_address<C: Verification>(
    secp: &Secp256k1<C>,
    owner: &XOnlyPublicKey,
    server: &XOnlyPublicKey,
    network: Network,
) -> Result<Address, ScriptError> {
    Ok(punk_spend_info(secp, owner, server, network)?.address)
}
