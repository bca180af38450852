//! Transaction templates for punk state transitions.
//!
//! Two layers live here. The async operations (`mint`, `transfer`, `payout`)
//! resolve to [`ArkClient::send`] calls and are what the marketplace agent
//! drives in production: the Ark layer turns a send into a VTXO spend plus
//! fresh outputs, so value conservation is its concern, not ours. The pure
//! `*_tx` builders construct the on-chain tapscript spends for the same
//! transitions; the buy path among them is not driven by the agent (the
//! escrow flow supersedes it) but stays constructible.
//!
//! Witness layout for a script-path spend, bottom to top:
//! transfer/list `[server_sig, owner_sig, script, control_block]`,
//! buy `[server_sig, script, control_block]`.

use bitcoin::taproot::ControlBlock;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{
    absolute, transaction, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness, XOnlyPublicKey,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::client::{ArkClient, ArkClientError};
use crate::script::{self, PunkLeaf, ScriptError};
use crate::types::{PunkVtxo, Vtxo, VtxoOutpoint};

#[derive(Debug, thiserror::Error)]
pub enum TxTemplateError {
    #[error("punk is not listed")]
    NotListed,
    #[error("insufficient funds: need {needed} sats, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("invalid outpoint: {0}")]
    InvalidOutpoint(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Client(#[from] ArkClientError),
}

/// Result of an Ark-level send that created or moved a punk VTXO.
#[derive(Debug, Clone)]
pub struct ArkSendOutcome {
    pub txid: String,
    pub address: String,
}

/// Builds punk transactions for one deployment (fixed server key, network
/// and reserve).
pub struct PunkTxBuilder {
    client: Arc<dyn ArkClient>,
    secp: Secp256k1<All>,
    server_pubkey: XOnlyPublicKey,
    network: Network,
    reserve_sats: u64,
}

impl PunkTxBuilder {
    pub fn new(
        client: Arc<dyn ArkClient>,
        server_pubkey: XOnlyPublicKey,
        network: Network,
        reserve_sats: u64,
    ) -> Self {
        Self {
            client,
            secp: Secp256k1::new(),
            server_pubkey,
            network,
            reserve_sats,
        }
    }

    /// The taproot address holding a punk owned by `owner`.
    pub fn punk_address(&self, owner: &XOnlyPublicKey) -> Result<String, TxTemplateError> {
        Ok(script::punk_address(&self.secp, owner, &self.server_pubkey, self.network)?
            .to_string())
    }

    /// Mint: fund a fresh punk VTXO at the `(owner, server)` address with
    /// the reserve value.
    #[instrument(skip(self))]
    pub async fn mint(&self, owner: &XOnlyPublicKey) -> Result<ArkSendOutcome, TxTemplateError> {
        let available = self.client.get_balance().await?;
        if available < self.reserve_sats {
            return Err(TxTemplateError::InsufficientFunds {
                needed: self.reserve_sats,
                available,
            });
        }
        let address = self.punk_address(owner)?;
        let txid = self.client.send(&address, self.reserve_sats).await?;
        info!(%txid, %address, "minted punk vtxo");
        Ok(ArkSendOutcome { txid, address })
    }

    /// Transfer: move the punk VTXO held by this wallet to `new_owner`'s
    /// punk address. The produced VTXO is unlisted by construction.
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        new_owner: &XOnlyPublicKey,
    ) -> Result<ArkSendOutcome, TxTemplateError> {
        let address = self.punk_address(new_owner)?;
        let txid = self.client.send(&address, self.reserve_sats).await?;
        info!(%txid, %address, "transferred punk vtxo");
        Ok(ArkSendOutcome { txid, address })
    }

    /// Plain payment leg: pay `amount_sats` to an arbitrary Ark address,
    /// after checking the wallet can cover it.
    #[instrument(skip(self))]
    pub async fn payout(&self, address: &str, amount_sats: u64) -> Result<String, TxTemplateError> {
        let available = self.client.get_balance().await?;
        if available < amount_sats {
            return Err(TxTemplateError::InsufficientFunds {
                needed: amount_sats,
                available,
            });
        }
        Ok(self.client.send(address, amount_sats).await?)
    }

    fn to_outpoint(&self, outpoint: &VtxoOutpoint) -> Result<OutPoint, TxTemplateError> {
        let txid = Txid::from_str(&outpoint.txid)
            .map_err(|_| TxTemplateError::InvalidOutpoint(outpoint.to_string()))?;
        Ok(OutPoint {
            txid,
            vout: outpoint.vout,
        })
    }

    fn unsigned_input(outpoint: OutPoint) -> TxIn {
        TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::default(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }
    }

    fn skeleton(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: transaction::Version(2),
            lock_time: absolute::LockTime::ZERO,
            input: inputs,
            output: outputs,
        }
    }

    /// Tapscript transfer: spend the punk VTXO via the transfer leaf into a
    /// fresh punk output owned by `new_owner`.
    pub fn transfer_tx(
        &self,
        punk: &PunkVtxo,
        at: &VtxoOutpoint,
        new_owner: &XOnlyPublicKey,
    ) -> Result<Transaction, TxTemplateError> {
        let destination =
            script::punk_address(&self.secp, new_owner, &self.server_pubkey, self.network)?;
        Ok(Self::skeleton(
            vec![Self::unsigned_input(self.to_outpoint(at)?)],
            vec![TxOut {
                value: Amount::from_sat(punk.value),
                script_pubkey: destination.script_pubkey(),
            }],
        ))
    }

    /// Tapscript list/delist: spend via the list leaf back to the owner's
    /// own punk address. Returns the transaction and the punk state the new
    /// VTXO carries (price 0 delists).
    pub fn listing_update_tx(
        &self,
        punk: &PunkVtxo,
        at: &VtxoOutpoint,
        listing_price: u64,
    ) -> Result<(Transaction, PunkVtxo), TxTemplateError> {
        let destination =
            script::punk_address(&self.secp, &punk.owner, &self.server_pubkey, self.network)?;
        let tx = Self::skeleton(
            vec![Self::unsigned_input(self.to_outpoint(at)?)],
            vec![TxOut {
                value: Amount::from_sat(punk.value),
                script_pubkey: destination.script_pubkey(),
            }],
        );
        let mut updated = punk.clone();
        updated.listing_price = listing_price;
        Ok((tx, updated))
    }

    /// Tapscript buy: spend the listed punk via the buy leaf together with
    /// the buyer's payment VTXOs. Outputs: the punk at the buyer's address
    /// (unlisted), the listing price to the seller, change back to the
    /// buyer.
    pub fn buy_tx(
        &self,
        punk: &PunkVtxo,
        at: &VtxoOutpoint,
        buyer: &XOnlyPublicKey,
        seller_payment_script: ScriptBuf,
        buyer_change_script: ScriptBuf,
        payment: &[Vtxo],
    ) -> Result<Transaction, TxTemplateError> {
        if !punk.is_listed() {
            return Err(TxTemplateError::NotListed);
        }
        let available: u64 = payment.iter().map(|v| v.amount_sats).sum();
        if available < punk.listing_price {
            return Err(TxTemplateError::InsufficientFunds {
                needed: punk.listing_price,
                available,
            });
        }

        let mut inputs = vec![Self::unsigned_input(self.to_outpoint(at)?)];
        for vtxo in payment {
            inputs.push(Self::unsigned_input(self.to_outpoint(&vtxo.outpoint)?));
        }

        let punk_destination =
            script::punk_address(&self.secp, buyer, &self.server_pubkey, self.network)?;
        let mut outputs = vec![
            TxOut {
                value: Amount::from_sat(punk.value),
                script_pubkey: punk_destination.script_pubkey(),
            },
            TxOut {
                value: Amount::from_sat(punk.listing_price),
                script_pubkey: seller_payment_script,
            },
        ];
        let change = available - punk.listing_price;
        if change > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: buyer_change_script,
            });
        }

        Ok(Self::skeleton(inputs, outputs))
    }

    /// Assemble the witness for a script-path spend of `leaf`.
    ///
    /// `signatures` are pushed in stack order: for the owner-gated leaves
    /// pass `[server_sig, owner_sig]`, for the buy leaf `[server_sig]`.
    pub fn leaf_witness(
        signatures: &[&[u8]],
        leaf_script: &ScriptBuf,
        control_block: &ControlBlock,
    ) -> Witness {
        let mut witness = Witness::new();
        for sig in signatures {
            witness.push(sig);
        }
        witness.push(leaf_script.as_bytes());
        witness.push(control_block.serialize());
        witness
    }

    /// Number of signatures a leaf's witness carries.
    pub fn required_signatures(leaf: PunkLeaf) -> usize {
        match leaf {
            PunkLeaf::Transfer | PunkLeaf::List => 2,
            PunkLeaf::Buy => 1,
        }
    }
}
