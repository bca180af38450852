//! Escrow state machine and atomic swap.
//!
//! Listings walk `pending -> deposited -> sold | cancelled`. The execute
//! path follows a lock-then-pay discipline: ownership commits to the buyer
//! in one registry transaction first, and only then do the payment and
//! reserve-refund sends go out. A failed payment therefore never leaves the
//! punk double-owned; it leaves a `PAYMENT_FAILED:` sentinel where the
//! payment txid belongs, an audit row, and an operator problem instead of a
//! protocol one.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::audit::{AuditAction, AuditEntry, AuditStatus};
use crate::error::Error;
use crate::locks::{PunkGuard, PunkLocks};
use crate::store::{self, now_ts, ListingRow, ListingStatus, SaleRow, Store};
use punks_ark::{ArkClient, PunkTxBuilder, VtxoOutpoint};
use punks_core::PunkId;

/// Floor for a reserve-claim payout; dust-sized repairs are not worth a
/// wallet round.
const MIN_RESERVE_CLAIM_SATS: u64 = 1_000;

/// Sentinel prefix recorded instead of a payment txid when the send failed
/// after the ownership commit.
pub const PAYMENT_FAILED_PREFIX: &str = "PAYMENT_FAILED";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub punk_id: PunkId,
    pub seller_pubkey: String,
    pub seller_ark_address: String,
    pub price: u64,
    #[serde(default)]
    pub compressed_metadata: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub punk_id: PunkId,
    pub buyer_pubkey: String,
    pub buyer_ark_address: String,
    /// Buyer-supplied payment txid; demanded when the deployment enables
    /// payment correlation, otherwise recorded if present.
    #[serde(default)]
    pub payment_txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyQuote {
    pub punk_id: PunkId,
    pub price_sats: u64,
    pub escrow_address: String,
    /// What the buyer must transfer: the listing price.
    pub amount_due_sats: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutcome {
    pub punk_id: PunkId,
    pub buyer_address: String,
    pub price_sats: u64,
    pub fee_sats: u64,
    pub payment_txid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_return_txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub punk_id: PunkId,
    pub status: ListingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveClaimOutcome {
    pub address: String,
    pub claimed_sats: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowInfo {
    pub escrow_address: String,
    pub escrow_pubkey: String,
    pub reserve_sats: u64,
    pub fee_percent: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesStats {
    pub count: u64,
    pub floor_price: Option<u64>,
    pub highest_price: Option<u64>,
    pub total_volume: u64,
    pub average_price: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesReport {
    pub sales: Vec<SaleRow>,
    pub stats: SalesStats,
}

pub struct EscrowService {
    store: Arc<Store>,
    ark: Arc<dyn ArkClient>,
    tx_builder: PunkTxBuilder,
    locks: Arc<PunkLocks>,
    /// One VTXO-spend at a time: concurrent sends on the escrow wallet leave
    /// stale preconfirmed outputs behind.
    wallet_lock: tokio::sync::Mutex<()>,
    escrow_address: String,
    escrow_pubkey: String,
    reserve_sats: u64,
    fee_percent: u64,
    require_payment_txid: bool,
}

impl EscrowService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        ark: Arc<dyn ArkClient>,
        tx_builder: PunkTxBuilder,
        locks: Arc<PunkLocks>,
        escrow_address: String,
        escrow_pubkey: String,
        reserve_sats: u64,
        fee_percent: u64,
        require_payment_txid: bool,
    ) -> Self {
        Self {
            store,
            ark,
            tx_builder,
            locks,
            wallet_lock: tokio::sync::Mutex::new(()),
            escrow_address,
            escrow_pubkey,
            reserve_sats,
            fee_percent,
            require_payment_txid,
        }
    }

    pub fn info(&self) -> EscrowInfo {
        EscrowInfo {
            escrow_address: self.escrow_address.clone(),
            escrow_pubkey: self.escrow_pubkey.clone(),
            reserve_sats: self.reserve_sats,
            fee_percent: self.fee_percent,
        }
    }

    fn fee(&self, price: u64) -> u64 {
        price * self.fee_percent / 100
    }

    fn acquire(&self, punk_id: &PunkId) -> Result<PunkGuard, Error> {
        self.locks.try_acquire(punk_id).ok_or_else(|| {
            Error::PreconditionFailed("another operation on this punk is in flight".into())
        })
    }

    fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry) {
            error!(error = %e, action = entry.action.as_str(), "audit write failed");
        }
    }

    /// Open a listing in `pending`.
    #[instrument(skip(self, request), fields(punk_id = %request.punk_id, price = request.price))]
    pub fn create_listing(&self, request: &ListRequest) -> Result<ListingRow, Error> {
        if request.price == 0 {
            return Err(Error::InvalidArgument("listing price must be positive".into()));
        }
        let _guard = self.acquire(&request.punk_id)?;

        let punk = self
            .store
            .with_conn(|c| store::get_punk(c, &request.punk_id))?
            .ok_or_else(|| Error::NotFound(format!("punk {}", request.punk_id)))?;
        if punk.owner_address != request.seller_ark_address {
            return Err(Error::Forbidden(format!(
                "punk {} is not owned by {}",
                request.punk_id, request.seller_ark_address
            )));
        }

        let row = ListingRow {
            punk_id: request.punk_id,
            seller_address: request.seller_ark_address.clone(),
            seller_pubkey: request.seller_pubkey.clone(),
            price_sats: request.price,
            status: ListingStatus::Pending,
            escrow_address: self.escrow_address.clone(),
            punk_vtxo_outpoint: None,
            created_at: now_ts(),
            deposited_at: None,
            sold_at: None,
            cancelled_at: None,
            buyer_address: None,
            buyer_pubkey: None,
            payment_txid: None,
            deposit_return_txid: None,
            compressed_metadata: request.compressed_metadata.clone(),
        };

        self.store.with_tx_app(|tx| {
            if let Some(existing) = store::get_listing(tx, &request.punk_id)? {
                if !existing.status.is_terminal() {
                    return Err(Error::Conflict(format!(
                        "punk {} already has a {} listing",
                        request.punk_id,
                        existing.status.as_str()
                    )));
                }
            }
            store::put_listing(tx, &row)?;
            Ok(())
        })?;

        self.audit(
            AuditEntry::new(AuditAction::ListCreated, AuditStatus::Success)
                .punk(request.punk_id)
                .seller(&request.seller_ark_address)
                .amount(request.price),
        );
        info!("listing created");
        Ok(row)
    }

    /// Seller claims the punk VTXO has landed in the escrow wallet; verify
    /// it against live wallet state before trusting the claim.
    #[instrument(skip(self), fields(%punk_id))]
    pub async fn confirm_deposit(
        &self,
        punk_id: &PunkId,
        outpoint: &str,
    ) -> Result<ListingRow, Error> {
        let _guard = self.acquire(punk_id)?;

        let listing = self
            .store
            .with_conn(|c| store::get_listing(c, punk_id))?
            .ok_or_else(|| Error::NotFound(format!("listing for {punk_id}")))?;
        if listing.status != ListingStatus::Pending {
            return Err(Error::PreconditionFailed(format!(
                "listing is {}, expected pending",
                listing.status.as_str()
            )));
        }

        let claimed: VtxoOutpoint = outpoint
            .parse()
            .map_err(|e| Error::InvalidArgument(format!("{e}")))?;

        if let Err(e) = self.verify_deposit(&claimed).await {
            self.audit(
                AuditEntry::new(AuditAction::DepositConfirmed, AuditStatus::Failed)
                    .punk(*punk_id)
                    .seller(&listing.seller_address)
                    .error(e.to_string()),
            );
            return Err(e);
        }

        self.store
            .with_tx(|tx| store::mark_deposited(tx, punk_id, outpoint, now_ts()))?;
        self.audit(
            AuditEntry::new(AuditAction::DepositConfirmed, AuditStatus::Success)
                .punk(*punk_id)
                .seller(&listing.seller_address)
                .amount(self.reserve_sats)
                .txid(claimed.txid.clone()),
        );
        info!(outpoint, "deposit verified");

        Ok(self
            .store
            .with_conn(|c| store::get_listing(c, punk_id))?
            .ok_or_else(|| Error::Internal("listing vanished mid-update".into()))?)
    }

    /// The deposit is real when an unspent VTXO sits at the claimed outpoint
    /// with exactly the reserve value. Equality, not at-least: a mis-sized
    /// deposit is caught here rather than at settlement.
    async fn verify_deposit(&self, claimed: &VtxoOutpoint) -> Result<(), Error> {
        let vtxos = self.ark.get_vtxos().await?;
        let found = vtxos
            .iter()
            .find(|v| !v.is_spent && v.outpoint == *claimed)
            .ok_or_else(|| {
                Error::DepositUnverified(format!("no unspent vtxo at {claimed}"))
            })?;
        if found.amount_sats != self.reserve_sats {
            return Err(Error::DepositUnverified(format!(
                "vtxo at {claimed} carries {} sats, expected {}",
                found.amount_sats, self.reserve_sats
            )));
        }
        Ok(())
    }

    /// Quote the buyer: price and where to send it.
    pub fn quote_buy(&self, request: &BuyRequest) -> Result<BuyQuote, Error> {
        let listing = self
            .store
            .with_conn(|c| store::get_listing(c, &request.punk_id))?
            .ok_or_else(|| Error::NotFound(format!("listing for {}", request.punk_id)))?;
        if listing.status != ListingStatus::Deposited {
            return Err(Error::PreconditionFailed(format!(
                "listing is {}, expected deposited",
                listing.status.as_str()
            )));
        }
        Ok(BuyQuote {
            punk_id: request.punk_id,
            price_sats: listing.price_sats,
            escrow_address: self.escrow_address.clone(),
            amount_due_sats: listing.price_sats,
        })
    }

    /// Run the atomic swap.
    ///
    /// Ordering is the whole point:
    /// 1. one registry transaction moves ownership to the buyer, appends
    ///    history and records the buyer on the listing — the commit point;
    /// 2. the payment leg pays the seller `price - fee`;
    /// 3. the reserve leg returns the deposit;
    /// 4. the listing is finalised `sold` and audited.
    ///
    /// A send failure after step 1 keeps the punk with the buyer, writes the
    /// `PAYMENT_FAILED:` sentinel and surfaces as an upstream error.
    #[instrument(skip(self, request), fields(punk_id = %request.punk_id, buyer = %request.buyer_ark_address))]
    pub async fn execute(&self, request: &BuyRequest) -> Result<ExecuteOutcome, Error> {
        let punk_id = request.punk_id;
        let _guard = self.acquire(&punk_id)?;

        let listing = self
            .store
            .with_conn(|c| store::get_listing(c, &punk_id))?
            .ok_or_else(|| Error::NotFound(format!("listing for {punk_id}")))?;
        if listing.status != ListingStatus::Deposited {
            return Err(Error::PreconditionFailed(format!(
                "listing is {}, expected deposited",
                listing.status.as_str()
            )));
        }
        if listing.payment_txid.is_some() || listing.sold_at.is_some() {
            return Err(Error::PreconditionFailed(
                "payment already attempted for this listing".into(),
            ));
        }
        if self.require_payment_txid && request.payment_txid.is_none() {
            return Err(Error::InvalidArgument(
                "paymentTxid is required by this deployment".into(),
            ));
        }

        // The buyer's payment must already sit in the escrow wallet.
        let balance = self.ark.get_balance().await?;
        if balance < listing.price_sats {
            return Err(Error::InsufficientFunds {
                needed: listing.price_sats,
                available: balance,
            });
        }

        let price = listing.price_sats;
        let fee = self.fee(price);
        let seller = listing.seller_address.clone();
        let ts = now_ts();

        // Step 1: the commit point.
        self.store.with_tx_app(|tx| {
            let punk = store::get_punk(tx, &punk_id)?
                .ok_or_else(|| Error::NotFound(format!("punk {punk_id}")))?;
            if punk.owner_address != seller {
                return Err(Error::Conflict(format!(
                    "listing seller {seller} no longer owns punk {punk_id}"
                )));
            }
            store::update_owner(tx, &punk_id, &request.buyer_ark_address, ts)?;
            store::append_history(tx, &punk_id, Some(&seller), &request.buyer_ark_address, ts)?;
            store::set_buyer(
                tx,
                &punk_id,
                &request.buyer_ark_address,
                &request.buyer_pubkey,
                ts,
            )?;
            Ok(())
        })?;
        info!("ownership committed to buyer");

        // Steps 2 and 3: wallet legs, serialised on the escrow wallet.
        let (payment, deposit_return) = {
            let _wallet = self.wallet_lock.lock().await;
            match self.tx_builder.payout(&seller, price - fee).await {
                Ok(txid) => {
                    let refund = match self.tx_builder.payout(&seller, self.reserve_sats).await {
                        Ok(refund_txid) => Some(refund_txid),
                        Err(e) => {
                            warn!(error = %e, "reserve return failed after payment");
                            self.audit(
                                AuditEntry::new(AuditAction::RefundFailed, AuditStatus::Failed)
                                    .punk(punk_id)
                                    .seller(&seller)
                                    .amount(self.reserve_sats)
                                    .error(e.to_string()),
                            );
                            None
                        }
                    };
                    (Ok(txid), refund)
                }
                Err(e) => (Err(e), None),
            }
        };

        // Step 4: finalise the listing whatever the sends did.
        match payment {
            Ok(payment_txid) => {
                self.store.with_tx(|tx| {
                    store::finalise_sold(tx, &punk_id, &payment_txid, deposit_return.as_deref())?;
                    store::insert_sale(
                        tx,
                        &punk_id,
                        price,
                        &seller,
                        &request.buyer_ark_address,
                        ts,
                        Some(&payment_txid),
                    )
                })?;
                let mut sale_audit =
                    AuditEntry::new(AuditAction::SaleCompleted, AuditStatus::Success)
                        .punk(punk_id)
                        .seller(&seller)
                        .buyer(&request.buyer_ark_address)
                        .amount(price - fee)
                        .txid(payment_txid.clone());
                if let Some(buyer_txid) = &request.payment_txid {
                    sale_audit =
                        sale_audit.details(serde_json::json!({ "buyerPaymentTxid": buyer_txid }));
                }
                self.audit(sale_audit);
                if let Some(refund_txid) = &deposit_return {
                    self.audit(
                        AuditEntry::new(AuditAction::ReserveReturned, AuditStatus::Success)
                            .punk(punk_id)
                            .seller(&seller)
                            .amount(self.reserve_sats)
                            .txid(refund_txid.clone()),
                    );
                }
                info!(price, fee, "sale completed");
                Ok(ExecuteOutcome {
                    punk_id,
                    buyer_address: request.buyer_ark_address.clone(),
                    price_sats: price,
                    fee_sats: fee,
                    payment_txid,
                    deposit_return_txid: deposit_return,
                })
            }
            Err(e) => {
                let sentinel = format!("{PAYMENT_FAILED_PREFIX}: {e}");
                self.store
                    .with_tx(|tx| store::finalise_sold(tx, &punk_id, &sentinel, None))?;
                self.audit(
                    AuditEntry::new(AuditAction::PaymentFailed, AuditStatus::Failed)
                        .punk(punk_id)
                        .seller(&seller)
                        .buyer(&request.buyer_ark_address)
                        .amount(price - fee)
                        .error(e.to_string()),
                );
                error!(error = %e, "payment failed after ownership commit");
                Err(Error::UpstreamFailure(format!(
                    "punk transferred but seller payment failed: {e}"
                )))
            }
        }
    }

    /// Cancel a listing. A deposited listing is only cancelled once the
    /// reserve refund has a txid; a failed refund leaves it deposited for a
    /// retry.
    #[instrument(skip(self), fields(%punk_id))]
    pub async fn cancel(
        &self,
        punk_id: &PunkId,
        seller_address: &str,
    ) -> Result<CancelOutcome, Error> {
        let _guard = self.acquire(punk_id)?;

        let listing = self
            .store
            .with_conn(|c| store::get_listing(c, punk_id))?
            .ok_or_else(|| Error::NotFound(format!("listing for {punk_id}")))?;
        if listing.seller_address != seller_address {
            return Err(Error::Forbidden(
                "only the seller may cancel a listing".into(),
            ));
        }

        match listing.status {
            ListingStatus::Pending => {
                self.store
                    .with_tx(|tx| store::mark_cancelled(tx, punk_id, None, now_ts()))?;
                self.audit(
                    AuditEntry::new(AuditAction::ListingCancelled, AuditStatus::Success)
                        .punk(*punk_id)
                        .seller(seller_address),
                );
                info!("pending listing cancelled");
                Ok(CancelOutcome {
                    punk_id: *punk_id,
                    status: ListingStatus::Cancelled,
                    refund_txid: None,
                })
            }
            ListingStatus::Deposited => {
                let refund = {
                    let _wallet = self.wallet_lock.lock().await;
                    self.tx_builder
                        .payout(seller_address, self.reserve_sats)
                        .await
                };
                match refund {
                    Ok(txid) => {
                        self.store.with_tx(|tx| {
                            store::mark_cancelled(tx, punk_id, Some(&txid), now_ts())
                        })?;
                        self.audit(
                            AuditEntry::new(AuditAction::ListingCancelled, AuditStatus::Success)
                                .punk(*punk_id)
                                .seller(seller_address)
                                .amount(self.reserve_sats)
                                .txid(txid.clone()),
                        );
                        info!(%txid, "deposited listing cancelled, reserve refunded");
                        Ok(CancelOutcome {
                            punk_id: *punk_id,
                            status: ListingStatus::Cancelled,
                            refund_txid: Some(txid),
                        })
                    }
                    Err(e) => {
                        // Not cancelled: the seller's reserve is still held.
                        self.audit(
                            AuditEntry::new(AuditAction::RefundFailed, AuditStatus::Failed)
                                .punk(*punk_id)
                                .seller(seller_address)
                                .amount(self.reserve_sats)
                                .error(e.to_string()),
                        );
                        error!(error = %e, "refund failed; listing stays deposited");
                        Err(Error::UpstreamFailure(format!(
                            "reserve refund failed, listing not cancelled: {e}"
                        )))
                    }
                }
            }
            status => Err(Error::PreconditionFailed(format!(
                "listing is already {}",
                status.as_str()
            ))),
        }
    }

    /// Operational repair: top a wallet back up to one reserve per punk it
    /// owns. Idempotent; recomputed from registry and balances each call.
    #[instrument(skip(self))]
    pub async fn reserve_claim(
        &self,
        address: &str,
        wallet_balance_sats: u64,
    ) -> Result<ReserveClaimOutcome, Error> {
        let punk_count = self
            .store
            .with_conn(|c| store::count_punks_by_owner(c, address))?;
        let expected = punk_count * self.reserve_sats;
        let missing = expected.saturating_sub(wallet_balance_sats);
        if missing < MIN_RESERVE_CLAIM_SATS {
            return Ok(ReserveClaimOutcome {
                address: address.to_string(),
                claimed_sats: 0,
                txid: None,
            });
        }

        let escrow_balance = self.ark.get_balance().await?;
        let claim = missing.min(escrow_balance);
        if claim < MIN_RESERVE_CLAIM_SATS {
            return Err(Error::InsufficientFunds {
                needed: missing,
                available: escrow_balance,
            });
        }

        let txid = {
            let _wallet = self.wallet_lock.lock().await;
            self.tx_builder.payout(address, claim).await?
        };
        self.audit(
            AuditEntry::new(AuditAction::ReserveClaim, AuditStatus::Success)
                .seller(address)
                .amount(claim)
                .txid(txid.clone())
                .details(serde_json::json!({
                    "punkCount": punk_count,
                    "walletBalanceSats": wallet_balance_sats,
                })),
        );
        info!(claim, "reserve claim paid");
        Ok(ReserveClaimOutcome {
            address: address.to_string(),
            claimed_sats: claim,
            txid: Some(txid),
        })
    }

    pub fn listing(&self, punk_id: &PunkId) -> Result<ListingRow, Error> {
        self.store
            .with_conn(|c| store::get_listing(c, punk_id))?
            .ok_or_else(|| Error::NotFound(format!("listing for {punk_id}")))
    }

    pub fn active_listings(&self) -> Result<Vec<ListingRow>, Error> {
        Ok(self.store.with_conn(store::active_listings)?)
    }

    pub fn sales_report(&self) -> Result<SalesReport, Error> {
        let sales = self.store.with_conn(store::all_sales)?;
        let prices: Vec<u64> = sales.iter().map(|s| s.price_sats).collect();
        let total_volume = prices.iter().sum();
        let stats = SalesStats {
            count: sales.len() as u64,
            floor_price: prices.iter().min().copied(),
            highest_price: prices.iter().max().copied(),
            total_volume,
            average_price: if prices.is_empty() {
                None
            } else {
                Some(total_volume / prices.len() as u64)
            },
        };
        Ok(SalesReport { sales, stats })
    }
}
