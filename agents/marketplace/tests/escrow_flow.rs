//! End-to-end marketplace flows against an in-memory store and a scripted
//! Ark wallet.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marketplace::audit::AuditStatus;
use marketplace::error::Error;
use marketplace::escrow::{BuyRequest, EscrowService, ListRequest, PAYMENT_FAILED_PREFIX};
use marketplace::locks::PunkLocks;
use marketplace::registry::Registry;
use marketplace::signer::ServerSigner;
use marketplace::store::{self, ListingStatus, Store};
use punks_ark::{ArkClient, ArkClientError, PunkTxBuilder, Vtxo, VtxoOutpoint};
use punks_core::PunkId;

const RESERVE: u64 = 10_000;
const PRICE: u64 = 50_000;
const SELLER: &str = "ark1seller";
const BUYER: &str = "ark1buyer";
const ESCROW: &str = "ark1escrow";

/// Scripted Ark wallet: configurable balance and VTXO set, optional send
/// failures, every send recorded.
struct MockArk {
    balance: AtomicU64,
    vtxos: Mutex<Vec<Vtxo>>,
    /// Number of upcoming sends that must fail.
    fail_sends: AtomicUsize,
    sends: Mutex<Vec<(String, u64)>>,
    txid_counter: AtomicUsize,
}

impl MockArk {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            balance: AtomicU64::new(0),
            vtxos: Mutex::new(Vec::new()),
            fail_sends: AtomicUsize::new(0),
            sends: Mutex::new(Vec::new()),
            txid_counter: AtomicUsize::new(0),
        })
    }

    fn set_balance(&self, sats: u64) {
        self.balance.store(sats, Ordering::SeqCst);
    }

    fn add_vtxo(&self, txid: &str, vout: u32, amount_sats: u64) {
        self.vtxos.lock().unwrap().push(Vtxo {
            outpoint: VtxoOutpoint {
                txid: txid.to_string(),
                vout,
            },
            address: ESCROW.to_string(),
            amount_sats,
            is_preconfirmed: false,
            is_spent: false,
        });
    }

    fn fail_next_sends(&self, count: usize) {
        self.fail_sends.store(count, Ordering::SeqCst);
    }

    fn sends(&self) -> Vec<(String, u64)> {
        self.sends.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArkClient for MockArk {
    async fn send(&self, address: &str, amount_sats: u64) -> Result<String, ArkClientError> {
        let remaining = self.fail_sends.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_sends.store(remaining - 1, Ordering::SeqCst);
            return Err(ArkClientError::Api {
                status: 503,
                message: "wallet unavailable".into(),
            });
        }
        self.sends
            .lock()
            .unwrap()
            .push((address.to_string(), amount_sats));
        let n = self.txid_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-txid-{n}"))
    }

    async fn get_vtxos(&self) -> Result<Vec<Vtxo>, ArkClientError> {
        Ok(self.vtxos.lock().unwrap().clone())
    }

    async fn get_balance(&self) -> Result<u64, ArkClientError> {
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn get_boarding_address(&self) -> Result<String, ArkClientError> {
        Ok("bc1qboarding".to_string())
    }
}

struct Harness {
    store: Arc<Store>,
    ark: Arc<MockArk>,
    registry: Registry,
    escrow: Arc<EscrowService>,
}

fn harness(fee_percent: u64, require_payment_txid: bool) -> Harness {
    let store = Arc::new(Store::in_memory().unwrap());
    let signer = Arc::new(ServerSigner::from_hex(&"42".repeat(32)).unwrap());
    let locks = Arc::new(PunkLocks::new());
    let ark = MockArk::new();
    let ark_dyn: Arc<dyn ArkClient> = ark.clone();

    let registry = Registry::new(
        store.clone(),
        signer.clone(),
        locks.clone(),
        2016,
        HashSet::new(),
    );
    let tx_builder = PunkTxBuilder::new(
        ark_dyn.clone(),
        signer.pubkey(),
        bitcoin::Network::Regtest,
        RESERVE,
    );
    let escrow = Arc::new(EscrowService::new(
        store.clone(),
        ark_dyn,
        tx_builder,
        locks,
        ESCROW.to_string(),
        "ab".repeat(32),
        RESERVE,
        fee_percent,
        require_payment_txid,
    ));

    Harness {
        store,
        ark,
        registry,
        escrow,
    }
}

fn punk(seed: u8) -> PunkId {
    PunkId::from_bytes([seed; 32])
}

fn list_request(id: PunkId) -> ListRequest {
    ListRequest {
        punk_id: id,
        seller_pubkey: "aa".repeat(32),
        seller_ark_address: SELLER.to_string(),
        price: PRICE,
        compressed_metadata: None,
    }
}

fn buy_request(id: PunkId) -> BuyRequest {
    BuyRequest {
        punk_id: id,
        buyer_pubkey: "bb".repeat(32),
        buyer_ark_address: BUYER.to_string(),
        payment_txid: None,
    }
}

/// Seed a punk, list it, verify the deposit.
async fn listed_and_deposited(h: &Harness, id: PunkId) {
    h.registry.record_punk(id, SELLER, None, None).unwrap();
    h.escrow.create_listing(&list_request(id)).unwrap();
    h.ark.add_vtxo("deposit-txid", 0, RESERVE);
    h.escrow.confirm_deposit(&id, "deposit-txid:0").await.unwrap();
}

fn owner_of(h: &Harness, id: PunkId) -> String {
    h.store
        .with_conn(|c| store::get_punk(c, &id))
        .unwrap()
        .unwrap()
        .owner_address
}

fn failed_audit_rows(h: &Harness) -> u64 {
    h.store
        .with_conn(|c| store::count_audit_with_status(c, AuditStatus::Failed))
        .unwrap()
}

#[tokio::test]
async fn list_then_cancel_pending_triggers_no_refund() {
    let h = harness(0, false);
    let id = punk(1);
    h.registry.record_punk(id, SELLER, None, None).unwrap();

    let listing = h.escrow.create_listing(&list_request(id)).unwrap();
    assert_eq!(listing.status, ListingStatus::Pending);

    let outcome = h.escrow.cancel(&id, SELLER).await.unwrap();
    assert_eq!(outcome.status, ListingStatus::Cancelled);
    assert_eq!(outcome.refund_txid, None);
    assert!(h.ark.sends().is_empty(), "no refund path for pending listings");
}

#[tokio::test]
async fn listing_guards() {
    let h = harness(0, false);
    let id = punk(1);

    // Unknown punk.
    assert!(matches!(
        h.escrow.create_listing(&list_request(id)),
        Err(Error::NotFound(_))
    ));

    h.registry.record_punk(id, "ark1someoneelse", None, None).unwrap();
    // Not the owner.
    assert!(matches!(
        h.escrow.create_listing(&list_request(id)),
        Err(Error::Forbidden(_))
    ));

    let id2 = punk(2);
    h.registry.record_punk(id2, SELLER, None, None).unwrap();
    // Zero price.
    let mut zero = list_request(id2);
    zero.price = 0;
    assert!(matches!(
        h.escrow.create_listing(&zero),
        Err(Error::InvalidArgument(_))
    ));

    h.escrow.create_listing(&list_request(id2)).unwrap();
    // Second live listing for the same punk.
    assert!(matches!(
        h.escrow.create_listing(&list_request(id2)),
        Err(Error::Conflict(_))
    ));
}

#[tokio::test]
async fn deposit_is_verified_against_wallet_state() {
    let h = harness(0, false);
    let id = punk(1);
    h.registry.record_punk(id, SELLER, None, None).unwrap();
    h.escrow.create_listing(&list_request(id)).unwrap();

    // Claimed outpoint does not exist.
    let err = h.escrow.confirm_deposit(&id, "missing-txid:0").await.unwrap_err();
    assert!(matches!(err, Error::DepositUnverified(_)));
    assert_eq!(h.escrow.listing(&id).unwrap().status, ListingStatus::Pending);
    assert_eq!(failed_audit_rows(&h), 1);

    // Mis-sized deposit: equality, not at-least.
    h.ark.add_vtxo("short-txid", 0, RESERVE - 1_000);
    let err = h.escrow.confirm_deposit(&id, "short-txid:0").await.unwrap_err();
    assert!(matches!(err, Error::DepositUnverified(_)));
    assert_eq!(h.escrow.listing(&id).unwrap().status, ListingStatus::Pending);
    assert_eq!(failed_audit_rows(&h), 2);

    // Exact reserve verifies.
    h.ark.add_vtxo("good-txid", 1, RESERVE);
    let listing = h.escrow.confirm_deposit(&id, "good-txid:1").await.unwrap();
    assert_eq!(listing.status, ListingStatus::Deposited);
    assert_eq!(listing.punk_vtxo_outpoint.as_deref(), Some("good-txid:1"));
}

#[tokio::test]
async fn execute_happy_path_pays_seller_and_returns_reserve() {
    let h = harness(0, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE + RESERVE);

    let quote = h.escrow.quote_buy(&buy_request(id)).unwrap();
    assert_eq!(quote.amount_due_sats, PRICE);
    assert_eq!(quote.escrow_address, ESCROW);

    let outcome = h.escrow.execute(&buy_request(id)).await.unwrap();
    assert_eq!(outcome.price_sats, PRICE);
    assert_eq!(outcome.fee_sats, 0);
    assert!(outcome.deposit_return_txid.is_some());

    // Ownership moved at the commit point.
    assert_eq!(owner_of(&h, id), BUYER);

    // Seller got the full price (fee 0) and the reserve back.
    assert_eq!(
        h.ark.sends(),
        vec![(SELLER.to_string(), PRICE), (SELLER.to_string(), RESERVE)]
    );

    let listing = h.escrow.listing(&id).unwrap();
    assert_eq!(listing.status, ListingStatus::Sold);
    assert_eq!(listing.buyer_address.as_deref(), Some(BUYER));
    assert!(listing.payment_txid.is_some());

    // History records seller -> buyer.
    let history = h.store.with_conn(|c| store::history_for(c, &id)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].from_addr.as_deref(), Some(SELLER));
    assert_eq!(history[1].to_addr, BUYER);

    // Sale row and two SUCCESS audit rows (payment + reserve return).
    let report = h.escrow.sales_report().unwrap();
    assert_eq!(report.sales.len(), 1);
    assert_eq!(report.stats.total_volume, PRICE);
    let success = h
        .store
        .with_conn(|c| store::count_audit_with_status(c, AuditStatus::Success))
        .unwrap();
    // LIST_CREATED + DEPOSIT_CONFIRMED + SALE_COMPLETED + RESERVE_RETURNED
    assert_eq!(success, 4);
}

#[tokio::test]
async fn one_percent_fee_reduces_the_seller_payment() {
    let h = harness(1, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE + RESERVE);

    let outcome = h.escrow.execute(&buy_request(id)).await.unwrap();
    assert_eq!(outcome.fee_sats, PRICE / 100);
    assert_eq!(
        h.ark.sends()[0],
        (SELLER.to_string(), PRICE - PRICE / 100)
    );
}

#[tokio::test]
async fn payment_failure_still_transfers_the_punk() {
    let h = harness(0, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE + RESERVE);
    h.ark.fail_next_sends(2);

    let err = h.escrow.execute(&buy_request(id)).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamFailure(_)));

    // The commit point already passed: the buyer owns the punk.
    assert_eq!(owner_of(&h, id), BUYER);

    let listing = h.escrow.listing(&id).unwrap();
    assert_eq!(listing.status, ListingStatus::Sold);
    let payment_txid = listing.payment_txid.unwrap();
    assert!(
        payment_txid.starts_with(PAYMENT_FAILED_PREFIX),
        "expected sentinel, got {payment_txid}"
    );
    assert_eq!(failed_audit_rows(&h), 1);

    // A retry is rejected before any wallet traffic.
    let err = h.escrow.execute(&buy_request(id)).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));
    assert!(h.ark.sends().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_execute_has_exactly_one_winner() {
    let h = harness(0, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE + RESERVE);

    let req_a = buy_request(id);
    let req_b = buy_request(id);
    let (a, b) = tokio::join!(
        h.escrow.execute(&req_a),
        h.escrow.execute(&req_b),
    );

    let outcomes = [a, b];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one concurrent execute may succeed");
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser.as_ref().unwrap_err(),
        Error::PreconditionFailed(_)
    ));

    // Only one pair of sends went out.
    assert_eq!(h.ark.sends().len(), 2);
    assert_eq!(owner_of(&h, id), BUYER);
}

#[tokio::test]
async fn execute_requires_the_buyer_payment_in_escrow() {
    let h = harness(0, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE - 1);

    let err = h.escrow.execute(&buy_request(id)).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));
    assert_eq!(owner_of(&h, id), SELLER);
    assert_eq!(h.escrow.listing(&id).unwrap().status, ListingStatus::Deposited);
}

#[tokio::test]
async fn execute_requires_a_verified_deposit() {
    let h = harness(0, false);
    let id = punk(1);
    h.registry.record_punk(id, SELLER, None, None).unwrap();
    h.escrow.create_listing(&list_request(id)).unwrap();
    h.ark.set_balance(PRICE + RESERVE);

    // Still pending: deposit not verified.
    let err = h.escrow.execute(&buy_request(id)).await.unwrap_err();
    assert!(matches!(err, Error::PreconditionFailed(_)));
}

#[tokio::test]
async fn payment_txid_policy_is_enforced_when_enabled() {
    let h = harness(0, true);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.set_balance(PRICE + RESERVE);

    let err = h.escrow.execute(&buy_request(id)).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let mut with_txid = buy_request(id);
    with_txid.payment_txid = Some("buyer-payment-txid".into());
    h.escrow.execute(&with_txid).await.unwrap();
    assert_eq!(owner_of(&h, id), BUYER);
}

#[tokio::test]
async fn failed_refund_leaves_the_listing_deposited() {
    let h = harness(0, false);
    let id = punk(1);
    listed_and_deposited(&h, id).await;
    h.ark.fail_next_sends(1);

    let err = h.escrow.cancel(&id, SELLER).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamFailure(_)));
    assert_eq!(h.escrow.listing(&id).unwrap().status, ListingStatus::Deposited);
    assert_eq!(failed_audit_rows(&h), 1);

    // Operator retry succeeds once the wallet recovers.
    let outcome = h.escrow.cancel(&id, SELLER).await.unwrap();
    assert_eq!(outcome.status, ListingStatus::Cancelled);
    assert_eq!(h.ark.sends(), vec![(SELLER.to_string(), RESERVE)]);
}

#[tokio::test]
async fn cancel_is_seller_only_and_single_shot() {
    let h = harness(0, false);
    let id = punk(1);
    h.registry.record_punk(id, SELLER, None, None).unwrap();
    h.escrow.create_listing(&list_request(id)).unwrap();

    assert!(matches!(
        h.escrow.cancel(&id, "ark1stranger").await.unwrap_err(),
        Error::Forbidden(_)
    ));

    h.escrow.cancel(&id, SELLER).await.unwrap();
    assert!(matches!(
        h.escrow.cancel(&id, SELLER).await.unwrap_err(),
        Error::PreconditionFailed(_)
    ));
}

#[tokio::test]
async fn a_cancelled_punk_can_be_relisted() {
    let h = harness(0, false);
    let id = punk(1);
    h.registry.record_punk(id, SELLER, None, None).unwrap();
    h.escrow.create_listing(&list_request(id)).unwrap();
    h.escrow.cancel(&id, SELLER).await.unwrap();

    let listing = h.escrow.create_listing(&list_request(id)).unwrap();
    assert_eq!(listing.status, ListingStatus::Pending);
    assert_eq!(h.escrow.active_listings().unwrap().len(), 1);
}

#[tokio::test]
async fn reserve_claim_tops_up_underfunded_wallets() {
    let h = harness(0, false);
    for seed in 1..=3 {
        h.registry
            .record_punk(punk(seed), "ark1holder", None, None)
            .unwrap();
    }
    h.ark.set_balance(100_000);

    // Holder owns 3 punks (30k expected) but holds only 5k.
    let outcome = h.escrow.reserve_claim("ark1holder", 5_000).await.unwrap();
    assert_eq!(outcome.claimed_sats, 25_000);
    assert_eq!(h.ark.sends(), vec![("ark1holder".to_string(), 25_000)]);

    // Fully funded wallets are a no-op; the call is idempotent.
    let outcome = h.escrow.reserve_claim("ark1holder", 30_000).await.unwrap();
    assert_eq!(outcome.claimed_sats, 0);
    assert_eq!(outcome.txid, None);

    // Dust-sized gaps stay untouched.
    let outcome = h.escrow.reserve_claim("ark1holder", 29_500).await.unwrap();
    assert_eq!(outcome.claimed_sats, 0);
}

#[tokio::test]
async fn sales_report_aggregates_stats() {
    let h = harness(0, false);
    for (seed, price) in [(1u8, 40_000u64), (2, 60_000)] {
        let id = punk(seed);
        h.registry.record_punk(id, SELLER, None, None).unwrap();
        let mut req = list_request(id);
        req.price = price;
        h.escrow.create_listing(&req).unwrap();
        let txid = format!("dep-{seed}");
        h.ark.add_vtxo(&txid, 0, RESERVE);
        h.escrow
            .confirm_deposit(&id, &format!("{txid}:0"))
            .await
            .unwrap();
        h.ark.set_balance(price + RESERVE);
        h.escrow.execute(&buy_request(id)).await.unwrap();
    }

    let report = h.escrow.sales_report().unwrap();
    assert_eq!(report.stats.count, 2);
    assert_eq!(report.stats.floor_price, Some(40_000));
    assert_eq!(report.stats.highest_price, Some(60_000));
    assert_eq!(report.stats.total_volume, 100_000);
    assert_eq!(report.stats.average_price, Some(50_000));
}
