//! Embedded registry store.
//!
//! One SQLite database holds the canonical `punk -> owner` mapping, the
//! ownership history, the marketplace listings, completed sales and the
//! audit log. Every multi-row write goes through [`Store::with_tx`] so the
//! atomicity rules of the escrow flow hold at the storage layer.

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audit::{AuditEntry, AuditStatus};
use punks_core::PunkId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Seconds since the epoch; the store's single clock.
pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Deposited,
    Sold,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ListingStatus::Pending => "pending",
            ListingStatus::Deposited => "deposited",
            ListingStatus::Sold => "sold",
            ListingStatus::Cancelled => "cancelled",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(ListingStatus::Pending),
            "deposited" => Ok(ListingStatus::Deposited),
            "sold" => Ok(ListingStatus::Sold),
            "cancelled" => Ok(ListingStatus::Cancelled),
            other => Err(StoreError::Corrupt(format!("listing status `{other}`"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ListingStatus::Sold | ListingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PunkRow {
    pub punk_id: PunkId,
    pub owner_address: String,
    pub compressed: Option<String>,
    pub server_signature: Option<String>,
    pub minted_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRow {
    pub id: i64,
    pub punk_id: PunkId,
    pub from_addr: Option<String>,
    pub to_addr: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRow {
    pub punk_id: PunkId,
    pub seller_address: String,
    pub seller_pubkey: String,
    pub price_sats: u64,
    pub status: ListingStatus,
    pub escrow_address: String,
    pub punk_vtxo_outpoint: Option<String>,
    pub created_at: i64,
    pub deposited_at: Option<i64>,
    pub sold_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub buyer_address: Option<String>,
    pub buyer_pubkey: Option<String>,
    pub payment_txid: Option<String>,
    pub deposit_return_txid: Option<String>,
    pub compressed_metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRow {
    pub id: i64,
    pub punk_id: PunkId,
    pub price_sats: u64,
    pub seller: String,
    pub buyer: String,
    pub sold_at: i64,
    pub payment_txid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub id: i64,
    pub timestamp: i64,
    pub action: String,
    pub punk_id: Option<String>,
    pub seller: Option<String>,
    pub buyer: Option<String>,
    pub amount_sats: Option<u64>,
    pub txid: Option<String>,
    pub status: String,
    pub error: Option<String>,
    pub details_json: Option<String>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS punks (
    punk_id          TEXT PRIMARY KEY,
    owner_address    TEXT NOT NULL,
    compressed       TEXT,
    server_signature TEXT,
    minted_at        INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_punks_owner ON punks (owner_address);

CREATE TABLE IF NOT EXISTS ownership_history (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    punk_id   TEXT NOT NULL REFERENCES punks (punk_id),
    from_addr TEXT,
    to_addr   TEXT NOT NULL,
    ts        INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_punk ON ownership_history (punk_id);

CREATE TABLE IF NOT EXISTS listings (
    punk_id             TEXT PRIMARY KEY,
    seller_address      TEXT NOT NULL,
    seller_pubkey       TEXT NOT NULL,
    price_sats          INTEGER NOT NULL,
    status              TEXT NOT NULL
                        CHECK (status IN ('pending', 'deposited', 'sold', 'cancelled')),
    escrow_address      TEXT NOT NULL,
    punk_vtxo_outpoint  TEXT,
    created_at          INTEGER NOT NULL,
    deposited_at        INTEGER,
    sold_at             INTEGER,
    cancelled_at        INTEGER,
    buyer_address       TEXT,
    buyer_pubkey        TEXT,
    payment_txid        TEXT,
    deposit_return_txid TEXT,
    compressed_metadata TEXT
);

CREATE TABLE IF NOT EXISTS sales (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    punk_id      TEXT NOT NULL,
    price_sats   INTEGER NOT NULL,
    seller       TEXT NOT NULL,
    buyer        TEXT NOT NULL,
    sold_at      INTEGER NOT NULL,
    payment_txid TEXT
);

CREATE TABLE IF NOT EXISTS audit_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp    INTEGER NOT NULL,
    action       TEXT NOT NULL,
    punk_id      TEXT,
    seller       TEXT,
    buyer        TEXT,
    amount_sats  INTEGER,
    txid         TEXT,
    status       TEXT NOT NULL CHECK (status IN ('SUCCESS', 'FAILED', 'PENDING')),
    error        TEXT,
    details_json TEXT
);
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // journal_mode returns a row; pragma_update would choke on it.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run reads against the live connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        f(&conn)
    }

    /// Run writes inside one transaction; commits on success.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.with_tx_app(f)
    }

    /// [`Store::with_tx`] for callers whose closures surface their own error
    /// type (state-machine guards that must roll the write back).
    pub fn with_tx_app<T, E: From<StoreError>>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction().map_err(StoreError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    pub fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.with_conn(|conn| append_audit(conn, entry))
    }

    pub fn recent_audit(&self, limit: u32) -> Result<Vec<AuditRow>, StoreError> {
        self.with_conn(|conn| recent_audit(conn, limit))
    }
}

// punks

fn punk_row(row: &rusqlite::Row<'_>) -> Result<PunkRow, rusqlite::Error> {
    let id: String = row.get("punk_id")?;
    Ok(PunkRow {
        punk_id: id.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
        owner_address: row.get("owner_address")?,
        compressed: row.get("compressed")?,
        server_signature: row.get("server_signature")?,
        minted_at: row.get("minted_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn insert_punk(conn: &Connection, punk: &PunkRow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO punks (punk_id, owner_address, compressed, server_signature, minted_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            punk.punk_id.to_string(),
            punk.owner_address,
            punk.compressed,
            punk.server_signature,
            punk.minted_at,
            punk.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get_punk(conn: &Connection, punk_id: &PunkId) -> Result<Option<PunkRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM punks WHERE punk_id = ?1",
            params![punk_id.to_string()],
            |row| punk_row(row),
        )
        .optional()?)
}

pub fn count_punks(conn: &Connection) -> Result<u64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM punks", [], |row| row.get::<_, i64>(0))? as u64)
}

pub fn count_punks_by_owner(conn: &Connection, owner: &str) -> Result<u64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM punks WHERE owner_address = ?1",
        params![owner],
        |row| row.get::<_, i64>(0),
    )? as u64)
}

pub fn all_punks(conn: &Connection) -> Result<Vec<PunkRow>, StoreError> {
    let mut stmt = conn.prepare("SELECT * FROM punks ORDER BY minted_at ASC")?;
    let rows = stmt
        .query_map([], |row| punk_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn punks_by_owner(conn: &Connection, owner: &str) -> Result<Vec<PunkRow>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT * FROM punks WHERE owner_address = ?1 ORDER BY minted_at ASC")?;
    let rows = stmt
        .query_map(params![owner], |row| punk_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Point the ownership row at a new address. Returns false when the punk is
/// unknown.
pub fn update_owner(
    conn: &Connection,
    punk_id: &PunkId,
    owner: &str,
    ts: i64,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE punks SET owner_address = ?2, updated_at = ?3 WHERE punk_id = ?1",
        params![punk_id.to_string(), owner, ts],
    )?;
    Ok(changed == 1)
}

/// Refresh a row on re-registration: bump the timestamp and backfill the
/// compressed payload if the wallet supplied one we lack.
pub fn touch_punk(
    conn: &Connection,
    punk_id: &PunkId,
    compressed: Option<&str>,
    ts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE punks
         SET updated_at = ?2,
             compressed = COALESCE(compressed, ?3)
         WHERE punk_id = ?1",
        params![punk_id.to_string(), ts, compressed],
    )?;
    Ok(())
}

// ownership history

pub fn append_history(
    conn: &Connection,
    punk_id: &PunkId,
    from_addr: Option<&str>,
    to_addr: &str,
    ts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO ownership_history (punk_id, from_addr, to_addr, ts) VALUES (?1, ?2, ?3, ?4)",
        params![punk_id.to_string(), from_addr, to_addr, ts],
    )?;
    Ok(())
}

pub fn history_for(conn: &Connection, punk_id: &PunkId) -> Result<Vec<HistoryRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, punk_id, from_addr, to_addr, ts FROM ownership_history
         WHERE punk_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![punk_id.to_string()], |row| {
            let id: String = row.get("punk_id")?;
            Ok(HistoryRow {
                id: row.get("id")?,
                punk_id: id.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
                from_addr: row.get("from_addr")?,
                to_addr: row.get("to_addr")?,
                ts: row.get("ts")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// listings

fn listing_row(row: &rusqlite::Row<'_>) -> Result<ListingRow, rusqlite::Error> {
    let id: String = row.get("punk_id")?;
    let status: String = row.get("status")?;
    Ok(ListingRow {
        punk_id: id.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
        seller_address: row.get("seller_address")?,
        seller_pubkey: row.get("seller_pubkey")?,
        price_sats: row.get::<_, i64>("price_sats")? as u64,
        status: ListingStatus::parse(&status).map_err(|_| rusqlite::Error::InvalidQuery)?,
        escrow_address: row.get("escrow_address")?,
        punk_vtxo_outpoint: row.get("punk_vtxo_outpoint")?,
        created_at: row.get("created_at")?,
        deposited_at: row.get("deposited_at")?,
        sold_at: row.get("sold_at")?,
        cancelled_at: row.get("cancelled_at")?,
        buyer_address: row.get("buyer_address")?,
        buyer_pubkey: row.get("buyer_pubkey")?,
        payment_txid: row.get("payment_txid")?,
        deposit_return_txid: row.get("deposit_return_txid")?,
        compressed_metadata: row.get("compressed_metadata")?,
    })
}

/// Write a fresh `pending` listing. Replaces a previous terminal row for the
/// same punk; the caller guards against replacing a live one.
pub fn put_listing(conn: &Connection, listing: &ListingRow) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR REPLACE INTO listings
         (punk_id, seller_address, seller_pubkey, price_sats, status, escrow_address,
          punk_vtxo_outpoint, created_at, deposited_at, sold_at, cancelled_at,
          buyer_address, buyer_pubkey, payment_txid, deposit_return_txid, compressed_metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            listing.punk_id.to_string(),
            listing.seller_address,
            listing.seller_pubkey,
            listing.price_sats as i64,
            listing.status.as_str(),
            listing.escrow_address,
            listing.punk_vtxo_outpoint,
            listing.created_at,
            listing.deposited_at,
            listing.sold_at,
            listing.cancelled_at,
            listing.buyer_address,
            listing.buyer_pubkey,
            listing.payment_txid,
            listing.deposit_return_txid,
            listing.compressed_metadata,
        ],
    )?;
    Ok(())
}

pub fn get_listing(conn: &Connection, punk_id: &PunkId) -> Result<Option<ListingRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT * FROM listings WHERE punk_id = ?1",
            params![punk_id.to_string()],
            |row| listing_row(row),
        )
        .optional()?)
}

pub fn active_listings(conn: &Connection) -> Result<Vec<ListingRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM listings WHERE status IN ('pending', 'deposited') ORDER BY created_at ASC",
    )?;
    let rows = stmt
        .query_map([], |row| listing_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_deposited(
    conn: &Connection,
    punk_id: &PunkId,
    outpoint: &str,
    ts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE listings SET status = 'deposited', punk_vtxo_outpoint = ?2, deposited_at = ?3
         WHERE punk_id = ?1",
        params![punk_id.to_string(), outpoint, ts],
    )?;
    Ok(())
}

/// Step one of the atomic swap: record the buyer on the listing. The status
/// stays `deposited` until the payment legs have been attempted.
pub fn set_buyer(
    conn: &Connection,
    punk_id: &PunkId,
    buyer_address: &str,
    buyer_pubkey: &str,
    ts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE listings SET buyer_address = ?2, buyer_pubkey = ?3, sold_at = ?4
         WHERE punk_id = ?1",
        params![punk_id.to_string(), buyer_address, buyer_pubkey, ts],
    )?;
    Ok(())
}

pub fn finalise_sold(
    conn: &Connection,
    punk_id: &PunkId,
    payment_txid: &str,
    deposit_return_txid: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE listings SET status = 'sold', payment_txid = ?2, deposit_return_txid = ?3
         WHERE punk_id = ?1",
        params![punk_id.to_string(), payment_txid, deposit_return_txid],
    )?;
    Ok(())
}

pub fn mark_cancelled(
    conn: &Connection,
    punk_id: &PunkId,
    refund_txid: Option<&str>,
    ts: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE listings SET status = 'cancelled', cancelled_at = ?2, deposit_return_txid = ?3
         WHERE punk_id = ?1",
        params![punk_id.to_string(), ts, refund_txid],
    )?;
    Ok(())
}

// sales

pub fn insert_sale(
    conn: &Connection,
    punk_id: &PunkId,
    price_sats: u64,
    seller: &str,
    buyer: &str,
    sold_at: i64,
    payment_txid: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sales (punk_id, price_sats, seller, buyer, sold_at, payment_txid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            punk_id.to_string(),
            price_sats as i64,
            seller,
            buyer,
            sold_at,
            payment_txid,
        ],
    )?;
    Ok(())
}

pub fn all_sales(conn: &Connection) -> Result<Vec<SaleRow>, StoreError> {
    let mut stmt = conn.prepare("SELECT * FROM sales ORDER BY sold_at DESC")?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get("punk_id")?;
            Ok(SaleRow {
                id: row.get("id")?,
                punk_id: id.parse().map_err(|_| rusqlite::Error::InvalidQuery)?,
                price_sats: row.get::<_, i64>("price_sats")? as u64,
                seller: row.get("seller")?,
                buyer: row.get("buyer")?,
                sold_at: row.get("sold_at")?,
                payment_txid: row.get("payment_txid")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// audit log

pub fn append_audit(conn: &Connection, entry: &AuditEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO audit_log
         (timestamp, action, punk_id, seller, buyer, amount_sats, txid, status, error, details_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.timestamp,
            entry.action.as_str(),
            entry.punk_id.map(|id| id.to_string()),
            entry.seller,
            entry.buyer,
            entry.amount_sats.map(|v| v as i64),
            entry.txid,
            entry.status.as_str(),
            entry.error,
            entry.details_json,
        ],
    )?;
    Ok(())
}

pub fn recent_audit(conn: &Connection, limit: u32) -> Result<Vec<AuditRow>, StoreError> {
    let mut stmt = conn.prepare("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?1")?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(AuditRow {
                id: row.get("id")?,
                timestamp: row.get("timestamp")?,
                action: row.get("action")?,
                punk_id: row.get("punk_id")?,
                seller: row.get("seller")?,
                buyer: row.get("buyer")?,
                amount_sats: row.get::<_, Option<i64>>("amount_sats")?.map(|v| v as u64),
                txid: row.get("txid")?,
                status: row.get("status")?,
                error: row.get("error")?,
                details_json: row.get("details_json")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Count audit rows with a given status, newest-first queries aside.
pub fn count_audit_with_status(
    conn: &Connection,
    status: AuditStatus,
) -> Result<u64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM audit_log WHERE status = ?1",
        params![status.as_str()],
        |row| row.get::<_, i64>(0),
    )? as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;

    fn id(seed: u8) -> PunkId {
        PunkId::from_bytes([seed; 32])
    }

    fn punk(seed: u8, owner: &str) -> PunkRow {
        PunkRow {
            punk_id: id(seed),
            owner_address: owner.to_string(),
            compressed: None,
            server_signature: None,
            minted_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn punk_insert_and_lookup() {
        let store = Store::in_memory().unwrap();
        store
            .with_tx(|tx| insert_punk(tx, &punk(1, "ark1a")))
            .unwrap();

        let row = store.with_conn(|c| get_punk(c, &id(1))).unwrap().unwrap();
        assert_eq!(row.owner_address, "ark1a");
        assert_eq!(store.with_conn(count_punks).unwrap(), 1);
        assert!(store.with_conn(|c| get_punk(c, &id(2))).unwrap().is_none());
    }

    #[test]
    fn duplicate_punk_insert_fails() {
        let store = Store::in_memory().unwrap();
        store
            .with_tx(|tx| insert_punk(tx, &punk(1, "ark1a")))
            .unwrap();
        let err = store.with_tx(|tx| insert_punk(tx, &punk(1, "ark1b")));
        assert!(err.is_err());
    }

    #[test]
    fn owner_update_and_history() {
        let store = Store::in_memory().unwrap();
        store
            .with_tx(|tx| {
                insert_punk(tx, &punk(1, "ark1a"))?;
                append_history(tx, &id(1), None, "ark1a", 100)
            })
            .unwrap();
        store
            .with_tx(|tx| {
                assert!(update_owner(tx, &id(1), "ark1b", 200)?);
                append_history(tx, &id(1), Some("ark1a"), "ark1b", 200)
            })
            .unwrap();

        let history = store.with_conn(|c| history_for(c, &id(1))).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from_addr, None);
        assert_eq!(history[1].from_addr.as_deref(), Some("ark1a"));
        assert_eq!(history[1].to_addr, "ark1b");

        assert!(!store
            .with_tx(|tx| update_owner(tx, &id(9), "ark1x", 300))
            .unwrap());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::in_memory().unwrap();
        let result = store.with_tx(|tx| {
            insert_punk(tx, &punk(1, "ark1a"))?;
            // Second insert violates the primary key; the first must not
            // survive.
            insert_punk(tx, &punk(1, "ark1b"))
        });
        assert!(result.is_err());
        assert_eq!(store.with_conn(count_punks).unwrap(), 0);
    }

    fn listing(seed: u8) -> ListingRow {
        ListingRow {
            punk_id: id(seed),
            seller_address: "ark1seller".into(),
            seller_pubkey: "ab".repeat(32),
            price_sats: 50_000,
            status: ListingStatus::Pending,
            escrow_address: "ark1escrow".into(),
            punk_vtxo_outpoint: None,
            created_at: 100,
            deposited_at: None,
            sold_at: None,
            cancelled_at: None,
            buyer_address: None,
            buyer_pubkey: None,
            payment_txid: None,
            deposit_return_txid: None,
            compressed_metadata: None,
        }
    }

    #[test]
    fn listing_lifecycle_columns() {
        let store = Store::in_memory().unwrap();
        store.with_tx(|tx| put_listing(tx, &listing(1))).unwrap();

        store
            .with_tx(|tx| mark_deposited(tx, &id(1), "txid:0", 150))
            .unwrap();
        let row = store.with_conn(|c| get_listing(c, &id(1))).unwrap().unwrap();
        assert_eq!(row.status, ListingStatus::Deposited);
        assert_eq!(row.punk_vtxo_outpoint.as_deref(), Some("txid:0"));
        assert_eq!(row.deposited_at, Some(150));

        store
            .with_tx(|tx| {
                set_buyer(tx, &id(1), "ark1buyer", &"cd".repeat(32), 200)?;
                finalise_sold(tx, &id(1), "pay-txid", Some("refund-txid"))
            })
            .unwrap();
        let row = store.with_conn(|c| get_listing(c, &id(1))).unwrap().unwrap();
        assert_eq!(row.status, ListingStatus::Sold);
        assert_eq!(row.buyer_address.as_deref(), Some("ark1buyer"));
        assert_eq!(row.payment_txid.as_deref(), Some("pay-txid"));
        assert_eq!(row.deposit_return_txid.as_deref(), Some("refund-txid"));
        assert!(row.status.is_terminal());
    }

    #[test]
    fn active_listings_exclude_terminal_rows() {
        let store = Store::in_memory().unwrap();
        store
            .with_tx(|tx| {
                put_listing(tx, &listing(1))?;
                put_listing(tx, &listing(2))?;
                mark_cancelled(tx, &id(2), None, 200)
            })
            .unwrap();
        let active = store.with_conn(active_listings).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].punk_id, id(1));
    }

    #[test]
    fn sales_and_audit_round_trip() {
        let store = Store::in_memory().unwrap();
        store
            .with_tx(|tx| insert_sale(tx, &id(1), 50_000, "ark1s", "ark1b", 300, Some("tx")))
            .unwrap();
        let sales = store.with_conn(all_sales).unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].price_sats, 50_000);

        store
            .append_audit(&AuditEntry::new(AuditAction::SaleCompleted, AuditStatus::Success))
            .unwrap();
        let audit = store.recent_audit(10).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "SALE_COMPLETED");
        assert_eq!(
            store
                .with_conn(|c| count_audit_with_status(c, AuditStatus::Success))
                .unwrap(),
            1
        );
    }
}
