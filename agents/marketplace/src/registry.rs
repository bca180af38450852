//! Ownership registry and supply authority.
//!
//! The canonical `punk -> owner` mapping lives here, together with the 2016
//! supply cap, the server attestations that make a punk "official", the
//! legacy whitelist and the wallet registration/recovery reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::Error;
use crate::locks::PunkLocks;
use crate::signer::ServerSigner;
use crate::store::{self, now_ts, PunkRow, Store};
use punks_core::{decode, CompressedPunk, PunkId, PunkMetadata};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub address: String,
    /// Alternate address of the same wallet; rows held by it migrate to
    /// `address`.
    #[serde(default)]
    pub bitcoin_address: Option<String>,
    pub punks: Vec<RegisterPunk>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPunk {
    pub punk_id: PunkId,
    #[serde(default)]
    pub mint_date: Option<i64>,
    #[serde(default)]
    pub compressed_metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterAction {
    Registered,
    Refreshed,
    Migrated,
    Conflict,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub punk_id: PunkId,
    pub action: RegisterAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSummary {
    pub registered: u32,
    pub refreshed: u32,
    pub migrated: u32,
    pub conflicts: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub summary: RegisterSummary,
    pub results: Vec<RegisterResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub address: String,
    pub is_registered: bool,
    pub punk_count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplyInfo {
    pub total_minted: u64,
    pub max_punks: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Legacy rows still held by the minter pubkey; reclaimable through the
    /// normal register path.
    pub available: Vec<PunkRow>,
    /// Rows the pubkey minted that have since moved to another owner.
    pub claimed: Vec<PunkRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PunkDetail {
    #[serde(flatten)]
    pub row: PunkRow,
    pub official: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PunkMetadata>,
    pub history: Vec<store::HistoryRow>,
}

pub struct Registry {
    store: Arc<Store>,
    signer: Arc<ServerSigner>,
    locks: Arc<PunkLocks>,
    max_total_punks: u64,
    legacy_whitelist: HashSet<PunkId>,
}

impl Registry {
    pub fn new(
        store: Arc<Store>,
        signer: Arc<ServerSigner>,
        locks: Arc<PunkLocks>,
        max_total_punks: u64,
        legacy_whitelist: HashSet<PunkId>,
    ) -> Self {
        if !legacy_whitelist.is_empty() {
            info!(
                count = legacy_whitelist.len(),
                "seeded legacy whitelist"
            );
        }
        Self {
            store,
            signer,
            locks,
            max_total_punks,
            legacy_whitelist,
        }
    }

    pub fn server_pubkey_hex(&self) -> String {
        hex::encode(self.signer.pubkey().serialize())
    }

    /// Is this row an official punk: attested by the server key, or grand-
    /// fathered through the legacy whitelist.
    pub fn is_official(&self, row: &PunkRow) -> bool {
        if self.legacy_whitelist.contains(&row.punk_id) {
            return true;
        }
        row.server_signature
            .as_deref()
            .map(|sig| self.signer.verify_hex(&row.punk_id, sig))
            .unwrap_or(false)
    }

    /// Insert a brand-new punk under the supply cap and attest it.
    #[instrument(skip(self, compressed))]
    pub fn record_punk(
        &self,
        punk_id: PunkId,
        owner: &str,
        compressed: Option<&str>,
        minted_at: Option<i64>,
    ) -> Result<PunkRow, Error> {
        if let Some(raw) = compressed {
            self.check_compressed(&punk_id, raw)?;
        }
        let signature = self.signer.attest_hex(&punk_id);
        let max = self.max_total_punks;
        let ts = now_ts();
        let row = PunkRow {
            punk_id,
            owner_address: owner.to_string(),
            compressed: compressed.map(str::to_string),
            server_signature: Some(signature),
            minted_at: minted_at.unwrap_or(ts),
            updated_at: ts,
        };
        self.store.with_tx_app(|tx| {
            if store::count_punks(tx)? >= max {
                return Err(Error::PreconditionFailed(format!(
                    "supply cap of {max} punks reached"
                )));
            }
            if store::get_punk(tx, &punk_id)?.is_some() {
                return Err(Error::Conflict(format!("punk {punk_id} already recorded")));
            }
            store::insert_punk(tx, &row)?;
            store::append_history(tx, &punk_id, None, owner, ts)?;
            Ok(())
        })?;
        info!(%punk_id, owner, "recorded punk");
        Ok(row)
    }

    fn check_compressed(&self, punk_id: &PunkId, raw: &str) -> Result<(), Error> {
        let payload: CompressedPunk = raw
            .parse()
            .map_err(|e: punks_core::CodecError| Error::InvalidArgument(e.to_string()))?;
        decode(payload.as_bytes())?;
        let actual = punks_core::punk_id_of(&payload);
        if actual != *punk_id {
            return Err(Error::InvalidArgument(format!(
                "compressed payload hashes to {actual}, not {punk_id}"
            )));
        }
        Ok(())
    }

    /// Reconcile a wallet's locally known punks against the registry.
    #[instrument(skip(self, request), fields(address = %request.address, punks = request.punks.len()))]
    pub fn register_wallet(&self, request: &RegisterRequest) -> Result<RegisterResponse, Error> {
        let mut summary = RegisterSummary::default();
        let mut results = Vec::with_capacity(request.punks.len());

        for punk in &request.punks {
            let result = self.register_one(request, punk);
            match result.action {
                RegisterAction::Registered => summary.registered += 1,
                RegisterAction::Refreshed => summary.refreshed += 1,
                RegisterAction::Migrated => summary.migrated += 1,
                RegisterAction::Conflict => summary.conflicts += 1,
            }
            results.push(result);
        }

        Ok(RegisterResponse { summary, results })
    }

    fn register_one(&self, request: &RegisterRequest, punk: &RegisterPunk) -> RegisterResult {
        let punk_id = punk.punk_id;
        let conflict = |error: String| RegisterResult {
            punk_id,
            action: RegisterAction::Conflict,
            error: Some(error),
        };

        let Some(_guard) = self.locks.try_acquire(&punk_id) else {
            return conflict("another operation on this punk is in flight".to_string());
        };

        let existing = match self.store.with_conn(|c| store::get_punk(c, &punk_id)) {
            Ok(row) => row,
            Err(e) => return conflict(e.to_string()),
        };

        match existing {
            None => match self.record_punk(
                punk_id,
                &request.address,
                punk.compressed_metadata.as_deref(),
                punk.mint_date,
            ) {
                Ok(_) => RegisterResult {
                    punk_id,
                    action: RegisterAction::Registered,
                    error: None,
                },
                Err(e) => conflict(e.to_string()),
            },
            Some(row) if row.owner_address == request.address => {
                if let Some(raw) = punk.compressed_metadata.as_deref() {
                    if let Err(e) = self.check_compressed(&punk_id, raw) {
                        return conflict(e.to_string());
                    }
                }
                let refresh = self.store.with_tx(|tx| {
                    store::touch_punk(tx, &punk_id, punk.compressed_metadata.as_deref(), now_ts())
                });
                match refresh {
                    Ok(()) => RegisterResult {
                        punk_id,
                        action: RegisterAction::Refreshed,
                        error: None,
                    },
                    Err(e) => conflict(e.to_string()),
                }
            }
            Some(row)
                if request
                    .bitcoin_address
                    .as_deref()
                    .is_some_and(|alt| alt == row.owner_address) =>
            {
                // Same wallet under a declared alternate address: migrate.
                let from = row.owner_address.clone();
                let to = request.address.clone();
                let ts = now_ts();
                let migrate = self.store.with_tx(|tx| {
                    store::update_owner(tx, &punk_id, &to, ts)?;
                    store::append_history(tx, &punk_id, Some(&from), &to, ts)
                });
                match migrate {
                    Ok(()) => {
                        info!(%punk_id, %from, %to, "migrated punk between wallet addresses");
                        RegisterResult {
                            punk_id,
                            action: RegisterAction::Migrated,
                            error: None,
                        }
                    }
                    Err(e) => conflict(e.to_string()),
                }
            }
            Some(row) => {
                warn!(
                    %punk_id,
                    claimed_by = %request.address,
                    owned_by = %row.owner_address,
                    "ownership conflict on register"
                );
                conflict(format!(
                    "punk is owned by {}; operator adjudication required",
                    row.owner_address
                ))
            }
        }
    }

    pub fn wallet_status(&self, address: &str) -> Result<WalletStatus, Error> {
        let punk_count = self
            .store
            .with_conn(|c| store::count_punks_by_owner(c, address))?;
        Ok(WalletStatus {
            address: address.to_string(),
            is_registered: punk_count > 0,
            punk_count,
        })
    }

    pub fn supply(&self) -> Result<SupplyInfo, Error> {
        Ok(SupplyInfo {
            total_minted: self.store.with_conn(store::count_punks)?,
            max_punks: self.max_total_punks,
        })
    }

    pub fn all_punks(&self) -> Result<Vec<PunkRow>, Error> {
        Ok(self.store.with_conn(store::all_punks)?)
    }

    pub fn punks_by_owner(&self, address: &str) -> Result<Vec<PunkRow>, Error> {
        Ok(self.store.with_conn(|c| store::punks_by_owner(c, address))?)
    }

    pub fn punk_detail(&self, punk_id: &PunkId) -> Result<PunkDetail, Error> {
        let row = self
            .store
            .with_conn(|c| store::get_punk(c, punk_id))?
            .ok_or_else(|| Error::NotFound(format!("punk {punk_id}")))?;
        let metadata = row
            .compressed
            .as_deref()
            .and_then(|raw| raw.parse::<CompressedPunk>().ok())
            .and_then(|payload| decode(payload.as_bytes()).ok());
        let history = self.store.with_conn(|c| store::history_for(c, punk_id))?;
        let official = self.is_official(&row);
        Ok(PunkDetail {
            row,
            official,
            metadata,
            history,
        })
    }

    /// Find legacy rows authored by `minter_pubkey`.
    ///
    /// Legacy imports recorded the raw minter pubkey as the owner address,
    /// so rows still held that way are reclaimable via the normal register
    /// path; rows whose first history entry points at the pubkey but that
    /// now belong elsewhere have already been claimed.
    #[instrument(skip(self))]
    pub fn recover(&self, minter_pubkey: &str) -> Result<RecoveryReport, Error> {
        let available = self
            .store
            .with_conn(|c| store::punks_by_owner(c, minter_pubkey))?;

        let mut claimed = Vec::new();
        for row in self.store.with_conn(store::all_punks)? {
            if row.owner_address == minter_pubkey {
                continue;
            }
            let history = self.store.with_conn(|c| store::history_for(c, &row.punk_id))?;
            if history
                .first()
                .is_some_and(|h| h.to_addr == minter_pubkey)
            {
                claimed.push(row);
            }
        }

        Ok(RecoveryReport { available, claimed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use punks_core::generate;

    fn registry_with_cap(cap: u64) -> Registry {
        Registry::new(
            Arc::new(Store::in_memory().unwrap()),
            Arc::new(ServerSigner::from_hex(&"42".repeat(32)).unwrap()),
            Arc::new(PunkLocks::new()),
            cap,
            HashSet::new(),
        )
    }

    fn id(seed: u8) -> PunkId {
        PunkId::from_bytes([seed; 32])
    }

    fn request(address: &str, punks: Vec<RegisterPunk>) -> RegisterRequest {
        RegisterRequest {
            address: address.to_string(),
            bitcoin_address: None,
            punks,
        }
    }

    fn entry(punk_id: PunkId) -> RegisterPunk {
        RegisterPunk {
            punk_id,
            mint_date: None,
            compressed_metadata: None,
        }
    }

    #[test]
    fn record_attests_and_writes_history() {
        let registry = registry_with_cap(10);
        let row = registry.record_punk(id(1), "ark1a", None, None).unwrap();
        assert!(registry.is_official(&row));

        let detail = registry.punk_detail(&id(1)).unwrap();
        assert_eq!(detail.history.len(), 1);
        assert_eq!(detail.history[0].from_addr, None);
        assert_eq!(detail.history[0].to_addr, "ark1a");
    }

    #[test]
    fn duplicate_record_is_a_conflict() {
        let registry = registry_with_cap(10);
        registry.record_punk(id(1), "ark1a", None, None).unwrap();
        assert!(matches!(
            registry.record_punk(id(1), "ark1b", None, None),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn supply_cap_is_enforced() {
        let registry = registry_with_cap(2);
        registry.record_punk(id(1), "ark1a", None, None).unwrap();
        registry.record_punk(id(2), "ark1a", None, None).unwrap();
        assert!(matches!(
            registry.record_punk(id(3), "ark1a", None, None),
            Err(Error::PreconditionFailed(_))
        ));
        let supply = registry.supply().unwrap();
        assert_eq!(supply.total_minted, 2);
        assert_eq!(supply.max_punks, 2);
    }

    #[test]
    fn register_then_reregister_refreshes() {
        let registry = registry_with_cap(10);
        let response = registry
            .register_wallet(&request("ark1a", vec![entry(id(1))]))
            .unwrap();
        assert_eq!(response.summary.registered, 1);
        assert_eq!(response.results[0].action, RegisterAction::Registered);

        let response = registry
            .register_wallet(&request("ark1a", vec![entry(id(1))]))
            .unwrap();
        assert_eq!(response.summary.refreshed, 1);
        assert_eq!(response.results[0].action, RegisterAction::Refreshed);

        // No second history row on refresh.
        let detail = registry.punk_detail(&id(1)).unwrap();
        assert_eq!(detail.history.len(), 1);
    }

    #[test]
    fn register_validates_compressed_payload() {
        let registry = registry_with_cap(10);
        let generated = generate("registry-payload");
        let ok = RegisterPunk {
            punk_id: generated.punk_id,
            mint_date: None,
            compressed_metadata: Some(generated.compressed.to_string()),
        };
        let response = registry.register_wallet(&request("ark1a", vec![ok])).unwrap();
        assert_eq!(response.summary.registered, 1);

        // Payload that does not hash to the claimed id is rejected.
        let bad = RegisterPunk {
            punk_id: id(7),
            mint_date: None,
            compressed_metadata: Some(generated.compressed.to_string()),
        };
        let response = registry.register_wallet(&request("ark1a", vec![bad])).unwrap();
        assert_eq!(response.summary.conflicts, 1);
    }

    #[test]
    fn migration_follows_the_declared_alternate_address() {
        let registry = registry_with_cap(10);
        registry.record_punk(id(1), "bc1qold", None, None).unwrap();

        let migrating = RegisterRequest {
            address: "ark1new".into(),
            bitcoin_address: Some("bc1qold".into()),
            punks: vec![entry(id(1))],
        };
        let response = registry.register_wallet(&migrating).unwrap();
        assert_eq!(response.summary.migrated, 1);

        let detail = registry.punk_detail(&id(1)).unwrap();
        assert_eq!(detail.row.owner_address, "ark1new");
        assert_eq!(detail.history.len(), 2);
    }

    #[test]
    fn foreign_owner_is_a_conflict_not_an_overwrite() {
        let registry = registry_with_cap(10);
        registry.record_punk(id(1), "ark1owner", None, None).unwrap();

        let response = registry
            .register_wallet(&request("ark1thief", vec![entry(id(1))]))
            .unwrap();
        assert_eq!(response.summary.conflicts, 1);
        assert_eq!(
            registry.punk_detail(&id(1)).unwrap().row.owner_address,
            "ark1owner"
        );
    }

    #[test]
    fn wallet_status_counts_punks() {
        let registry = registry_with_cap(10);
        assert!(!registry.wallet_status("ark1a").unwrap().is_registered);
        registry.record_punk(id(1), "ark1a", None, None).unwrap();
        registry.record_punk(id(2), "ark1a", None, None).unwrap();
        let status = registry.wallet_status("ark1a").unwrap();
        assert!(status.is_registered);
        assert_eq!(status.punk_count, 2);
    }

    #[test]
    fn whitelisted_rows_are_official_without_signatures() {
        let store = Arc::new(Store::in_memory().unwrap());
        let whitelist: HashSet<_> = [id(5)].into_iter().collect();
        let registry = Registry::new(
            store.clone(),
            Arc::new(ServerSigner::from_hex(&"42".repeat(32)).unwrap()),
            Arc::new(PunkLocks::new()),
            10,
            whitelist,
        );
        let unsigned = PunkRow {
            punk_id: id(5),
            owner_address: "legacy-pubkey".into(),
            compressed: None,
            server_signature: None,
            minted_at: 1,
            updated_at: 1,
        };
        store.with_tx(|tx| store::insert_punk(tx, &unsigned)).unwrap();

        let row = registry.punk_detail(&id(5)).unwrap();
        assert!(row.official);
    }

    #[test]
    fn recovery_splits_available_and_claimed() {
        let registry = registry_with_cap(10);
        let minter = "02".repeat(33);

        // Still held by the minter pubkey.
        registry.record_punk(id(1), &minter, None, None).unwrap();
        // Minted by the pubkey, since moved on.
        registry.record_punk(id(2), &minter, None, None).unwrap();
        registry
            .register_wallet(&RegisterRequest {
                address: "ark1new".into(),
                bitcoin_address: Some(minter.clone()),
                punks: vec![entry(id(2))],
            })
            .unwrap();

        let report = registry.recover(&minter).unwrap();
        assert_eq!(report.available.len(), 1);
        assert_eq!(report.available[0].punk_id, id(1));
        assert_eq!(report.claimed.len(), 1);
        assert_eq!(report.claimed[0].punk_id, id(2));
    }
}
