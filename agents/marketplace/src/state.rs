//! Shared application state.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::error::Error;
use crate::escrow::EscrowService;
use crate::locks::PunkLocks;
use crate::registry::Registry;
use crate::settings::Settings;
use crate::signer::ServerSigner;
use crate::store::Store;
use punks_ark::{ArkClient, ArkRestClient, ConnectionConf, PunkTxBuilder};
use punks_core::PunkId;

pub struct AppState {
    pub settings: Settings,
    pub registry: Registry,
    pub escrow: EscrowService,
    pub store: Arc<Store>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the agent together from validated settings. Key material is
    /// parsed here, once; there is no runtime rotation.
    pub fn new(settings: Settings) -> Result<Self, Error> {
        settings.validate()?;
        let network = settings.network()?;

        let store = Arc::new(Store::open(&settings.db_path)?);
        let signer = Arc::new(
            ServerSigner::from_hex(&settings.server_private_key)
                .map_err(|e| Error::InvalidArgument(format!("server_private_key: {e}")))?,
        );
        let escrow_pubkey = match settings.escrow_wallet_private_key.as_deref() {
            Some(hex_key) => {
                let escrow_signer = ServerSigner::from_hex(hex_key)
                    .map_err(|e| Error::InvalidArgument(format!("escrow_wallet_private_key: {e}")))?;
                hex::encode(escrow_signer.pubkey().serialize())
            }
            // Single-key deployments co-sign escrow spends with the server key.
            None => hex::encode(signer.pubkey().serialize()),
        };

        let conf = ConnectionConf::new(
            &settings.ark_server_url,
            settings.esplora_url.as_deref(),
            network,
        )
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let ark: Arc<dyn ArkClient> = Arc::new(ArkRestClient::new(conf.ark_server_url.clone())?);

        let mut legacy_whitelist = HashSet::new();
        for raw in &settings.legacy_whitelist {
            let id: PunkId = raw
                .parse()
                .map_err(|e| Error::InvalidArgument(format!("legacy_whitelist entry: {e}")))?;
            legacy_whitelist.insert(id);
        }

        let locks = Arc::new(PunkLocks::new());
        let registry = Registry::new(
            store.clone(),
            signer.clone(),
            locks.clone(),
            settings.max_total_punks,
            legacy_whitelist,
        );
        let tx_builder = PunkTxBuilder::new(
            ark.clone(),
            signer.pubkey(),
            network.bitcoin_network(),
            settings.reserve_sats,
        );
        let escrow = EscrowService::new(
            store.clone(),
            ark,
            tx_builder,
            locks,
            settings.escrow_wallet_address.clone(),
            escrow_pubkey,
            settings.reserve_sats,
            settings.fee_percent,
            settings.require_payment_txid,
        );

        info!(
            network = %settings.network,
            max_punks = settings.max_total_punks,
            reserve = settings.reserve_sats,
            fee_percent = settings.fee_percent,
            "marketplace state initialised"
        );

        Ok(Self {
            settings,
            registry,
            escrow,
            store,
            start_time: Instant::now(),
        })
    }
}
