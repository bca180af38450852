//! Agent configuration.
//!
//! Settings come from an optional `marketplace` config file layered under
//! `PUNKS_*` environment variables. Key material is parsed once at boot and
//! never rotated at runtime; changing it requires a restart.

use serde::Deserialize;

use crate::error::Error;
use punks_ark::ArkNetwork;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub ark_server_url: String,
    #[serde(default)]
    pub esplora_url: Option<String>,
    /// One of `mutinynet`, `mainnet`, `regtest`.
    pub network: String,
    /// The escrow wallet's own Ark address; deposits and payments flow
    /// through it.
    pub escrow_wallet_address: String,
    /// 32-byte hex. Held by the Ark daemon for signing; the agent only
    /// derives the escrow pubkey from it.
    #[serde(default)]
    pub escrow_wallet_private_key: Option<String>,
    /// 32-byte hex. Signs official-punk attestations.
    pub server_private_key: String,
    pub admin_password: String,
    #[serde(default = "defaults::max_total_punks")]
    pub max_total_punks: u64,
    #[serde(default = "defaults::reserve_sats")]
    pub reserve_sats: u64,
    #[serde(default = "defaults::fee_percent")]
    pub fee_percent: u64,
    /// When set, `execute` demands a buyer-supplied payment txid and records
    /// it with the sale instead of trusting the balance threshold alone.
    #[serde(default)]
    pub require_payment_txid: bool,
    #[serde(default = "defaults::bind_address")]
    pub bind_address: String,
    #[serde(default = "defaults::db_path")]
    pub db_path: String,
    /// Pre-existing punk ids treated as official despite missing
    /// attestations. Seeded into the registry at boot.
    #[serde(default)]
    pub legacy_whitelist: Vec<String>,
}

mod defaults {
    pub fn max_total_punks() -> u64 {
        2016
    }
    pub fn reserve_sats() -> u64 {
        10_000
    }
    pub fn fee_percent() -> u64 {
        0
    }
    pub fn bind_address() -> String {
        "0.0.0.0:8080".to_string()
    }
    pub fn db_path() -> String {
        "punks.db".to_string()
    }
}

impl Settings {
    /// Load from `marketplace.{toml,json,yaml}` (optional) plus `PUNKS_*`
    /// environment variables.
    pub fn load() -> Result<Self, Error> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::with_name("marketplace").required(false))
            .add_source(config::Environment::with_prefix("PUNKS"))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {e}")))?
            .try_deserialize()
            .map_err(|e| Error::InvalidArgument(format!("configuration: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.network()?;
        if self.fee_percent > 100 {
            return Err(Error::InvalidArgument(format!(
                "fee_percent must be at most 100, got {}",
                self.fee_percent
            )));
        }
        if self.reserve_sats == 0 {
            return Err(Error::InvalidArgument("reserve_sats must be positive".into()));
        }
        Ok(())
    }

    pub fn network(&self) -> Result<ArkNetwork, Error> {
        self.network
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("unknown network `{}`", self.network)))
    }
}
