//! The seam to the Ark wallet daemon.
//!
//! Everything the coordination engine needs from the Ark layer fits in four
//! calls: send sats to an address, enumerate the wallet's VTXOs, read the
//! balance and hand out a boarding address. [`ArkRestClient`] speaks the
//! daemon's JSON API; tests substitute their own [`ArkClient`]
//! implementations.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::types::Vtxo;

/// Hard deadline on any wallet RPC. Outbound sends are never retried inside
/// a request, so a hung daemon must surface as an error, not a stall.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ArkClientError {
    #[error("ark server transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ark server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("malformed ark server response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait ArkClient: Send + Sync {
    /// Send `amount_sats` to an Ark address. Returns the txid of the
    /// resulting (pre)confirmed transaction.
    async fn send(&self, address: &str, amount_sats: u64) -> Result<String, ArkClientError>;

    /// All VTXOs currently known to the wallet, spent ones included.
    async fn get_vtxos(&self) -> Result<Vec<Vtxo>, ArkClientError>;

    /// Spendable balance in sats.
    async fn get_balance(&self) -> Result<u64, ArkClientError>;

    /// Address for boarding funds from the base chain.
    async fn get_boarding_address(&self) -> Result<String, ArkClientError>;
}

/// REST implementation against the Ark wallet daemon.
#[derive(Debug, Clone)]
pub struct ArkRestClient {
    url: Url,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    address: &'a str,
    amount_sats: u64,
}

#[derive(Deserialize)]
struct SendResponse {
    txid: String,
}

#[derive(Deserialize)]
struct VtxosResponse {
    vtxos: Vec<Vtxo>,
}

#[derive(Deserialize)]
struct BalanceResponse {
    total_sats: u64,
}

#[derive(Deserialize)]
struct BoardingAddressResponse {
    address: String,
}

impl ArkRestClient {
    pub fn new(url: Url) -> Result<Self, ArkClientError> {
        let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self { url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path.trim_start_matches('/'))
    }

    async fn parse_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ArkClientError> {
        let status = response.status();
        match status {
            StatusCode::OK => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body)
                    .map_err(|e| ArkClientError::Malformed(e.to_string()))
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                warn!(status = status.as_u16(), %message, "ark server error");
                Err(ArkClientError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    async fn http_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ArkClientError> {
        let response = self.client.get(self.endpoint(path)).send().await?;
        self.parse_response(response).await
    }
}

#[async_trait]
impl ArkClient for ArkRestClient {
    #[instrument(skip(self))]
    async fn send(&self, address: &str, amount_sats: u64) -> Result<String, ArkClientError> {
        let response = self
            .client
            .post(self.endpoint("v1/send"))
            .json(&SendRequest {
                address,
                amount_sats,
            })
            .send()
            .await?;
        let parsed: SendResponse = self.parse_response(response).await?;
        debug!(txid = %parsed.txid, "ark send accepted");
        Ok(parsed.txid)
    }

    #[instrument(skip(self))]
    async fn get_vtxos(&self) -> Result<Vec<Vtxo>, ArkClientError> {
        // A wallet with no history answers 404; treat that as empty.
        let response = self.client.get(self.endpoint("v1/vtxos")).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("wallet has no vtxos yet");
            return Ok(Vec::new());
        }
        let parsed: VtxosResponse = self.parse_response(response).await?;
        Ok(parsed.vtxos)
    }

    #[instrument(skip(self))]
    async fn get_balance(&self) -> Result<u64, ArkClientError> {
        let parsed: BalanceResponse = self.http_get("v1/balance").await?;
        Ok(parsed.total_sats)
    }

    #[instrument(skip(self))]
    async fn get_boarding_address(&self) -> Result<String, ArkClientError> {
        let parsed: BoardingAddressResponse = self.http_get("v1/boarding-address").await?;
        Ok(parsed.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        let client = ArkRestClient::new("http://localhost:7070/".parse().unwrap()).unwrap();
        assert_eq!(client.endpoint("v1/send"), "http://localhost:7070/v1/send");
        assert_eq!(client.endpoint("/v1/send"), "http://localhost:7070/v1/send");
    }

    #[test]
    fn vtxo_wire_shape_deserializes() {
        let raw = r#"{"vtxos":[{"outpoint":{"txid":"aa","vout":1},"address":"ark1x","amount_sats":10000}]}"#;
        let parsed: VtxosResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.vtxos.len(), 1);
        assert_eq!(parsed.vtxos[0].amount_sats, 10_000);
        assert!(!parsed.vtxos[0].is_spent);
    }
}
