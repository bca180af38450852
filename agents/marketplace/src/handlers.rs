//! HTTP request handlers.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Error;
use crate::escrow::{
    BuyQuote, BuyRequest, CancelOutcome, EscrowInfo, ExecuteOutcome, ListRequest,
    ReserveClaimOutcome, SalesReport,
};
use crate::registry::{
    PunkDetail, RecoveryReport, RegisterRequest, RegisterResponse, SupplyInfo, WalletStatus,
};
use crate::state::AppState;
use crate::store::{AuditRow, ListingRow, PunkRow};
use punks_core::PunkId;

const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    password_param: Option<&str>,
) -> Result<(), Error> {
    let supplied = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(password_param);
    match supplied {
        Some(password) if password == state.settings.admin_password => Ok(()),
        _ => Err(Error::Forbidden("admin password required".into())),
    }
}

fn parse_punk_id(raw: &str) -> Result<PunkId, Error> {
    raw.parse()
        .map_err(|e| Error::InvalidArgument(format!("punk id: {e}")))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub network: String,
    pub uptime_secs: u64,
    pub total_minted: u64,
    pub max_punks: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, Error> {
    let supply = state.registry.supply()?;
    Ok(Json(HealthResponse {
        status: "ok",
        network: state.settings.network.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_minted: supply.total_minted,
        max_punks: supply.max_punks,
    }))
}

#[derive(Deserialize)]
pub struct AddressQuery {
    pub address: String,
}

pub async fn wallet_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<WalletStatus>, Error> {
    Ok(Json(state.registry.wallet_status(&query.address)?))
}

pub async fn wallet_register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, Error> {
    if request.address.is_empty() {
        return Err(Error::InvalidArgument("address must not be empty".into()));
    }
    Ok(Json(state.registry.register_wallet(&request)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverRequest {
    pub minter_pubkey: String,
}

pub async fn wallet_recover(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecoverRequest>,
) -> Result<Json<RecoveryReport>, Error> {
    if request.minter_pubkey.is_empty() {
        return Err(Error::InvalidArgument("minterPubkey must not be empty".into()));
    }
    Ok(Json(state.registry.recover(&request.minter_pubkey)?))
}

pub async fn list_punks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PunkRow>>, Error> {
    Ok(Json(state.registry.all_punks()?))
}

pub async fn punks_by_owner(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AddressQuery>,
) -> Result<Json<Vec<PunkRow>>, Error> {
    Ok(Json(state.registry.punks_by_owner(&query.address)?))
}

pub async fn punk_detail(
    State(state): State<Arc<AppState>>,
    Path(punk_id): Path<String>,
) -> Result<Json<PunkDetail>, Error> {
    let punk_id = parse_punk_id(&punk_id)?;
    Ok(Json(state.registry.punk_detail(&punk_id)?))
}

pub async fn supply(State(state): State<Arc<AppState>>) -> Result<Json<SupplyInfo>, Error> {
    Ok(Json(state.registry.supply()?))
}

pub async fn escrow_list(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ListRequest>,
) -> Result<Json<ListingRow>, Error> {
    Ok(Json(state.escrow.create_listing(&request)?))
}

pub async fn escrow_info(State(state): State<Arc<AppState>>) -> Json<EscrowInfo> {
    Json(state.escrow.info())
}

pub async fn escrow_listings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ListingRow>>, Error> {
    Ok(Json(state.escrow.active_listings()?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutpointRequest {
    pub punk_id: PunkId,
    pub punk_vtxo_outpoint: String,
}

pub async fn escrow_update_outpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateOutpointRequest>,
) -> Result<Json<ListingRow>, Error> {
    Ok(Json(
        state
            .escrow
            .confirm_deposit(&request.punk_id, &request.punk_vtxo_outpoint)
            .await?,
    ))
}

pub async fn escrow_buy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuyRequest>,
) -> Result<Json<BuyQuote>, Error> {
    Ok(Json(state.escrow.quote_buy(&request)?))
}

pub async fn escrow_execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuyRequest>,
) -> Result<Json<ExecuteOutcome>, Error> {
    Ok(Json(state.escrow.execute(&request).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub punk_id: PunkId,
    pub seller_address: String,
}

pub async fn escrow_cancel(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<CancelOutcome>, Error> {
    Ok(Json(
        state
            .escrow
            .cancel(&request.punk_id, &request.seller_address)
            .await?,
    ))
}

pub async fn marketplace_sales(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SalesReport>, Error> {
    Ok(Json(state.escrow.sales_report()?))
}

#[derive(Deserialize)]
pub struct AuditQuery {
    pub password: Option<String>,
    pub limit: Option<u32>,
}

pub async fn admin_audit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRow>>, Error> {
    require_admin(&state, &headers, query.password.as_deref())?;
    let limit = query.limit.unwrap_or(100).min(1_000);
    Ok(Json(state.store.recent_audit(limit)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveClaimRequest {
    pub address: String,
    pub wallet_balance_sats: u64,
}

pub async fn admin_reserve_claim(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ReserveClaimRequest>,
) -> Result<Json<ReserveClaimOutcome>, Error> {
    require_admin(&state, &headers, None)?;
    Ok(Json(
        state
            .escrow
            .reserve_claim(&request.address, request.wallet_balance_sats)
            .await?,
    ))
}
