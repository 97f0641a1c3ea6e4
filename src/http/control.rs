//! Operator control surface.
//!
//! Everything here requires the operator API key and talks straight to the
//! wallet or the scheduler handle; none of it touches request state.

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{HttpError, map_wallet_error, require_operator_key, scheduler_state_label};
use crate::state::AppState;
use crate::wallet::{AssetRecord, TransferRecord, Unspent};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assets", get(list_assets))
        .route("/transfers/{asset_id}", get(list_transfers))
        .route("/refresh", post(refresh_all))
        .route("/refresh/{asset_id}", post(refresh_asset))
        .route("/unspents", get(list_unspents))
        .route("/fail_transfers", post(fail_transfers))
        .route("/delete_transfers", post(delete_transfers))
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/pause", post(pause_scheduler))
        .route("/scheduler/resume", post(resume_scheduler))
}

async fn list_assets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AssetRecord>>, HttpError> {
    require_operator_key(&state, &headers)?;
    let assets = state.wallet.list_assets().await.map_err(map_wallet_error)?;
    Ok(Json(assets))
}

#[derive(Debug, Deserialize)]
struct TransferQuery {
    status: Option<String>,
}

async fn list_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<String>,
    Query(query): Query<TransferQuery>,
) -> Result<Json<Vec<TransferRecord>>, HttpError> {
    require_operator_key(&state, &headers)?;
    let mut transfers = state
        .wallet
        .list_transfers(&asset_id)
        .await
        .map_err(map_wallet_error)?;
    if let Some(status) = query.status {
        transfers.retain(|transfer| transfer.status.eq_ignore_ascii_case(&status));
    }
    Ok(Json(transfers))
}

async fn refresh_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    let changed = state
        .wallet
        .refresh(None)
        .await
        .map_err(map_wallet_error)?;
    Ok(Json(RefreshResponse { changed }))
}

async fn refresh_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(asset_id): Path<String>,
) -> Result<Json<RefreshResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    let changed = state
        .wallet
        .refresh(Some(&asset_id))
        .await
        .map_err(map_wallet_error)?;
    Ok(Json(RefreshResponse { changed }))
}

async fn list_unspents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Unspent>>, HttpError> {
    require_operator_key(&state, &headers)?;
    let unspents = state
        .wallet
        .list_unspents()
        .await
        .map_err(map_wallet_error)?;
    Ok(Json(unspents))
}

async fn fail_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    state
        .wallet
        .fail_transfers()
        .await
        .map_err(map_wallet_error)?;
    info!("operator failed stuck transfers");
    Ok(Json(OkResponse { ok: true }))
}

async fn delete_transfers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    state
        .wallet
        .delete_transfers()
        .await
        .map_err(map_wallet_error)?;
    info!("operator deleted failed transfers");
    Ok(Json(OkResponse { ok: true }))
}

async fn scheduler_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    Ok(Json(SchedulerResponse {
        state: scheduler_state_label(state.scheduler.state()),
    }))
}

async fn pause_scheduler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    state.scheduler.pause();
    info!("operator paused the distribution scheduler");
    Ok(Json(SchedulerResponse {
        state: scheduler_state_label(state.scheduler.state()),
    }))
}

async fn resume_scheduler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SchedulerResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    state.scheduler.resume();
    info!("operator resumed the distribution scheduler");
    Ok(Json(SchedulerResponse {
        state: scheduler_state_label(state.scheduler.state()),
    }))
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    changed: bool,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct SchedulerResponse {
    state: &'static str,
}
