//! User-facing intake endpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use super::{HttpError, map_wallet_error, require_user_key};
use crate::config::DistributionMode;
use crate::eligibility::AdmissionError;
use crate::identity::is_wallet_id_valid;
use crate::state::AppState;
use crate::wallet::AssetRecord;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config/{wallet_id}", get(receive_config))
        .route("/asset", post(receive_asset))
}

/// Faucet catalog as seen by one requester: every group with its
/// distribution settings and whether this requester may still draw from it.
async fn receive_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(wallet_id): Path<String>,
) -> Result<Json<ReceiveConfigResponse>, HttpError> {
    require_user_key(&state, &headers)?;
    if !is_wallet_id_valid(&wallet_id) {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "invalid wallet id".to_string(),
        ));
    }

    state
        .eligibility
        .sweep_stale(&wallet_id)
        .await
        .map_err(HttpError::internal)?;

    let mut groups = BTreeMap::new();
    for (group_name, group) in &state.config.assets {
        let denial = state
            .eligibility
            .check_allowed(&wallet_id, group_name)
            .await
            .map_err(HttpError::internal)?;
        groups.insert(
            group_name.clone(),
            GroupSummary {
                label: group.label.clone(),
                distribution: DistributionSummary {
                    mode: group.distribution.mode,
                    request_window_open: group.distribution.request_window_open.clone(),
                    request_window_close: group.distribution.request_window_close.clone(),
                },
                requests_left: u8::from(denial.is_none()),
            },
        );
    }

    Ok(Json(ReceiveConfigResponse {
        name: state.config.faucet.name.clone(),
        groups,
    }))
}

#[derive(Debug, Deserialize)]
struct ReceiveAssetRequest {
    wallet_id: String,
    invoice: String,
    asset_group: Option<String>,
}

/// Admission endpoint. Validates the requester and invoice, then runs the
/// eligibility engine; on success the request is durably queued and the
/// entitled asset is echoed back.
async fn receive_asset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ReceiveAssetRequest>,
) -> Result<Json<ReceiveAssetResponse>, HttpError> {
    require_user_key(&state, &headers)?;
    if !is_wallet_id_valid(&payload.wallet_id) {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            "invalid wallet id".to_string(),
        ));
    }

    let invoice_data = state
        .wallet
        .parse_invoice(&payload.invoice)
        .await
        .map_err(map_wallet_error)?;

    if invoice_data.is_witness && !state.config.wallet.witness_allowed() {
        return Err(HttpError::new(
            StatusCode::FORBIDDEN,
            format!(
                "witness transfers are not accepted on network {}",
                state.config.wallet.network
            ),
        ));
    }

    let admitted = state
        .eligibility
        .try_admit(
            &payload.wallet_id,
            payload.asset_group.as_deref(),
            &invoice_data.recipient_id,
            &payload.invoice,
        )
        .await
        .map_err(map_admission_error)?;

    // The catalog lookup is informational only; the request is already
    // queued even if the wallet listing fails here.
    let record = state
        .wallet
        .list_assets()
        .await
        .ok()
        .and_then(|assets| {
            assets
                .into_iter()
                .find(|record| record.asset_id == admitted.asset.asset_id)
        });

    Ok(Json(ReceiveAssetResponse {
        group: admitted.group,
        status: admitted.status.as_str(),
        asset: asset_info(&admitted.asset.asset_id, admitted.asset.amount, record),
    }))
}

fn map_admission_error(err: AdmissionError) -> HttpError {
    match err {
        AdmissionError::Denied { .. } => HttpError::new(StatusCode::FORBIDDEN, err.to_string()),
        AdmissionError::UnknownGroup(_) => HttpError::new(StatusCode::NOT_FOUND, err.to_string()),
        AdmissionError::Storage(db_err) => HttpError::internal(db_err),
    }
}

fn asset_info(asset_id: &str, amount: i64, record: Option<AssetRecord>) -> AssetInfo {
    match record {
        Some(record) => AssetInfo {
            asset_id: asset_id.to_string(),
            amount,
            schema: Some(record.kind.schema()),
            name: Some(record.name.clone()),
            precision: Some(record.precision),
            ticker: record.kind.ticker().map(str::to_string),
            description: record.kind.description().map(str::to_string),
        },
        None => AssetInfo {
            asset_id: asset_id.to_string(),
            amount,
            schema: None,
            name: None,
            precision: None,
            ticker: None,
            description: None,
        },
    }
}

#[derive(Debug, Serialize)]
struct ReceiveConfigResponse {
    name: String,
    groups: BTreeMap<String, GroupSummary>,
}

#[derive(Debug, Serialize)]
struct GroupSummary {
    label: String,
    distribution: DistributionSummary,
    requests_left: u8,
}

#[derive(Debug, Serialize)]
struct DistributionSummary {
    mode: DistributionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_window_open: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_window_close: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReceiveAssetResponse {
    group: String,
    status: &'static str,
    asset: AssetInfo,
}

#[derive(Debug, Serialize)]
struct AssetInfo {
    asset_id: String,
    amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    precision: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ticker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}
