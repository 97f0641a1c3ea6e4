//! Bitcoin reserve endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use serde::Serialize;
use tracing::info;

use super::{HttpError, map_wallet_error, require_operator_key};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/top_up", get(top_up))
}

/// Fresh on-chain address for funding the faucet's UTXO reserve.
async fn top_up(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TopUpResponse>, HttpError> {
    require_operator_key(&state, &headers)?;
    let address = state.wallet.new_address().await.map_err(map_wallet_error)?;
    info!(address = %address, "issued reserve top-up address");
    Ok(Json(TopUpResponse { address }))
}

#[derive(Debug, Serialize)]
struct TopUpResponse {
    address: String,
}
