use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::scheduler::SchedulerState;
use crate::state::AppState;
use crate::wallet::WalletError;

mod control;
mod receive;
mod reserve;

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

pub fn router(state: AppState) -> Router {
    assert!(
        state.start_time.elapsed() < Duration::from_secs(86_400),
        "Application uptime exceeds 24 hours before router creation"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE, API_KEY_HEADER])
        .max_age(Duration::from_secs(3600));

    let receive_router = receive::router().with_state(state.clone());
    let control_router = control::router().with_state(state.clone());
    let reserve_router = reserve::router().with_state(state.clone());
    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .nest("/receive", receive_router)
        .nest("/control", control_router)
        .nest("/reserve", reserve_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// User-level authentication via the `X-Api-Key` header.
fn require_user_key(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    require_key(headers, &state.config.faucet.api_key)
}

/// Operator-level authentication; the operator key never doubles as a user
/// key.
fn require_operator_key(state: &AppState, headers: &HeaderMap) -> Result<(), HttpError> {
    require_key(headers, &state.config.faucet.operator_api_key)
}

fn require_key(headers: &HeaderMap, expected: &str) -> Result<(), HttpError> {
    assert!(!expected.is_empty(), "Configured API key cannot be empty");
    let provided = headers
        .get(&API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if provided == expected {
        Ok(())
    } else {
        Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            "invalid API key".to_string(),
        ))
    }
}

/// Wallet failures surfaced over HTTP keep their classification: bad client
/// input maps to 400, a wallet timeout to 504, everything else to 502.
fn map_wallet_error(err: WalletError) -> HttpError {
    let status = match &err {
        WalletError::InvalidInvoice(_) => StatusCode::BAD_REQUEST,
        WalletError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    HttpError::new(status, err.to_string())
}

async fn health_live(State(state): State<AppState>) -> Result<Json<HealthResponse>, HttpError> {
    let uptime = state.start_time.elapsed().as_secs();
    let response = HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    };
    Ok(Json(response))
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    state
        .database
        .ping()
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    let response = ReadyResponse {
        status: "ready",
        scheduler: scheduler_state_label(state.scheduler.state()),
        outstanding_migrations: state.migration_cache.outstanding_wallets().await,
    };
    Ok(Json(response))
}

fn scheduler_state_label(state: SchedulerState) -> &'static str {
    match state {
        SchedulerState::Running => "running",
        SchedulerState::Paused => "paused",
        SchedulerState::Stopped => "stopped",
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
struct ReadyResponse {
    status: &'static str,
    scheduler: &'static str,
    outstanding_migrations: usize,
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(status != StatusCode::OK, "Error status cannot be 200");
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn internal(message: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!("HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}
