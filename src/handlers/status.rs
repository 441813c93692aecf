use crate::error::FleetError;
use crate::fleet::RateAllowance;
use crate::fleet::car::{Car, ChargeTarget};
use crate::middleware::auth::RequireKeyAuth;
use crate::router::AppState;
use crate::service::token_manager::FleetApiTokenState;
use crate::types::token::ValueResponse;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub token_state: FleetApiTokenState,
    pub proxy_required: bool,
    pub api_requests: u64,
    pub unlimited_access: RateAllowance,
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /api/status
pub async fn status(
    _auth: RequireKeyAuth,
    State(state): State<AppState>,
) -> Result<Json<StatusReport>, FleetError> {
    let fleet = state.service.fleet();
    let token_state = state.tokens.token_state(Utc::now()).await?;
    Ok(Json(StatusReport {
        token_state,
        proxy_required: fleet.proxy_required(),
        api_requests: fleet.api_request_count(),
        unlimited_access: fleet.rate_allowance().await,
    }))
}

/// GET /api/cars
pub async fn list_cars(_auth: RequireKeyAuth, State(state): State<AppState>) -> Json<Vec<Car>> {
    Json(state.service.fleet().snapshot().await)
}

/// PUT /api/cars/{id}/target -> replaces the charge target the control job works toward.
pub async fn set_charge_target(
    _auth: RequireKeyAuth,
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
    Json(target): Json<ChargeTarget>,
) -> Result<Json<Car>, FleetError> {
    let handle = state
        .service
        .fleet()
        .car(car_id)
        .await
        .ok_or(FleetError::UnknownCar(car_id))?;
    let mut car = handle.write().await;
    car.target = target;
    info!(car_id, target = ?car.target, "Charge target updated");
    Ok(Json(car.clone()))
}

/// POST /api/cars/{id}/test-access
pub async fn test_access(
    _auth: RequireKeyAuth,
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
) -> Result<Json<ValueResponse<bool>>, FleetError> {
    let value = state.service.test_fleet_api_access(car_id).await?;
    Ok(Json(ValueResponse { value }))
}

/// POST /api/token/request -> starts the window in which the relay delivers a token.
pub async fn token_requested(
    _auth: RequireKeyAuth,
    State(state): State<AppState>,
) -> Result<StatusCode, FleetError> {
    state.tokens.mark_token_requested(Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/cars/{id}/logging/suspended -> sent by the local logger when it stops polling.
pub async fn logging_suspended(
    _auth: RequireKeyAuth,
    State(state): State<AppState>,
    Path(car_id): Path<i64>,
) -> Result<Json<ValueResponse<bool>>, FleetError> {
    let value = state.service.fleet().mark_logging_suspended(car_id).await?;
    info!(car_id, changed = value, "Local logger suspended logging");
    Ok(Json(ValueResponse { value }))
}
