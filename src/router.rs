use crate::fleet_api::FleetApiService;
use crate::handlers::status::{
    health, list_cars, logging_suspended, set_charge_target, status, test_access,
    token_requested,
};
use crate::service::token_manager::TokenManager;
use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: FleetApiService,
    pub tokens: Arc<TokenManager>,
    pub status_key: Arc<str>,
}

impl AppState {
    pub fn new(
        service: FleetApiService,
        tokens: Arc<TokenManager>,
        status_key: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            service,
            tokens,
            status_key: status_key.into(),
        }
    }
}

pub fn fleet_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/cars", get(list_cars))
        .route("/api/cars/{id}/target", put(set_charge_target))
        .route("/api/cars/{id}/test-access", post(test_access))
        .route("/api/cars/{id}/logging/suspended", post(logging_suspended))
        .route("/api/token/request", post(token_requested))
        .with_state(state)
}
