use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum FleetError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("No fleet API token stored")]
    NoToken,

    #[error("Token unauthorized counter is too high ({counter}); request a new token")]
    TokenUnauthorized { counter: i64 },

    #[error("Car {0} has no VIN")]
    MissingVin(i64),

    #[error("Car {0} is not part of the fleet")]
    UnknownCar(i64),

    #[error("Region {0} is not implemented")]
    UnknownRegion(String),

    #[error("Fleet API proxy is enabled but no proxy base URL is configured")]
    ProxyUrlMissing,

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("Ractor error: {0}")]
    RactorError(String),
}

impl From<figment::Error> for FleetError {
    fn from(e: figment::Error) -> Self {
        FleetError::Config(Box::new(e))
    }
}

/// Whether an operation may be retried right away.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FleetError {
    fn is_retryable(&self) -> bool {
        match self {
            FleetError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            FleetError::UnknownCar(_) => (StatusCode::NOT_FOUND, "UNKNOWN_CAR"),
            FleetError::MissingVin(_) => (StatusCode::CONFLICT, "MISSING_VIN"),
            FleetError::NoToken | FleetError::TokenUnauthorized { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "NO_USABLE_TOKEN")
            }
            FleetError::Reqwest(_) | FleetError::UpstreamStatus(_) => {
                (StatusCode::BAD_GATEWAY, "BAD_GATEWAY")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let body = ApiErrorBody {
            code: code.to_string(),
            message: self.to_string(),
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
