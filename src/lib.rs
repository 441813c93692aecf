pub mod config;
pub mod db;
pub mod error;
pub mod fleet;
pub mod fleet_api;
pub mod handlers;
pub mod middleware;
pub mod relay;
pub mod router;
pub mod service;
pub mod types;

pub use error::FleetError;
pub use fleet::Fleet;
pub use fleet_api::{FleetApiClient, FleetApiService};
pub use service::token_manager::TokenManager;
