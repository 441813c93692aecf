//! Vendor fleet API: endpoint resolution, dispatch and vehicle operations.

pub mod commands;
pub mod dispatcher;
pub mod endpoints;
pub mod region;
pub mod service;

pub use dispatcher::FleetApiClient;
pub use service::FleetApiService;
