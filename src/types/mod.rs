pub mod job;
pub mod token;
pub mod vehicle_api;
