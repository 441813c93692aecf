pub mod car_state;
pub mod classifier;
pub mod scheduler;
pub mod schedule_planner;
pub mod token_manager;
