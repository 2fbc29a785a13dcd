pub mod classifier_service;
pub mod executor_service;
pub mod host;
pub mod memory_host;
pub mod planner_service;
pub mod retry;
pub mod snapshot_service;
pub mod solver_service;
