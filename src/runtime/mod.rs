//! Runtime surface: request/response API and the tokio control loop.

pub mod api;
pub mod control_loop;

pub use api::{
    cancel_job, get_job, health, list_jobs, list_pools, submit_job, ErrorResponse, Health, JobView,
    PoolSnapshot, SubmitRequest, SubmitResponse,
};
pub use control_loop::{spawn_control_loop, ControlLoopHandle};
