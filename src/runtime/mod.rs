//! Runtime adapters and API surface.

pub mod api;
pub mod tokio_spawner;

pub use api::{
    cancel_task, get_results, health, notify, reschedule_task, schedule_task, submit_task,
    ApiError, ApiReply, ApiResult, ApiState,
};
pub use tokio_spawner::TokioSpawner;
