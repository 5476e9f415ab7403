//! API-facing request/response models and transport-agnostic handlers.
//!
//! Handlers take decoded request bodies plus the caller's bearer credential
//! and return either a reply with its status code or an [`ApiError`]. Wiring
//! them to an HTTP server is left to the embedding application.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{
    Aggregator, AggregationStatus, CapabilityService, IngressGateway, JobState,
    NotificationService, OrchestratorError, Scheduler, ScheduledJob, ServiceContent,
};
use crate::util::clock::parse_rfc3339_ms;
use crate::util::serde::{TaskId, UserId};

/// Task submission body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    /// Free-form task text.
    pub content: String,
}

/// Task submission reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    /// Identifier to poll for results.
    pub task_id: TaskId,
}

/// Aggregated results, or a pending placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultsResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Original task text.
    pub content: String,
    /// PENDING or COMPLETE.
    pub status: AggregationStatus,
    /// Content per service reported so far.
    pub results: BTreeMap<CapabilityService, ServiceContent>,
    /// Services still outstanding.
    pub missing_services: Vec<CapabilityService>,
}

/// Schedule body; `run_at` is RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// Task to re-run.
    pub task_id: TaskId,
    /// Fire instant.
    pub run_at: String,
}

/// Reschedule body; `new_run_at` is RFC 3339.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    /// Scheduled task.
    pub task_id: TaskId,
    /// New fire instant.
    pub new_run_at: String,
}

/// Cancel body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Scheduled task.
    pub task_id: TaskId,
}

/// Scheduled job view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleResponse {
    /// Job (task) identifier.
    pub task_id: TaskId,
    /// Fire instant, ms since epoch.
    pub run_at_ms: u128,
    /// Job state.
    pub state: JobState,
}

impl From<ScheduledJob> for ScheduleResponse {
    fn from(job: ScheduledJob) -> Self {
        Self {
            task_id: job.job_id,
            run_at_ms: job.run_at,
            state: job.state,
        }
    }
}

/// Notification trigger body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyRequest {
    /// Recipient user.
    pub user_id: UserId,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Human-readable outcome.
    pub message: String,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
}

/// Successful reply with its status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply<T> {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: T,
}

impl<T> ApiReply<T> {
    fn ok(body: T) -> Self {
        Self { status: 200, body }
    }

    fn created(body: T) -> Self {
        Self { status: 201, body }
    }
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Status code.
    pub status: u16,
    /// Error message.
    pub error: String,
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let err = err.into_request_error();
        Self {
            status: err.status_code(),
            error: err.to_string(),
        }
    }
}

/// Result type of every handler.
pub type ApiResult<T> = Result<ApiReply<T>, ApiError>;

/// Components the handlers operate on.
#[derive(Clone)]
pub struct ApiState {
    /// Submission entry point.
    pub gateway: Arc<IngressGateway>,
    /// Result lookups.
    pub aggregator: Arc<Aggregator>,
    /// Schedule management.
    pub scheduler: Arc<Scheduler>,
    /// Notification trigger.
    pub notifications: NotificationService,
}

fn parse_instant(field: &str, raw: &str) -> Result<u128, OrchestratorError> {
    parse_rfc3339_ms(raw).map_err(|e| OrchestratorError::InvalidRequest(format!("{field}: {e}")))
}

// Jobs owned by someone else are reported as missing.
fn owned_job(
    state: &ApiState,
    user_id: &str,
    task_id: &str,
) -> Result<(), OrchestratorError> {
    match state.scheduler.get(task_id)? {
        Some(job) if job.user_id == user_id => Ok(()),
        _ => Err(OrchestratorError::NotFound(format!("job {task_id}"))),
    }
}

/// Submit a task; replies 201 with its id.
pub async fn submit_task(
    state: &ApiState,
    token: &str,
    req: SubmitTaskRequest,
    now_ms: u128,
) -> ApiResult<SubmitTaskResponse> {
    let task_id = state.gateway.submit(token, &req.content, now_ms).await?;
    Ok(ApiReply::created(SubmitTaskResponse { task_id }))
}

/// Aggregated results for one of the caller's tasks.
pub async fn get_results(
    state: &ApiState,
    token: &str,
    task_id: &str,
) -> ApiResult<TaskResultsResponse> {
    let user_id = state.gateway.authenticate(token)?;
    let aggregate = state.aggregator.lookup(task_id).await?;
    if aggregate.user_id != user_id {
        return Err(OrchestratorError::NotFound(format!("task {task_id}")).into());
    }
    let missing_services = aggregate.missing_services();
    Ok(ApiReply::ok(TaskResultsResponse {
        task_id: aggregate.task_id,
        content: aggregate.content,
        status: aggregate.status,
        results: aggregate.results,
        missing_services,
    }))
}

/// Schedule a re-run of one of the caller's tasks.
pub async fn schedule_task(
    state: &ApiState,
    token: &str,
    req: ScheduleRequest,
    now_ms: u128,
) -> ApiResult<ScheduleResponse> {
    let user_id = state.gateway.authenticate(token)?;
    let run_at = parse_instant("run_at", &req.run_at)?;
    let job = state
        .scheduler
        .schedule_as(&user_id, &req.task_id, run_at, now_ms)
        .await?;
    Ok(ApiReply::created(job.into()))
}

/// Move one of the caller's pending jobs.
pub fn reschedule_task(
    state: &ApiState,
    token: &str,
    req: &RescheduleRequest,
    now_ms: u128,
) -> ApiResult<ScheduleResponse> {
    let user_id = state.gateway.authenticate(token)?;
    let new_run_at = parse_instant("new_run_at", &req.new_run_at)?;
    owned_job(state, &user_id, &req.task_id)?;
    let job = state.scheduler.reschedule(&req.task_id, new_run_at, now_ms)?;
    Ok(ApiReply::ok(job.into()))
}

/// Cancel one of the caller's pending jobs.
pub fn cancel_task(
    state: &ApiState,
    token: &str,
    req: &CancelRequest,
    now_ms: u128,
) -> ApiResult<ScheduleResponse> {
    let user_id = state.gateway.authenticate(token)?;
    owned_job(state, &user_id, &req.task_id)?;
    let job = state.scheduler.cancel(&req.task_id, now_ms)?;
    Ok(ApiReply::ok(job.into()))
}

/// Send a notification to a user.
pub async fn notify(state: &ApiState, req: NotifyRequest) -> ApiResult<MessageResponse> {
    state
        .notifications
        .notify(&req.user_id, &req.subject, &req.body)
        .await?;
    Ok(ApiReply::ok(MessageResponse {
        message: "Notification sent successfully".into(),
    }))
}

/// Return a health payload.
#[must_use]
pub const fn health() -> Health {
    Health { ok: true }
}
