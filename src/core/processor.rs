//! Capability processor seam.

use async_trait::async_trait;

use crate::core::{CapabilityService, OrchestratorError, ServiceContent, Task};

/// External analysis function invoked by a worker.
///
/// The orchestration core treats the processor as a black box: it hands over
/// the task and expects content back. Transport errors, timeouts on the
/// processor's own side and unusable output are all `UpstreamFailure`.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_fanout::core::{CapabilityProcessor, CapabilityService, OrchestratorError, ServiceContent, Task};
///
/// struct Breakdown;
///
/// #[async_trait]
/// impl CapabilityProcessor for Breakdown {
///     fn service(&self) -> CapabilityService {
///         CapabilityService::TaskBreakdown
///     }
///
///     async fn process(&self, task: &Task) -> Result<ServiceContent, OrchestratorError> {
///         Ok(ServiceContent::Steps(task.content.lines().map(str::to_owned).collect()))
///     }
/// }
/// ```
#[async_trait]
pub trait CapabilityProcessor: Send + Sync + 'static {
    /// Capability this processor implements.
    fn service(&self) -> CapabilityService;

    /// Analyse `task` and return this capability's content.
    async fn process(&self, task: &Task) -> Result<ServiceContent, OrchestratorError>;
}
