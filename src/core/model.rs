//! Task, result and job records exchanged between components.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::util::serde::{TaskId, UserId};

/// Capability services a task is fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityService {
    /// Splits the task into ordered steps.
    TaskBreakdown,
    /// Time management strategy.
    TimeManagement,
    /// Focus techniques.
    FocusTechniques,
    /// Learning strategies.
    LearningStrategies,
    /// Emotional regulation strategies.
    EmotionalRegulation,
}

impl CapabilityService {
    /// Every capability, in fan-out order.
    pub const ALL: [Self; 5] = [
        Self::TaskBreakdown,
        Self::TimeManagement,
        Self::FocusTechniques,
        Self::LearningStrategies,
        Self::EmotionalRegulation,
    ];

    /// Wire name of the service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskBreakdown => "task_breakdown",
            Self::TimeManagement => "time_management",
            Self::FocusTechniques => "focus_techniques",
            Self::LearningStrategies => "learning_strategies",
            Self::EmotionalRegulation => "emotional_regulation",
        }
    }

    /// The full expected set for a new aggregation.
    #[must_use]
    pub fn all_set() -> BTreeSet<Self> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for CapabilityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapabilityService {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidRequest(format!("unknown service `{s}`")))
    }
}

/// Content produced by a capability: free text or an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceContent {
    /// Free text.
    Text(String),
    /// Ordered sequence of text items.
    Steps(Vec<String>),
}

impl ServiceContent {
    /// True when the content carries no text at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.trim().is_empty(),
            Self::Steps(steps) => steps.iter().all(|s| s.trim().is_empty()),
        }
    }
}

/// A user-submitted task; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub task_id: TaskId,
    /// Submitting user.
    pub user_id: UserId,
    /// Task text.
    pub content: String,
    /// Creation time, ms since epoch.
    pub created_at: u128,
}

/// One capability's answer for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityResult {
    /// Task the result belongs to.
    pub task_id: TaskId,
    /// Task owner.
    pub user_id: UserId,
    /// Producing capability.
    pub service: CapabilityService,
    /// Produced content.
    pub content: ServiceContent,
    /// Production time, ms since epoch.
    pub produced_at: u128,
}

/// Aggregation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationStatus {
    /// Some expected services have not reported yet.
    Pending,
    /// Every expected service has reported.
    Complete,
}

/// Per-task merge of every capability result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Task identifier.
    pub task_id: TaskId,
    /// Task owner.
    pub user_id: UserId,
    /// Original task text.
    pub content: String,
    /// Merged content keyed by service.
    pub results: BTreeMap<CapabilityService, ServiceContent>,
    /// Services that must report before completion; fixed at creation.
    pub expected_services: BTreeSet<CapabilityService>,
    /// Current status.
    pub status: AggregationStatus,
    /// Set once the completion hooks ran for this record.
    #[serde(default)]
    pub completion_notified: bool,
}

impl AggregatedResult {
    /// Create an empty, pending aggregation.
    #[must_use]
    pub fn new(
        task_id: impl Into<TaskId>,
        user_id: impl Into<UserId>,
        content: impl Into<String>,
        expected_services: BTreeSet<CapabilityService>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            content: content.into(),
            results: BTreeMap::new(),
            expected_services,
            status: AggregationStatus::Pending,
            completion_notified: false,
        }
    }

    /// Whether `service` belongs to the expected set.
    #[must_use]
    pub fn expects(&self, service: CapabilityService) -> bool {
        self.expected_services.contains(&service)
    }

    /// Overwrite the entry for `service` and recompute the status.
    ///
    /// Services outside the expected set are refused and leave the record
    /// untouched. Returns `true` if stored content changed.
    pub fn merge(&mut self, service: CapabilityService, content: ServiceContent) -> bool {
        if !self.expects(service) {
            return false;
        }
        let changed = self.results.get(&service) != Some(&content);
        self.results.insert(service, content);
        self.recompute_status();
        changed
    }

    /// Services that have not reported yet.
    #[must_use]
    pub fn missing_services(&self) -> Vec<CapabilityService> {
        self.expected_services
            .iter()
            .filter(|svc| !self.results.contains_key(svc))
            .copied()
            .collect()
    }

    /// Whether the aggregation is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == AggregationStatus::Complete
    }

    fn recompute_status(&mut self) {
        self.status = if self.missing_services().is_empty() {
            AggregationStatus::Complete
        } else {
            AggregationStatus::Pending
        };
    }
}

/// Scheduled job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Waiting for its fire instant.
    Scheduled,
    /// Trigger executed.
    Fired,
    /// Cancelled before firing.
    Cancelled,
}

/// A deferred re-run of a task's fan-out. `job_id` equals the task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Job identifier (the scheduled task's id).
    pub job_id: TaskId,
    /// Owner of the scheduled task.
    pub user_id: UserId,
    /// Fire instant, ms since epoch.
    pub run_at: u128,
    /// Current state.
    pub state: JobState,
    /// Trigger runs so far, including failed ones.
    #[serde(default)]
    pub fire_attempts: u32,
    /// Last mutation time, ms since epoch.
    pub updated_at_ms: u128,
}

impl ScheduledJob {
    /// Whether the job should fire at `now_ms`.
    #[must_use]
    pub fn is_due(&self, now_ms: u128) -> bool {
        self.state == JobState::Scheduled && self.run_at <= now_ms
    }
}
