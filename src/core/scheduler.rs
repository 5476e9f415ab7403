//! Deferred re-runs of a task's fan-out.
//!
//! Jobs live in a [`JobStore`] owned by the scheduler and are only touched
//! through `schedule`, `reschedule`, `cancel` and the trigger. The store sits
//! behind one mutex: a cancel and a fire racing for the same job are
//! serialized, and whichever takes the lock first wins. A job cancelled
//! before the trigger claims it never fires.
//!
//! The trigger loop polls at a fixed interval; firing latency is therefore
//! bounded by `poll_interval`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::core::audit::{self, build_audit_event, SharedAuditSink};
use crate::core::{
    Datastore, FanOut, JobState, NotificationService, OrchestratorError, ScheduledJob, Task,
};
use crate::util::clock::now_ms;
use crate::util::serde::{new_task_id, TaskId};

const COMPONENT: &str = "scheduler";

/// Durable storage of scheduled jobs, keyed by job id.
pub trait JobStore: Send {
    /// Fetch one job.
    fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>, OrchestratorError>;
    /// Insert or replace a job.
    fn put(&mut self, job: ScheduledJob) -> Result<(), OrchestratorError>;
    /// Every stored job.
    fn all(&self) -> Result<Vec<ScheduledJob>, OrchestratorError>;
}

/// Outcome of one fired job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    /// The job that fired.
    pub job_id: TaskId,
    /// Id of the freshly fanned-out task, or why the fan-out failed.
    pub outcome: Result<TaskId, OrchestratorError>,
}

/// Owner of the job table and its trigger loop.
pub struct Scheduler {
    jobs: Mutex<Box<dyn JobStore>>,
    datastore: Arc<dyn Datastore>,
    fanout: Arc<FanOut>,
    notifications: Option<NotificationService>,
    audit: Option<SharedAuditSink>,
    max_fire_attempts: u32,
}

impl Scheduler {
    /// Default trigger polling interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default number of trigger runs before a failing job is given up.
    pub const DEFAULT_MAX_FIRE_ATTEMPTS: u32 = 5;

    /// Create a scheduler over a job store.
    #[must_use]
    pub fn new(
        jobs: Box<dyn JobStore>,
        datastore: Arc<dyn Datastore>,
        fanout: Arc<FanOut>,
    ) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            datastore,
            fanout,
            notifications: None,
            audit: None,
            max_fire_attempts: Self::DEFAULT_MAX_FIRE_ATTEMPTS,
        }
    }

    /// Give up on a job after `attempts` failed trigger runs.
    #[must_use]
    pub fn with_max_fire_attempts(mut self, attempts: u32) -> Self {
        self.max_fire_attempts = attempts.max(1);
        self
    }

    /// Send a "Task Reminder" notification when a job fires.
    #[must_use]
    pub fn with_notifications(mut self, notifications: NotificationService) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAuditSink) -> Self {
        self.audit = Some(audit);
        self
    }

    fn record(&self, job: &ScheduledJob, action: &str) {
        audit::record(self.audit.as_ref(), || {
            build_audit_event(
                &job.job_id,
                COMPONENT,
                Some(job.user_id.clone()),
                action,
                Some(format!("run_at={}", job.run_at)),
            )
        });
    }

    /// Schedule (or replace the schedule of) `job_id` to fire at `run_at`.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an empty id or a `run_at` before `now_ms`,
    /// `NotFound` when the task does not exist, `UpstreamFailure` on storage
    /// failure.
    pub async fn schedule(
        &self,
        job_id: &str,
        run_at: u128,
        now_ms: u128,
    ) -> Result<ScheduledJob, OrchestratorError> {
        self.schedule_for(None, job_id, run_at, now_ms).await
    }

    /// Like [`Scheduler::schedule`], but only for a task owned by `user_id`;
    /// anyone else's task is reported as `NotFound`.
    ///
    /// # Errors
    ///
    /// As [`Scheduler::schedule`].
    pub async fn schedule_as(
        &self,
        user_id: &str,
        job_id: &str,
        run_at: u128,
        now_ms: u128,
    ) -> Result<ScheduledJob, OrchestratorError> {
        self.schedule_for(Some(user_id), job_id, run_at, now_ms).await
    }

    async fn schedule_for(
        &self,
        owner: Option<&str>,
        job_id: &str,
        run_at: u128,
        now_ms: u128,
    ) -> Result<ScheduledJob, OrchestratorError> {
        if job_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("task_id is required".into()));
        }
        if run_at < now_ms {
            return Err(OrchestratorError::InvalidRequest(
                "run_at is in the past".into(),
            ));
        }
        let task = self
            .datastore
            .get_task(job_id)
            .await?
            .filter(|task| owner.is_none_or(|owner| task.user_id == owner))
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {job_id}")))?;

        let job = ScheduledJob {
            job_id: task.task_id,
            user_id: task.user_id,
            run_at,
            state: JobState::Scheduled,
            fire_attempts: 0,
            updated_at_ms: now_ms,
        };
        self.jobs.lock().put(job.clone())?;
        tracing::info!(job_id, run_at = %run_at, "job scheduled");
        self.record(&job, "schedule");
        Ok(job)
    }

    /// Move a pending job to `new_run_at`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the job is unknown, already fired or cancelled;
    /// `InvalidRequest` if `new_run_at` is before `now_ms`.
    pub fn reschedule(
        &self,
        job_id: &str,
        new_run_at: u128,
        now_ms: u128,
    ) -> Result<ScheduledJob, OrchestratorError> {
        if new_run_at < now_ms {
            return Err(OrchestratorError::InvalidRequest(
                "new_run_at is in the past".into(),
            ));
        }
        let job = {
            let mut jobs = self.jobs.lock();
            let mut job = Self::pending(jobs.as_ref(), job_id)?;
            job.run_at = new_run_at;
            job.updated_at_ms = now_ms;
            jobs.put(job.clone())?;
            job
        };
        tracing::info!(job_id, run_at = %new_run_at, "job rescheduled");
        self.record(&job, "reschedule");
        Ok(job)
    }

    /// Cancel a pending job.
    ///
    /// # Errors
    ///
    /// `NotFound` if the job is unknown, already fired or cancelled.
    pub fn cancel(&self, job_id: &str, now_ms: u128) -> Result<ScheduledJob, OrchestratorError> {
        let job = {
            let mut jobs = self.jobs.lock();
            let mut job = Self::pending(jobs.as_ref(), job_id)?;
            job.state = JobState::Cancelled;
            job.updated_at_ms = now_ms;
            jobs.put(job.clone())?;
            job
        };
        tracing::info!(job_id, "job cancelled");
        self.record(&job, "cancel");
        Ok(job)
    }

    /// Current record of a job.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` on storage failure.
    pub fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>, OrchestratorError> {
        self.jobs.lock().get(job_id)
    }

    /// Jobs still waiting to fire, earliest first.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` on storage failure.
    pub fn pending_jobs(&self) -> Result<Vec<ScheduledJob>, OrchestratorError> {
        let mut pending: Vec<_> = self
            .jobs
            .lock()
            .all()?
            .into_iter()
            .filter(|j| j.state == JobState::Scheduled)
            .collect();
        pending.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(pending)
    }

    fn pending(jobs: &dyn JobStore, job_id: &str) -> Result<ScheduledJob, OrchestratorError> {
        match jobs.get(job_id)? {
            Some(job) if job.state == JobState::Scheduled => Ok(job),
            Some(job) => Err(OrchestratorError::NotFound(format!(
                "job {job_id} is {:?}",
                job.state
            ))),
            None => Err(OrchestratorError::NotFound(format!("job {job_id}"))),
        }
    }

    /// Fire every job due at `now_ms`.
    ///
    /// Jobs are claimed (marked FIRED) one at a time under the store lock and
    /// triggered before the next claim, so a failed store write never strands
    /// an already claimed job. A trigger that fails with a retryable error
    /// puts the job back to SCHEDULED for the next tick, up to
    /// `max_fire_attempts` runs.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` if the job store cannot be read; per-job claim and
    /// fan-out failures are reported in [`FiredJob::outcome`].
    pub async fn fire_due(&self, now_ms: u128) -> Result<Vec<FiredJob>, OrchestratorError> {
        let mut due: Vec<_> = self
            .jobs
            .lock()
            .all()?
            .into_iter()
            .filter(|j| j.is_due(now_ms))
            .collect();
        due.sort_by(|a, b| a.run_at.cmp(&b.run_at).then_with(|| a.job_id.cmp(&b.job_id)));

        let mut fired = Vec::with_capacity(due.len());
        for candidate in due {
            let job = match self.claim(&candidate.job_id, now_ms) {
                Ok(Some(job)) => job,
                // Cancelled or rescheduled since the scan.
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(job_id = %candidate.job_id, error = %e, "could not claim scheduled job");
                    fired.push(FiredJob {
                        job_id: candidate.job_id,
                        outcome: Err(e),
                    });
                    continue;
                }
            };

            let outcome = self.trigger(&job, now_ms).await;
            match &outcome {
                Ok(task_id) => {
                    tracing::info!(job_id = %job.job_id, %task_id, "scheduled job fired");
                    self.record(&job, "fire");
                }
                Err(e) => self.release(job.clone(), e, now_ms),
            }
            fired.push(FiredJob {
                job_id: job.job_id,
                outcome,
            });
        }
        Ok(fired)
    }

    fn claim(&self, job_id: &str, now_ms: u128) -> Result<Option<ScheduledJob>, OrchestratorError> {
        let mut jobs = self.jobs.lock();
        let Some(mut job) = jobs.get(job_id)?.filter(|j| j.is_due(now_ms)) else {
            return Ok(None);
        };
        job.state = JobState::Fired;
        job.fire_attempts += 1;
        job.updated_at_ms = now_ms;
        jobs.put(job.clone())?;
        Ok(Some(job))
    }

    fn release(&self, mut job: ScheduledJob, err: &OrchestratorError, now_ms: u128) {
        if !err.is_retryable() || job.fire_attempts >= self.max_fire_attempts {
            tracing::error!(
                job_id = %job.job_id,
                attempts = job.fire_attempts,
                error = %err,
                "scheduled job failed to fire, giving up"
            );
            self.record(&job, "fire_failed");
            return;
        }
        job.state = JobState::Scheduled;
        job.updated_at_ms = now_ms;
        let job_id = job.job_id.clone();
        let attempts = job.fire_attempts;
        let stored = self.jobs.lock().put(job);
        match stored {
            Ok(()) => tracing::warn!(
                %job_id,
                attempts,
                error = %err,
                "scheduled job failed to fire, retrying next tick"
            ),
            Err(e) => tracing::error!(%job_id, error = %e, "scheduled job could not be re-armed"),
        }
    }

    async fn trigger(&self, job: &ScheduledJob, now_ms: u128) -> Result<TaskId, OrchestratorError> {
        let original = self
            .datastore
            .get_task(&job.job_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("task {}", job.job_id)))?;
        // Each fan-out gets its own task id so aggregations never collide.
        let task = Task {
            task_id: new_task_id(),
            user_id: original.user_id,
            content: original.content,
            created_at: now_ms,
        };
        self.datastore.insert_task(&task).await?;
        self.fanout
            .dispatch(&task)
            .await
            .map_err(OrchestratorError::into_request_error)?;

        if let Some(notifications) = &self.notifications {
            let body = format!("Don't forget to work on your task: {}", task.content);
            if let Err(e) = notifications.notify(&task.user_id, "Task Reminder", &body).await {
                tracing::warn!(job_id = %job.job_id, error = %e, "reminder notification failed");
            }
        }
        Ok(task.task_id)
    }

    /// Trigger loop: fire due jobs every `poll_interval` until `shutdown`
    /// flips to `true`.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        match self.pending_jobs() {
            Ok(pending) => tracing::info!(pending = pending.len(), "scheduler started"),
            Err(e) => tracing::error!(error = %e, "scheduler started with unreadable job store"),
        }
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.fire_due(now_ms()).await {
                        tracing::error!(error = %e, "scheduler tick failed");
                    }
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CapabilityService, QueueName};
    use crate::infra::{InMemoryBroker, InMemoryDatastore, InMemoryJobStore, InMemoryNotifier};

    const T: u128 = 1_700_000_000_000;
    const Q: QueueName = QueueName::Capability(CapabilityService::TaskBreakdown);

    async fn setup() -> (Scheduler, InMemoryBroker, InMemoryDatastore) {
        let store = InMemoryDatastore::new();
        store
            .insert_task(&Task {
                task_id: "job1".into(),
                user_id: "u1".into(),
                content: "Write report".into(),
                created_at: T,
            })
            .await
            .unwrap();
        let broker = InMemoryBroker::new(5);
        let fanout = Arc::new(FanOut::new(Arc::new(broker.clone())));
        let scheduler = Scheduler::new(
            Box::new(InMemoryJobStore::new()),
            Arc::new(store.clone()),
            fanout,
        );
        (scheduler, broker, store)
    }

    #[tokio::test]
    async fn cancelled_job_never_fires() {
        let (scheduler, broker, _) = setup().await;
        scheduler.schedule("job1", T + 10_000, T).await.unwrap();
        scheduler.cancel("job1", T + 1_000).unwrap();
        assert!(scheduler.fire_due(T + 10_000).await.unwrap().is_empty());
        assert_eq!(broker.depth(Q), 0);
        assert_eq!(scheduler.get("job1").unwrap().unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn rescheduled_job_fires_at_new_time_only() {
        let (scheduler, broker, store) = setup().await;
        scheduler.schedule("job1", T + 5_000, T).await.unwrap();
        scheduler.reschedule("job1", T + 20_000, T + 1_000).unwrap();

        assert!(scheduler.fire_due(T + 5_000).await.unwrap().is_empty());
        let fired = scheduler.fire_due(T + 20_000).await.unwrap();
        assert_eq!(fired.len(), 1);
        let new_id = fired[0].outcome.clone().unwrap();
        assert_ne!(new_id, "job1");
        assert_eq!(broker.depth(Q), 1);

        let rerun = store.get_task(&new_id).await.unwrap().unwrap();
        assert_eq!(rerun.content, "Write report");
        assert_eq!(rerun.user_id, "u1");
    }

    #[tokio::test]
    async fn fires_once_and_then_rejects_changes() {
        let (scheduler, _, _) = setup().await;
        scheduler.schedule("job1", T, T).await.unwrap();
        assert_eq!(scheduler.fire_due(T).await.unwrap().len(), 1);
        assert!(scheduler.fire_due(T + 1).await.unwrap().is_empty());
        assert!(matches!(
            scheduler.cancel("job1", T + 2),
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.reschedule("job1", T + 10, T + 2),
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_jobs_and_tasks_are_not_found() {
        let (scheduler, _, _) = setup().await;
        assert!(matches!(scheduler.cancel("ghost", T), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(
            scheduler.schedule("ghost", T + 1, T).await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.schedule("job1", T - 1, T).await,
            Err(OrchestratorError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn schedule_as_hides_other_users_tasks() {
        let (scheduler, _, _) = setup().await;
        assert!(matches!(
            scheduler.schedule_as("u2", "job1", T + 5, T).await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(scheduler.get("job1").unwrap().is_none());
        assert!(scheduler.schedule_as("u1", "job1", T + 5, T).await.is_ok());
    }

    #[tokio::test]
    async fn scheduling_twice_replaces() {
        let (scheduler, _, _) = setup().await;
        scheduler.schedule("job1", T + 5, T).await.unwrap();
        scheduler.schedule("job1", T + 50, T).await.unwrap();
        let pending = scheduler.pending_jobs().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].run_at, T + 50);
    }

    #[tokio::test]
    async fn firing_sends_reminder() {
        let (scheduler, _, store) = setup().await;
        store.register_user("u1", "u1@example.com");
        let notifier = InMemoryNotifier::new();
        let scheduler = scheduler.with_notifications(NotificationService::new(
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
        ));
        scheduler.schedule("job1", T, T).await.unwrap();
        scheduler.fire_due(T).await.unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Task Reminder");
    }

    #[tokio::test]
    async fn fan_out_failure_is_reported_and_retried_next_tick() {
        let (scheduler, broker, store) = setup().await;
        scheduler.schedule("job1", T, T).await.unwrap();
        store.set_unavailable(true);

        let fired = scheduler.fire_due(T).await.unwrap();
        assert!(matches!(
            fired[0].outcome,
            Err(OrchestratorError::UpstreamFailure(_))
        ));
        let job = scheduler.get("job1").unwrap().unwrap();
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.fire_attempts, 1);

        store.set_unavailable(false);
        let fired = scheduler.fire_due(T + 1_000).await.unwrap();
        assert!(fired[0].outcome.is_ok());
        assert_eq!(broker.depth(Q), 1);
        assert_eq!(scheduler.get("job1").unwrap().unwrap().state, JobState::Fired);
    }

    #[tokio::test]
    async fn failing_job_is_given_up_after_max_attempts() {
        let (scheduler, broker, _) = setup().await;
        let scheduler = scheduler.with_max_fire_attempts(2);
        scheduler.schedule("job1", T, T).await.unwrap();
        broker.close();

        assert_eq!(scheduler.fire_due(T).await.unwrap().len(), 1);
        assert_eq!(scheduler.fire_due(T + 1).await.unwrap().len(), 1);
        assert!(scheduler.fire_due(T + 2).await.unwrap().is_empty());
        let job = scheduler.get("job1").unwrap().unwrap();
        assert_eq!(job.state, JobState::Fired);
        assert_eq!(job.fire_attempts, 2);
    }

    /// Job store whose `fail_on`-th write fails.
    struct FlakyJobStore {
        inner: InMemoryJobStore,
        puts: usize,
        fail_on: usize,
    }

    impl JobStore for FlakyJobStore {
        fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>, OrchestratorError> {
            self.inner.get(job_id)
        }

        fn put(&mut self, job: ScheduledJob) -> Result<(), OrchestratorError> {
            self.puts += 1;
            if self.puts == self.fail_on {
                return Err(OrchestratorError::UpstreamFailure("job store: disk full".into()));
            }
            self.inner.put(job)
        }

        fn all(&self) -> Result<Vec<ScheduledJob>, OrchestratorError> {
            self.inner.all()
        }
    }

    #[tokio::test]
    async fn failed_claim_write_does_not_strand_earlier_jobs() {
        let store = InMemoryDatastore::new();
        for id in ["a", "b"] {
            store
                .insert_task(&Task {
                    task_id: id.into(),
                    user_id: "u1".into(),
                    content: format!("task {id}"),
                    created_at: T,
                })
                .await
                .unwrap();
        }
        let broker = InMemoryBroker::new(5);
        let scheduler = Scheduler::new(
            Box::new(FlakyJobStore {
                inner: InMemoryJobStore::new(),
                puts: 0,
                fail_on: 4,
            }),
            Arc::new(store),
            Arc::new(FanOut::new(Arc::new(broker.clone()))),
        );
        scheduler.schedule("a", T, T).await.unwrap();
        scheduler.schedule("b", T + 1, T).await.unwrap();

        let fired = scheduler.fire_due(T + 10).await.unwrap();
        assert_eq!(fired.len(), 2);
        assert!(fired[0].outcome.is_ok());
        assert!(matches!(fired[1].outcome, Err(OrchestratorError::UpstreamFailure(_))));
        assert_eq!(broker.depth(Q), 1);
        assert_eq!(scheduler.get("a").unwrap().unwrap().state, JobState::Fired);
        assert_eq!(scheduler.get("b").unwrap().unwrap().state, JobState::Scheduled);

        let fired = scheduler.fire_due(T + 11).await.unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].job_id, "b");
        assert_eq!(broker.depth(Q), 2);
    }
}
