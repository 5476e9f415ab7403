//! Tests for tokio spawner utilities and the API handlers

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use prometheus_fanout::core::{
    AggregationStatus, Aggregator, Broker, CapabilityResult, CapabilityService, FanOut,
    IngressGateway, JobState, NotificationService, RateLimiter, Scheduler, ServiceContent, Spawn,
};
use prometheus_fanout::infra::{
    Claims, InMemoryBroker, InMemoryCounterStore, InMemoryDatastore, InMemoryJobStore,
    InMemoryNotifier, JwtIdentityProvider,
};
use prometheus_fanout::runtime::api::{
    CancelRequest, NotifyRequest, RescheduleRequest, ScheduleRequest, SubmitTaskRequest,
};
use prometheus_fanout::runtime::tokio_spawner::TokioSpawner;
use prometheus_fanout::runtime::{self, ApiState};

const SECRET: &str = "test-secret";
// 2024-01-01T00:00:00Z
const NOW: u128 = 1_704_067_200_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::new(tokio::runtime::Handle::current());

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

fn token(user_id: &str) -> String {
    let claims = Claims {
        user_id: user_id.to_string(),
        exp: 4_102_444_800,
    };
    let jwt = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    format!("Bearer {jwt}")
}

struct Harness {
    state: ApiState,
    notifier: InMemoryNotifier,
}

fn harness() -> Harness {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new(5));
    let datastore = InMemoryDatastore::new();
    datastore.register_user("u1", "u1@example.com");
    let store = Arc::new(datastore);
    let notifier = InMemoryNotifier::new();
    let notifications = NotificationService::new(store.clone(), Arc::new(notifier.clone()));
    let fanout = Arc::new(FanOut::new(Arc::clone(&broker)));

    let gateway = IngressGateway::new(
        Arc::new(JwtIdentityProvider::new(SECRET).unwrap()),
        RateLimiter::new(Arc::new(InMemoryCounterStore::new()), 100, Duration::from_secs(60)),
        store.clone(),
        Arc::clone(&fanout),
    );
    let aggregator = Aggregator::new(Arc::clone(&broker), store.clone());
    let scheduler = Scheduler::new(Box::new(InMemoryJobStore::new()), store, fanout);

    Harness {
        state: ApiState {
            gateway: Arc::new(gateway),
            aggregator: Arc::new(aggregator),
            scheduler: Arc::new(scheduler),
            notifications,
        },
        notifier,
    }
}

async fn submit(h: &Harness, user: &str) -> String {
    let reply = runtime::submit_task(
        &h.state,
        &token(user),
        SubmitTaskRequest {
            content: "Write report".into(),
        },
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(reply.status, 201);
    reply.body.task_id
}

#[tokio::test]
async fn test_submit_then_poll_pending_then_complete() {
    let h = harness();
    let task_id = submit(&h, "u1").await;

    let pending = runtime::get_results(&h.state, &token("u1"), &task_id).await.unwrap();
    assert_eq!(pending.body.status, AggregationStatus::Pending);
    assert_eq!(pending.body.missing_services.len(), 5);

    for service in CapabilityService::ALL {
        h.state
            .aggregator
            .on_capability_result(CapabilityResult {
                task_id: task_id.clone(),
                user_id: "u1".into(),
                service,
                content: ServiceContent::Text(format!("{service} advice")),
                produced_at: NOW,
            })
            .await
            .unwrap();
    }
    let done = runtime::get_results(&h.state, &token("u1"), &task_id).await.unwrap();
    assert_eq!(done.body.status, AggregationStatus::Complete);
    assert!(done.body.missing_services.is_empty());
    assert_eq!(done.body.results.len(), 5);
}

#[tokio::test]
async fn test_results_are_private() {
    let h = harness();
    let task_id = submit(&h, "u1").await;
    let err = runtime::get_results(&h.state, &token("u2"), &task_id).await.unwrap_err();
    assert_eq!(err.status, 404);
}

#[tokio::test]
async fn test_bad_credentials_are_401() {
    let h = harness();
    let err = runtime::submit_task(
        &h.state,
        "Bearer not-a-jwt",
        SubmitTaskRequest {
            content: "Write report".into(),
        },
        NOW,
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, 401);
}

#[tokio::test]
async fn test_schedule_reschedule_cancel() {
    let h = harness();
    let task_id = submit(&h, "u1").await;
    let bearer = token("u1");

    let scheduled = runtime::schedule_task(
        &h.state,
        &bearer,
        ScheduleRequest {
            task_id: task_id.clone(),
            run_at: "2024-01-01T01:00:00Z".into(),
        },
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(scheduled.status, 201);
    assert_eq!(scheduled.body.run_at_ms, NOW + 3_600_000);

    let moved = runtime::reschedule_task(
        &h.state,
        &bearer,
        &RescheduleRequest {
            task_id: task_id.clone(),
            new_run_at: "2024-01-01T02:00:00Z".into(),
        },
        NOW,
    )
    .unwrap();
    assert_eq!(moved.body.run_at_ms, NOW + 7_200_000);

    let other = runtime::cancel_task(
        &h.state,
        &token("u2"),
        &CancelRequest {
            task_id: task_id.clone(),
        },
        NOW,
    )
    .unwrap_err();
    assert_eq!(other.status, 404);

    let cancelled = runtime::cancel_task(&h.state, &bearer, &CancelRequest { task_id }, NOW).unwrap();
    assert_eq!(cancelled.body.state, JobState::Cancelled);
}

#[tokio::test]
async fn test_schedule_rejects_bad_timestamps() {
    let h = harness();
    let task_id = submit(&h, "u1").await;
    let bad = runtime::schedule_task(
        &h.state,
        &token("u1"),
        ScheduleRequest {
            task_id: task_id.clone(),
            run_at: "next tuesday".into(),
        },
        NOW,
    )
    .await
    .unwrap_err();
    assert_eq!(bad.status, 400);

    let past = runtime::schedule_task(
        &h.state,
        &token("u1"),
        ScheduleRequest {
            task_id,
            run_at: "2023-12-31T23:00:00Z".into(),
        },
        NOW,
    )
    .await
    .unwrap_err();
    assert_eq!(past.status, 400);
}

#[tokio::test]
async fn test_notify_handler() {
    let h = harness();
    let reply = runtime::notify(
        &h.state,
        NotifyRequest {
            user_id: "u1".into(),
            subject: "Hello".into(),
            body: "World".into(),
        },
    )
    .await
    .unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(h.notifier.sent().len(), 1);

    let missing = runtime::notify(
        &h.state,
        NotifyRequest {
            user_id: "ghost".into(),
            subject: "Hello".into(),
            body: "World".into(),
        },
    )
    .await
    .unwrap_err();
    assert_eq!(missing.status, 404);
}

#[test]
fn test_health() {
    assert!(runtime::health().ok);
}
