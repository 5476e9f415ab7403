//! Tests for audit sink

use prometheus_fanout::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "task1",
        "gateway",
        Some("user1".to_string()),
        "submit",
        Some("queues=5".to_string()),
    );

    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].task_id, "task1");
    assert_eq!(events[0].component, "gateway");
    assert_eq!(events[0].action, "submit");
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("task1", "gateway", None, "submit", None));
    sink.record(build_audit_event("task2", "gateway", None, "submit", None));
    sink.record(build_audit_event("task3", "gateway", None, "submit", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, "task2"); // First one popped
    assert_eq!(events[1].task_id, "task3");
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(
        "task1",
        "aggregator",
        Some("user1".to_string()),
        "complete",
        Some("services=5".to_string()),
    );

    assert!(event.event_id.starts_with("task1-complete-"));
    assert_eq!(event.user_id, Some("user1".to_string()));
    assert_eq!(event.detail, Some("services=5".to_string()));
    assert!(event.created_at_ms > 0);
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_audit_event("task1", "scheduler", None, "fire", None);
    let b = build_audit_event("task1", "scheduler", None, "fire", None);
    assert_ne!(a.event_id, b.event_id);
}
