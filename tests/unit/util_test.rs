//! Tests for utility functions

use prometheus_fanout::util::{init_tracing, new_task_id, now_ms, parse_rfc3339_ms, DEFAULT_LOG_FILTER};

#[test]
fn test_task_ids_are_uuids() {
    let a = new_task_id();
    let b = new_task_id();
    assert_ne!(a, b);
    assert!(uuid::Uuid::parse_str(&a).is_ok());
}

#[test]
fn test_parse_rfc3339() {
    let ms = parse_rfc3339_ms("2024-05-01T12:00:00Z").unwrap();
    assert_eq!(ms, 1_714_564_800_000);
    assert!(parse_rfc3339_ms("tomorrow").is_err());
}

#[test]
fn test_now_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_default_filter_targets_crate() {
    assert!(DEFAULT_LOG_FILTER.starts_with("prometheus_fanout"));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised");
}
