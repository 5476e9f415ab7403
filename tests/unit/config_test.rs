//! Tests for configuration validation

use std::collections::HashMap;
use std::path::PathBuf;

use prometheus_fanout::config::{JobStoreBackend, OrchestratorConfig};
use prometheus_fanout::core::StoreFailurePolicy;

fn valid() -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.auth.jwt_secret = "secret".into();
    cfg
}

#[test]
fn test_defaults() {
    let cfg = valid();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.rate_limit.limit, 100);
    assert_eq!(cfg.rate_limit.per_secs, 60);
    assert_eq!(cfg.rate_limit.on_store_failure, StoreFailurePolicy::FailClosed);
    assert_eq!(cfg.broker.max_deliveries, 5);
    assert_eq!(cfg.worker.processor_timeout_secs, 30);
    assert!((1..=4).contains(&cfg.worker.instances_per_service));
    assert_eq!(cfg.scheduler.poll_interval_ms, 1000);
    assert_eq!(cfg.gateway.max_content_len, 10_000);
}

#[test]
fn test_missing_secret_is_invalid() {
    assert!(OrchestratorConfig::default().validate().is_err());
}

#[test]
fn test_zero_values_are_invalid() {
    let mut cfg = valid();
    cfg.rate_limit.limit = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = valid();
    cfg.broker.max_deliveries = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = valid();
    cfg.worker.processor_timeout_secs = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = valid();
    cfg.scheduler.poll_interval_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_file_job_store_needs_path() {
    let mut cfg = valid();
    cfg.scheduler.job_store = JobStoreBackend::File;
    assert!(cfg.validate().is_err());
    cfg.scheduler.job_store_path = Some(PathBuf::from("/tmp/jobs"));
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "rate_limit": { "limit": 3, "per_secs": 10, "on_store_failure": "fail_open" },
        "scheduler": { "job_store": "file", "job_store_path": "/var/lib/fanout" },
        "auth": { "jwt_secret": "secret" }
    }"#;

    let cfg = OrchestratorConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.rate_limit.limit, 3);
    assert_eq!(cfg.rate_limit.on_store_failure, StoreFailurePolicy::FailOpen);
    assert_eq!(cfg.scheduler.job_store, JobStoreBackend::File);
    assert_eq!(cfg.broker.max_deliveries, 5);
}

#[test]
fn test_config_from_json_rejects_garbage() {
    assert!(OrchestratorConfig::from_json_str("{").is_err());
    assert!(OrchestratorConfig::from_json_str(r#"{"rate_limit": {"limit": 0}}"#).is_err());
}

#[test]
fn test_config_from_env_lookup() {
    let vars: HashMap<&str, &str> = [
        ("FANOUT_RATE_LIMIT", "7"),
        ("FANOUT_ON_STORE_FAILURE", "fail_open"),
        ("FANOUT_MAX_DELIVERIES", "2"),
        ("FANOUT_POLL_INTERVAL_MS", "250"),
        ("FANOUT_JOB_STORE", "file"),
        ("FANOUT_JOB_STORE_PATH", "/tmp/jobs"),
        ("FANOUT_JWT_SECRET", "secret"),
    ]
    .into_iter()
    .collect();

    let cfg = OrchestratorConfig::from_env_with(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
    assert_eq!(cfg.rate_limit.limit, 7);
    assert_eq!(cfg.rate_limit.on_store_failure, StoreFailurePolicy::FailOpen);
    assert_eq!(cfg.broker.max_deliveries, 2);
    assert_eq!(cfg.poll_interval().as_millis(), 250);
    assert_eq!(cfg.scheduler.job_store_path, Some(PathBuf::from("/tmp/jobs")));
}

#[test]
fn test_config_from_env_rejects_bad_numbers() {
    let err = OrchestratorConfig::from_env_with(|k| match k {
        "FANOUT_RATE_LIMIT" => Some("lots".to_string()),
        "FANOUT_JWT_SECRET" => Some("secret".to_string()),
        _ => None,
    })
    .unwrap_err();
    assert!(err.contains("FANOUT_RATE_LIMIT"));
}
