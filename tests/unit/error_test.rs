//! Tests for error types

use prometheus_fanout::core::OrchestratorError;
use prometheus_fanout::runtime::ApiError;

#[test]
fn test_error_display() {
    assert_eq!(format!("{}", OrchestratorError::Throttled), "rate limit exceeded");
    assert_eq!(
        format!("{}", OrchestratorError::NotFound("task t1".into())),
        "not found: task t1"
    );
    assert_eq!(
        format!("{}", OrchestratorError::BrokerUnavailable("closed".into())),
        "broker unavailable: closed"
    );
}

#[test]
fn test_status_codes_are_distinct() {
    let errors = [
        OrchestratorError::Unauthorized,
        OrchestratorError::Throttled,
        OrchestratorError::InvalidRequest(String::new()),
        OrchestratorError::NotFound(String::new()),
        OrchestratorError::UpstreamFailure(String::new()),
        OrchestratorError::BrokerUnavailable(String::new()),
    ];
    let codes: std::collections::BTreeSet<u16> = errors.iter().map(OrchestratorError::status_code).collect();
    assert_eq!(codes.len(), errors.len());
    assert_eq!(OrchestratorError::Unauthorized.status_code(), 401);
    assert_eq!(OrchestratorError::Throttled.status_code(), 429);
}

#[test]
fn test_api_error_hides_broker_outage() {
    let api: ApiError = OrchestratorError::BrokerUnavailable("down".into()).into();
    assert_eq!(api.status, 502);
    assert!(api.error.contains("broker: down"));
}
