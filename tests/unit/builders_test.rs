//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use prometheus_fanout::builders::{build_gateway, build_job_store, build_workers};
use prometheus_fanout::config::{JobStoreBackend, OrchestratorConfig};
use prometheus_fanout::core::{
    Broker, CapabilityProcessor, CapabilityService, FanOut, JobStore, OrchestratorError,
    ServiceContent, Task,
};
use prometheus_fanout::infra::{
    InMemoryBroker, InMemoryCounterStore, InMemoryDatastore, JwtIdentityProvider,
};

struct Echo(CapabilityService);

#[async_trait]
impl CapabilityProcessor for Echo {
    fn service(&self) -> CapabilityService {
        self.0
    }

    async fn process(&self, task: &Task) -> Result<ServiceContent, OrchestratorError> {
        Ok(ServiceContent::Text(task.content.clone()))
    }
}

fn config(instances: usize) -> OrchestratorConfig {
    let mut cfg = OrchestratorConfig::default();
    cfg.auth.jwt_secret = "secret".into();
    cfg.worker.instances_per_service = instances;
    cfg
}

#[test]
fn test_build_workers_per_service() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let workers = build_workers(&config(2), &broker, |service, _| {
        Ok(Arc::new(Echo(service)) as Arc<dyn CapabilityProcessor>)
    })
    .unwrap();

    assert_eq!(workers.len(), 10);
    for service in CapabilityService::ALL {
        let ids: Vec<usize> = workers
            .iter()
            .filter(|w| w.service() == service)
            .map(|w| w.id())
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }
}

#[test]
fn test_build_workers_rejects_mismatched_processor() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let result = build_workers(&config(1), &broker, |_, _| {
        Ok(Arc::new(Echo(CapabilityService::TaskBreakdown)) as Arc<dyn CapabilityProcessor>)
    });
    assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
}

#[test]
fn test_build_workers_rejects_invalid_config() {
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let result = build_workers(&OrchestratorConfig::default(), &broker, |service, _| {
        Ok(Arc::new(Echo(service)) as Arc<dyn CapabilityProcessor>)
    });
    assert!(result.is_err());
}

#[test]
fn test_build_file_job_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(1);
    cfg.scheduler.job_store = JobStoreBackend::File;
    cfg.scheduler.job_store_path = Some(dir.path().to_path_buf());
    let store = build_job_store(&cfg).unwrap();
    assert!(store.all().unwrap().is_empty());
}

#[tokio::test]
async fn test_build_gateway_requires_credentials() {
    let cfg = config(1);
    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::default());
    let gateway = build_gateway(
        &cfg,
        Arc::new(JwtIdentityProvider::new("secret").unwrap()),
        Arc::new(InMemoryCounterStore::new()),
        Arc::new(InMemoryDatastore::new()),
        Arc::new(FanOut::new(broker)),
    )
    .unwrap();
    assert_eq!(gateway.authenticate(""), Err(OrchestratorError::Unauthorized));
}
