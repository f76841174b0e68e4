//! Reconcile engine tests against the local backend and a mocked backend.

use std::sync::Arc;

use inference_cloud::local::LocalProvider;
use inference_cloud::{CloudProvider, CloudProviderError, MockCloudProvider};
use inference_host::{
    prepare, Operation, ProvisionError, ProvisionPlan, RawConfig, ReconcileEngine, ReplaceReason,
};
use tempfile::TempDir;

fn raw(cidr: &str, size: &str) -> RawConfig {
    RawConfig {
        name: Some("demo-host".to_string()),
        ssh_key: Some("operator".to_string()),
        allowed_cidr: Some(cidr.to_string()),
        instance_size: Some(size.to_string()),
        model: Some("demo:1b".to_string()),
        storage_gib: Some(50),
        ..RawConfig::default()
    }
}

fn plan_for(cidr: &str, size: &str) -> ProvisionPlan {
    prepare(raw(cidr, size)).unwrap().1
}

fn local_engine() -> (TempDir, Arc<LocalProvider>, ReconcileEngine) {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(LocalProvider::new(dir.path().join("state.json")));
    let engine = ReconcileEngine::new(provider.clone());
    (dir, provider, engine)
}

#[tokio::test]
async fn test_first_apply_creates() {
    let (_dir, _provider, engine) = local_engine();

    let report = engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();

    assert!(matches!(report.operations.as_slice(), [Operation::Create { .. }]));
    let resource = report.resource.unwrap();
    assert_eq!(resource.name(), "demo-host");
    assert_eq!(resource.instance_type(), "t3.xlarge");
    assert_eq!(resource.network_rules().len(), 3);
}

#[tokio::test]
async fn test_reapply_is_idempotent() {
    let (_dir, _provider, engine) = local_engine();

    engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();
    let first_id = engine.observe("demo-host").await.unwrap().unwrap().id().to_string();

    let changes = engine.plan(&plan_for("203.0.113.5/32", "medium")).await.unwrap();
    assert!(changes.is_empty());

    let report = engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();
    assert!(!report.changed());
    assert_eq!(report.resource.unwrap().id(), first_id);
}

#[tokio::test]
async fn test_cidr_change_updates_rules_in_place() {
    let (_dir, provider, engine) = local_engine();

    engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();
    let before = engine.observe("demo-host").await.unwrap().unwrap();

    let report = engine.apply(plan_for("198.51.100.0/24", "medium")).await.unwrap();
    assert!(matches!(
        report.operations.as_slice(),
        [Operation::UpdateNetworkRules { .. }]
    ));

    let after = engine.observe("demo-host").await.unwrap().unwrap();
    assert_eq!(after.id(), before.id());
    assert!(after
        .network_rules()
        .iter()
        .filter(|r| r.port.is_some())
        .all(|r| r.cidr == "198.51.100.0/24"));
    assert_eq!(provider.list_instances().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_size_change_replaces_host() {
    let (_dir, provider, engine) = local_engine();

    engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();
    let before = engine.observe("demo-host").await.unwrap().unwrap();

    let report = engine.apply(plan_for("203.0.113.5/32", "gpu-small")).await.unwrap();
    assert!(matches!(report.operations.as_slice(), [Operation::Replace { .. }]));

    let after = engine.observe("demo-host").await.unwrap().unwrap();
    assert_ne!(after.id(), before.id());
    assert_eq!(after.instance_type(), "g4dn.xlarge");

    let old = provider.get_instance(before.id()).await.unwrap();
    assert_eq!(old.status, inference_cloud::InstanceStatus::Terminated);
}

#[tokio::test]
async fn test_model_change_replaces_host() {
    let (_dir, _provider, engine) = local_engine();

    engine.apply(plan_for("203.0.113.5/32", "medium")).await.unwrap();
    let before = engine.observe("demo-host").await.unwrap().unwrap();
    assert_eq!(before.model(), Some("demo:1b"));

    let switched = prepare(RawConfig {
        model: Some("phi4-mini:3.8b".to_string()),
        ..raw("203.0.113.5/32", "medium")
    })
    .unwrap()
    .1;

    let changes = engine.plan(&switched).await.unwrap();
    assert!(matches!(
        changes.operations.as_slice(),
        [Operation::Replace { reasons, .. }]
            if reasons == &vec![ReplaceReason::Model {
                from: "demo:1b".to_string(),
                to: "phi4-mini:3.8b".to_string(),
            }]
    ));

    engine.apply(switched).await.unwrap();
    let after = engine.observe("demo-host").await.unwrap().unwrap();
    assert_ne!(after.id(), before.id());
    assert_eq!(after.model(), Some("phi4-mini:3.8b"));
}

#[tokio::test]
async fn test_destroy_then_destroy_again() {
    let (_dir, _provider, engine) = local_engine();

    engine.apply(plan_for("203.0.113.5/32", "small")).await.unwrap();

    let report = engine.destroy("demo-host").await.unwrap();
    assert!(matches!(report.operations.as_slice(), [Operation::Destroy { .. }]));
    assert!(engine.observe("demo-host").await.unwrap().is_none());

    let again = engine.destroy("demo-host").await.unwrap();
    assert!(!again.changed());
}

#[tokio::test]
async fn test_backend_error_is_surfaced_without_cleanup() {
    let mut mock = MockCloudProvider::new();
    mock.expect_find_instance().times(1).returning(|_| Ok(None));
    mock.expect_create_instance().times(1).returning(|_| {
        Err(CloudProviderError::Api {
            status: 400,
            message: "InsufficientInstanceCapacity: no g4dn.xlarge capacity".to_string(),
        })
    });
    mock.expect_terminate_instance().never();
    mock.expect_replace_firewall_rules().never();

    let engine = ReconcileEngine::new(Arc::new(mock));
    let err = engine
        .apply(plan_for("203.0.113.5/32", "gpu-small"))
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Backend(_)));
    assert!(!err.is_preflight());
    assert!(err
        .to_string()
        .contains("InsufficientInstanceCapacity: no g4dn.xlarge capacity"));
}

#[tokio::test]
async fn test_observe_error_blocks_apply() {
    let mut mock = MockCloudProvider::new();
    mock.expect_find_instance()
        .returning(|_| Err(CloudProviderError::Auth("expired token".to_string())));
    mock.expect_create_instance().never();

    let engine = ReconcileEngine::new(Arc::new(mock));
    let err = engine
        .apply(plan_for("203.0.113.5/32", "medium"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("expired token"));
}
