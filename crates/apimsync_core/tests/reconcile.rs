//! Integration tests for deploy, list and remove passes.

use apimsync_core::{
    CancellationFlag, CertificateInfo, CreatedResource, DeployedResource, DeploymentStatus,
    DesiredApiDefinition, FanOutPolicy, LifecycleState, MemoryPlatform, Operation, PassState,
    Phase, ReconcileError, Reconciler, ReconcilerConfig, RemoteApiAdapter, RemoteError,
    RemoteResult, StatusTable,
};
use apimsync_testkit::prelude::*;
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn published() -> DeploymentStatus {
    DeploymentStatus::Deployed(LifecycleState::Published)
}

#[tokio::test]
async fn failed_create_is_isolated() {
    let platform = TestPlatform::new();
    platform.fail_all_on_create("Api1");
    let reconciler = platform.reconciler("admin");
    let defs = apis(3);

    let report = reconciler.deploy(&defs).await.unwrap();

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.entries[0].status, published());
    assert_eq!(report.entries[1].status, DeploymentStatus::ToBeCreated);
    assert!(report.entries[1].remote_id.is_none());
    assert_eq!(report.entries[2].status, published());

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].identity, defs[1].identity());
    assert_eq!(report.failures[0].phase, Phase::CreateOrUpdate);
    assert_eq!(report.failures[0].error.remote().map(|e| e.code), Some(500));

    // Three attempts for the failing create, none for publish.
    assert_eq!(platform.count_on(Operation::Create, "Api1"), 3);
    assert_eq!(platform.count_on(Operation::Publish, "Api1"), 0);
    assert_eq!(
        platform.sleeper.recorded(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert_eq!(reconciler.state(), PassState::Completed);
}

#[tokio::test]
async fn failed_definition_converges_on_next_pass() {
    let platform = TestPlatform::new();
    platform.fail_all_on_create("Api1");
    let reconciler = platform.reconciler("admin");
    let defs = apis(3);
    reconciler.deploy(&defs).await.unwrap();

    platform.clear_faults();
    let report = reconciler.deploy(&defs).await.unwrap();
    assert!(report.is_converged());
    assert!(report.entries.iter().all(|e| e.status == published()));
    assert_eq!(platform.snapshot().apis.len(), 3);
}

#[tokio::test]
async fn failed_publish_is_isolated() {
    let platform = TestPlatform::new();
    platform.fail_always(Operation::Publish, "Api0", RemoteError::new(400, 400, "invalid lifecycle"));
    let reconciler = platform.reconciler("admin");

    let report = reconciler.deploy(&apis(2)).await.unwrap();
    assert_eq!(
        report.entries[0].status,
        DeploymentStatus::Deployed(LifecycleState::Created)
    );
    assert_eq!(report.entries[1].status, published());
    assert_eq!(report.failures_in(Phase::Publish).count(), 1);
}

#[tokio::test]
async fn query_failure_aborts_deploy() {
    let platform = TestPlatform::new();
    platform.fail_all(Operation::Query, RemoteError::transport("connection refused"));
    let reconciler = platform.reconciler("admin");

    let err = reconciler.deploy(&apis(2)).await.unwrap_err();
    assert_eq!(err.remote().map(|e| e.http_status), Some(0));
    assert_eq!(platform.count(Operation::Create), 0);
    assert_eq!(reconciler.state(), PassState::Failed);
}

#[tokio::test]
async fn colliding_certificate_aliases_rejected_before_any_call() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let defs = vec![
        DesiredApiDefinition::http("Foo___v1", "2", "/a", "https://a.internal")
            .with_cert_chain(sample_chain(1)),
        DesiredApiDefinition::http("Foo", "v1___2", "/b", "https://b.internal")
            .with_cert_chain(sample_chain(1)),
    ];

    let err = reconciler.deploy(&defs).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Config(_)));
    assert!(platform.calls().is_empty());
    assert!(platform.certificate_aliases().is_empty());
}

#[tokio::test]
async fn zero_certificate_limit_rejected_before_any_call() {
    let platform = TestPlatform::new();
    let reconciler =
        platform.reconciler_with(ReconcilerConfig::new("admin").with_certificate_probe_limit(0));

    let err = reconciler.remove(&apis(1)).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Config(_)));
    assert!(reconciler.certificates(&apis(1)).await.is_err());
    assert!(platform.calls().is_empty());
}

#[tokio::test]
async fn duplicate_remote_matches_are_reported() {
    let platform = TestPlatform::new();
    let def = api("Foo");
    let first = platform.insert_api(&def, LifecycleState::Published);
    let second = platform.insert_api(&def, LifecycleState::Published);
    let reconciler = platform.reconciler("admin");

    let report = reconciler.deploy(&[def.clone(), api("Bar")]).await.unwrap();
    assert!(report.is_converged());
    let ambiguous: Vec<_> = report.ambiguous().collect();
    assert_eq!(ambiguous.len(), 1);
    assert_eq!(ambiguous[0].definition, def);
    assert_eq!(ambiguous[0].remote_id.as_deref(), Some(first.as_str()));
    assert_eq!(ambiguous[0].ignored_duplicates, vec![second]);

    let table = StatusTable(&report.entries).to_string();
    assert!(table.contains("! Foo v1 matches 2 remote APIs"));
}

#[tokio::test]
async fn list_reports_without_changes() {
    let platform = TestPlatform::new();
    let defs = apis(2);
    let id = platform.insert_api(&defs[1], LifecycleState::Published);
    let reconciler = platform.reconciler("admin");

    let entries = reconciler.list(&defs).await.unwrap();
    assert_eq!(entries[0].status, DeploymentStatus::ToBeCreated);
    assert_eq!(entries[1].remote_id.as_deref(), Some(id.as_str()));
    assert_eq!(platform.count(Operation::Create), 0);
    assert_eq!(platform.count(Operation::Publish), 0);

    let table = StatusTable(&entries).to_string();
    assert!(table.contains("TO_BE_CREATED"));
    assert!(table.contains(&id));
}

#[tokio::test]
async fn invokable_urls_reported_after_deploy() {
    let platform = TestPlatform::from_platform(
        MemoryPlatform::new().with_gateway("Production and Sandbox", "https://gw.example.com:8243"),
    );
    let config = ReconcilerConfig::new("admin").with_gateway_environment("Production and Sandbox");
    let reconciler = platform.reconciler_with(config);

    let report = reconciler.deploy(&[api("Orders")]).await.unwrap();
    assert_eq!(
        report.entries[0].invokable_url.as_deref(),
        Some("https://gw.example.com:8243/orders/v1")
    );
}

#[tokio::test]
async fn tenant_deploy_is_idempotent() {
    let platform = TestPlatform::tenant("acme.com");
    let reconciler = platform.reconciler("admin@acme.com");
    let defs = apis(2);

    reconciler.deploy(&defs).await.unwrap();
    let report = reconciler.deploy(&defs).await.unwrap();

    assert!(report.is_converged());
    assert_eq!(platform.count(Operation::Create), 2);
    assert_eq!(platform.count(Operation::Update), 2);
    let state = platform.snapshot();
    assert_eq!(state.apis.len(), 2);
    assert_eq!(state.apis[0].context, "/t/acme.com/api0");
}

#[tokio::test]
async fn concurrent_fan_out_keeps_entries_aligned() {
    let platform = TestPlatform::new();
    platform.fail_all_on_create("Api3");
    let config = ReconcilerConfig::new("admin").with_fan_out(FanOutPolicy::Concurrent { limit: 4 });
    let reconciler = platform.reconciler_with(config);
    let defs = apis(8);

    let report = reconciler.deploy(&defs).await.unwrap();
    for (i, (entry, def)) in report.entries.iter().zip(&defs).enumerate() {
        assert_eq!(&entry.definition, def);
        if i == 3 {
            assert_eq!(entry.status, DeploymentStatus::ToBeCreated);
        } else {
            assert_eq!(entry.status, published());
        }
    }
    assert_eq!(report.failures.len(), 1);
}

#[tokio::test]
async fn remove_deletes_apis_and_probes_certificates() {
    let platform = TestPlatform::new();
    let defs = vec![api("Foo").with_cert_chain(sample_chain(2)), api("Bar")];
    let reconciler = platform.reconciler("admin");
    reconciler.deploy(&defs).await.unwrap();
    assert_eq!(platform.certificate_aliases(), vec!["Foo___v1___0", "Foo___v1___1"]);

    let report = reconciler.remove(&defs).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.deleted, vec![defs[0].identity(), defs[1].identity()]);
    assert_eq!(report.certificates_removed, vec!["Foo___v1___0", "Foo___v1___1"]);
    assert!(platform.snapshot().apis.is_empty());
    assert!(platform.certificate_aliases().is_empty());

    // Five probed indices per definition; missing aliases are not retried.
    assert_eq!(platform.count(Operation::DeleteCertificate), 10);
}

#[tokio::test]
async fn remove_isolates_failures() {
    let platform = TestPlatform::new();
    let defs = vec![
        api("Foo").with_cert_chain(sample_chain(1)),
        api("Bar").with_cert_chain(sample_chain(2)),
    ];
    let reconciler = platform.reconciler("admin");
    reconciler.deploy(&defs).await.unwrap();

    platform.fail_always(Operation::Delete, "Foo", RemoteError::server("locked"));
    platform.fail_always(
        Operation::DeleteCertificate,
        "Bar___v1___0",
        RemoteError::server("in use"),
    );

    let report = reconciler.remove(&defs).await.unwrap();
    assert_eq!(report.deleted, vec![defs[1].identity()]);
    assert_eq!(report.certificates_removed, vec!["Bar___v1___1"]);

    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].phase, Phase::Delete);
    assert_eq!(report.failures[0].identity, defs[0].identity());
    assert_eq!(report.failures[1].phase, Phase::CertificateDelete);
    assert_eq!(report.failures[1].alias.as_deref(), Some("Bar___v1___0"));

    // Foo's certificate is kept because its API could not be deleted.
    assert_eq!(platform.certificate_aliases(), vec!["Bar___v1___0", "Foo___v1___0"]);
}

#[tokio::test]
async fn remove_treats_missing_api_as_absent() {
    let platform = TestPlatform::new();
    let defs = vec![api("Foo")];
    let id = platform.insert_api(&defs[0], LifecycleState::Published);
    platform.fail_always(Operation::Delete, "Foo", RemoteError::not_found("already gone"));
    let reconciler = platform.reconciler("admin");

    let report = reconciler.remove(&defs).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.deleted, vec![defs[0].identity()]);
    assert_eq!(platform.count(Operation::Delete), 1);
    assert!(platform.api(&id).is_some());
}

/// Delegates to a memory platform and requests cancellation when an API is created.
struct CancelOnCreate {
    inner: MemoryPlatform,
    flag: OnceLock<CancellationFlag>,
}

#[async_trait]
impl RemoteApiAdapter for CancelOnCreate {
    async fn query_by_identity(
        &self,
        name: &str,
        version: &str,
        context: &str,
    ) -> RemoteResult<Vec<DeployedResource>> {
        self.inner.query_by_identity(name, version, context).await
    }

    async fn create(&self, definition: &DesiredApiDefinition) -> RemoteResult<CreatedResource> {
        let created = self.inner.create(definition).await;
        if let Some(flag) = self.flag.get() {
            flag.cancel();
        }
        created
    }

    async fn update(&self, definition: &DesiredApiDefinition, remote_id: &str) -> RemoteResult<()> {
        self.inner.update(definition, remote_id).await
    }

    async fn publish(&self, remote_id: &str) -> RemoteResult<()> {
        self.inner.publish(remote_id).await
    }

    async fn delete(&self, remote_id: &str) -> RemoteResult<()> {
        self.inner.delete(remote_id).await
    }

    async fn resolve_invokable_url(
        &self,
        remote_id: &str,
        environment: &str,
    ) -> RemoteResult<Option<String>> {
        self.inner.resolve_invokable_url(remote_id, environment).await
    }

    async fn upload_certificate(
        &self,
        alias: &str,
        pem_content: &str,
        endpoint_hint: Option<&str>,
    ) -> RemoteResult<()> {
        self.inner.upload_certificate(alias, pem_content, endpoint_hint).await
    }

    async fn update_certificate(&self, alias: &str, pem_content: &str) -> RemoteResult<()> {
        self.inner.update_certificate(alias, pem_content).await
    }

    async fn delete_certificate(&self, alias: &str) -> RemoteResult<()> {
        self.inner.delete_certificate(alias).await
    }

    async fn certificate_info(&self, alias: &str) -> RemoteResult<CertificateInfo> {
        self.inner.certificate_info(alias).await
    }
}

#[tokio::test]
async fn cancellation_stops_before_next_definition() {
    let adapter = Arc::new(CancelOnCreate {
        inner: MemoryPlatform::new(),
        flag: OnceLock::new(),
    });
    let reconciler = Reconciler::new(ReconcilerConfig::new("admin"), adapter.clone());
    adapter.flag.get_or_init(|| reconciler.cancellation());

    let err = reconciler.deploy(&apis(3)).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Cancelled));
    assert_eq!(adapter.inner.count(Operation::Create), 1);
    assert_eq!(adapter.inner.count(Operation::Publish), 0);
    assert_eq!(reconciler.state(), PassState::Failed);
}

/// Extension used by these tests to fail every create of one API.
trait FailCreate {
    fn fail_all_on_create(&self, name: &str);
}

impl FailCreate for TestPlatform {
    fn fail_all_on_create(&self, name: &str) {
        self.fail_always(Operation::Create, name, RemoteError::server("backend rejected"));
    }
}
