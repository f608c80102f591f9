//! Integration tests for backend certificate convergence.

use apimsync_core::{
    CertificateManager, DesiredApiDefinition, Operation, Phase, ReconcileError, ReconcilerConfig,
    RecordingSleeper, RemoteError, ResolvedChain, RetryController, RetryPolicy,
    StaticSecretResolver, TenantSuffix, NOT_FOUND_STATUS,
};
use apimsync_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn second_pass_updates_instead_of_duplicating() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let defs = vec![api("Foo").with_cert_chain(sample_chain(2))];

    reconciler.deploy(&defs).await.unwrap();
    assert_eq!(platform.count(Operation::UploadCertificate), 2);
    assert_eq!(platform.count(Operation::UpdateCertificate), 0);

    platform.clear_calls();
    let report = reconciler.deploy(&defs).await.unwrap();
    assert!(report.is_converged());

    // One conflicting upload per alias, not retried, then one update each.
    assert_eq!(platform.count(Operation::UploadCertificate), 2);
    assert_eq!(platform.count(Operation::UpdateCertificate), 2);
    assert_eq!(platform.certificate_aliases(), vec!["Foo___v1___0", "Foo___v1___1"]);
    assert_eq!(platform.certificate("Foo___v1___0").unwrap().revision, 1);
}

#[tokio::test]
async fn leaf_is_stored_first_with_endpoint() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let def = api("Orders").with_cert_chain(sample_chain(3));

    reconciler.deploy(&[def]).await.unwrap();

    let leaf = platform.certificate("Orders___v1___0").unwrap();
    assert_eq!(leaf.pem_content, sample_certificate("leaf"));
    assert_eq!(leaf.endpoint.as_deref(), Some("https://orders.internal"));
    let root = platform.certificate("Orders___v1___2").unwrap();
    assert_eq!(root.pem_content, sample_certificate("root"));

    // Pauses between the three uploads only.
    assert_eq!(
        platform.sleeper.recorded(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn chain_file_and_tenant_aliases() {
    let platform = TestPlatform::tenant("acme.com");
    let reference = platform.write_chain("orders.pem", &sample_chain(2));
    let reconciler = platform.reconciler("admin@acme.com");

    let report = reconciler
        .deploy(&[api("Orders").with_cert_chain(reference)])
        .await
        .unwrap();
    assert!(report.is_converged());
    assert_eq!(
        platform.certificate_aliases(),
        vec!["Orders___v1___0_at_acme.com", "Orders___v1___1_at_acme.com"]
    );
}

#[tokio::test]
async fn malformed_chain_only_fails_certificate_step() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let def = api("Foo").with_cert_chain("-----BEGIN CERTIFICATE-----\nMIIB\n");

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].phase, Phase::Certificate);
    assert!(matches!(
        report.failures[0].error,
        ReconcileError::InvalidCertificateChain(_)
    ));
    assert_eq!(report.entries[0].status.to_string(), "PUBLISHED");
    assert_eq!(platform.count(Operation::UploadCertificate), 0);
}

#[tokio::test]
async fn undecodable_chain_uploads_nothing() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let garbage = "-----BEGIN CERTIFICATE-----\nthis is !!! not base64 at all ###\n-----END CERTIFICATE-----\n";
    let def = api("Foo").with_cert_chain(sample_certificate("leaf") + garbage);

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert_eq!(report.failures_in(Phase::Certificate).count(), 1);
    assert!(matches!(
        report.failures[0].error,
        ReconcileError::InvalidCertificateChain(_)
    ));
    assert_eq!(platform.count(Operation::UploadCertificate), 0);
    assert!(platform.certificate_aliases().is_empty());
}

#[tokio::test]
async fn missing_chain_file_only_fails_certificate_step() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let def = api("Foo").with_cert_chain("file:///nonexistent/foo.pem");

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert!(matches!(
        report.failures[0].error,
        ReconcileError::CertificateSource { .. }
    ));
    assert_eq!(report.pending(), 0);
}

#[tokio::test]
async fn failed_upload_skips_one_certificate() {
    let platform = TestPlatform::new();
    platform.fail_always(
        Operation::UploadCertificate,
        "Foo___v1___1",
        RemoteError::server("rate limited"),
    );
    let reconciler = platform.reconciler("admin");
    let def = api("Foo").with_cert_chain(sample_chain(3));

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].alias.as_deref(), Some("Foo___v1___1"));
    assert_eq!(platform.certificate_aliases(), vec!["Foo___v1___0", "Foo___v1___2"]);
    assert_eq!(platform.count_on(Operation::UploadCertificate, "Foo___v1___1"), 3);
    assert_eq!(report.entries[0].status.to_string(), "PUBLISHED");
}

#[tokio::test]
async fn jms_backends_have_no_certificates() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let def = DesiredApiDefinition::jms("Events", "v1", "/events", "orders.queue")
        .with_cert_chain(sample_chain(1));

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert!(report.is_converged());
    assert_eq!(platform.count(Operation::UploadCertificate), 0);
}

#[tokio::test]
async fn secret_references_resolve_through_resolver() {
    let platform = TestPlatform::new();
    let resolver = StaticSecretResolver::new().with_entry(
        "arn:aws:acm:eu-west-1:123456789012:certificate/orders",
        ResolvedChain {
            leaf: sample_certificate("leaf"),
            chain: Some(sample_certificate("intermediate") + &sample_certificate("root")),
        },
    );
    let reconciler = platform
        .reconciler("admin")
        .with_secret_resolver(Arc::new(resolver));
    let def = api("Orders")
        .with_cert_chain("arn:aws:acm:eu-west-1:123456789012:certificate/orders");

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert!(report.is_converged());
    assert_eq!(platform.certificate_aliases().len(), 3);
    assert_eq!(
        platform.certificate("Orders___v1___0").unwrap().pem_content,
        sample_certificate("leaf")
    );
}

#[tokio::test]
async fn secret_reference_without_resolver_fails_certificate_step() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let def = api("Orders").with_cert_chain("secret://orders-chain");

    let report = reconciler.deploy(&[def]).await.unwrap();
    assert_eq!(report.failures_in(Phase::Certificate).count(), 1);
}

#[tokio::test]
async fn certificate_listing() {
    let platform = TestPlatform::new();
    let reconciler = platform.reconciler("admin");
    let defs = vec![api("Foo").with_cert_chain(sample_chain(2)), api("Bar")];
    reconciler.deploy(&defs).await.unwrap();

    let statuses = reconciler.certificates(&defs).await.unwrap();
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses[0].alias, "Foo___v1___0");
    assert_eq!(statuses[0].status, "ACTIVE");
    assert_eq!(statuses[1].alias, "Foo___v1___1");
    assert_eq!(statuses[2].alias, "Bar___v1___0");
    assert_eq!(statuses[2].status, NOT_FOUND_STATUS);
}

#[tokio::test]
async fn certificate_listing_failure_reports_not_found() {
    let platform = TestPlatform::new();
    platform.insert_certificate("Foo___v1___0", sample_certificate("leaf"));
    platform.fail_always(
        Operation::CertificateInfo,
        "Foo___v1___0",
        RemoteError::server("down"),
    );
    let reconciler = platform.reconciler("admin");

    let statuses = reconciler.certificates(&[api("Foo")]).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, NOT_FOUND_STATUS);
}

#[tokio::test]
async fn manager_converges_standalone() {
    let platform = TestPlatform::new();
    let sleeper = RecordingSleeper::new();
    let retry = RetryController::new(RetryPolicy::no_retry(), Arc::new(RecordingSleeper::new()));
    let acme = TenantSuffix::new("acme.com");
    let manager = CertificateManager::new(&*platform.platform, &retry, &sleeper)
        .with_tenant(acme.as_ref())
        .with_pause(Duration::from_millis(250))
        .with_probe_limit(3);
    let def = api("Foo").with_cert_chain(sample_chain(2));

    let first = manager.converge(&def).await.unwrap();
    assert_eq!(first.uploaded, vec!["Foo___v1___0_at_acme.com", "Foo___v1___1_at_acme.com"]);
    assert!(first.updated.is_empty());

    let second = manager.converge(&def).await.unwrap();
    assert!(second.uploaded.is_empty());
    assert_eq!(second.updated.len(), 2);

    let removed = manager.remove("Foo", "v1").await;
    assert_eq!(removed.removed.len(), 2);
    assert!(removed.failed.is_empty());
    assert_eq!(platform.count(Operation::DeleteCertificate), 3);
    assert!(sleeper.total() >= Duration::from_millis(250));
}

#[test]
fn config_defaults_for_certificates() {
    let config = ReconcilerConfig::default();
    assert_eq!(config.certificate_pause, Duration::from_secs(1));
    assert_eq!(config.certificate_probe_limit, 5);
}
