//! Test fixtures and platform helpers.
//!
//! Provides a pre-wired in-memory platform, definition builders and sample
//! certificate chains.

use apimsync_core::{
    DeploymentManifest, DesiredApiDefinition, MemoryPlatform, RecordingSleeper, Reconciler,
    ReconcilerConfig, TenantSuffix,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// An in-memory platform plus the sleeper its reconcilers use.
pub struct TestPlatform {
    /// The platform.
    pub platform: Arc<MemoryPlatform>,
    /// Sleeper shared by every reconciler built from this platform.
    pub sleeper: Arc<RecordingSleeper>,
    /// Directory for certificate files (kept alive to prevent cleanup).
    temp_dir: TempDir,
}

impl TestPlatform {
    /// Creates a single-tenant platform.
    pub fn new() -> Self {
        Self::from_platform(MemoryPlatform::new())
    }

    /// Creates a platform whose contexts are qualified with `/t/<domain>`.
    pub fn tenant(domain: &str) -> Self {
        Self::from_platform(MemoryPlatform::new().with_tenant(TenantSuffix::new(domain)))
    }

    /// Wraps an existing platform.
    pub fn from_platform(platform: MemoryPlatform) -> Self {
        Self {
            platform: Arc::new(platform),
            sleeper: Arc::new(RecordingSleeper::new()),
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Builds a reconciler for `principal` with the default configuration.
    pub fn reconciler(&self, principal: &str) -> Reconciler<MemoryPlatform> {
        self.reconciler_with(ReconcilerConfig::new(principal))
    }

    /// Builds a reconciler with the given configuration.
    pub fn reconciler_with(&self, config: ReconcilerConfig) -> Reconciler<MemoryPlatform> {
        Reconciler::new(config, self.platform.clone()).with_sleeper(self.sleeper.clone())
    }

    /// Writes a certificate file and returns its `file://` reference.
    pub fn write_chain(&self, file_name: &str, content: &str) -> String {
        let path = self.temp_dir.path().join(file_name);
        std::fs::write(&path, content).expect("Failed to write certificate file");
        file_reference(&path)
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for TestPlatform {
    type Target = MemoryPlatform;

    fn deref(&self) -> &Self::Target {
        &self.platform
    }
}

/// Returns the `file://` reference of a path.
pub fn file_reference(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Creates an HTTP definition `name v1` under `/<lowercased name>`.
pub fn api(name: &str) -> DesiredApiDefinition {
    DesiredApiDefinition::http(
        name,
        "v1",
        format!("/{}", name.to_lowercase()),
        format!("https://{}.internal", name.to_lowercase()),
    )
}

/// Creates `count` definitions named `Api0`, `Api1`, ...
pub fn apis(count: usize) -> Vec<DesiredApiDefinition> {
    (0..count).map(|i| api(&format!("Api{i}"))).collect()
}

/// Creates a PEM certificate whose DER body is a SEQUENCE holding `label` as
/// an OCTET STRING. Labels are limited to 125 bytes.
pub fn sample_certificate(label: &str) -> String {
    let label = &label.as_bytes()[..label.len().min(125)];
    let mut der = vec![0x30, label.len() as u8 + 2, 0x04, label.len() as u8];
    der.extend_from_slice(label);
    let body = STANDARD.encode(&der);
    format!("-----BEGIN CERTIFICATE-----\n{body}\n-----END CERTIFICATE-----\n")
}

/// Creates a chain of `length` certificates: leaf first, root last.
pub fn sample_chain(length: usize) -> String {
    (0..length)
        .map(|i| match i {
            0 => sample_certificate("leaf"),
            i if i + 1 == length => sample_certificate("root"),
            i => sample_certificate(&format!("intermediate-{i}")),
        })
        .collect()
}

/// Serializes a manifest as pretty JSON.
pub fn manifest_json(config: ReconcilerConfig, apidefs: Vec<DesiredApiDefinition>) -> String {
    serde_json::to_string_pretty(&DeploymentManifest { config, apidefs })
        .expect("Failed to serialize manifest")
}
