//! Capabilities the engine needs from the remote platform.

use crate::error::RemoteResult;
use crate::model::{CertificateInfo, CreatedResource, DeployedResource, DesiredApiDefinition};
use async_trait::async_trait;

/// Version-specific bridge to an API-management platform.
///
/// Implementations own the wire format and translate every failure into a
/// [`RemoteError`](crate::RemoteError). The engine wraps each call in its own
/// retry loop, so implementations should not retry internally.
#[async_trait]
pub trait RemoteApiAdapter: Send + Sync {
    /// Acquires credentials for the pass (client registration, token).
    async fn authenticate(&self) -> RemoteResult<()> {
        Ok(())
    }

    /// Searches for APIs matching the identity. The search may be fuzzy.
    async fn query_by_identity(
        &self,
        name: &str,
        version: &str,
        context: &str,
    ) -> RemoteResult<Vec<DeployedResource>>;

    /// Creates an API.
    async fn create(&self, definition: &DesiredApiDefinition) -> RemoteResult<CreatedResource>;

    /// Replaces an existing API with the definition.
    async fn update(&self, definition: &DesiredApiDefinition, remote_id: &str) -> RemoteResult<()>;

    /// Transitions an API to published. Publishing a published API is allowed.
    async fn publish(&self, remote_id: &str) -> RemoteResult<()>;

    /// Deletes an API.
    async fn delete(&self, remote_id: &str) -> RemoteResult<()>;

    /// Returns the HTTPS URL of the API on a gateway environment, if exposed there.
    async fn resolve_invokable_url(
        &self,
        remote_id: &str,
        environment: &str,
    ) -> RemoteResult<Option<String>>;

    /// Uploads a backend certificate. Fails with a conflict if the alias exists.
    async fn upload_certificate(
        &self,
        alias: &str,
        pem_content: &str,
        endpoint_hint: Option<&str>,
    ) -> RemoteResult<()>;

    /// Replaces the certificate stored under an alias.
    async fn update_certificate(&self, alias: &str, pem_content: &str) -> RemoteResult<()>;

    /// Deletes a certificate. Fails with not-found if the alias is absent.
    async fn delete_certificate(&self, alias: &str) -> RemoteResult<()>;

    /// Returns certificate metadata. Fails with not-found if the alias is absent.
    async fn certificate_info(&self, alias: &str) -> RemoteResult<CertificateInfo>;
}
