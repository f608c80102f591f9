//! In-memory platform for tests and offline rehearsal.
//!
//! [`MemoryPlatform`] implements [`RemoteApiAdapter`] over a serializable
//! [`PlatformState`]. Identity queries are fuzzy like a real platform search,
//! contexts are tenant-qualified when a tenant is set, and failures can be
//! injected per operation and target.

use crate::adapter::RemoteApiAdapter;
use crate::error::{RemoteError, RemoteResult};
use crate::identity::{TenantSuffix, TENANT_PREFIX};
use crate::model::{
    CertificateInfo, CreatedResource, DeployedResource, DesiredApiDefinition, LifecycleState,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An API stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredApi {
    /// Platform identifier.
    pub remote_id: String,
    /// Context as stored, tenant-qualified if applicable.
    pub context: String,
    /// Lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Definition last written by create or update.
    pub definition: DesiredApiDefinition,
}

/// A certificate stored on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCertificate {
    /// PEM content.
    pub pem_content: String,
    /// Endpoint the certificate is bound to.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// End of validity.
    #[serde(default)]
    pub valid_until: Option<String>,
    /// Status reported by certificate lookups.
    pub status: String,
    /// Number of times the certificate was replaced.
    #[serde(default)]
    pub revision: u32,
}

/// Full platform state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformState {
    /// APIs, in creation order.
    pub apis: Vec<StoredApi>,
    /// Certificates by alias.
    pub certificates: BTreeMap<String, StoredCertificate>,
    /// Gateway base URL per environment.
    pub gateways: BTreeMap<String, String>,
    /// Counter for identifiers.
    pub next_id: u64,
}

impl PlatformState {
    fn api(&self, remote_id: &str) -> Option<&StoredApi> {
        self.apis.iter().find(|api| api.remote_id == remote_id)
    }

    fn api_mut(&mut self, remote_id: &str) -> Option<&mut StoredApi> {
        self.apis.iter_mut().find(|api| api.remote_id == remote_id)
    }
}

/// A platform operation, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Session acquisition.
    Authenticate,
    /// Identity query.
    Query,
    /// API creation.
    Create,
    /// API update.
    Update,
    /// Lifecycle transition to published.
    Publish,
    /// API deletion.
    Delete,
    /// Invokable URL lookup.
    InvokableUrl,
    /// Certificate upload.
    UploadCertificate,
    /// Certificate update.
    UpdateCertificate,
    /// Certificate deletion.
    DeleteCertificate,
    /// Certificate lookup.
    CertificateInfo,
}

/// A recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation invoked.
    pub operation: Operation,
    /// API name or certificate alias the call was about.
    pub target: String,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.operation, self.target)
    }
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    target: Option<String>,
    remaining: Option<u32>,
    error: RemoteError,
}

/// An in-memory [`RemoteApiAdapter`].
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
    tenant: Option<TenantSuffix>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryPlatform {
    /// Creates an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a platform holding `state`.
    pub fn with_state(state: PlatformState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Qualifies stored contexts with `/t/<tenant>`.
    pub fn with_tenant(mut self, tenant: Option<TenantSuffix>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Exposes APIs on a gateway environment.
    pub fn with_gateway(self, environment: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.state
            .lock()
            .gateways
            .insert(environment.into(), base_url.into());
        self
    }

    /// Stores an API directly, bypassing fault injection. Returns its identifier.
    pub fn insert_api(&self, definition: &DesiredApiDefinition, state: LifecycleState) -> String {
        let context = self.qualify(&definition.root_context);
        let mut platform = self.state.lock();
        let remote_id = next_id(&mut platform);
        platform.apis.push(StoredApi {
            remote_id: remote_id.clone(),
            context,
            lifecycle_state: state,
            definition: definition.clone(),
        });
        remote_id
    }

    /// Stores a certificate directly, bypassing fault injection.
    pub fn insert_certificate(&self, alias: impl Into<String>, pem_content: impl Into<String>) {
        self.state.lock().certificates.insert(
            alias.into(),
            StoredCertificate {
                pem_content: pem_content.into(),
                endpoint: None,
                valid_until: None,
                status: "ACTIVE".into(),
                revision: 0,
            },
        );
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> PlatformState {
        self.state.lock().clone()
    }

    /// Returns the stored API with the given identifier.
    pub fn api(&self, remote_id: &str) -> Option<StoredApi> {
        self.state.lock().api(remote_id).cloned()
    }

    /// Returns the stored APIs with the given name.
    pub fn apis_named(&self, name: &str) -> Vec<StoredApi> {
        self.state
            .lock()
            .apis
            .iter()
            .filter(|api| api.definition.name == name)
            .cloned()
            .collect()
    }

    /// Returns every stored certificate alias, sorted.
    pub fn certificate_aliases(&self) -> Vec<String> {
        self.state.lock().certificates.keys().cloned().collect()
    }

    /// Returns the certificate stored under `alias`.
    pub fn certificate(&self, alias: &str) -> Option<StoredCertificate> {
        self.state.lock().certificates.get(alias).cloned()
    }

    /// Makes every call of `operation` on `target` fail with `error`.
    pub fn fail_always(&self, operation: Operation, target: &str, error: RemoteError) {
        self.push_fault(operation, Some(target), None, error);
    }

    /// Makes the next `times` calls of `operation` on `target` fail with `error`.
    pub fn fail_times(&self, operation: Operation, target: &str, times: u32, error: RemoteError) {
        self.push_fault(operation, Some(target), Some(times), error);
    }

    /// Makes every call of `operation` fail with `error`, whatever the target.
    pub fn fail_all(&self, operation: Operation, error: RemoteError) {
        self.push_fault(operation, None, None, error);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Returns every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns how many times `operation` was called.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Returns how many times `operation` was called on `target`.
    pub fn count_on(&self, operation: Operation, target: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.operation == operation && call.target == target)
            .count()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn push_fault(
        &self,
        operation: Operation,
        target: Option<&str>,
        remaining: Option<u32>,
        error: RemoteError,
    ) {
        self.faults.lock().push(Fault {
            operation,
            target: target.map(str::to_string),
            remaining,
            error,
        });
    }

    /// Records the call and returns the first matching injected fault.
    fn enter(&self, operation: Operation, target: &str) -> RemoteResult<()> {
        self.calls.lock().push(Call {
            operation,
            target: target.to_string(),
        });

        let mut faults = self.faults.lock();
        let Some(index) = faults.iter().position(|fault| {
            fault.operation == operation
                && fault.target.as_deref().map_or(true, |t| t == target)
        }) else {
            return Ok(());
        };

        let error = faults[index].error.clone();
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Err(error)
    }

    fn qualify(&self, context: &str) -> String {
        match &self.tenant {
            Some(tenant) => format!("{TENANT_PREFIX}{tenant}{context}"),
            None => context.to_string(),
        }
    }

    fn target_of(&self, remote_id: &str) -> String {
        self.state
            .lock()
            .api(remote_id)
            .map_or_else(|| remote_id.to_string(), |api| api.definition.name.clone())
    }
}

fn next_id(state: &mut PlatformState) -> String {
    state.next_id += 1;
    format!("api-{:04}", state.next_id)
}

fn not_found(kind: &str, key: &str) -> RemoteError {
    RemoteError::not_found(format!("{kind} {key} not found"))
}

fn to_resource(api: &StoredApi) -> DeployedResource {
    DeployedResource {
        remote_id: api.remote_id.clone(),
        name: api.definition.name.clone(),
        version: api.definition.version.clone(),
        context: api.context.clone(),
        lifecycle_state: api.lifecycle_state.clone(),
    }
}

#[async_trait]
impl RemoteApiAdapter for MemoryPlatform {
    async fn authenticate(&self) -> RemoteResult<()> {
        self.enter(Operation::Authenticate, "session")
    }

    async fn query_by_identity(
        &self,
        name: &str,
        version: &str,
        context: &str,
    ) -> RemoteResult<Vec<DeployedResource>> {
        self.enter(Operation::Query, name)?;
        let state = self.state.lock();
        Ok(state
            .apis
            .iter()
            .filter(|api| {
                api.definition.name.contains(name)
                    && api.definition.version == version
                    && api.context.contains(context)
            })
            .map(to_resource)
            .collect())
    }

    async fn create(&self, definition: &DesiredApiDefinition) -> RemoteResult<CreatedResource> {
        self.enter(Operation::Create, &definition.name)?;
        let context = self.qualify(&definition.root_context);
        let mut state = self.state.lock();
        let exists = state.apis.iter().any(|api| {
            api.definition.name == definition.name
                && api.definition.version == definition.version
                && api.context == context
        });
        if exists {
            return Err(RemoteError::conflict(format!(
                "api {} {} already exists",
                definition.name, definition.version
            )));
        }
        let remote_id = next_id(&mut state);
        state.apis.push(StoredApi {
            remote_id: remote_id.clone(),
            context,
            lifecycle_state: LifecycleState::Created,
            definition: definition.clone(),
        });
        Ok(CreatedResource { remote_id })
    }

    async fn update(&self, definition: &DesiredApiDefinition, remote_id: &str) -> RemoteResult<()> {
        self.enter(Operation::Update, &definition.name)?;
        let mut state = self.state.lock();
        let api = state
            .api_mut(remote_id)
            .ok_or_else(|| not_found("api", remote_id))?;
        api.definition = definition.clone();
        Ok(())
    }

    async fn publish(&self, remote_id: &str) -> RemoteResult<()> {
        let target = self.target_of(remote_id);
        self.enter(Operation::Publish, &target)?;
        let mut state = self.state.lock();
        let api = state
            .api_mut(remote_id)
            .ok_or_else(|| not_found("api", remote_id))?;
        if !api.lifecycle_state.is_publishable() {
            return Err(RemoteError::new(
                400,
                400,
                format!("cannot publish api in state {}", api.lifecycle_state),
            ));
        }
        api.lifecycle_state = LifecycleState::Published;
        Ok(())
    }

    async fn delete(&self, remote_id: &str) -> RemoteResult<()> {
        let target = self.target_of(remote_id);
        self.enter(Operation::Delete, &target)?;
        let mut state = self.state.lock();
        let before = state.apis.len();
        state.apis.retain(|api| api.remote_id != remote_id);
        if state.apis.len() == before {
            return Err(not_found("api", remote_id));
        }
        Ok(())
    }

    async fn resolve_invokable_url(
        &self,
        remote_id: &str,
        environment: &str,
    ) -> RemoteResult<Option<String>> {
        let target = self.target_of(remote_id);
        self.enter(Operation::InvokableUrl, &target)?;
        let state = self.state.lock();
        let api = state.api(remote_id).ok_or_else(|| not_found("api", remote_id))?;
        Ok(state
            .gateways
            .get(environment)
            .map(|base| format!("{base}{}/{}", api.context, api.definition.version)))
    }

    async fn upload_certificate(
        &self,
        alias: &str,
        pem_content: &str,
        endpoint_hint: Option<&str>,
    ) -> RemoteResult<()> {
        self.enter(Operation::UploadCertificate, alias)?;
        let mut state = self.state.lock();
        if state.certificates.contains_key(alias) {
            return Err(RemoteError::conflict(format!("alias {alias} already exists")));
        }
        state.certificates.insert(
            alias.to_string(),
            StoredCertificate {
                pem_content: pem_content.to_string(),
                endpoint: endpoint_hint.map(str::to_string),
                valid_until: None,
                status: "ACTIVE".into(),
                revision: 0,
            },
        );
        Ok(())
    }

    async fn update_certificate(&self, alias: &str, pem_content: &str) -> RemoteResult<()> {
        self.enter(Operation::UpdateCertificate, alias)?;
        let mut state = self.state.lock();
        let certificate = state
            .certificates
            .get_mut(alias)
            .ok_or_else(|| not_found("certificate", alias))?;
        certificate.pem_content = pem_content.to_string();
        certificate.revision += 1;
        Ok(())
    }

    async fn delete_certificate(&self, alias: &str) -> RemoteResult<()> {
        self.enter(Operation::DeleteCertificate, alias)?;
        self.state
            .lock()
            .certificates
            .remove(alias)
            .map(|_| ())
            .ok_or_else(|| not_found("certificate", alias))
    }

    async fn certificate_info(&self, alias: &str) -> RemoteResult<CertificateInfo> {
        self.enter(Operation::CertificateInfo, alias)?;
        let state = self.state.lock();
        let certificate = state
            .certificates
            .get(alias)
            .ok_or_else(|| not_found("certificate", alias))?;
        Ok(CertificateInfo {
            alias: alias.to_string(),
            valid_until: certificate.valid_until.clone(),
            status: certificate.status.clone(),
        })
    }
}
