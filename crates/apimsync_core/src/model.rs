//! Desired definitions, remote resources and per-pass status entries.

use crate::identity::ApiIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Visibility of an API in the developer portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    /// Visible to everyone.
    #[default]
    Public,
    /// Visible to the owning tenant only.
    Private,
    /// Visible to selected roles.
    Restricted,
}

/// Backend the gateway routes requests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum Backend {
    /// HTTP(S) endpoint, optionally secured with a backend certificate chain.
    Http {
        /// Base URL of the backend service.
        base_url: String,
        /// Certificate chain reference: inline PEM, `file://` path or secret reference.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cert_chain: Option<String>,
    },
    /// JMS destination.
    Jms {
        /// Queue or topic name.
        destination: String,
        /// Connection parameters.
        #[serde(default)]
        parameters: BTreeMap<String, String>,
    },
}

/// CORS configuration passed through to the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Allowed headers.
    #[serde(default)]
    pub allow_headers: Vec<String>,
    /// Allowed methods.
    #[serde(default)]
    pub allow_methods: Vec<String>,
    /// Whether credentials are allowed.
    #[serde(default)]
    pub allow_credentials: bool,
}

/// Named mediation sequences attached to the request, response and fault flows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MediationPolicies {
    /// Request flow policy.
    #[serde(default, rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_flow: Option<String>,
    /// Response flow policy.
    #[serde(default, rename = "out", skip_serializing_if = "Option::is_none")]
    pub out_flow: Option<String>,
    /// Fault flow policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Ownership contacts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessInfo {
    /// Business owner name.
    #[serde(default)]
    pub business_owner: Option<String>,
    /// Business owner email.
    #[serde(default)]
    pub business_owner_email: Option<String>,
    /// Technical owner name.
    #[serde(default)]
    pub technical_owner: Option<String>,
    /// Technical owner email.
    #[serde(default)]
    pub technical_owner_email: Option<String>,
}

/// A caller-supplied declaration of one API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredApiDefinition {
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// Root context the API is exposed under.
    pub root_context: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags attached to the API.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Portal visibility.
    #[serde(default)]
    pub visibility: Visibility,
    /// Production throttling limit in transactions per second.
    #[serde(default)]
    pub max_tps: Option<u32>,
    /// Backend routing.
    pub backend: Backend,
    /// Security schemes, e.g. `oauth2` or `api_key`.
    #[serde(default)]
    pub security_scheme: Option<Vec<String>>,
    /// CORS configuration.
    #[serde(default)]
    pub cors_policy: Option<CorsPolicy>,
    /// Mediation policies.
    #[serde(default)]
    pub mediation_policies: Option<MediationPolicies>,
    /// Ownership contacts.
    #[serde(default)]
    pub business_info: Option<BusinessInfo>,
    /// Additional API properties.
    #[serde(default)]
    pub api_properties: BTreeMap<String, String>,
}

impl DesiredApiDefinition {
    /// Creates a definition routed to an HTTP backend.
    pub fn http(
        name: impl Into<String>,
        version: impl Into<String>,
        root_context: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self::with_backend(
            name,
            version,
            root_context,
            Backend::Http {
                base_url: base_url.into(),
                cert_chain: None,
            },
        )
    }

    /// Creates a definition routed to a JMS destination.
    pub fn jms(
        name: impl Into<String>,
        version: impl Into<String>,
        root_context: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self::with_backend(
            name,
            version,
            root_context,
            Backend::Jms {
                destination: destination.into(),
                parameters: BTreeMap::new(),
            },
        )
    }

    fn with_backend(
        name: impl Into<String>,
        version: impl Into<String>,
        root_context: impl Into<String>,
        backend: Backend,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            root_context: root_context.into(),
            description: None,
            tags: Vec::new(),
            visibility: Visibility::default(),
            max_tps: None,
            backend,
            security_scheme: None,
            cors_policy: None,
            mediation_policies: None,
            business_info: None,
            api_properties: BTreeMap::new(),
        }
    }

    /// Sets the backend certificate chain reference. No effect on JMS backends.
    pub fn with_cert_chain(mut self, chain: impl Into<String>) -> Self {
        if let Backend::Http { cert_chain, .. } = &mut self.backend {
            *cert_chain = Some(chain.into());
        }
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the identity triple of this definition.
    pub fn identity(&self) -> ApiIdentity {
        ApiIdentity::new(&self.name, &self.version, &self.root_context)
    }

    /// Returns the certificate chain reference, if the backend declares one.
    pub fn cert_chain(&self) -> Option<&str> {
        match &self.backend {
            Backend::Http { cert_chain, .. } => cert_chain.as_deref(),
            Backend::Jms { .. } => None,
        }
    }

    /// Returns the endpoint a backend certificate is bound to.
    pub fn endpoint_hint(&self) -> Option<&str> {
        match &self.backend {
            Backend::Http { base_url, .. } => Some(base_url),
            Backend::Jms { .. } => None,
        }
    }
}

/// Lifecycle state reported by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleState {
    /// Created but not yet published.
    Created,
    /// Published to the gateway.
    Published,
    /// Any other platform-defined state, kept verbatim.
    Other(String),
}

impl LifecycleState {
    /// Returns the platform spelling of this state.
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleState::Created => "CREATED",
            LifecycleState::Published => "PUBLISHED",
            LifecycleState::Other(s) => s,
        }
    }

    /// Returns true if the state can be (re-)published.
    pub fn is_publishable(&self) -> bool {
        matches!(self, LifecycleState::Created | LifecycleState::Published)
    }
}

impl From<String> for LifecycleState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "CREATED" => LifecycleState::Created,
            "PUBLISHED" => LifecycleState::Published,
            _ => LifecycleState::Other(value),
        }
    }
}

impl From<&str> for LifecycleState {
    fn from(value: &str) -> Self {
        LifecycleState::from(value.to_string())
    }
}

impl From<LifecycleState> for String {
    fn from(value: LifecycleState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An API as reported by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployedResource {
    /// Platform-assigned identifier.
    pub remote_id: String,
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// Context as stored remotely, possibly tenant-qualified.
    pub context: String,
    /// Lifecycle state.
    pub lifecycle_state: LifecycleState,
}

/// Result of a successful create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    /// Platform-assigned identifier of the new API.
    pub remote_id: String,
}

/// Deployment status of one desired definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    /// No exact remote match exists.
    ToBeCreated,
    /// Matched a remote resource in the given state.
    Deployed(LifecycleState),
}

impl DeploymentStatus {
    /// Returns the lifecycle state, if deployed.
    pub fn lifecycle_state(&self) -> Option<&LifecycleState> {
        match self {
            DeploymentStatus::ToBeCreated => None,
            DeploymentStatus::Deployed(state) => Some(state),
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::ToBeCreated => f.write_str("TO_BE_CREATED"),
            DeploymentStatus::Deployed(state) => state.fmt(f),
        }
    }
}

/// Status of one desired definition within a single reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatusEntry {
    /// The desired definition this entry describes.
    pub definition: DesiredApiDefinition,
    /// Identifier of the matched remote resource.
    pub remote_id: Option<String>,
    /// Deployment status.
    pub status: DeploymentStatus,
    /// Gateway URL, resolved for published APIs only.
    pub invokable_url: Option<String>,
    /// Remote ids of further exact matches that were passed over in favor of
    /// `remote_id`. Empty unless the platform holds duplicates.
    pub ignored_duplicates: Vec<String>,
}

impl DeploymentStatusEntry {
    /// Creates an entry for a definition with no remote counterpart.
    pub fn to_be_created(definition: DesiredApiDefinition) -> Self {
        Self {
            definition,
            remote_id: None,
            status: DeploymentStatus::ToBeCreated,
            invokable_url: None,
            ignored_duplicates: Vec::new(),
        }
    }

    /// Creates an entry for a definition matched to a remote resource.
    pub fn deployed(definition: DesiredApiDefinition, resource: &DeployedResource) -> Self {
        Self {
            definition,
            remote_id: Some(resource.remote_id.clone()),
            status: DeploymentStatus::Deployed(resource.lifecycle_state.clone()),
            invokable_url: None,
            ignored_duplicates: Vec::new(),
        }
    }

    /// Returns true if more than one remote resource matched the definition.
    pub fn is_ambiguous(&self) -> bool {
        !self.ignored_duplicates.is_empty()
    }

    /// Returns true if the definition must be published in this pass.
    pub fn needs_publish(&self) -> bool {
        self.remote_id.is_some()
            && self
                .status
                .lifecycle_state()
                .is_some_and(LifecycleState::is_publishable)
    }
}

/// A single PEM certificate and the alias it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDescriptor {
    /// Platform alias.
    pub alias: String,
    /// PEM-encoded certificate.
    pub pem_content: String,
}

/// Certificate metadata as reported by the remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    /// Platform alias.
    pub alias: String,
    /// End of the validity period, as reported.
    pub valid_until: Option<String>,
    /// Platform status, e.g. `ACTIVE` or `EXPIRED`.
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_state_parsing() {
        assert_eq!(LifecycleState::from("CREATED"), LifecycleState::Created);
        assert_eq!(LifecycleState::from("PUBLISHED"), LifecycleState::Published);
        assert_eq!(
            LifecycleState::from("DEPRECATED"),
            LifecycleState::Other("DEPRECATED".into())
        );
        assert_eq!(LifecycleState::from("published").as_str(), "published");
        assert!(!LifecycleState::from("BLOCKED").is_publishable());
    }

    #[test]
    fn status_display() {
        assert_eq!(DeploymentStatus::ToBeCreated.to_string(), "TO_BE_CREATED");
        assert_eq!(
            DeploymentStatus::Deployed(LifecycleState::Published).to_string(),
            "PUBLISHED"
        );
    }

    #[test]
    fn cert_chain_only_for_http() {
        let http = DesiredApiDefinition::http("Foo", "v1", "/foo", "https://backend")
            .with_cert_chain("file://chain.pem");
        assert_eq!(http.cert_chain(), Some("file://chain.pem"));
        assert_eq!(http.endpoint_hint(), Some("https://backend"));

        let jms = DesiredApiDefinition::jms("Bar", "v1", "/bar", "orders").with_cert_chain("x");
        assert_eq!(jms.cert_chain(), None);
        assert_eq!(jms.endpoint_hint(), None);
    }

    #[test]
    fn needs_publish_requires_remote_id_and_state() {
        let def = DesiredApiDefinition::http("Foo", "v1", "/foo", "https://backend");
        assert!(!DeploymentStatusEntry::to_be_created(def.clone()).needs_publish());

        let mut resource = DeployedResource {
            remote_id: "id-1".into(),
            name: "Foo".into(),
            version: "v1".into(),
            context: "/foo".into(),
            lifecycle_state: LifecycleState::Created,
        };
        assert!(DeploymentStatusEntry::deployed(def.clone(), &resource).needs_publish());

        resource.lifecycle_state = LifecycleState::Other("RETIRED".into());
        assert!(!DeploymentStatusEntry::deployed(def, &resource).needs_publish());
    }

    #[test]
    fn definition_deserializes_from_manifest_json() {
        let json = r#"{
            "name": "Orders",
            "version": "v2",
            "rootContext": "/orders",
            "tags": ["retail"],
            "visibility": "PRIVATE",
            "maxTps": 50,
            "backend": { "kind": "HTTP", "baseUrl": "https://orders.internal", "certChain": "file://orders.pem" },
            "mediationPolicies": { "in": "log_in" }
        }"#;
        let def: DesiredApiDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.root_context, "/orders");
        assert_eq!(def.visibility, Visibility::Private);
        assert_eq!(def.max_tps, Some(50));
        assert_eq!(def.cert_chain(), Some("file://orders.pem"));
        assert_eq!(
            def.mediation_policies.and_then(|m| m.in_flow),
            Some("log_in".to_string())
        );
    }
}
