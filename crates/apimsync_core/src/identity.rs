//! Composite identity keys for matching desired definitions to remote resources.
//!
//! A fingerprint joins `name`, `version` and `context` with
//! [`FINGERPRINT_SEPARATOR`]. Fields that contain the separator, or that begin
//! or end with a fragment of it, are rejected so that distinct triples never
//! share a fingerprint.
//!
//! Remote contexts in a multi-tenant account carry a `/t/<tenant>` prefix that
//! is stripped with [`normalize_context`] before comparison.

use crate::error::{ReconcileError, ReconcileResult};
use crate::model::DeployedResource;
use std::fmt;

/// Separator placed between the identity fields of a fingerprint.
pub const FINGERPRINT_SEPARATOR: &str = "|-|";

/// Prefix of tenant-qualified contexts.
pub const TENANT_PREFIX: &str = "/t/";

/// Composite identity key. Equality is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the fingerprint of an identity triple.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidIdentity`] if any field contains
/// [`FINGERPRINT_SEPARATOR`] or begins or ends with a fragment of it.
pub fn fingerprint(name: &str, version: &str, context: &str) -> ReconcileResult<Fingerprint> {
    check_field("name", name)?;
    check_field("version", version)?;
    check_field("context", context)?;
    Ok(Fingerprint(
        [name, version, context].join(FINGERPRINT_SEPARATOR),
    ))
}

fn check_field(field: &'static str, value: &str) -> ReconcileResult<()> {
    if value.contains(FINGERPRINT_SEPARATOR) {
        return Err(ReconcileError::invalid_identity(
            field,
            value,
            format!("must not contain {FINGERPRINT_SEPARATOR:?}"),
        ));
    }
    // Proper prefixes of the separator may not end a field, proper suffixes
    // may not start one.
    for cut in 1..FINGERPRINT_SEPARATOR.len() {
        let (head, tail) = FINGERPRINT_SEPARATOR.split_at(cut);
        if value.ends_with(head) || value.starts_with(tail) {
            return Err(ReconcileError::invalid_identity(
                field,
                value,
                format!("must not begin or end with a fragment of {FINGERPRINT_SEPARATOR:?}"),
            ));
        }
    }
    Ok(())
}

/// Tenant domain of a multi-tenant account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSuffix(String);

impl TenantSuffix {
    /// Creates a tenant suffix. Returns `None` for an empty domain.
    pub fn new(domain: impl Into<String>) -> Option<Self> {
        let domain = domain.into();
        if domain.is_empty() {
            None
        } else {
            Some(Self(domain))
        }
    }

    /// Derives the tenant from an operator principal such as `admin@acme.com`.
    ///
    /// Principals without `@` belong to the super tenant and yield `None`.
    pub fn from_principal(principal: &str) -> Option<Self> {
        principal
            .split_once('@')
            .and_then(|(_, domain)| Self::new(domain))
    }

    /// Returns the tenant domain.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strips the `/t/<tenant>` prefix from a remote context.
///
/// Contexts without the prefix, or with a prefix for a different tenant, are
/// returned unchanged. Applying the function twice gives the same result as
/// applying it once.
pub fn normalize_context<'a>(context: &'a str, tenant: Option<&TenantSuffix>) -> &'a str {
    let Some(tenant) = tenant else {
        return context;
    };
    let mut current = context;
    while let Some(rest) = current
        .strip_prefix(TENANT_PREFIX)
        .and_then(|rest| rest.strip_prefix(tenant.as_str()))
    {
        if !rest.starts_with('/') {
            break;
        }
        current = rest;
    }
    current
}

/// The `(name, version, context)` triple identifying an API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiIdentity {
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// Root context.
    pub context: String,
}

impl ApiIdentity {
    /// Creates an identity.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            context: context.into(),
        }
    }

    /// Returns the fingerprint of this identity.
    pub fn fingerprint(&self) -> ReconcileResult<Fingerprint> {
        fingerprint(&self.name, &self.version, &self.context)
    }
}

impl fmt::Display for ApiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.context)
    }
}

impl DeployedResource {
    /// Returns the fingerprint of this resource after tenant normalization.
    pub fn fingerprint(&self, tenant: Option<&TenantSuffix>) -> ReconcileResult<Fingerprint> {
        fingerprint(
            &self.name,
            &self.version,
            normalize_context(&self.context, tenant),
        )
    }
}
