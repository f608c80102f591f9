//! Backend certificate convergence.
//!
//! A definition's certificate chain is split into PEM blocks and each block is
//! stored under a stable alias `<name>___<version>___<index>`, index 0 being
//! the leaf. Uploads that conflict with an existing alias fall back to an
//! update, so running convergence twice refreshes rather than duplicates.

use crate::adapter::RemoteApiAdapter;
use crate::error::{ReconcileError, ReconcileResult};
use crate::identity::{ApiIdentity, TenantSuffix};
use crate::model::{CertificateDescriptor, DesiredApiDefinition};
use crate::retry::{RetryController, Sleeper};
use async_trait::async_trait;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Separator between the parts of a certificate alias.
pub const ALIAS_SEPARATOR: &str = "___";

/// Marker appended before the tenant domain in multi-tenant aliases.
pub const TENANT_ALIAS_MARKER: &str = "_at_";

/// Opening line of a PEM certificate.
pub const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

/// Closing line of a PEM certificate.
pub const PEM_END: &str = "-----END CERTIFICATE-----";

/// Status reported for aliases the platform does not know.
pub const NOT_FOUND_STATUS: &str = "NOT FOUND";

/// Derives the alias of the certificate at `index` in a definition's chain.
pub fn certificate_alias(
    name: &str,
    version: &str,
    index: usize,
    tenant: Option<&TenantSuffix>,
) -> String {
    let alias = [name, version, &index.to_string()].join(ALIAS_SEPARATOR);
    match tenant {
        Some(tenant) => format!("{alias}{TENANT_ALIAS_MARKER}{tenant}"),
        None => alias,
    }
}

/// Splits PEM content into individual certificate blocks, in order.
///
/// Text outside of `BEGIN`/`END` pairs is ignored. Each returned block is the
/// original PEM text of one certificate and ends with a newline.
///
/// # Errors
///
/// Fails with [`ReconcileError::InvalidCertificateChain`] if the content holds
/// no certificate, an unmatched marker, a nested `BEGIN`, an empty body or a
/// body that does not decode to DER.
pub fn split_chain(content: &str) -> ReconcileResult<Vec<String>> {
    let invalid = |reason: &str| ReconcileError::InvalidCertificateChain(reason.to_string());
    let mut blocks = Vec::new();
    let mut rest = content;

    while let Some(begin) = rest.find(PEM_BEGIN) {
        if rest[..begin].contains(PEM_END) {
            return Err(invalid("END marker without matching BEGIN"));
        }
        let body_start = begin + PEM_BEGIN.len();
        let end = rest[body_start..]
            .find(PEM_END)
            .ok_or_else(|| invalid("BEGIN marker without matching END"))?;
        let body = &rest[body_start..body_start + end];
        if body.contains(PEM_BEGIN) {
            return Err(invalid("nested BEGIN marker"));
        }
        if body.trim().is_empty() {
            return Err(invalid("empty certificate body"));
        }
        let block_end = body_start + end + PEM_END.len();
        blocks.push(format!("{}\n", &rest[begin..block_end]));
        rest = &rest[block_end..];
    }

    if rest.contains(PEM_END) {
        return Err(invalid("END marker without matching BEGIN"));
    }
    if blocks.is_empty() {
        return Err(invalid("no certificate found"));
    }

    let decoded = CertificateDer::pem_slice_iter(content.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(&format!("failed to parse certificates: {e}")))?;
    if decoded.len() != blocks.len() {
        return Err(invalid(&format!(
            "decoded {} of {} certificate blocks",
            decoded.len(),
            blocks.len()
        )));
    }
    if decoded.iter().any(|der| der.as_ref().is_empty()) {
        return Err(invalid("empty certificate body"));
    }
    Ok(blocks)
}

/// Splits a definition's chain into aliased certificates.
pub fn describe_chain(
    definition: &DesiredApiDefinition,
    blocks: Vec<String>,
    tenant: Option<&TenantSuffix>,
) -> Vec<CertificateDescriptor> {
    blocks
        .into_iter()
        .enumerate()
        .map(|(index, pem_content)| CertificateDescriptor {
            alias: certificate_alias(&definition.name, &definition.version, index, tenant),
            pem_content,
        })
        .collect()
}

/// Where a certificate chain comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateSource {
    /// PEM content given inline.
    Inline(String),
    /// A local file, from a `file://` reference.
    File(PathBuf),
    /// A secret-manager reference (`arn:` or `secret://`).
    Secret(String),
}

impl CertificateSource {
    /// Classifies a configured chain reference.
    pub fn parse(reference: &str) -> Self {
        if let Some(path) = reference.strip_prefix("file://") {
            CertificateSource::File(PathBuf::from(path))
        } else if reference.starts_with("arn:") || reference.starts_with("secret://") {
            CertificateSource::Secret(reference.to_string())
        } else {
            CertificateSource::Inline(reference.to_string())
        }
    }
}

/// A certificate fetched from a secret manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    /// The leaf certificate.
    pub leaf: String,
    /// Intermediate and root certificates, if stored separately.
    pub chain: Option<String>,
}

/// Fetches certificates held by a secret manager.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    /// Resolves a secret reference.
    async fn resolve(&self, reference: &str) -> ReconcileResult<ResolvedChain>;
}

/// Resolves references from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    entries: HashMap<String, ResolvedChain>,
}

impl StaticSecretResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry.
    pub fn with_entry(mut self, reference: impl Into<String>, chain: ResolvedChain) -> Self {
        self.entries.insert(reference.into(), chain);
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, reference: &str) -> ReconcileResult<ResolvedChain> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| ReconcileError::CertificateSource {
                source_ref: reference.to_string(),
                reason: "unknown secret reference".into(),
            })
    }
}

/// Loads and splits the chain a source points to. The leaf comes first.
pub async fn resolve_chain(
    source: &CertificateSource,
    secrets: Option<&dyn SecretResolver>,
) -> ReconcileResult<Vec<String>> {
    match source {
        CertificateSource::Inline(pem) => split_chain(pem),
        CertificateSource::File(path) => {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                ReconcileError::CertificateSource {
                    source_ref: format!("file://{}", path.display()),
                    reason: e.to_string(),
                }
            })?;
            split_chain(&content)
        }
        CertificateSource::Secret(reference) => {
            let secrets = secrets.ok_or_else(|| ReconcileError::CertificateSource {
                source_ref: reference.clone(),
                reason: "no secret resolver configured".into(),
            })?;
            let resolved = secrets.resolve(reference).await?;
            let mut blocks = split_chain(&resolved.leaf)?;
            if let Some(chain) = &resolved.chain {
                blocks.extend(split_chain(chain)?);
            }
            Ok(blocks)
        }
    }
}

/// What happened to the certificates of one definition.
#[derive(Debug, Default)]
pub struct CertificateOutcome {
    /// Aliases uploaded for the first time.
    pub uploaded: Vec<String>,
    /// Aliases that existed and were refreshed.
    pub updated: Vec<String>,
    /// Aliases deleted.
    pub removed: Vec<String>,
    /// Aliases whose operation failed.
    pub failed: Vec<(String, ReconcileError)>,
}

/// Certificate availability of one definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateStatus {
    /// Identity of the owning definition.
    pub identity: ApiIdentity,
    /// Certificate alias.
    pub alias: String,
    /// End of validity, when known.
    pub valid_until: Option<String>,
    /// Platform status, or [`NOT_FOUND_STATUS`].
    pub status: String,
}

enum Stored {
    Uploaded,
    Updated,
}

/// Uploads, refreshes, removes and lists backend certificates.
pub struct CertificateManager<'a, A: RemoteApiAdapter> {
    adapter: &'a A,
    retry: &'a RetryController,
    sleeper: &'a dyn Sleeper,
    secrets: Option<&'a dyn SecretResolver>,
    tenant: Option<&'a TenantSuffix>,
    pause: Duration,
    probe_limit: usize,
}

impl<'a, A: RemoteApiAdapter> CertificateManager<'a, A> {
    /// Creates a manager with a one second pause and five probed indices.
    pub fn new(adapter: &'a A, retry: &'a RetryController, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            adapter,
            retry,
            sleeper,
            secrets: None,
            tenant: None,
            pause: Duration::from_secs(1),
            probe_limit: 5,
        }
    }

    /// Sets the resolver for secret-manager references.
    pub fn with_secrets(mut self, secrets: &'a dyn SecretResolver) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Sets the tenant appended to aliases.
    pub fn with_tenant(mut self, tenant: Option<&'a TenantSuffix>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Sets the pause between certificate operations.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Sets how many alias indices are probed on removal and listing. A limit
    /// of zero probes nothing.
    pub fn with_probe_limit(mut self, limit: usize) -> Self {
        self.probe_limit = limit;
        self
    }

    /// Converges the certificates of one definition.
    ///
    /// Definitions without a chain are skipped. A failure on one certificate
    /// is recorded in the outcome and the rest of the chain is still processed.
    ///
    /// # Errors
    ///
    /// Fails if the chain cannot be resolved or is malformed.
    pub async fn converge(
        &self,
        definition: &DesiredApiDefinition,
    ) -> ReconcileResult<CertificateOutcome> {
        let mut outcome = CertificateOutcome::default();
        let Some(reference) = definition.cert_chain() else {
            return Ok(outcome);
        };

        let blocks = resolve_chain(&CertificateSource::parse(reference), self.secrets).await?;
        let certificates = describe_chain(definition, blocks, self.tenant);
        debug!(
            api = %definition.name,
            version = %definition.version,
            count = certificates.len(),
            "converging backend certificates"
        );

        for (index, certificate) in certificates.iter().enumerate() {
            if index > 0 {
                self.sleeper.sleep(self.pause).await;
            }
            match self.store(certificate, definition.endpoint_hint()).await {
                Ok(Stored::Uploaded) => {
                    info!(alias = %certificate.alias, "certificate uploaded");
                    outcome.uploaded.push(certificate.alias.clone());
                }
                Ok(Stored::Updated) => {
                    info!(alias = %certificate.alias, "certificate updated");
                    outcome.updated.push(certificate.alias.clone());
                }
                Err(error) => {
                    warn!(alias = %certificate.alias, error = %error, "certificate not stored, proceeding");
                    outcome.failed.push((certificate.alias.clone(), error));
                }
            }
        }
        Ok(outcome)
    }

    async fn store(
        &self,
        certificate: &CertificateDescriptor,
        endpoint_hint: Option<&str>,
    ) -> ReconcileResult<Stored> {
        let alias = certificate.alias.as_str();
        let pem = certificate.pem_content.as_str();
        let adapter = self.adapter;

        let uploaded = self
            .retry
            .run_while(
                |_| async move {
                    adapter
                        .upload_certificate(alias, pem, endpoint_hint)
                        .await
                        .map_err(ReconcileError::from)
                },
                |e: &ReconcileError| !e.is_conflict(),
            )
            .await;

        match uploaded {
            Ok(()) => Ok(Stored::Uploaded),
            Err(error) if error.is_conflict() => {
                debug!(alias, "alias exists, updating instead");
                self.sleeper.sleep(self.pause).await;
                self.retry
                    .run(|_| async move {
                        adapter
                            .update_certificate(alias, pem)
                            .await
                            .map_err(ReconcileError::from)
                    })
                    .await?;
                Ok(Stored::Updated)
            }
            Err(error) => Err(error),
        }
    }

    /// Deletes every probed alias of a definition. Missing aliases are skipped
    /// silently; other failures are recorded and probing continues.
    pub async fn remove(&self, name: &str, version: &str) -> CertificateOutcome {
        let mut outcome = CertificateOutcome::default();
        let adapter = self.adapter;

        for index in 0..self.probe_limit {
            let alias = certificate_alias(name, version, index, self.tenant);
            let alias_ref = alias.as_str();
            let deleted = self
                .retry
                .run_while(
                    |_| async move {
                        adapter
                            .delete_certificate(alias_ref)
                            .await
                            .map_err(ReconcileError::from)
                    },
                    |e: &ReconcileError| !e.is_not_found(),
                )
                .await;

            match deleted {
                Ok(()) => {
                    info!(alias = %alias, "certificate removed");
                    outcome.removed.push(alias);
                }
                Err(error) if error.is_not_found() => {}
                Err(error) => {
                    warn!(alias = %alias, error = %error, "certificate not removed, proceeding");
                    outcome.failed.push((alias, error));
                }
            }
        }
        outcome
    }

    /// Reports the stored certificates of each definition.
    ///
    /// Probes alias indices in order and stops at the first missing one. A
    /// definition without any stored certificate yields one
    /// [`NOT_FOUND_STATUS`] row.
    pub async fn list(&self, definitions: &[DesiredApiDefinition]) -> Vec<CertificateStatus> {
        let mut statuses = Vec::new();
        let adapter = self.adapter;

        for definition in definitions {
            let identity = definition.identity();
            for index in 0..self.probe_limit {
                let alias = certificate_alias(&definition.name, &definition.version, index, self.tenant);
                let alias_ref = alias.as_str();
                let info = self
                    .retry
                    .run_while(
                        |_| async move {
                            adapter
                                .certificate_info(alias_ref)
                                .await
                                .map_err(ReconcileError::from)
                        },
                        |e: &ReconcileError| !e.is_not_found(),
                    )
                    .await;

                match info {
                    Ok(info) => statuses.push(CertificateStatus {
                        identity: identity.clone(),
                        alias,
                        valid_until: info.valid_until,
                        status: info.status,
                    }),
                    Err(error) => {
                        if !error.is_not_found() {
                            warn!(alias = %alias, error = %error, "certificate lookup failed, proceeding");
                        }
                        if index == 0 {
                            statuses.push(CertificateStatus {
                                identity: identity.clone(),
                                alias,
                                valid_until: None,
                                status: NOT_FOUND_STATUS.to_string(),
                            });
                        }
                        break;
                    }
                }
            }
        }
        statuses
    }
}
