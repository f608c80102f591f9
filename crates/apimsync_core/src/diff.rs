//! Deployment status diff.
//!
//! For each desired definition the remote platform is queried by identity.
//! The query is fuzzy, so candidates are reduced to at most one exact match by
//! fingerprint. A failed query aborts the whole diff.

use crate::adapter::RemoteApiAdapter;
use crate::config::FanOutPolicy;
use crate::error::{ReconcileError, ReconcileResult};
use crate::identity::{Fingerprint, TenantSuffix};
use crate::model::{DeployedResource, DeploymentStatusEntry, DesiredApiDefinition, LifecycleState};
use crate::retry::RetryController;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, warn};

/// Computes [`DeploymentStatusEntry`] values for desired definitions.
pub struct DiffEngine<'a, A: RemoteApiAdapter> {
    adapter: &'a A,
    retry: &'a RetryController,
    tenant: Option<&'a TenantSuffix>,
    environment: Option<&'a str>,
    fan_out: FanOutPolicy,
}

impl<'a, A: RemoteApiAdapter> DiffEngine<'a, A> {
    /// Creates a diff engine issuing queries through `retry`.
    pub fn new(adapter: &'a A, retry: &'a RetryController) -> Self {
        Self {
            adapter,
            retry,
            tenant: None,
            environment: None,
            fan_out: FanOutPolicy::Sequential,
        }
    }

    /// Sets the tenant whose context prefix is stripped from remote contexts.
    pub fn with_tenant(mut self, tenant: Option<&'a TenantSuffix>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Sets the gateway environment used to resolve invokable URLs.
    pub fn with_environment(mut self, environment: Option<&'a str>) -> Self {
        self.environment = environment;
        self
    }

    /// Sets how many definitions are queried at once.
    pub fn with_fan_out(mut self, fan_out: FanOutPolicy) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Returns one entry per definition, in the same order.
    ///
    /// # Errors
    ///
    /// Fails with the first query error once its retries are exhausted.
    pub async fn diff(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<Vec<DeploymentStatusEntry>> {
        stream::iter(definitions)
            .map(|definition| self.status_of(definition))
            .buffered(self.fan_out.limit())
            .try_collect()
            .await
    }

    /// Computes the entry of a single definition.
    pub async fn status_of(
        &self,
        definition: &DesiredApiDefinition,
    ) -> ReconcileResult<DeploymentStatusEntry> {
        let identity = definition.identity();
        let wanted = identity.fingerprint()?;
        let adapter = self.adapter;
        let (name, version, context) = (
            identity.name.as_str(),
            identity.version.as_str(),
            identity.context.as_str(),
        );

        let candidates = self
            .retry
            .run(|attempt| async move {
                if attempt > 1 {
                    debug!(api = name, version, context, attempt, "retrying identity query");
                }
                adapter
                    .query_by_identity(name, version, context)
                    .await
                    .map_err(ReconcileError::from)
            })
            .await?;

        let Some((resource, duplicates)) = select_match(&wanted, &candidates, self.tenant) else {
            debug!(%identity, candidates = candidates.len(), "no exact match");
            return Ok(DeploymentStatusEntry::to_be_created(definition.clone()));
        };

        let mut entry = DeploymentStatusEntry::deployed(definition.clone(), resource);
        entry.ignored_duplicates = duplicates;
        if resource.lifecycle_state == LifecycleState::Published {
            if let Some(environment) = self.environment {
                entry.invokable_url = self.invokable_url(&resource.remote_id, environment).await;
            }
        }
        Ok(entry)
    }

    async fn invokable_url(&self, remote_id: &str, environment: &str) -> Option<String> {
        let adapter = self.adapter;
        let resolved = self
            .retry
            .run(|_| async move {
                adapter
                    .resolve_invokable_url(remote_id, environment)
                    .await
                    .map_err(ReconcileError::from)
            })
            .await;

        match resolved {
            Ok(url) => url,
            Err(error) => {
                warn!(remote_id, environment, error = %error, "invokable url not resolved");
                None
            }
        }
    }
}

/// Picks the first candidate whose fingerprint equals `wanted`.
///
/// Candidates whose fields cannot be fingerprinted never match. When more than
/// one candidate matches, the first one wins and the remote ids of the others
/// are returned alongside it.
pub fn select_match<'r>(
    wanted: &Fingerprint,
    candidates: &'r [DeployedResource],
    tenant: Option<&TenantSuffix>,
) -> Option<(&'r DeployedResource, Vec<String>)> {
    let mut matches = candidates
        .iter()
        .filter(|candidate| candidate.fingerprint(tenant).is_ok_and(|fp| &fp == wanted));
    let first = matches.next()?;
    let duplicates: Vec<String> = matches.map(|m| m.remote_id.clone()).collect();
    if !duplicates.is_empty() {
        warn!(
            fingerprint = %wanted,
            remote_id = %first.remote_id,
            duplicates = ?duplicates,
            "several remote resources share a fingerprint, using the first"
        );
    }
    Some((first, duplicates))
}
