//! Convergence orchestration.
//!
//! A deploy pass runs:
//!
//! 1. authenticate (fatal on failure)
//! 2. diff (fatal on query failure)
//! 3. per definition: certificates, then create or update
//! 4. settle delay, then re-diff
//! 5. per definition: publish entries that are `CREATED` or `PUBLISHED`
//! 6. final diff for the report
//!
//! Steps 3 and 5 isolate failures per definition. Each step completes for
//! every definition before the next step starts.

use crate::adapter::RemoteApiAdapter;
use crate::certificate::{CertificateManager, CertificateStatus, SecretResolver};
use crate::config::{validate_definitions, ReconcilerConfig};
use crate::diff::DiffEngine;
use crate::error::{ReconcileError, ReconcileResult};
use crate::identity::{ApiIdentity, TenantSuffix};
use crate::model::{DeploymentStatusEntry, DesiredApiDefinition};
use crate::report::{DeployReport, ItemFailure, Phase, RemoveReport};
use crate::retry::{CancellationFlag, RetryController, Sleeper, TokioSleeper};
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    /// No pass has run yet.
    Idle,
    /// Acquiring a session.
    Authenticating,
    /// Computing deployment status.
    Diffing,
    /// Converging certificates and creating or updating APIs.
    Converging,
    /// Waiting for the platform to settle.
    Settling,
    /// Publishing APIs.
    Publishing,
    /// Deleting APIs and certificates.
    Removing,
    /// Reading certificate status.
    Inspecting,
    /// The last pass completed.
    Completed,
    /// The last pass aborted with an error.
    Failed,
}

impl PassState {
    /// Returns true while a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, PassState::Idle | PassState::Completed | PassState::Failed)
    }
}

/// State threaded through the phases of one pass. Created fresh per pass.
#[derive(Debug)]
pub struct ReconciliationContext {
    tenant: Option<TenantSuffix>,
    retry: RetryController,
    entries: Vec<DeploymentStatusEntry>,
    failures: Vec<ItemFailure>,
}

impl ReconciliationContext {
    /// Returns the tenant of the pass.
    pub fn tenant(&self) -> Option<&TenantSuffix> {
        self.tenant.as_ref()
    }

    /// Returns the current status snapshot.
    pub fn entries(&self) -> &[DeploymentStatusEntry] {
        &self.entries
    }

    /// Returns the failures recorded so far.
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }
}

/// Drives deploy, list, remove and certificate passes against a remote platform.
pub struct Reconciler<A: RemoteApiAdapter> {
    config: ReconcilerConfig,
    adapter: Arc<A>,
    sleeper: Arc<dyn Sleeper>,
    secrets: Option<Arc<dyn SecretResolver>>,
    cancel: CancellationFlag,
    state: RwLock<PassState>,
}

impl<A: RemoteApiAdapter> Reconciler<A> {
    /// Creates a reconciler sleeping on the tokio timer.
    pub fn new(config: ReconcilerConfig, adapter: Arc<A>) -> Self {
        Self {
            config,
            adapter,
            sleeper: Arc::new(TokioSleeper),
            secrets: None,
            cancel: CancellationFlag::new(),
            state: RwLock::new(PassState::Idle),
        }
    }

    /// Replaces the sleeper used for backoff, settle delay and certificate pauses.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Sets the resolver for secret-manager certificate references.
    pub fn with_secret_resolver(mut self, secrets: Arc<dyn SecretResolver>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Returns the adapter.
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Returns a handle that cancels passes of this reconciler.
    ///
    /// Cancellation is honored before each definition and before each retry
    /// attempt. It stays in effect until [`CancellationFlag::reset`] is called.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Returns the current pass state.
    pub fn state(&self) -> PassState {
        *self.state.read()
    }

    fn set_state(&self, state: PassState) {
        *self.state.write() = state;
    }

    /// Reports the deployment status of each definition.
    ///
    /// # Errors
    ///
    /// Fails on invalid input, authentication failure or query failure.
    pub async fn list(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<Vec<DeploymentStatusEntry>> {
        let started = self.start("list");
        let result = self.list_pass(definitions).await;
        self.finish("list", started, &result);
        result
    }

    async fn list_pass(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<Vec<DeploymentStatusEntry>> {
        let mut ctx = self.begin(definitions).await?;
        self.refresh(&mut ctx, definitions).await?;
        Ok(ctx.entries)
    }

    /// Converges the platform towards the definitions.
    ///
    /// Per-definition failures are collected in the report; the returned
    /// entries reflect the platform state at the end of the pass.
    ///
    /// # Errors
    ///
    /// Fails on invalid input, authentication failure, query failure or
    /// cancellation.
    pub async fn deploy(&self, definitions: &[DesiredApiDefinition]) -> ReconcileResult<DeployReport> {
        let started = self.start("deploy");
        let result = self.deploy_pass(definitions).await;
        if let Ok(report) = &result {
            info!(
                entries = report.entries.len(),
                pending = report.pending(),
                failures = report.failures.len(),
                "deploy summary"
            );
        }
        self.finish("deploy", started, &result);
        result
    }

    async fn deploy_pass(&self, definitions: &[DesiredApiDefinition]) -> ReconcileResult<DeployReport> {
        let mut ctx = self.begin(definitions).await?;
        self.refresh(&mut ctx, definitions).await?;

        self.set_state(PassState::Converging);
        let failures = self
            .for_each(ctx.entries.iter(), |entry| self.converge_one(&ctx, entry))
            .await?;
        ctx.failures.extend(failures);

        if !self.config.settle_delay.is_zero() {
            self.set_state(PassState::Settling);
            debug!(
                delay_ms = self.config.settle_delay.as_millis() as u64,
                "waiting for platform to settle"
            );
            self.sleeper.sleep(self.config.settle_delay).await;
        }
        self.refresh(&mut ctx, definitions).await?;

        self.set_state(PassState::Publishing);
        let failures = self
            .for_each(
                ctx.entries.iter().filter(|entry| entry.needs_publish()),
                |entry| self.publish_one(&ctx, entry),
            )
            .await?;
        ctx.failures.extend(failures);

        self.refresh(&mut ctx, definitions).await?;
        Ok(DeployReport {
            entries: ctx.entries,
            failures: ctx.failures,
        })
    }

    /// Deletes every definition that exists remotely, then its certificates.
    ///
    /// # Errors
    ///
    /// Fails on invalid input, authentication failure, query failure or
    /// cancellation.
    pub async fn remove(&self, definitions: &[DesiredApiDefinition]) -> ReconcileResult<RemoveReport> {
        let started = self.start("remove");
        let result = self.remove_pass(definitions).await;
        self.finish("remove", started, &result);
        result
    }

    async fn remove_pass(&self, definitions: &[DesiredApiDefinition]) -> ReconcileResult<RemoveReport> {
        let mut ctx = self.begin(definitions).await?;
        self.refresh(&mut ctx, definitions).await?;

        self.set_state(PassState::Removing);
        let outcomes: Vec<RemoveReport> = stream::iter(ctx.entries.iter())
            .map(|entry| self.remove_one(&ctx, entry))
            .buffered(self.config.fan_out.limit())
            .try_collect()
            .await?;

        let mut report = RemoveReport::default();
        for outcome in outcomes {
            report.deleted.extend(outcome.deleted);
            report.certificates_removed.extend(outcome.certificates_removed);
            report.failures.extend(outcome.failures);
        }
        Ok(report)
    }

    /// Reports the stored certificates of each definition.
    ///
    /// # Errors
    ///
    /// Fails on invalid input or authentication failure.
    pub async fn certificates(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<Vec<CertificateStatus>> {
        let started = self.start("certificates");
        let result = self.certificates_pass(definitions).await;
        self.finish("certificates", started, &result);
        result
    }

    async fn certificates_pass(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<Vec<CertificateStatus>> {
        let ctx = self.begin(definitions).await?;
        self.set_state(PassState::Inspecting);
        Ok(self.certificate_manager(&ctx).list(definitions).await)
    }

    /// Validates input, creates the pass context and acquires a session.
    async fn begin(
        &self,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<ReconciliationContext> {
        self.config.validate()?;
        validate_definitions(definitions)?;
        self.cancel.check()?;

        let ctx = ReconciliationContext {
            tenant: self.config.tenant(),
            retry: RetryController::new(self.config.retry, self.sleeper.clone())
                .with_cancellation(self.cancel.clone()),
            entries: Vec::new(),
            failures: Vec::new(),
        };

        self.set_state(PassState::Authenticating);
        let adapter = &*self.adapter;
        ctx.retry
            .run(|_| async move {
                adapter
                    .authenticate()
                    .await
                    .map_err(ReconcileError::Authentication)
            })
            .await?;
        debug!(tenant = ?ctx.tenant, definitions = definitions.len(), "session acquired");
        Ok(ctx)
    }

    /// Replaces the status snapshot of the context.
    async fn refresh(
        &self,
        ctx: &mut ReconciliationContext,
        definitions: &[DesiredApiDefinition],
    ) -> ReconcileResult<()> {
        self.set_state(PassState::Diffing);
        let entries = self.diff_engine(ctx).diff(definitions).await?;
        ctx.entries = entries;
        Ok(())
    }

    fn start(&self, pass: &'static str) -> Instant {
        info!(pass, "pass started");
        Instant::now()
    }

    fn finish<T>(&self, pass: &'static str, started: Instant, result: &ReconcileResult<T>) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => {
                self.set_state(PassState::Completed);
                info!(pass, elapsed_ms, "pass finished");
            }
            Err(error) => {
                self.set_state(PassState::Failed);
                warn!(pass, elapsed_ms, error = %error, "pass aborted");
            }
        }
    }

    fn diff_engine<'a>(&'a self, ctx: &'a ReconciliationContext) -> DiffEngine<'a, A> {
        DiffEngine::new(&*self.adapter, &ctx.retry)
            .with_tenant(ctx.tenant.as_ref())
            .with_environment(self.config.gateway_environment.as_deref())
            .with_fan_out(self.config.fan_out)
    }

    fn certificate_manager<'a>(&'a self, ctx: &'a ReconciliationContext) -> CertificateManager<'a, A> {
        let manager = CertificateManager::new(&*self.adapter, &ctx.retry, self.sleeper.as_ref())
            .with_tenant(ctx.tenant.as_ref())
            .with_pause(self.config.certificate_pause)
            .with_probe_limit(self.config.certificate_probe_limit);
        match &self.secrets {
            Some(secrets) => manager.with_secrets(secrets.as_ref()),
            None => manager,
        }
    }

    /// Runs `step` over `items` under the fan-out policy and gathers failures.
    async fn for_each<'e, I, F, Fut>(&self, items: I, step: F) -> ReconcileResult<Vec<ItemFailure>>
    where
        I: IntoIterator<Item = &'e DeploymentStatusEntry>,
        F: FnMut(&'e DeploymentStatusEntry) -> Fut,
        Fut: Future<Output = ReconcileResult<Vec<ItemFailure>>>,
    {
        let batches: Vec<Vec<ItemFailure>> = stream::iter(items)
            .map(step)
            .buffered(self.config.fan_out.limit())
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    async fn converge_one(
        &self,
        ctx: &ReconciliationContext,
        entry: &DeploymentStatusEntry,
    ) -> ReconcileResult<Vec<ItemFailure>> {
        self.cancel.check()?;
        let definition = &entry.definition;
        let identity = definition.identity();
        let mut failures = Vec::new();

        match self.certificate_manager(ctx).converge(definition).await {
            Ok(outcome) => {
                for (alias, error) in outcome.failed {
                    let failure = isolate(Err(error), &identity, Phase::Certificate)?;
                    failures.extend(failure.map(|f| f.with_alias(alias)));
                }
            }
            Err(error) => failures.extend(isolate(Err(error), &identity, Phase::Certificate)?),
        }

        let adapter = &*self.adapter;
        let written = match entry.remote_id.as_deref() {
            None => ctx
                .retry
                .run(|_| async move { adapter.create(definition).await.map_err(ReconcileError::from) })
                .await
                .map(|created| info!(%identity, remote_id = %created.remote_id, "api created")),
            Some(remote_id) => ctx
                .retry
                .run(|_| async move {
                    adapter
                        .update(definition, remote_id)
                        .await
                        .map_err(ReconcileError::from)
                })
                .await
                .map(|()| info!(%identity, remote_id, "api updated")),
        };
        failures.extend(isolate(written, &identity, Phase::CreateOrUpdate)?);

        Ok(failures)
    }

    async fn publish_one(
        &self,
        ctx: &ReconciliationContext,
        entry: &DeploymentStatusEntry,
    ) -> ReconcileResult<Vec<ItemFailure>> {
        self.cancel.check()?;
        let identity = entry.definition.identity();
        let Some(remote_id) = entry.remote_id.as_deref() else {
            return Ok(Vec::new());
        };

        let adapter = &*self.adapter;
        let published = ctx
            .retry
            .run(|_| async move { adapter.publish(remote_id).await.map_err(ReconcileError::from) })
            .await
            .map(|()| info!(%identity, remote_id, "api published"));
        Ok(isolate(published, &identity, Phase::Publish)?.into_iter().collect())
    }

    async fn remove_one(
        &self,
        ctx: &ReconciliationContext,
        entry: &DeploymentStatusEntry,
    ) -> ReconcileResult<RemoveReport> {
        self.cancel.check()?;
        let definition = &entry.definition;
        let identity = definition.identity();
        let mut report = RemoveReport::default();
        let Some(remote_id) = entry.remote_id.as_deref() else {
            debug!(%identity, "not deployed, nothing to remove");
            return Ok(report);
        };

        let adapter = &*self.adapter;
        let deleted = ctx
            .retry
            .run_while(
                |_| async move { adapter.delete(remote_id).await.map_err(ReconcileError::from) },
                |e: &ReconcileError| !e.is_not_found(),
            )
            .await;
        match deleted {
            Ok(()) => info!(%identity, remote_id, "api deleted"),
            Err(error) if error.is_not_found() => debug!(%identity, remote_id, "api already absent"),
            Err(error) => {
                report
                    .failures
                    .extend(isolate(Err(error), &identity, Phase::Delete)?);
                return Ok(report);
            }
        }
        report.deleted.push(identity.clone());

        let outcome = self
            .certificate_manager(ctx)
            .remove(&definition.name, &definition.version)
            .await;
        report.certificates_removed = outcome.removed;
        for (alias, error) in outcome.failed {
            let failure = isolate(Err(error), &identity, Phase::CertificateDelete)?;
            report.failures.extend(failure.map(|f| f.with_alias(alias)));
        }
        Ok(report)
    }
}

/// Turns a per-definition error into a failure record. Cancellation is not
/// isolated and aborts the pass.
fn isolate(
    result: ReconcileResult<()>,
    identity: &ApiIdentity,
    phase: Phase,
) -> ReconcileResult<Option<ItemFailure>> {
    match result {
        Ok(()) => Ok(None),
        Err(ReconcileError::Cancelled) => Err(ReconcileError::Cancelled),
        Err(error) => {
            warn!(%identity, %phase, error = %error, "step failed, continuing with other definitions");
            Ok(Some(ItemFailure::new(identity.clone(), phase, error)))
        }
    }
}

impl<A: RemoteApiAdapter> std::fmt::Debug for Reconciler<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
