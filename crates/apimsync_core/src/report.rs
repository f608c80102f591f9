//! Outcomes of deploy and remove passes.

use crate::error::ReconcileError;
use crate::identity::ApiIdentity;
use crate::model::{DeploymentStatus, DeploymentStatusEntry};
use std::fmt;

/// The step of a pass in which a per-definition failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Certificate resolution, upload or update.
    Certificate,
    /// Create or update of the API.
    CreateOrUpdate,
    /// Transition to published.
    Publish,
    /// Deletion of the API.
    Delete,
    /// Deletion of a certificate after the API was removed.
    CertificateDelete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Certificate => "certificate",
            Phase::CreateOrUpdate => "create/update",
            Phase::Publish => "publish",
            Phase::Delete => "delete",
            Phase::CertificateDelete => "certificate delete",
        };
        f.write_str(name)
    }
}

/// A failure isolated to one definition.
#[derive(Debug)]
pub struct ItemFailure {
    /// Identity of the definition.
    pub identity: ApiIdentity,
    /// Step that failed.
    pub phase: Phase,
    /// Certificate alias, for certificate steps.
    pub alias: Option<String>,
    /// The underlying error.
    pub error: ReconcileError,
}

impl ItemFailure {
    /// Creates a failure record.
    pub fn new(identity: ApiIdentity, phase: Phase, error: ReconcileError) -> Self {
        Self {
            identity,
            phase,
            alias: None,
            error,
        }
    }

    /// Attaches the certificate alias involved.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for {}", self.phase, self.identity)?;
        if let Some(alias) = &self.alias {
            write!(f, " [{alias}]")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Result of a deploy pass.
#[derive(Debug, Default)]
pub struct DeployReport {
    /// Final status, index-aligned with the desired definitions.
    pub entries: Vec<DeploymentStatusEntry>,
    /// Per-definition failures, in the order they were observed.
    pub failures: Vec<ItemFailure>,
}

impl DeployReport {
    /// Returns true if every step of every definition succeeded.
    pub fn is_converged(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the number of entries still waiting to be created.
    pub fn pending(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == DeploymentStatus::ToBeCreated)
            .count()
    }

    /// Returns the failures recorded for one step.
    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }

    /// Returns the entries that matched more than one remote resource.
    pub fn ambiguous(&self) -> impl Iterator<Item = &DeploymentStatusEntry> {
        self.entries.iter().filter(|e| e.is_ambiguous())
    }
}

/// Result of a remove pass.
#[derive(Debug, Default)]
pub struct RemoveReport {
    /// APIs deleted, or found already absent.
    pub deleted: Vec<ApiIdentity>,
    /// Certificate aliases deleted.
    pub certificates_removed: Vec<String>,
    /// Per-definition failures.
    pub failures: Vec<ItemFailure>,
}

impl RemoveReport {
    /// Returns true if nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
