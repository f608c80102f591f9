//! CLI command implementations.

pub mod certs;
pub mod deploy;
pub mod list;
pub mod remove;

use apimsync_core::{
    DeploymentManifest, DeploymentStatusEntry, ItemFailure, MemoryPlatform, PlatformState,
    ReconcileError, Reconciler,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The state file is not valid JSON.
    #[error("invalid state file {}: {source}", path.display())]
    State {
        /// The state file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The pass aborted.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The pass finished with per-definition failures.
    #[error("{0} step(s) failed")]
    Incomplete(usize),
}

/// A manifest plus the platform state file it runs against.
pub struct Workspace {
    /// The parsed manifest.
    pub manifest: DeploymentManifest,
    /// The platform, loaded from the state file.
    pub platform: Arc<MemoryPlatform>,
    state_path: PathBuf,
}

impl Workspace {
    /// Loads the manifest and the platform state. A missing state file is an
    /// empty platform.
    pub fn open(manifest_path: &Path, state_path: &Path) -> Result<Self, CliError> {
        let json = std::fs::read_to_string(manifest_path).map_err(|source| CliError::Io {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let manifest = DeploymentManifest::from_json(&json)?;

        let state = if state_path.exists() {
            let content = std::fs::read_to_string(state_path).map_err(|source| CliError::Io {
                path: state_path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| CliError::State {
                path: state_path.to_path_buf(),
                source,
            })?
        } else {
            debug!(path = %state_path.display(), "no state file, starting empty");
            PlatformState::default()
        };

        let platform = MemoryPlatform::with_state(state).with_tenant(manifest.config.tenant());
        Ok(Self {
            manifest,
            platform: Arc::new(platform),
            state_path: state_path.to_path_buf(),
        })
    }

    /// Builds a reconciler that is cancelled on Ctrl-C.
    pub fn reconciler(&self) -> Reconciler<MemoryPlatform> {
        let reconciler = Reconciler::new(self.manifest.config.clone(), self.platform.clone());
        let cancel = reconciler.cancellation();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping after the current step");
                cancel.cancel();
            }
        });
        reconciler
    }

    /// Writes the platform state back to the state file.
    pub fn save(&self) -> Result<(), CliError> {
        let json = serde_json::to_string_pretty(&self.platform.snapshot()).map_err(|source| {
            CliError::State {
                path: self.state_path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.state_path, json).map_err(|source| CliError::Io {
            path: self.state_path.clone(),
            source,
        })
    }
}

/// Status entry representation for output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRow {
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// Root context.
    pub context: String,
    /// Deployment status.
    pub status: String,
    /// Remote identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Gateway URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invokable_url: Option<String>,
    /// Remote ids of duplicate matches that were ignored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_duplicates: Vec<String>,
}

impl From<&DeploymentStatusEntry> for StatusRow {
    fn from(entry: &DeploymentStatusEntry) -> Self {
        Self {
            name: entry.definition.name.clone(),
            version: entry.definition.version.clone(),
            context: entry.definition.root_context.clone(),
            status: entry.status.to_string(),
            remote_id: entry.remote_id.clone(),
            invokable_url: entry.invokable_url.clone(),
            ignored_duplicates: entry.ignored_duplicates.clone(),
        }
    }
}

/// Failure representation for output.
#[derive(Debug, Serialize)]
pub struct FailureRow {
    /// API name.
    pub name: String,
    /// API version.
    pub version: String,
    /// Step that failed.
    pub phase: String,
    /// Certificate alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Error message.
    pub error: String,
}

impl From<&ItemFailure> for FailureRow {
    fn from(failure: &ItemFailure) -> Self {
        Self {
            name: failure.identity.name.clone(),
            version: failure.identity.version.clone(),
            phase: failure.phase.to_string(),
            alias: failure.alias.clone(),
            error: failure.error.to_string(),
        }
    }
}

/// Prints a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "failed to serialize output"),
    }
}

/// Prints failures in text form.
pub fn print_failures(failures: &[ItemFailure]) {
    if failures.is_empty() {
        return;
    }
    println!();
    println!("Failures ({})", failures.len());
    println!("========");
    for failure in failures {
        println!("  ✗ {failure}");
    }
}
