//! # apimsync Core
//!
//! Reconciliation engine that converges an API-management platform towards a
//! declared set of API definitions.
//!
//! This crate provides:
//! - Identity fingerprinting with tenant-context normalization
//! - A deployment status diff against remote state
//! - Create/update, publish and remove orchestration with per-definition
//!   failure isolation
//! - Idempotent backend certificate convergence
//! - Bounded exponential-backoff retry
//! - An in-memory platform for tests and offline rehearsal
//!
//! ## Architecture
//!
//! The engine never speaks a wire protocol. Every remote call goes through a
//! [`RemoteApiAdapter`], and every call is wrapped by a [`RetryController`].
//! State is recomputed from the platform on every pass:
//! 1. Diff the desired definitions against the platform
//! 2. Converge certificates, then create or update each API
//! 3. Re-diff, then publish
//!
//! ## Key Invariants
//!
//! - Status entries are index-aligned with the desired definitions
//! - A definition matches at most one remote resource
//! - Fingerprint equality is exact and case-sensitive
//! - A failed identity query aborts the pass
//! - A failed create, update, publish, delete or certificate step only
//!   affects its own definition

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod certificate;
mod config;
mod diff;
mod error;
mod identity;
mod memory;
mod model;
mod orchestrator;
mod report;
mod retry;
mod summary;

pub use adapter::RemoteApiAdapter;
pub use certificate::{
    certificate_alias, resolve_chain, split_chain, CertificateManager, CertificateOutcome,
    CertificateSource, CertificateStatus, ResolvedChain, SecretResolver, StaticSecretResolver,
    ALIAS_SEPARATOR, NOT_FOUND_STATUS,
};
pub use config::{
    validate_definitions, DeploymentManifest, FanOutPolicy, ReconcilerConfig, RetryPolicy,
};
pub use diff::{select_match, DiffEngine};
pub use error::{
    ReconcileError, ReconcileResult, RemoteError, RemoteResult, CONFLICT_CODE, NOT_FOUND_CODE,
};
pub use identity::{
    fingerprint, normalize_context, ApiIdentity, Fingerprint, TenantSuffix,
    FINGERPRINT_SEPARATOR, TENANT_PREFIX,
};
pub use memory::{Call, MemoryPlatform, Operation, PlatformState, StoredApi, StoredCertificate};
pub use model::{
    Backend, BusinessInfo, CertificateDescriptor, CertificateInfo, CorsPolicy, CreatedResource,
    DeployedResource, DeploymentStatus, DeploymentStatusEntry, DesiredApiDefinition,
    LifecycleState, MediationPolicies, Visibility,
};
pub use orchestrator::{PassState, ReconciliationContext, Reconciler};
pub use report::{DeployReport, ItemFailure, Phase, RemoveReport};
pub use retry::{CancellationFlag, RecordingSleeper, RetryController, Sleeper, TokioSleeper};
pub use summary::{CertificateTable, StatusTable};

/// Version of the reconciliation engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
