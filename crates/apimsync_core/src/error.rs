//! Error types for the reconciliation engine.

use std::fmt;
use thiserror::Error;

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Result type for calls made through a [`RemoteApiAdapter`](crate::RemoteApiAdapter).
pub type RemoteResult<T> = Result<T, RemoteError>;

/// HTTP-class code the platform uses to signal an existing resource.
pub const CONFLICT_CODE: u32 = 409;

/// HTTP-class code the platform uses to signal a missing resource.
pub const NOT_FOUND_CODE: u32 = 404;

/// Structured error reported by the remote platform.
///
/// Adapters translate whatever their transport returns into this shape so the
/// engine can classify failures without looking at payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Platform error code from the response body.
    pub code: u32,
    /// HTTP status of the response (0 when no response was received).
    pub http_status: u16,
    /// Human readable description.
    pub message: String,
}

impl RemoteError {
    /// Creates a new remote error.
    pub fn new(code: u32, http_status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            http_status,
            message: message.into(),
        }
    }

    /// Creates an "already exists" error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(CONFLICT_CODE, 409, message)
    }

    /// Creates a "not found" error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(NOT_FOUND_CODE, 404, message)
    }

    /// Creates an error for a request that never produced a response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, 0, message)
    }

    /// Creates a generic server-side failure.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(500, 500, message)
    }

    /// Returns true if the platform reported that the resource already exists.
    pub fn is_conflict(&self) -> bool {
        self.code == CONFLICT_CODE || self.http_status == 409
    }

    /// Returns true if the platform reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND_CODE || self.http_status == 404
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "remote error {} (http {}): {}",
            self.code, self.http_status, self.message
        )
    }
}

impl std::error::Error for RemoteError {}

/// Errors that can occur during a reconciliation pass.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Client registration or token acquisition failed.
    #[error("authentication failed: {0}")]
    Authentication(RemoteError),

    /// A remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// An identity field cannot be fingerprinted.
    #[error("invalid identity field {field} = {value:?}: {reason}")]
    InvalidIdentity {
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Retry policy failed validation.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// Certificate chain content is malformed.
    #[error("invalid certificate chain: {0}")]
    InvalidCertificateChain(String),

    /// A certificate source could not be resolved.
    #[error("certificate source {source_ref} could not be resolved: {reason}")]
    CertificateSource {
        /// The source reference as configured.
        source_ref: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Configuration or manifest is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The pass was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Creates an invalid identity error.
    pub fn invalid_identity(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidIdentity {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Returns the underlying remote error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            ReconcileError::Remote(e) | ReconcileError::Authentication(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the platform reported that the resource already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Remote(e) if e.is_conflict())
    }

    /// Returns true if the platform reported that the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Remote(e) if e.is_not_found())
    }
}
