//! Configuration for the reconciler.

use crate::certificate::ALIAS_SEPARATOR;
use crate::error::{ReconcileError, ReconcileResult};
use crate::identity::TenantSuffix;
use crate::model::DesiredApiDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for retry behavior.
///
/// The delay before attempt `n + 1` is
/// `interval_seconds * backoff_rate^(n - 1)` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Seconds to wait before the first retry.
    pub interval_seconds: f64,
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Multiplier applied to the interval after each retry.
    pub backoff_rate: f64,
}

impl RetryPolicy {
    /// Creates a validated retry policy.
    pub fn new(interval_seconds: f64, max_attempts: u32, backoff_rate: f64) -> ReconcileResult<Self> {
        let policy = Self {
            interval_seconds,
            max_attempts,
            backoff_rate,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Creates a policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self {
            interval_seconds: 1.0,
            max_attempts: 1,
            backoff_rate: 1.0,
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial interval.
    pub fn with_interval_seconds(mut self, interval_seconds: f64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    /// Sets the backoff rate.
    pub fn with_backoff_rate(mut self, backoff_rate: f64) -> Self {
        self.backoff_rate = backoff_rate;
        self
    }

    /// Checks that every field is a finite number greater than zero.
    pub fn validate(&self) -> ReconcileResult<()> {
        if !self.interval_seconds.is_finite() || self.interval_seconds <= 0.0 {
            return Err(ReconcileError::InvalidRetryPolicy(
                "intervalSeconds must be a number greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ReconcileError::InvalidRetryPolicy(
                "maxAttempts must be a number greater than 0".into(),
            ));
        }
        if !self.backoff_rate.is_finite() || self.backoff_rate <= 0.0 {
            return Err(ReconcileError::InvalidRetryPolicy(
                "backoffRate must be a number greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Calculates the delay after the given failed attempt (1-based).
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.interval_seconds * self.backoff_rate.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_seconds: 1.0,
            max_attempts: 3,
            backoff_rate: 2.0,
        }
    }
}

/// How the definitions of one phase are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum FanOutPolicy {
    /// One definition at a time.
    #[default]
    Sequential,
    /// Up to `limit` definitions in flight at once.
    Concurrent {
        /// Maximum number of definitions in flight.
        limit: usize,
    },
}

impl FanOutPolicy {
    /// Returns the number of definitions that may be in flight at once.
    pub fn limit(&self) -> usize {
        match self {
            FanOutPolicy::Sequential => 1,
            FanOutPolicy::Concurrent { limit } => (*limit).max(1),
        }
    }
}

/// Configuration for reconciliation passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Gateway environment whose invokable URLs are reported.
    pub gateway_environment: Option<String>,
    /// Operator principal, e.g. `admin@acme.com`.
    pub principal: String,
    /// Retry policy applied to every remote call.
    pub retry: RetryPolicy,
    /// Pause before re-querying state after create/update.
    #[serde(with = "seconds")]
    pub settle_delay: Duration,
    /// Pause between certificate operations.
    #[serde(with = "seconds")]
    pub certificate_pause: Duration,
    /// Number of certificate alias indices probed on removal.
    pub certificate_probe_limit: usize,
    /// Fan-out policy for per-definition phases.
    pub fan_out: FanOutPolicy,
}

impl ReconcilerConfig {
    /// Creates a configuration for the given principal.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            gateway_environment: None,
            principal: principal.into(),
            retry: RetryPolicy::default(),
            settle_delay: Duration::ZERO,
            certificate_pause: Duration::from_secs(1),
            certificate_probe_limit: 5,
            fan_out: FanOutPolicy::Sequential,
        }
    }

    /// Sets the gateway environment.
    pub fn with_gateway_environment(mut self, environment: impl Into<String>) -> Self {
        self.gateway_environment = Some(environment.into());
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the pause between certificate operations.
    pub fn with_certificate_pause(mut self, pause: Duration) -> Self {
        self.certificate_pause = pause;
        self
    }

    /// Sets the number of certificate indices probed on removal.
    pub fn with_certificate_probe_limit(mut self, limit: usize) -> Self {
        self.certificate_probe_limit = limit;
        self
    }

    /// Sets the fan-out policy.
    pub fn with_fan_out(mut self, fan_out: FanOutPolicy) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Returns the tenant derived from the principal.
    pub fn tenant(&self) -> Option<TenantSuffix> {
        TenantSuffix::from_principal(&self.principal)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ReconcileResult<()> {
        self.retry.validate()?;
        if let FanOutPolicy::Concurrent { limit: 0 } = self.fan_out {
            return Err(ReconcileError::Config(
                "fanOut.limit must be greater than 0".into(),
            ));
        }
        if self.certificate_probe_limit == 0 {
            return Err(ReconcileError::Config(
                "certificateProbeLimit must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// A deployment manifest: engine configuration plus the desired definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    /// Engine configuration.
    #[serde(default)]
    pub config: ReconcilerConfig,
    /// Desired API definitions.
    pub apidefs: Vec<DesiredApiDefinition>,
}

impl DeploymentManifest {
    /// Parses a manifest from JSON and validates it.
    pub fn from_json(json: &str) -> ReconcileResult<Self> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| ReconcileError::Config(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validates the configuration and the desired definitions.
    pub fn validate(&self) -> ReconcileResult<()> {
        self.config.validate()?;
        if self.apidefs.is_empty() {
            return Err(ReconcileError::Config("apidefs must not be empty".into()));
        }
        validate_definitions(&self.apidefs)
    }
}

/// Checks that every definition has a complete identity and that no identity
/// appears twice. Names and versions must not contain [`ALIAS_SEPARATOR`], so
/// distinct definitions never share certificate aliases.
pub fn validate_definitions(definitions: &[DesiredApiDefinition]) -> ReconcileResult<()> {
    let mut seen = HashSet::new();
    for definition in definitions {
        let identity = definition.identity();
        for (field, value) in [
            ("name", &identity.name),
            ("version", &identity.version),
            ("rootContext", &identity.context),
        ] {
            if value.trim().is_empty() {
                return Err(ReconcileError::Config(format!(
                    "api definition {field} must not be empty"
                )));
            }
        }
        for (field, value) in [("name", &identity.name), ("version", &identity.version)] {
            if value.contains(ALIAS_SEPARATOR) {
                return Err(ReconcileError::Config(format!(
                    "api definition {field} {value:?} must not contain {ALIAS_SEPARATOR:?}"
                )));
            }
        }
        let fingerprint = identity.fingerprint()?;
        if !seen.insert(fingerprint) {
            return Err(ReconcileError::Config(format!(
                "duplicate api definition {identity}"
            )));
        }
    }
    Ok(())
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
