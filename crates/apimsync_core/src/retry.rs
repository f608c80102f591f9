//! Bounded exponential-backoff retry for remote calls.

use crate::config::RetryPolicy;
use crate::error::{ReconcileError, ReconcileResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Suspends the current task. Injected so tests can observe delays without
/// waiting for them.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a new recording sleeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded delay, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }

    /// Returns the sum of every recorded delay.
    pub fn total(&self) -> Duration {
        self.slept.lock().iter().sum()
    }

    /// Forgets every recorded delay.
    pub fn clear(&self) {
        self.slept.lock().clear();
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().push(duration);
    }
}

/// Cooperative cancellation signal shared between a caller and a pass.
///
/// Checked before each attempt and before each definition; a backoff sleep in
/// progress is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fails with [`ReconcileError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> ReconcileResult<()> {
        if self.is_cancelled() {
            Err(ReconcileError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationFlag,
}

impl RetryController {
    /// Creates a controller.
    pub fn new(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            policy,
            sleeper,
            cancel: CancellationFlag::new(),
        }
    }

    /// Attaches a cancellation flag.
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation`, retrying every failure.
    ///
    /// See [`run_while`](Self::run_while).
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ReconcileError> + fmt::Display,
    {
        self.run_while(operation, |_| true).await
    }

    /// Runs `operation`, retrying failures for which `should_retry` holds.
    ///
    /// The operation receives the 1-based attempt number. After a failed
    /// attempt `n` the controller sleeps for
    /// [`delay_after_attempt(n)`](RetryPolicy::delay_after_attempt) and tries
    /// again, up to `max_attempts` attempts in total. The last error is
    /// returned as produced by the operation.
    ///
    /// # Errors
    ///
    /// Fails with [`ReconcileError::InvalidRetryPolicy`] before the first
    /// attempt if the policy is invalid, and with [`ReconcileError::Cancelled`]
    /// if cancellation is requested before an attempt starts.
    pub async fn run_while<T, E, F, Fut, P>(&self, mut operation: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<ReconcileError> + fmt::Display,
        P: Fn(&E) -> bool,
    {
        self.policy.validate()?;

        let mut attempt = 1;
        loop {
            self.cancel.check()?;

            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= self.policy.max_attempts || !should_retry(&error) {
                return Err(error);
            }

            let delay = self.policy.delay_after_attempt(attempt);
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, backing off"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

impl fmt::Debug for RetryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
