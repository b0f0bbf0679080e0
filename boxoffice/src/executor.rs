//! Unit-of-work execution with retry.
//!
//! Every state-changing engine operation is a [`UnitOfWork`]. [`execute`]
//! opens a transaction, runs the unit, and commits on success or rolls back
//! on failure. Transient storage failures re-run the whole unit with
//! exponential backoff, unless the failed attempt already talked to the
//! payment gateway: a charge or refund is never issued twice.

use boxoffice_types::{Store, StoreError, Transaction};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::config::RetrySettings;
use crate::errors::BookingError;

/// Transaction handle passed to a running unit of work.
pub struct Unit<T> {
    tx: T,
    gateway_calls: u32,
}

impl<T: Transaction> Unit<T> {
    fn new(tx: T) -> Self {
        Self {
            tx,
            gateway_calls: 0,
        }
    }

    /// The underlying storage transaction.
    pub fn tx(&mut self) -> &mut T {
        &mut self.tx
    }

    /// Records that this attempt is about to call an external gateway.
    pub fn note_gateway_call(&mut self) {
        self.gateway_calls += 1;
    }

    /// Number of gateway calls made in this attempt.
    pub const fn gateway_calls(&self) -> u32 {
        self.gateway_calls
    }

    fn into_transaction(self) -> T {
        self.tx
    }
}

/// A state-changing operation that runs inside one transaction.
pub trait UnitOfWork: Sync {
    /// Value produced on commit.
    type Output: Send;

    /// Name used in logs and retry metrics.
    fn name(&self) -> &'static str;

    /// Performs the work. Returning `Err` rolls back everything staged.
    fn run<T: Transaction>(
        &self,
        unit: &mut Unit<T>,
    ) -> impl Future<Output = Result<Self::Output, BookingError>> + Send;
}

/// Context passed to [`MetricsHook::on_retry_attempt`].
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Unit of work being retried.
    pub unit: &'static str,
    /// 1-based retry number.
    pub attempt: u32,
    /// Backoff applied before the retry.
    pub delay_ms: u64,
    /// Failure that triggered the retry.
    pub error: StoreError,
}

/// Observer for retry activity.
pub trait MetricsHook: Send + Sync {
    /// Called before each retry sleeps.
    fn on_retry_attempt(&self, ctx: &RetryContext);
}

/// Retry configuration for [`execute`].
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    metrics_hook: Option<Arc<dyn MetricsHook>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("metrics_hook", &self.metrics_hook.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Three retries, 10ms base delay doubling up to one second.
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            metrics_hook: None,
        }
    }

    /// Fail on the first transient error.
    pub fn no_retries() -> Self {
        Self::new().max_retries(0)
    }

    /// Attempts after the first.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff before the first retry.
    #[must_use]
    pub const fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Backoff ceiling.
    #[must_use]
    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Reports every retry to `hook`.
    ///
    /// ```
    /// use boxoffice::{MetricsHook, RetryContext, RetryPolicy};
    ///
    /// struct PrintRetries;
    ///
    /// impl MetricsHook for PrintRetries {
    ///     fn on_retry_attempt(&self, ctx: &RetryContext) {
    ///         println!("{} retry {} after {}ms", ctx.unit, ctx.attempt, ctx.delay_ms);
    ///     }
    /// }
    ///
    /// let policy = RetryPolicy::new().max_retries(5).with_metrics_hook(PrintRetries);
    /// # let _ = policy;
    /// ```
    #[must_use]
    pub fn with_metrics_hook<H: MetricsHook + 'static>(mut self, hook: H) -> Self {
        self.metrics_hook = Some(Arc::new(hook));
        self
    }

    /// Backoff before retry number `attempt` (1-based), with ±25% jitter.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = (self.max_delay.as_millis() as f64).max(1.0);
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

        let delay = (base_ms * self.backoff_multiplier.powi(exponent)).min(max_ms);
        let jitter = delay * 0.25 * rand::rng().random_range(-1.0..=1.0);
        let final_ms = (delay + jitter).clamp(1.0, max_ms) as u64;

        Duration::from_millis(final_ms)
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new()
            .max_retries(settings.max_retries)
            .base_delay(Duration::from_millis(settings.base_delay_ms))
            .max_delay(Duration::from_millis(settings.max_delay_ms))
    }
}

struct AttemptFailure {
    error: BookingError,
    gateway_calls: u32,
}

/// Runs `unit` in a fresh transaction, retrying transient storage failures.
#[instrument(name = "executor.execute", skip_all, fields(unit = unit.name()))]
pub async fn execute<S, U>(
    store: &S,
    unit: &U,
    policy: &RetryPolicy,
) -> Result<U::Output, BookingError>
where
    S: Store,
    U: UnitOfWork,
{
    let mut attempt = 0;

    loop {
        let failure = match run_once(store, unit).await {
            Ok(output) => return Ok(output),
            Err(failure) => failure,
        };

        let store_error = match &failure.error {
            BookingError::Store(error) if error.is_transient() => error.clone(),
            _ => return Err(failure.error),
        };

        if failure.gateway_calls > 0 {
            error!(
                unit = unit.name(),
                error = %store_error,
                gateway_calls = failure.gateway_calls,
                "[executor.execute] transient failure after gateway call, not retrying"
            );
            return Err(failure.error);
        }

        if attempt >= policy.max_retries {
            warn!(
                unit = unit.name(),
                error = %store_error,
                retries = attempt,
                "[executor.execute] retries exhausted"
            );
            return Err(failure.error);
        }

        attempt += 1;
        let delay = policy.delay_for(attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);

        if let Some(hook) = &policy.metrics_hook {
            hook.on_retry_attempt(&RetryContext {
                unit: unit.name(),
                attempt,
                delay_ms,
                error: store_error.clone(),
            });
        }

        debug!(
            unit = unit.name(),
            attempt,
            delay_ms,
            error = %store_error,
            "[executor.execute] retrying after transient failure"
        );

        tokio::time::sleep(delay).await;
    }
}

async fn run_once<S, U>(store: &S, unit: &U) -> Result<U::Output, AttemptFailure>
where
    S: Store,
    U: UnitOfWork,
{
    let tx = store.begin().await.map_err(|error| AttemptFailure {
        error: error.into(),
        gateway_calls: 0,
    })?;

    let mut context = Unit::new(tx);
    let result = unit.run(&mut context).await;
    let gateway_calls = context.gateway_calls();
    let tx = context.into_transaction();

    match result {
        Ok(output) => {
            tx.commit().await.map_err(|error| AttemptFailure {
                error: error.into(),
                gateway_calls,
            })?;
            Ok(output)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(
                    unit = unit.name(),
                    error = %rollback_error,
                    "[executor.run_once] rollback failed; locks released on drop"
                );
            }
            Err(AttemptFailure {
                error,
                gateway_calls,
            })
        }
    }
}
