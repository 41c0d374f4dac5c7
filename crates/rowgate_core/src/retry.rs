//! Fixed-schedule retry executor.
//!
//! One operation runs through the configured attempt schedule:
//!
//! 1. A pre-flight check on the pool. If storage is unavailable the call
//!    fails immediately and consumes no attempt.
//! 2. For each attempt: sleep the pre-attempt delay (skipped when zero), then
//!    acquire a connection and perform the call, both bounded by the
//!    attempt's timeout.
//! 3. Success and terminal failures return at once. Transient failures move
//!    on to the next attempt; after the last one the outcome is a terminal
//!    timeout.
//!
//! Attempts are strictly sequential. The cancel token is observed at every
//! suspension point; a cancelled attempt drops its in-flight call, which
//! releases the connection it held.

use crate::cancel::CancelToken;
use crate::config::RetryConfig;
use crate::error::{Failure, FailureKind, StorageError, StorageResult};
use crate::operation::Operation;
use crate::storage::{ConnectionPool, Payload, StorageExecutor};
use std::future::Future;
use tracing::{debug, error, warn};

/// The result of running one operation through the schedule.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Attempts started, from 0 (nothing ran) to the schedule length.
    pub attempts_used: u32,
    /// Attempts that ended in a transient failure.
    pub transient_failures: u32,
    /// The value, or the classified terminal failure.
    pub result: Result<T, Failure>,
}

impl<T> RetryOutcome<T> {
    fn success(attempts_used: u32, transient_failures: u32, value: T) -> Self {
        Self {
            attempts_used,
            transient_failures,
            result: Ok(value),
        }
    }

    fn failure(attempts_used: u32, transient_failures: u32, failure: Failure) -> Self {
        Self {
            attempts_used,
            transient_failures,
            result: Err(failure),
        }
    }

    /// Returns true if the operation succeeded.
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// The failure, if any.
    pub fn failure_ref(&self) -> Option<&Failure> {
        self.result.as_ref().err()
    }

    /// Consumes the outcome, returning the result.
    pub fn into_result(self) -> Result<T, Failure> {
        self.result
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> RetryOutcome<U> {
        RetryOutcome {
            attempts_used: self.attempts_used,
            transient_failures: self.transient_failures,
            result: self.result.map(f),
        }
    }
}

/// Runs storage calls through a [`RetryConfig`] schedule.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Creates an executor with the given schedule.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The schedule in use.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Executes an operation against a storage executor.
    pub async fn execute<S>(
        &self,
        storage: &S,
        op: &Operation,
        cancel: &CancelToken,
    ) -> RetryOutcome<Payload>
    where
        S: StorageExecutor + ?Sized,
    {
        self.run(storage, op.kind().as_str(), cancel, |conn| {
            storage.perform(conn, op)
        })
        .await
    }

    /// Runs an arbitrary storage call through the schedule.
    ///
    /// `call` receives a freshly acquired connection for each attempt.
    /// `label` only appears in log output.
    pub async fn run<P, T, F, Fut>(
        &self,
        pool: &P,
        label: &str,
        cancel: &CancelToken,
        mut call: F,
    ) -> RetryOutcome<T>
    where
        P: ConnectionPool + ?Sized,
        F: FnMut(P::Connection) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        if cancel.is_cancelled() {
            return RetryOutcome::failure(0, 0, Failure::cancelled());
        }

        if let Err(err) = pool.preflight().await {
            warn!(operation = label, error = %err, "storage unavailable before first attempt");
            return RetryOutcome::failure(
                0,
                0,
                Failure::new(FailureKind::Unavailable, err.to_string()),
            );
        }

        let schedule = self.config.attempts();
        let mut transient = 0u32;
        let mut last_error: Option<String> = None;

        for attempt in schedule {
            if !attempt.pre_delay.is_zero() {
                debug!(
                    operation = label,
                    attempt = attempt.index,
                    delay_ms = attempt.pre_delay.as_millis() as u64,
                    "waiting before retry"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return RetryOutcome::failure(attempt.index, transient, Failure::cancelled());
                    }
                    _ = tokio::time::sleep(attempt.pre_delay) => {}
                }
            }

            let used = attempt.index + 1;
            let in_flight = async {
                match pool.acquire().await {
                    Ok(conn) => call(conn).await,
                    Err(err) => Err(err),
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(operation = label, attempt = attempt.index, "cancelled during attempt");
                    return RetryOutcome::failure(used, transient, Failure::cancelled());
                }
                result = tokio::time::timeout(attempt.timeout, in_flight) => result,
            };

            match result {
                Ok(Ok(value)) => {
                    debug!(operation = label, attempts = used, "succeeded");
                    return RetryOutcome::success(used, transient, value);
                }
                Ok(Err(err)) if err.is_retryable() => {
                    transient += 1;
                    warn!(
                        operation = label,
                        attempt = attempt.index,
                        error = %err,
                        remaining = schedule.len() as u32 - used,
                        "transient failure"
                    );
                    last_error = Some(err.to_string());
                }
                Ok(Err(err)) => {
                    if let StorageError::Other(detail) = &err {
                        error!(operation = label, attempt = attempt.index, detail = %detail, "unexpected storage failure");
                    } else {
                        debug!(operation = label, attempt = attempt.index, error = %err, "terminal failure");
                    }
                    return RetryOutcome::failure(used, transient, Failure::from_storage(&err));
                }
                Err(_) => {
                    transient += 1;
                    warn!(
                        operation = label,
                        attempt = attempt.index,
                        timeout_ms = attempt.timeout.as_millis() as u64,
                        remaining = schedule.len() as u32 - used,
                        "attempt timed out"
                    );
                    last_error = Some(format!(
                        "attempt timed out after {}ms",
                        attempt.timeout.as_millis()
                    ));
                }
            }
        }

        let attempts = self.config.max_attempts();
        error!(operation = label, attempts, "all retries exhausted");
        let mut message = format!("operation timed out after {attempts} attempts");
        if let Some(last) = last_error {
            message.push_str("; last error: ");
            message.push_str(&last);
        }
        RetryOutcome::failure(
            attempts,
            transient,
            Failure::new(FailureKind::Timeout, message),
        )
    }
}
