//! Configuration for the retry executor and the data service.

use crate::error::{CoreError, CoreResult};
use crate::ident::DEFAULT_MAX_IDENTIFIER_LEN;
use crate::operation::OperationBuilder;
use std::time::Duration;

/// The default schedule as `(timeout_ms, pre_delay_ms)` per attempt.
///
/// Each retry waits as long as its own timeout before starting.
pub const DEFAULT_SCHEDULE_MS: [(u64, u64); 4] = [(200, 0), (400, 400), (800, 800), (1600, 1600)];

/// Default number of pooled connections for the in-memory store.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// One slot of the retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// Zero-based position in the schedule.
    pub index: u32,
    /// Upper bound on the storage call for this attempt.
    pub timeout: Duration,
    /// Sleep before the attempt starts; zero means no sleep.
    pub pre_delay: Duration,
}

/// Configuration for retry behavior: an explicit, ordered attempt schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    attempts: Vec<Attempt>,
}

impl RetryConfig {
    /// Creates the default four-attempt schedule.
    pub fn new() -> Self {
        Self::standard()
    }

    /// The default schedule: 200/400/800/1600ms timeouts, 0/400/800/1600ms delays.
    pub fn standard() -> Self {
        let attempts = DEFAULT_SCHEDULE_MS
            .iter()
            .zip(0u32..)
            .map(|(&(timeout, delay), index)| Attempt {
                index,
                timeout: Duration::from_millis(timeout),
                pre_delay: Duration::from_millis(delay),
            })
            .collect();
        Self { attempts }
    }

    /// Creates a schedule from `(timeout, pre_delay)` pairs.
    pub fn from_schedule<I>(slots: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = (Duration, Duration)>,
    {
        let attempts: Vec<Attempt> = slots
            .into_iter()
            .zip(0u32..)
            .map(|((timeout, pre_delay), index)| Attempt {
                index,
                timeout,
                pre_delay,
            })
            .collect();

        if attempts.is_empty() {
            return Err(CoreError::InvalidSchedule(
                "at least one attempt is required".into(),
            ));
        }
        if let Some(slot) = attempts.iter().find(|a| a.timeout.is_zero()) {
            return Err(CoreError::InvalidSchedule(format!(
                "attempt {} has a zero timeout",
                slot.index
            )));
        }
        Ok(Self { attempts })
    }

    /// Creates a schedule from `(timeout_ms, pre_delay_ms)` pairs.
    pub fn from_millis(slots: &[(u64, u64)]) -> CoreResult<Self> {
        Self::from_schedule(
            slots
                .iter()
                .map(|&(t, d)| (Duration::from_millis(t), Duration::from_millis(d))),
        )
    }

    /// Creates a configuration with a single attempt and no retries.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            attempts: vec![Attempt {
                index: 0,
                timeout,
                pre_delay: Duration::ZERO,
            }],
        }
    }

    /// The attempt schedule, in order.
    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// Number of attempts in the schedule.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Sum of every attempt's timeout.
    pub fn total_timeout(&self) -> Duration {
        self.attempts.iter().map(|a| a.timeout).sum()
    }

    /// Sum of every pre-attempt delay.
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().map(|a| a.pre_delay).sum()
    }

    /// Upper bound on wall time before a terminal timeout.
    pub fn worst_case(&self) -> Duration {
        self.total_timeout() + self.total_delay()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Configuration for [`DataService`](crate::DataService) and the
/// batch processor.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Retry schedule applied to every storage call.
    pub retry: RetryConfig,
    /// Maximum table/column name length.
    pub max_identifier_len: usize,
    /// Connection pool size for stores that take one.
    pub pool_size: usize,
}

impl ServiceConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the identifier length limit.
    #[must_use]
    pub fn with_max_identifier_len(mut self, len: usize) -> Self {
        self.max_identifier_len = len;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// An operation builder honouring this configuration.
    pub fn builder(&self) -> OperationBuilder {
        OperationBuilder::new(self.max_identifier_len)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::standard(),
            max_identifier_len: DEFAULT_MAX_IDENTIFIER_LEN,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}
