use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

const STATUS_MULTIPLE_CHOICES: u16 = 300;
const STATUS_REQUEST_TIMEOUT: u16 = 408;
const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;
const STATUS_NOT_IMPLEMENTED: u16 = 501;
const STATUS_HTTP_VERSION_NOT_SUPPORTED: u16 = 505;

const BASE_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Decides whether a failed send may be retried and how long to wait before doing so.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base: BASE_BACKOFF,
            max: MAX_BACKOFF,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn with_jitter(jitter: bool) -> Self {
        RetryPolicy {
            jitter,
            ..RetryPolicy::default()
        }
    }

    /// Status 0 stands for a request that never got a response.
    pub(crate) fn should_retry_for_status(status: u16) -> bool {
        status < STATUS_MULTIPLE_CHOICES
            || (status >= STATUS_INTERNAL_SERVER_ERROR
                && status != STATUS_NOT_IMPLEMENTED
                && status != STATUS_HTTP_VERSION_NOT_SUPPORTED)
            || status == STATUS_REQUEST_TIMEOUT
    }

    /// Delay before the next attempt, doubling with every retry so far.
    pub(crate) fn backoff(&self, retries_so_far: u32) -> Duration {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.max)
            .with_factor(2.0)
            .without_max_times();
        if self.jitter {
            builder = builder.with_jitter();
        }
        builder
            .build()
            .nth(retries_so_far as usize)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
