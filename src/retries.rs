use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};

use crate::error::Error;

// Retry policy for transient transport failures. The implementation is
// based on the backon crate; callers go through `RetryConfig` rather than
// using backon directly, so retryability decisions stay centralized in
// `Error::is_retryable`.

#[derive(Debug, Copy, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first, so a request is tried at most
    /// `max_retries + 1` times.
    pub max_retries: usize,
    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: usize, max_delay: Duration) -> Self {
        Self {
            max_retries,
            max_delay,
        }
    }

    /// Runs `func` with exponential backoff, retrying only errors that are
    /// transient per `Error::is_retryable`. `notify` fires before each
    /// backoff sleep with the error being retried and the chosen delay.
    pub fn retry<R, F: Future<Output = Result<R, Error>>>(
        &self,
        func: impl FnMut() -> F,
        notify: impl FnMut(&Error, Duration),
    ) -> impl Future<Output = Result<R, Error>> {
        func.retry(self.get_backoff())
            .when(Error::is_retryable)
            .notify(notify)
    }

    fn get_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_jitter()
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
    }
}
