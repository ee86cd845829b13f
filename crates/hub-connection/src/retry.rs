//! Bounded retry at a fixed interval inside a fixed window.
//!
//! [`RetryExecutor::run`] invokes an operation immediately and, on failure,
//! keeps retrying every `interval` until it succeeds, the shared
//! cancellation token fires, or `window` has elapsed since the first
//! attempt. Running out of time is an outcome, not an error: nothing
//! propagates past the executor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::types::RetryPolicy;

/// Result of one [`RetryExecutor::run`] call.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Success {
        value: T,
        attempts: u32,
    },
    Exhausted {
        last_error: Option<E>,
        attempts: u32,
        cancelled: bool,
    },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The success value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            RetryOutcome::Success { value, .. } => Some(value),
            RetryOutcome::Exhausted { .. } => None,
        }
    }
}

/// Receives every attempt and outcome of a retry run.
pub trait RetryObserver: Send + Sync {
    fn on_attempt(&self, _operation: &str, _attempt: u32) {}

    fn on_failure(&self, _operation: &str, _attempt: u32, _error: &dyn fmt::Display) {}

    fn on_success(&self, _operation: &str, _attempts: u32) {}

    fn on_exhausted(
        &self,
        _operation: &str,
        _attempts: u32,
        _last_error: Option<&dyn fmt::Display>,
        _cancelled: bool,
    ) {
    }
}

/// Observer that reports retry progress through `tracing`.
pub struct LogObserver;

impl RetryObserver for LogObserver {
    fn on_failure(&self, operation: &str, attempt: u32, error: &dyn fmt::Display) {
        warn!(operation, attempt, error = %error, "attempt failed");
    }

    fn on_success(&self, operation: &str, attempts: u32) {
        info!(operation, attempts, "operation succeeded");
    }

    fn on_exhausted(
        &self,
        operation: &str,
        attempts: u32,
        last_error: Option<&dyn fmt::Display>,
        cancelled: bool,
    ) {
        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        if cancelled {
            info!(operation, attempts, "retries stopped by cancellation");
        } else {
            warn!(operation, attempts, %last_error, "retry window exhausted, giving up");
        }
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    observer: Arc<dyn RetryObserver>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, observer: Arc<dyn RetryObserver>) -> Self {
        Self { policy, observer }
    }

    /// Executor that logs through [`LogObserver`].
    pub fn logging(policy: RetryPolicy) -> Self {
        Self::new(policy, Arc::new(LogObserver))
    }

    /// Invokes `op` until success, cancellation, or the end of the window.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let deadline = Instant::now() + self.policy.window;
        let mut attempts: u32 = 0;
        let mut last_error: Option<E> = None;

        let cancelled = loop {
            attempts = attempts.saturating_add(1);
            self.observer.on_attempt(operation, attempts);

            let result = tokio::select! {
                biased;
                result = op() => result,
                _ = cancel.cancelled() => break true,
            };

            match result {
                Ok(value) => {
                    self.observer.on_success(operation, attempts);
                    return RetryOutcome::Success { value, attempts };
                }
                Err(e) => {
                    self.observer.on_failure(operation, attempts, &e);
                    last_error = Some(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break true,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            if Instant::now() >= deadline {
                break false;
            }
        };

        self.observer.on_exhausted(
            operation,
            attempts,
            last_error.as_ref().map(|e| e as &dyn fmt::Display),
            cancelled,
        );
        RetryOutcome::Exhausted {
            last_error,
            attempts,
            cancelled,
        }
    }
}
