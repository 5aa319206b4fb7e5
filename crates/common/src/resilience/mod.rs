//! Resilience primitives for calls to external providers
//!
//! Provides:
//! - Bounded exponential-backoff retries with a per-attempt timeout
//! - A cancellation token honoured at every await point
//! - Process-wide permits capping outstanding provider requests

use crate::errors::{AppError, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

/// External dependency a retried call talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Embedding,
    Llm,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Embedding => "embedding",
            Provider::Llm => "llm",
        }
    }

    fn timeout_error(&self, timeout: Duration) -> AppError {
        let timeout_ms = timeout.as_millis() as u64;
        match self {
            Provider::Embedding => AppError::EmbeddingTimeout { timeout_ms },
            Provider::Llm => AppError::LlmTimeout { timeout_ms },
        }
    }
}

/// Retry budget for one logical provider call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay schedule between attempts
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Upper bound on `run` when every attempt times out: the attempt timeouts
    /// plus the capped delays between them
    pub fn worst_case(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.attempt_timeout * attempts + self.max_backoff * (attempts - 1)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt budget is spent.
    ///
    /// Each attempt is bounded by `attempt_timeout`; an elapsed attempt counts as a
    /// transient failure. Exhaustion surfaces as [`AppError::UpstreamExhausted`].
    pub async fn run<T, F, Fut>(&self, provider: Provider, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut schedule = self.schedule();
        let mut last_error: Option<AppError> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled {
                    operation: provider.as_str().to_string(),
                });
            }
            let outcome = cancel
                .guard(provider.as_str(), tokio::time::timeout(self.attempt_timeout, op(attempt)))
                .await?;

            let error = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => provider.timeout_error(self.attempt_timeout),
            };

            if !error.is_transient() {
                return Err(error);
            }

            if attempt < max_attempts {
                let delay = schedule.next_backoff().unwrap_or(self.max_backoff);
                tracing::warn!(
                    provider = provider.as_str(),
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Provider call failed, retrying"
                );
                cancel.guard(provider.as_str(), tokio::time::sleep(delay)).await?;
            } else {
                tracing::warn!(
                    provider = provider.as_str(),
                    attempt = attempt,
                    error = %error,
                    "Provider call failed, attempts exhausted"
                );
            }

            last_error = Some(error);
        }

        Err(AppError::UpstreamExhausted {
            service: provider.as_str().to_string(),
            attempts: max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".to_string()),
        })
    }
}

/// Cooperative cancellation shared by every stage of one request
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Signal cancellation to every clone of this token
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Drive `fut` unless the token fires first
    pub async fn guard<F: Future>(&self, operation: &str, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled {
                operation: operation.to_string(),
            });
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AppError::Cancelled {
                operation: operation.to_string(),
            }),
            output = fut => Ok(output),
        }
    }

    /// Guard that cancels this token when dropped, e.g. when an HTTP client
    /// disconnects and its handler future is discarded
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop { token: self.clone() }
    }
}

/// Cancels the wrapped token on drop
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancelToken,
}

impl CancelOnDrop {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Process-wide cap on in-flight provider requests
#[derive(Debug, Clone)]
pub struct ProviderPermits {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ProviderPermits {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot; the slot is released when the permit drops
    pub async fn acquire(&self, cancel: &CancelToken) -> Result<OwnedSemaphorePermit> {
        cancel
            .guard("awaiting provider permit", self.semaphore.clone().acquire_owned())
            .await?
            .map_err(|_| AppError::ServiceUnavailable {
                message: "provider permits closed".to_string(),
            })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancelToken::new();

        let value = fast_policy(3)
            .run(Provider::Embedding, &cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(AppError::EmbeddingError {
                            message: "502 from provider".into(),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_surfaces_transient_signal() {
        let cancel = CancelToken::new();
        let result: Result<()> = fast_policy(2)
            .run(Provider::Llm, &cancel, |_| async {
                Err(AppError::LlmError {
                    message: "connection reset".into(),
                })
            })
            .await;

        match result {
            Err(AppError::UpstreamExhausted {
                service, attempts, ..
            }) => {
                assert_eq!(service, "llm");
                assert_eq!(attempts, 2);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancelToken::new();
        let result: Result<()> = fast_policy(5)
            .run(Provider::Embedding, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AppError::UpstreamRejected {
                        service: "embedding".into(),
                        status: 401,
                        message: "invalid api key".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::UpstreamRejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let cancel = CancelToken::new();
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_millis(20),
            ..fast_policy(2)
        };

        let result: Result<()> = policy
            .run(Provider::Embedding, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::UpstreamExhausted { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_calling() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<()> = fast_policy(3)
            .run(Provider::Llm, &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(AppError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_guard_cancels_clones() {
        let cancel = CancelToken::new();
        let observer = cancel.clone();
        {
            let guard = cancel.drop_guard();
            assert!(!guard.token().is_cancelled());
        }
        assert!(observer.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = cancel
            .guard("generation", tokio::time::sleep(Duration::from_secs(10)))
            .await;
        assert!(matches!(result, Err(AppError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_permits_cap_concurrency() {
        let permits = ProviderPermits::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let permits = permits.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire(&CancelToken::new()).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(permits.available(), 2);
    }
}
