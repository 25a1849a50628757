use crate::traits::SourceError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Runs source requests with bounded concurrency, a per-request timeout and
/// cooperative cancellation.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(concurrency_limit: usize, request_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Runs `request` once a permit is free.
    ///
    /// The closure receives a child of `token` that is cancelled when the
    /// timeout elapses or the call returns, so sources polling it stop work.
    /// Returns [`SourceError::Cancelled`] only when `token` itself fired and
    /// [`SourceError::Timeout`] when this request ran out of time.
    #[instrument(skip(self, token, request))]
    pub async fn execute<F, Fut, T>(
        &self,
        source: &str,
        token: &CancellationToken,
        request: F,
    ) -> Result<T, SourceError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(SourceError::Cancelled),
            permit = self.semaphore.acquire() => permit
                .map_err(|e| SourceError::Other(format!("Semaphore error: {}", e)))?,
        };

        let request_token = token.child_token();
        let _guard = request_token.clone().drop_guard();

        debug!("Starting request against {}", source);

        let attempt = tokio::time::timeout(self.request_timeout, request(request_token.clone()));
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(SourceError::Cancelled),
            outcome = attempt => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(self.request_timeout)),
                }
            }
        };

        // A source that gave up because our child token fired was timed out,
        // not cancelled by the caller.
        match result {
            Err(SourceError::Cancelled) if !token.is_cancelled() => {
                Err(SourceError::Timeout(self.request_timeout))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_execute_returns_request_result() {
        let executor = RequestExecutor::new(2, Duration::from_secs(5));
        let token = CancellationToken::new();

        let result = executor.execute("test", &token, |_| async { Ok::<_, SourceError>(42) }).await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_execute_times_out_hanging_request() {
        let executor = RequestExecutor::new(1, Duration::from_millis(50));
        let token = CancellationToken::new();

        let result = executor
            .execute("hanging", &token, |request_token| async move {
                loop {
                    if request_token.is_cancelled() {
                        return Err::<(), _>(SourceError::Cancelled);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;

        assert_eq!(result, Err(SourceError::Timeout(Duration::from_millis(50))));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_reports_caller_cancellation() {
        let executor = RequestExecutor::new(1, Duration::from_secs(30));
        let token = CancellationToken::new();
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = executor
            .execute("hanging", &token, |_| std::future::pending::<Result<(), SourceError>>())
            .await;

        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_limits_concurrency() {
        let executor = RequestExecutor::new(2, Duration::from_secs(5));
        let token = CancellationToken::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let requests = (0..6).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            executor.execute("bounded", &token, move |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, SourceError>(())
            })
        });

        let results = futures::future::join_all(requests).await;
        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
