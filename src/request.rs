use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::time::{Instant, sleep};

use crate::error::{FailureKind, FetchError};
use crate::health::HealthMonitor;

/// How a single exchange call is retried.
///
/// Backoff is multiplicative and deterministic (no jitter):
/// attempt k waits `initial_delay * backoff_factor^k` before the
/// next attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,

    /// Failure kinds worth another attempt. Anything else fails fast.
    pub retryable: Vec<FailureKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            retryable: vec![
                FailureKind::Connection,
                FailureKind::Timeout,
                FailureKind::HttpStatus,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// Executes exchange calls with timing, retry and health reporting.
///
/// One executor per exchange. Every attempt, successful or not,
/// is reported to the shared [`HealthMonitor`].
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    exchange: String,
    policy: RetryPolicy,
    health: Arc<HealthMonitor>,
}

impl RequestExecutor {
    pub fn new(exchange: impl Into<String>, policy: RetryPolicy, health: Arc<HealthMonitor>) -> Self {
        let exchange = exchange.into();
        health.register(&exchange);
        Self {
            exchange,
            policy,
            health,
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// `what` names the operation in log lines.
    pub async fn execute<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let started = Instant::now();
            let outcome = op().await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            let err = match outcome {
                Ok(value) => {
                    self.health.record_request(&self.exchange, true, latency_ms, None);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let detail = err.to_string();
            self.health
                .record_request(&self.exchange, false, latency_ms, Some(&detail));

            if !self.policy.is_retryable(err.kind()) {
                warn!(
                    "request: exchange={} op={} attempt={}/{} not retried: {}",
                    self.exchange, what, attempt, max_attempts, detail
                );
                return Err(err);
            }

            if attempt >= max_attempts {
                error!(
                    "request: exchange={} op={} all {} attempts failed, last error: {}",
                    self.exchange, what, max_attempts, detail
                );
                return Err(FetchError::ExhaustedRetries {
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }

            warn!(
                "request: exchange={} op={} attempt={}/{} failed: {} retry_in_ms={}",
                self.exchange,
                what,
                attempt,
                max_attempts,
                detail,
                delay.as_millis()
            );

            sleep(delay).await;
            delay = next_delay(delay, self.policy.backoff_factor);
        }
    }
}

/// Grows `delay` by `factor`, saturating at `Duration::MAX` instead of
/// panicking when the product is not representable.
fn next_delay(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthStatus;
    use parking_lot::Mutex;

    fn executor(policy: RetryPolicy) -> (RequestExecutor, Arc<HealthMonitor>) {
        let health = Arc::new(HealthMonitor::new());
        (RequestExecutor::new("binance", policy, health.clone()), health)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_failures_with_exact_backoff() {
        let (exec, health) = executor(policy(5));
        let calls = Mutex::new(Vec::new());

        let result = exec
            .execute("ticker", || {
                calls.lock().push(Instant::now());
                let n = calls.lock().len();
                async move {
                    if n <= 3 {
                        Err(FetchError::Connection("refused".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);

        let calls = calls.lock();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ]
        );

        let rec = health.snapshot("binance").unwrap();
        assert_eq!(rec.request_count, 4);
        assert_eq!(rec.error_count, 3);
        assert_eq!(rec.consecutive_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_last_error() {
        let (exec, health) = executor(policy(3));
        let attempt = Mutex::new(0u32);

        let result: Result<(), _> = exec
            .execute("exchangeInfo", || {
                let n = {
                    let mut a = attempt.lock();
                    *a += 1;
                    *a
                };
                async move {
                    Err(FetchError::Status {
                        status: 503,
                        body: format!("attempt {n}"),
                    })
                }
            })
            .await;

        match result {
            Err(FetchError::ExhaustedRetries { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.to_string(), "http status 503: attempt 3");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        // every attempt was reported, including the last one
        assert_eq!(health.snapshot("binance").unwrap().request_count, 3);
        assert_eq!(health.status_of("binance"), HealthStatus::Down);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_is_not_retried() {
        let (exec, health) = executor(policy(5));
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = exec
            .execute("tradeFee", || {
                *calls.lock() += 1;
                async { Err(FetchError::missing("symbols")) }
            })
            .await;

        assert!(matches!(result, Err(FetchError::Malformed(_))));
        assert_eq!(*calls.lock(), 1);
        assert_eq!(health.snapshot("binance").unwrap().error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_retryable_set_is_respected() {
        let mut p = policy(4);
        p.retryable = vec![FailureKind::Timeout];
        let (exec, _) = executor(p);
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = exec
            .execute("account", || {
                *calls.lock() += 1;
                async {
                    Err(FetchError::Status {
                        status: 500,
                        body: String::new(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(FetchError::Status { status: 500, .. })));
        assert_eq!(*calls.lock(), 1);
    }

    #[test]
    fn delay_growth_saturates() {
        assert_eq!(next_delay(Duration::from_millis(500), 2.0), Duration::from_secs(1));
        assert_eq!(next_delay(Duration::from_millis(500), 1e300), Duration::MAX);
        assert_eq!(next_delay(Duration::MAX, 2.0), Duration::MAX);

        let mut delay = Duration::from_millis(500);
        for _ in 0..2000 {
            delay = next_delay(delay, 2.0);
        }
        assert_eq!(delay, Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_backoff_factor_still_exhausts() {
        let mut p = policy(3);
        p.backoff_factor = 1e300;
        let (exec, _) = executor(p);
        let calls = Mutex::new(0u32);

        let result: Result<(), _> = exec
            .execute("ticker", || {
                *calls.lock() += 1;
                async { Err(FetchError::Connection("refused".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(FetchError::ExhaustedRetries { attempts: 3, .. })
        ));
        assert_eq!(*calls.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_measured_per_attempt() {
        let (exec, health) = executor(policy(1));

        exec.execute("time", || async {
            sleep(Duration::from_millis(50)).await;
            Ok::<_, FetchError>(())
        })
        .await
        .unwrap();

        let rec = health.snapshot("binance").unwrap();
        assert_eq!(rec.latencies.len(), 1);
        assert!((rec.latencies[0] - 50.0).abs() < 1.0);
    }
}
