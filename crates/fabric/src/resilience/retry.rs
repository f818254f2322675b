//! Retry executor: bounded exponential backoff with per-error-class
//! eligibility (spec §4.5, §8 P7/P8).

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::errors::{Error, ErrorCode};
use crate::telemetry::metrics::{EndpointLabel, Metrics};

/// `maxAttempts ≥ 1`, `multiplier ≥ 1.0`; violating either is a caller
/// bug, so this is a cheap assert rather than a `Result`-returning
/// constructor — mirrors `RoutingTable::new` elsewhere in this crate not
/// round-tripping through fallible construction for invariants that are
/// really just "don't pass garbage config".
fn assert_valid(cfg: &RetryConfig) {
	assert!(cfg.max_attempts >= 1, "RetryConfig.max_attempts must be >= 1");
	assert!(cfg.multiplier >= 1.0, "RetryConfig.multiplier must be >= 1.0");
}

/// The default retryable set from §7: `{Timeout, ServiceUnavailable,
/// ConnectionError}`.
pub fn default_retryable_codes() -> HashSet<ErrorCode> {
	[ErrorCode::Timeout, ErrorCode::ServiceUnavailable, ErrorCode::ConnectionError].into_iter().collect()
}

/// Stateless per call (spec §5); holds only its config and the set of
/// codes eligible for retry.
#[derive(Clone)]
pub struct RetryExecutor {
	config: RetryConfig,
	retryable: HashSet<ErrorCode>,
	metrics: Option<(Arc<Metrics>, String)>,
}

impl RetryExecutor {
	pub fn new(config: RetryConfig) -> Self {
		assert_valid(&config);
		RetryExecutor {
			config,
			retryable: default_retryable_codes(),
			metrics: None,
		}
	}

	pub fn with_retryable_codes(config: RetryConfig, retryable: HashSet<ErrorCode>) -> Self {
		assert_valid(&config);
		RetryExecutor { config, retryable, metrics: None }
	}

	/// Reports every retry attempt against `endpoint` to the ambient
	/// metrics surface (spec §10.1's `retry_attempts_total`). Opt-in: an
	/// executor built without this stays silent.
	pub fn with_metrics(mut self, metrics: Arc<Metrics>, endpoint: String) -> Self {
		self.metrics = Some((metrics, endpoint));
		self
	}

	fn record_attempt(&self) {
		if let Some((metrics, endpoint)) = &self.metrics {
			metrics.retry_attempts_total.get_or_create(&EndpointLabel { endpoint: endpoint.clone() }).inc();
		}
	}

	/// `CalculateDelay(n) = min(initialDelay × multiplier^n, maxDelay)`,
	/// `n` from 0 (spec §4.5). Monotonic non-decreasing in `n` (P8) since
	/// `multiplier >= 1.0`.
	pub fn calculate_delay(&self, n: u32) -> Duration {
		let scaled = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(n as i32);
		let capped = scaled.min(self.config.max_delay.as_secs_f64()).max(0.0);
		Duration::from_secs_f64(capped)
	}

	fn is_retryable(&self, err: &Error) -> bool {
		self.retryable.contains(&err.code)
	}

	/// Attempts up to `maxAttempts` times; sleeps `calculate_delay(n)`
	/// between attempts. Retries iff the error's code is in the
	/// configured retryable set; a non-retryable error propagates
	/// immediately without sleeping (P7: 0 retries).
	pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let mut attempt = 0;
		loop {
			match op().await {
				Ok(v) => return Ok(v),
				Err(e) => {
					attempt += 1;
					if attempt >= self.config.max_attempts || !self.is_retryable(&e) {
						return Err(e);
					}
					self.record_attempt();
					tokio::time::sleep(self.calculate_delay(attempt - 1)).await;
				},
			}
		}
	}

	/// Cancellable variant (spec §5 "retry inter-attempt sleep" is a
	/// cancellable suspension point). A cancellation during the sleep
	/// phase returns immediately with the cancellation's cause instead of
	/// attempting again.
	pub async fn execute_cancellable<T, F, Fut>(
		&self,
		token: &tokio_util::sync::CancellationToken,
		mut op: F,
	) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let mut attempt = 0;
		loop {
			if token.is_cancelled() {
				return Err(Error::new(ErrorCode::InternalError, "retry cancelled"));
			}
			match op().await {
				Ok(v) => return Ok(v),
				Err(e) => {
					attempt += 1;
					if attempt >= self.config.max_attempts || !self.is_retryable(&e) {
						return Err(e);
					}
					self.record_attempt();
					tokio::select! {
						_ = tokio::time::sleep(self.calculate_delay(attempt - 1)) => {},
						_ = token.cancelled() => return Err(Error::new(ErrorCode::InternalError, "retry cancelled during backoff")),
					}
				},
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	use super::*;

	fn cfg(max_attempts: u32, initial_ms: u64, multiplier: f64, max_ms: u64) -> RetryConfig {
		RetryConfig {
			max_attempts,
			initial_delay: Duration::from_millis(initial_ms),
			multiplier,
			max_delay: Duration::from_millis(max_ms),
		}
	}

	// S5: retry succeeds on the 3rd attempt, delays {10ms, 20ms}.
	#[tokio::test]
	async fn s5_retry_succeeds_on_third_attempt() {
		let executor = RetryExecutor::new(cfg(3, 10, 2.0, 10_000));
		assert_eq!(executor.calculate_delay(0), Duration::from_millis(10));
		assert_eq!(executor.calculate_delay(1), Duration::from_millis(20));

		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let result = executor
			.execute(move || {
				let n = calls2.fetch_add(1, Ordering::SeqCst);
				async move {
					if n < 2 {
						Err(Error::timeout("slow"))
					} else {
						Ok::<_, Error>("ok")
					}
				}
			})
			.await
			.unwrap();

		assert_eq!(result, "ok");
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	// P7: a retryable error causes at most maxAttempts - 1 retries.
	#[tokio::test]
	async fn p7_retryable_error_bounded_by_max_attempts() {
		let executor = RetryExecutor::new(cfg(3, 1, 1.0, 10));
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let result: Result<(), Error> = executor
			.execute(move || {
				calls2.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::timeout("always slow")) }
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	// P7: a non-retryable error causes 0 retries.
	#[tokio::test]
	async fn p7_non_retryable_error_causes_zero_retries() {
		let executor = RetryExecutor::new(cfg(5, 1, 1.0, 10));
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();
		let result: Result<(), Error> = executor
			.execute(move || {
				calls2.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::bad_request("malformed")) }
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	// P8: delays are monotonic non-decreasing and clamped to max_delay.
	#[test]
	fn p8_delay_monotonic_and_clamped() {
		let executor = RetryExecutor::new(cfg(10, 5, 2.0, 50));
		let delays: Vec<Duration> = (0..8).map(|n| executor.calculate_delay(n)).collect();
		for w in delays.windows(2) {
			assert!(w[1] >= w[0], "{:?} should be >= {:?}", w[1], w[0]);
		}
		for d in &delays {
			assert!(*d <= Duration::from_millis(50));
		}
	}

	#[tokio::test]
	async fn cancellation_during_backoff_aborts_without_further_attempts() {
		let executor = RetryExecutor::new(cfg(5, 200, 1.0, 200));
		let token = tokio_util::sync::CancellationToken::new();
		let calls = Arc::new(AtomicU32::new(0));
		let calls2 = calls.clone();

		let token2 = token.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			token2.cancel();
		});

		let result: Result<(), Error> = executor
			.execute_cancellable(&token, move || {
				calls2.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::timeout("slow")) }
			})
			.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1, "should not attempt again after cancellation during backoff");
	}
}
