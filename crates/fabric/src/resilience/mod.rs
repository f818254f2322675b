//! C5 — Resilience Layer.
//!
//! `retry` implements the bounded-exponential-backoff retry executor;
//! `breaker` implements the three-state circuit breaker. Spec §4.5 and
//! §9's Design Notes: the two compose by wrapping, breaker inside retry,
//! so every individual attempt is breaker-gated and a prolonged outage
//! burns retry budget quickly via OPEN-state rejections.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerState, CircuitBreaker};
pub use retry::RetryExecutor;

use std::future::Future;
use std::sync::Arc;

use crate::errors::Error;

/// Composes a [`RetryExecutor`] around a [`CircuitBreaker`]: each attempt
/// passes through the breaker first, and only the breaker's own
/// `ServiceUnavailable` rejection (or the wrapped operation's error) is
/// subject to the retry policy's eligibility check.
pub struct Resilience {
	retry: RetryExecutor,
	breaker: Arc<CircuitBreaker>,
}

impl Resilience {
	pub fn new(retry: RetryExecutor, breaker: Arc<CircuitBreaker>) -> Self {
		Resilience { retry, breaker }
	}

	pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let breaker = self.breaker.clone();
		self
			.retry
			.execute(move || {
				let breaker = breaker.clone();
				let fut = op();
				async move { breaker.call(|| fut).await }
			})
			.await
	}

	/// Cancellable variant; see [`RetryExecutor::execute_cancellable`].
	pub async fn call_cancellable<T, F, Fut>(
		&self,
		token: &tokio_util::sync::CancellationToken,
		mut op: F,
	) -> Result<T, Error>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		let breaker = self.breaker.clone();
		self
			.retry
			.execute_cancellable(token, move || {
				let breaker = breaker.clone();
				let fut = op();
				async move { breaker.call(|| fut).await }
			})
			.await
	}
}
