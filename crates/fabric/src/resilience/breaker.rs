//! Three-state circuit breaker (spec §3 Circuit Breaker State, §4.5).
//!
//! Counters and the last-failure timestamp are atomics; state
//! transitions are guarded by a double-checked lock (spec §5), so the
//! common-case `allow_request` read path never blocks on a mutex.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::BreakerConfig;
use crate::errors::Error;
use crate::telemetry::metrics::{BreakerStateLabel, Metrics};

/// CLOSED/OPEN/HALF_OPEN, per spec §3. Initial state is CLOSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl BreakerState {
	fn from_u8(v: u8) -> BreakerState {
		match v {
			0 => BreakerState::Closed,
			1 => BreakerState::Open,
			_ => BreakerState::HalfOpen,
		}
	}

	fn to_u8(self) -> u8 {
		match self {
			BreakerState::Closed => 0,
			BreakerState::Open => 1,
			BreakerState::HalfOpen => 2,
		}
	}
}

/// A monotonic millisecond clock anchored at breaker construction, so
/// `lastFailureTime` fits in an `AtomicU64` instead of needing a mutex
/// around an `Instant`.
struct Clock {
	epoch: Instant,
}

impl Clock {
	fn new() -> Self {
		Clock { epoch: Instant::now() }
	}

	fn now_millis(&self) -> u64 {
		self.epoch.elapsed().as_millis() as u64
	}
}

pub struct CircuitBreaker {
	state: AtomicU8,
	failure_count: AtomicU32,
	success_count: AtomicU32,
	last_failure_millis: AtomicU64,
	config: BreakerConfig,
	clock: Clock,
	/// Guards the OPEN -> HALF_OPEN transition so exactly one caller wins
	/// the compare-and-swap under concurrency (spec P10-adjacent; P10
	/// itself is about CLOSED -> OPEN, guarded by the same pattern below).
	transition_lock: Mutex<()>,
	metrics: Option<(Arc<Metrics>, String)>,
}

impl CircuitBreaker {
	pub fn new(config: BreakerConfig) -> Self {
		CircuitBreaker {
			state: AtomicU8::new(BreakerState::Closed.to_u8()),
			failure_count: AtomicU32::new(0),
			success_count: AtomicU32::new(0),
			last_failure_millis: AtomicU64::new(0),
			config,
			clock: Clock::new(),
			transition_lock: Mutex::new(()),
			metrics: None,
		}
	}

	/// Reports this breaker's state transitions against `endpoint` to the
	/// ambient metrics surface (spec §10.1's `circuit_breaker_state`).
	/// Opt-in: a breaker built without this stays silent.
	pub fn with_metrics(mut self, metrics: Arc<Metrics>, endpoint: String) -> Self {
		self.metrics = Some((metrics, endpoint));
		self.report_state();
		self
	}

	fn report_state(&self) {
		let Some((metrics, endpoint)) = &self.metrics else { return };
		let current = self.state();
		for s in [BreakerState::Closed, BreakerState::Open, BreakerState::HalfOpen] {
			let label = BreakerStateLabel {
				endpoint: endpoint.clone(),
				state: format!("{s:?}").to_lowercase(),
			};
			metrics.breaker_state.get_or_create(&label).set(if s == current { 1 } else { 0 });
		}
	}

	pub fn state(&self) -> BreakerState {
		BreakerState::from_u8(self.state.load(Ordering::Acquire))
	}

	fn set_state(&self, s: BreakerState) {
		self.state.store(s.to_u8(), Ordering::Release);
		self.report_state();
	}

	/// `allowRequest()`: true in CLOSED and HALF_OPEN; false in OPEN
	/// until `openTimeout` has elapsed, at which point exactly one caller
	/// performs the OPEN -> HALF_OPEN transition (P9, P10).
	pub fn allow_request(&self) -> bool {
		match self.state() {
			BreakerState::Closed | BreakerState::HalfOpen => true,
			BreakerState::Open => {
				let elapsed_ms = self.clock.now_millis().saturating_sub(self.last_failure_millis.load(Ordering::Acquire));
				if elapsed_ms < self.config.open_timeout.as_millis() as u64 {
					return false;
				}
				// Double-checked lock: re-verify under the lock before
				// transitioning, so concurrent callers racing past the
				// fast check above don't each perform the transition.
				let _guard = self.transition_lock.lock();
				if self.state() != BreakerState::Open {
					return true;
				}
				let elapsed_ms = self.clock.now_millis().saturating_sub(self.last_failure_millis.load(Ordering::Acquire));
				if elapsed_ms >= self.config.open_timeout.as_millis() as u64 {
					self.success_count.store(0, Ordering::Release);
					self.set_state(BreakerState::HalfOpen);
					true
				} else {
					false
				}
			},
		}
	}

	/// Any success in CLOSED resets `failureCount`; in HALF_OPEN,
	/// `successCount` accumulates toward `successThreshold`, transitioning
	/// to CLOSED (with both counters reset) once reached.
	pub fn record_success(&self) {
		match self.state() {
			BreakerState::Closed => {
				self.failure_count.store(0, Ordering::Release);
			},
			BreakerState::HalfOpen => {
				let n = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
				if n >= self.config.success_threshold {
					let _guard = self.transition_lock.lock();
					self.failure_count.store(0, Ordering::Release);
					self.success_count.store(0, Ordering::Release);
					self.set_state(BreakerState::Closed);
				}
			},
			BreakerState::Open => {},
		}
	}

	/// CLOSED -> OPEN when cumulative consecutive failures reach
	/// `failureThreshold`. HALF_OPEN -> OPEN on any single failure. Both
	/// stamp `lastFailureTime` and go through the transition lock so that
	/// under concurrent failure reports crossing the threshold, exactly
	/// one CLOSED -> OPEN transition is observed (P10).
	pub fn record_failure(&self) {
		self.last_failure_millis.store(self.clock.now_millis(), Ordering::Release);

		match self.state() {
			BreakerState::Closed => {
				let n = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
				if n >= self.config.failure_threshold {
					let _guard = self.transition_lock.lock();
					if self.state() == BreakerState::Closed {
						self.set_state(BreakerState::Open);
					}
				}
			},
			BreakerState::HalfOpen => {
				let _guard = self.transition_lock.lock();
				self.success_count.store(0, Ordering::Release);
				self.set_state(BreakerState::Open);
			},
			BreakerState::Open => {},
		}
	}

	/// Returns the breaker to CLOSED with zero counters.
	pub fn reset(&self) {
		let _guard = self.transition_lock.lock();
		self.failure_count.store(0, Ordering::Release);
		self.success_count.store(0, Ordering::Release);
		self.set_state(BreakerState::Closed);
	}

	/// Gates `op` by [`Self::allow_request`]; a rejected call returns
	/// `ServiceUnavailable` without invoking `op` (spec §4.5).
	pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, Error>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, Error>>,
	{
		if !self.allow_request() {
			return Err(Error::service_unavailable("circuit breaker open"));
		}
		match op().await {
			Ok(v) => {
				self.record_success();
				Ok(v)
			},
			Err(e) => {
				self.record_failure();
				Err(e)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::errors::Error;

	fn cfg(failure_threshold: u32, success_threshold: u32, open_timeout_ms: u64) -> BreakerConfig {
		BreakerConfig {
			failure_threshold,
			success_threshold,
			open_timeout: Duration::from_millis(open_timeout_ms),
		}
	}

	#[test]
	fn starts_closed() {
		let b = CircuitBreaker::new(cfg(3, 2, 100));
		assert_eq!(b.state(), BreakerState::Closed);
		assert!(b.allow_request());
	}

	// S6: 3 failures -> OPEN; wait past openTimeout -> allow_request
	// transitions to HALF_OPEN and returns true; 2 successes -> CLOSED.
	#[tokio::test]
	async fn s6_open_then_half_open_then_closed() {
		let b = CircuitBreaker::new(cfg(3, 2, 50));
		for _ in 0..3 {
			b.record_failure();
		}
		assert_eq!(b.state(), BreakerState::Open);
		assert!(!b.allow_request());

		tokio::time::sleep(Duration::from_millis(70)).await;
		assert!(b.allow_request());
		assert_eq!(b.state(), BreakerState::HalfOpen);

		b.record_success();
		assert_eq!(b.state(), BreakerState::HalfOpen);
		b.record_success();
		assert_eq!(b.state(), BreakerState::Closed);
	}

	#[test]
	fn half_open_failure_reopens() {
		let b = CircuitBreaker::new(cfg(1, 2, 100_000));
		b.record_failure();
		assert_eq!(b.state(), BreakerState::Open);

		// Force HALF_OPEN directly to test the single-failure reopen rule
		// without waiting on the real clock.
		b.set_state(BreakerState::HalfOpen);
		b.record_success();
		assert_eq!(b.state(), BreakerState::HalfOpen);

		b.record_failure();
		assert_eq!(b.state(), BreakerState::Open);
	}

	// P9: OPEN within openTimeout -> false; CLOSED/HALF_OPEN -> true.
	#[test]
	fn p9_admission_matches_state() {
		let b = CircuitBreaker::new(cfg(1, 1, 60_000));
		assert!(b.allow_request());
		b.record_failure();
		assert_eq!(b.state(), BreakerState::Open);
		assert!(!b.allow_request());
	}

	// P10: concurrent failures crossing the threshold yield exactly one
	// CLOSED -> OPEN transition (observable as: state is OPEN, and a
	// second burst of failures past the threshold does not panic or
	// corrupt counters).
	#[tokio::test]
	async fn p10_concurrent_failures_single_transition() {
		let b = Arc::new(CircuitBreaker::new(cfg(50, 2, 60_000)));
		let mut handles = Vec::new();
		for _ in 0..200 {
			let b = b.clone();
			handles.push(tokio::spawn(async move {
				b.record_failure();
			}));
		}
		for h in handles {
			h.await.unwrap();
		}
		assert_eq!(b.state(), BreakerState::Open);
	}

	#[test]
	fn success_in_closed_resets_failure_count() {
		let b = CircuitBreaker::new(cfg(3, 2, 100));
		b.record_failure();
		b.record_failure();
		b.record_success();
		b.record_failure();
		b.record_failure();
		// Two consecutive failures after the reset, threshold is 3: still closed.
		assert_eq!(b.state(), BreakerState::Closed);
	}

	#[test]
	fn reset_returns_to_closed_with_zero_counters() {
		let b = CircuitBreaker::new(cfg(1, 1, 100));
		b.record_failure();
		assert_eq!(b.state(), BreakerState::Open);
		b.reset();
		assert_eq!(b.state(), BreakerState::Closed);
		assert!(b.allow_request());
	}

	#[tokio::test]
	async fn call_rejects_without_invoking_operation_when_open() {
		let b = CircuitBreaker::new(cfg(1, 1, 60_000));
		let _ = b.call(|| async { Err::<(), _>(Error::internal("boom")) }).await;
		assert_eq!(b.state(), BreakerState::Open);

		let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
		let invoked2 = invoked.clone();
		let result = b
			.call(move || {
				invoked2.store(true, std::sync::atomic::Ordering::SeqCst);
				async { Ok::<_, Error>(()) }
			})
			.await;

		assert!(result.is_err());
		assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
	}
}
