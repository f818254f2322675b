//! Managed connection state and the underlying transport (spec §3 Managed
//! Connection, §9 Design Notes).
//!
//! §9 calls out the reference implementation's `interface{}` /
//! runtime-type-check trick for holding either a gRPC channel or a raw
//! TCP socket and asks for a sealed variant instead; `Transport` is that
//! sealed enum, with per-variant health checks and no reflection.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::types::ServiceEndpoint;

/// `IDLE`/`ACTIVE`/`CLOSED`, per spec §3. `CLOSED` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Active,
	Closed,
}

/// The sealed transport a [`ManagedConnection`] wraps: either a gRPC
/// channel or a raw TCP socket (spec §9). `Custom` internal-protocol
/// endpoints also ride the `Tcp` variant — the wire framing differs but
/// the liveness check (§4.4's "zero-length read with a 1ms deadline")
/// is identical.
pub enum Transport {
	Grpc(tonic::transport::Channel),
	Tcp(Mutex<TcpStream>),
}

impl Transport {
	/// §4.4's health predicate: for gRPC, the channel handle being usable
	/// at all is the only signal `tonic::transport::Channel` exposes
	/// publicly (it doesn't surface READY/IDLE/TRANSIENT_FAILURE the way
	/// grpc-go's `ClientConn.GetState` does), so a cloned channel counts
	/// as healthy; for raw TCP, a zero-length read racing a 1ms deadline
	/// must observe a *timeout*, not EOF or an error, to be considered
	/// live.
	pub async fn is_healthy(&self) -> bool {
		match self {
			Transport::Grpc(_) => true,
			Transport::Tcp(stream) => {
				let mut buf = [0u8; 0];
				let mut guard = stream.lock();
				match tokio::time::timeout(Duration::from_millis(1), guard.read(&mut buf)).await {
					Err(_) => true,             // timed out: no EOF, no error -> alive
					Ok(Ok(0)) => false,         // immediate EOF -> peer closed
					Ok(Ok(_)) => true,          // unexpected data on a zero-length read; treat as alive
					Ok(Err(_)) => false,
				}
			},
		}
	}

	pub fn close(&self) {
		// `Channel` and `TcpStream` both close their underlying resources
		// on drop; nothing to do eagerly beyond letting the connection be
		// dropped by its owner.
	}
}

/// A pooled transport handle with lifecycle state (spec §3 Managed
/// Connection, GLOSSARY).
///
/// Invariants upheld by the owning [`super::Pool`]: `CLOSED` is
/// terminal; `active_request_count >= 0`; `state == IDLE` iff
/// `active_request_count == 0 && state != CLOSED` (P4).
pub struct ManagedConnection {
	pub id: String,
	pub endpoint: ServiceEndpoint,
	pub transport: Transport,
	state: Mutex<ConnectionState>,
	created_at: Instant,
	last_used_at: Mutex<Instant>,
	active_request_count: AtomicI64,
}

impl ManagedConnection {
	pub fn new(id: String, endpoint: ServiceEndpoint, transport: Transport) -> Self {
		let now = Instant::now();
		ManagedConnection {
			id,
			endpoint,
			transport,
			state: Mutex::new(ConnectionState::Idle),
			created_at: now,
			last_used_at: Mutex::new(now),
			active_request_count: AtomicI64::new(0),
		}
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock()
	}

	pub fn active_request_count(&self) -> i64 {
		self.active_request_count.load(Ordering::Acquire)
	}

	pub fn created_at(&self) -> Instant {
		self.created_at
	}

	pub fn last_used_at(&self) -> Instant {
		*self.last_used_at.lock()
	}

	/// Marks the connection ACTIVE for one more in-flight request.
	/// Returns false if the connection was already CLOSED.
	pub fn mark_active(&self) -> bool {
		let mut state = self.state.lock();
		if *state == ConnectionState::Closed {
			return false;
		}
		self.active_request_count.fetch_add(1, Ordering::AcqRel);
		*state = ConnectionState::Active;
		*self.last_used_at.lock() = Instant::now();
		true
	}

	/// Decrements the in-flight count; transitions to IDLE once it
	/// reaches zero (spec §4.4 "Release protocol"). Returns the count
	/// after decrementing. `activeRequestCount` never goes below zero
	/// even if `release` is called more times than `acquire`.
	pub fn mark_released(&self) -> i64 {
		let before = self.active_request_count.fetch_sub(1, Ordering::AcqRel);
		if before <= 0 {
			self.active_request_count.store(0, Ordering::Release);
		}
		let remaining = (before - 1).max(0);
		if remaining == 0 {
			*self.last_used_at.lock() = Instant::now();
			let mut state = self.state.lock();
			if *state != ConnectionState::Closed {
				*state = ConnectionState::Idle;
			}
		}
		remaining
	}

	pub fn mark_closed(&self) {
		*self.state.lock() = ConnectionState::Closed;
		self.transport.close();
	}

	pub fn is_idle(&self) -> bool {
		self.state() == ConnectionState::Idle
	}

	pub fn is_idle_timed_out(&self, idle_timeout: Duration) -> bool {
		self.is_idle() && self.last_used_at().elapsed() > idle_timeout
	}

	pub fn is_expired(&self, max_lifetime: Duration) -> bool {
		self.created_at.elapsed() > max_lifetime
	}

	pub async fn is_healthy(&self) -> bool {
		self.state() != ConnectionState::Closed && self.transport.is_healthy().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::InternalProtocol;

	fn ep() -> ServiceEndpoint {
		ServiceEndpoint {
			service_id: "s1".into(),
			service_name: "svc".into(),
			address: "127.0.0.1".into(),
			port: 8080,
			internal_protocol: InternalProtocol::Custom,
			metadata: Default::default(),
		}
	}

	fn conn() -> ManagedConnection {
		// A channel with no active connect attempt is fine for state-machine
		// tests that never touch `transport.is_healthy()`.
		let channel = tonic::transport::Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
		ManagedConnection::new("c1".into(), ep(), Transport::Grpc(channel))
	}

	// P4: IDLE iff activeRequestCount == 0 && state != CLOSED.
	#[test]
	fn p4_idle_iff_zero_active_and_not_closed() {
		let c = conn();
		assert!(c.is_idle());
		assert_eq!(c.active_request_count(), 0);

		assert!(c.mark_active());
		assert_eq!(c.state(), ConnectionState::Active);
		assert!(!c.is_idle());

		let remaining = c.mark_released();
		assert_eq!(remaining, 0);
		assert!(c.is_idle());
	}

	#[test]
	fn closed_is_terminal() {
		let c = conn();
		c.mark_closed();
		assert_eq!(c.state(), ConnectionState::Closed);
		assert!(!c.mark_active(), "cannot reactivate a closed connection");
		assert_eq!(c.state(), ConnectionState::Closed);
	}

	#[test]
	fn multiple_active_requests_stay_active_until_all_released() {
		let c = conn();
		c.mark_active();
		c.mark_active();
		assert_eq!(c.active_request_count(), 2);
		assert_eq!(c.mark_released(), 1);
		assert_eq!(c.state(), ConnectionState::Active);
		assert_eq!(c.mark_released(), 0);
		assert_eq!(c.state(), ConnectionState::Idle);
	}

	#[test]
	fn expiry_and_idle_timeout_predicates() {
		let c = conn();
		assert!(!c.is_expired(Duration::from_secs(3600)));
		assert!(c.is_expired(Duration::from_millis(0)));
		assert!(c.is_idle_timed_out(Duration::from_millis(0)));
	}
}
