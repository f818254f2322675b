//! The outbound call path: `Router` (C2) resolves an endpoint, `pool`
//! (C4) hands out a connection to it, `resilience` (C5) wraps the send,
//! and a per-[`InternalProtocol`] [`Dispatcher`] actually puts bytes on
//! the wire (spec §2's "dispatched through a C4 connection wrapped by
//! C5").
//!
//! Grounded on the teacher's `client/mod.rs` `Client::call` (timeout
//! wrapping, tracing events bracketing connect/send) and its
//! `control::GrpcChannel` (a hand-rolled `tower::Service` doing a raw
//! gRPC call without full protobuf codegen) -- the same "codec-less gRPC
//! call" technique is reused here via [`grpc::RawCodec`], since the
//! services this framework proxies are arbitrary polyglot RPCs with no
//! compile-time `.proto` available to this crate.

mod grpc;
mod tcp;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use crate::config::{BreakerConfig, RetryConfig};
use crate::errors::Error;
use crate::pool::{Acquired, Connector, Manager as PoolManager, Transport};
use crate::registry::Discovery;
use crate::resilience::{CircuitBreaker, Resilience, RetryExecutor};
use crate::router::Router;
use crate::telemetry::metrics::Metrics;
use crate::types::{InternalProtocol, ServiceEndpoint};

/// Options accompanying a single outbound call (spec §6 Client façade).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
	pub timeout: Option<Duration>,
	pub retry_override: Option<RetryConfig>,
}

/// Puts an already-encoded request payload on the wire over an acquired
/// connection and returns the response payload, without knowing
/// anything about pooling, routing or retry -- exactly the seam the
/// pool's `Transport` enum exists to support (spec §9).
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
	async fn dispatch(&self, transport: &Transport, service: &str, method: &str, payload: Bytes) -> Result<Bytes, Error>;
}

/// Builds the `Dispatcher` for a given internal protocol. `JsonRpc` and
/// `Custom` both ride length-delimited framing over the same raw
/// `TcpStream` (spec §9: the pool's `Tcp` transport variant is shared by
/// both; only the envelope contents differ, and the adapter/envelope
/// layer already owns that).
pub fn dispatcher_for(protocol: InternalProtocol) -> Arc<dyn Dispatcher> {
	match protocol {
		InternalProtocol::Grpc => Arc::new(grpc::GrpcDispatcher),
		InternalProtocol::JsonRpc | InternalProtocol::Custom => Arc::new(tcp::TcpDispatcher),
	}
}

/// Composes C2 + C4 + C5 into the single outbound call path used by the
/// protocol adapters and the client façade (spec §6).
pub struct Client<D: Discovery> {
	router: Router<D>,
	pool: Arc<PoolManager>,
	default_retry: RetryConfig,
	default_breaker: BreakerConfig,
	/// One breaker per endpoint: a fault on one instance of a service
	/// must not trip the breaker for its healthy siblings.
	breakers: DashMap<String, Arc<CircuitBreaker>>,
	metrics: Option<Arc<Metrics>>,
}

impl<D: Discovery> Client<D> {
	pub fn new(router: Router<D>, pool: Arc<PoolManager>, default_retry: RetryConfig, default_breaker: BreakerConfig) -> Self {
		Client {
			router,
			pool,
			default_retry,
			default_breaker,
			breakers: DashMap::new(),
			metrics: None,
		}
	}

	/// Wires every breaker and retry executor this client creates from now
	/// on into the ambient metrics surface (spec §10.1). Breakers already
	/// created before this call are unaffected; call before the client's
	/// first `call`.
	pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
		self.metrics = Some(metrics);
		self
	}

	fn breaker_for(&self, endpoint: &ServiceEndpoint) -> Arc<CircuitBreaker> {
		self
			.breakers
			.entry(endpoint.service_id.clone())
			.or_insert_with(|| {
				let breaker = CircuitBreaker::new(self.default_breaker.clone());
				let breaker = match &self.metrics {
					Some(metrics) => breaker.with_metrics(metrics.clone(), endpoint.service_id.clone()),
					None => breaker,
				};
				Arc::new(breaker)
			})
			.clone()
	}

	/// `call(service, method, requestBytes, options) -> responseBytes |
	/// error` (spec §6 Client façade). Routes once per call (not once per
	/// retry attempt -- a retry re-sends to the *same* selected instance;
	/// a different endpoint would only be picked on the next top-level
	/// call), then retries/breaker-gates each attempt against that one
	/// endpoint's pool.
	pub async fn call(&self, service: &str, method: &str, payload: Bytes, options: CallOptions) -> Result<Bytes, Error> {
		let req = synthetic_request(service, method, payload.clone(), options.timeout);
		let endpoint = self.router.route(&req).await?;
		let breaker = self.breaker_for(&endpoint);
		let retry = RetryExecutor::new(options.retry_override.unwrap_or_else(|| self.default_retry.clone()));
		let retry = match &self.metrics {
			Some(metrics) => retry.with_metrics(metrics.clone(), endpoint.service_id.clone()),
			None => retry,
		};
		let resilience = Resilience::new(retry, breaker);
		let dispatcher = dispatcher_for(endpoint.internal_protocol);
		let pool = self.pool.clone();
		let endpoint_for_call = endpoint.clone();

		let result = resilience
			.call(move || {
				let pool = pool.clone();
				let dispatcher = dispatcher.clone();
				let endpoint = endpoint_for_call.clone();
				let payload = payload.clone();
				async move { send_once(&pool, &endpoint, dispatcher, service, method, payload).await }
			})
			.await;

		self.router.release(&endpoint);
		result
	}
}

async fn send_once(
	pool: &PoolManager,
	endpoint: &ServiceEndpoint,
	dispatcher: Arc<dyn Dispatcher>,
	service: &str,
	method: &str,
	payload: Bytes,
) -> Result<Bytes, Error> {
	let acquired = pool.acquire(endpoint).await?;
	let result = dispatcher.dispatch(&acquired.connection.transport, service, method, payload).await;
	pool.release(endpoint, acquired).await;
	result
}

fn synthetic_request(service: &str, method: &str, payload: Bytes, timeout: Option<Duration>) -> crate::adapter::InternalRequest {
	use crate::types::{ExternalProtocol, MessageType};
	crate::adapter::InternalRequest {
		service: service.to_string(),
		method: method.to_string(),
		payload,
		headers: Default::default(),
		trace_id: fabric_core::ids::new_id(),
		span_id: fabric_core::ids::new_id(),
		timeout,
		message_type: MessageType::RequestResponse,
		source_protocol: ExternalProtocol::Rest,
		metadata: Default::default(),
	}
}

/// A [`Connector`] that dials the real network: TCP for `JsonRpc`/
/// `Custom` endpoints, a lazily-connecting gRPC channel for `Grpc`
/// endpoints.
pub struct NetworkConnector;

#[async_trait::async_trait]
impl Connector for NetworkConnector {
	async fn connect(&self, endpoint: &ServiceEndpoint) -> Result<Transport, Error> {
		match endpoint.internal_protocol {
			InternalProtocol::Grpc => {
				let uri = format!("http://{}:{}", endpoint.address, endpoint.port);
				let channel = tonic::transport::Endpoint::from_shared(uri)
					.map_err(|e| Error::connection(format!("invalid gRPC endpoint: {e}")))?
					.connect()
					.await
					.map_err(|e| Error::connection(format!("gRPC connect failed: {e}")))?;
				Ok(Transport::Grpc(channel))
			},
			InternalProtocol::JsonRpc | InternalProtocol::Custom => {
				let addr = format!("{}:{}", endpoint.address, endpoint.port);
				let stream = tokio::net::TcpStream::connect(&addr)
					.await
					.map_err(|e| Error::connection(format!("TCP connect to {addr} failed: {e}")))?;
				stream.set_nodelay(true).ok();
				Ok(Transport::Tcp(parking_lot::Mutex::new(stream)))
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap as Map;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;

	use super::*;
	use crate::router::lb::RoundRobin;
	use crate::types::InternalProtocol;

	struct FakeDiscovery {
		endpoints: Vec<ServiceEndpoint>,
	}

	#[async_trait]
	impl Discovery for FakeDiscovery {
		async fn get_instances(&self, _service_name: &str) -> Result<Vec<ServiceEndpoint>, Error> {
			Ok(self.endpoints.clone())
		}
	}

	struct CountingDispatcher {
		calls: AtomicUsize,
		fail_first_n: usize,
	}

	#[async_trait]
	impl Dispatcher for CountingDispatcher {
		async fn dispatch(&self, _transport: &Transport, _service: &str, _method: &str, payload: Bytes) -> Result<Bytes, Error> {
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			if n < self.fail_first_n {
				Err(Error::timeout("backend slow"))
			} else {
				Ok(payload)
			}
		}
	}

	struct FakePoolConnector;
	#[async_trait]
	impl Connector for FakePoolConnector {
		async fn connect(&self, endpoint: &ServiceEndpoint) -> Result<Transport, Error> {
			let _ = endpoint;
			let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
			let addr = listener.local_addr().unwrap();
			let accept = tokio::spawn(async move { listener.accept().await });
			let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
			let _ = accept.await;
			Ok(Transport::Tcp(parking_lot::Mutex::new(stream)))
		}
	}

	fn ep() -> ServiceEndpoint {
		ServiceEndpoint {
			service_id: "e1".into(),
			service_name: "svc".into(),
			address: "127.0.0.1".into(),
			port: 9000,
			internal_protocol: InternalProtocol::Custom,
			metadata: Map::new(),
		}
	}

	#[tokio::test]
	async fn call_retries_and_eventually_succeeds() {
		let discovery = Arc::new(FakeDiscovery { endpoints: vec![ep()] });
		let router = Router::new(discovery, Box::new(RoundRobin::new()));
		let pool = Arc::new(PoolManager::new(crate::config::PoolConfig::default(), Arc::new(FakePoolConnector)));
		let client = Client::new(
			router,
			pool,
			RetryConfig {
				max_attempts: 3,
				initial_delay: Duration::from_millis(1),
				multiplier: 1.0,
				max_delay: Duration::from_millis(5),
			},
			BreakerConfig {
				failure_threshold: 10,
				success_threshold: 1,
				open_timeout: Duration::from_secs(60),
			},
		);

		// Swap in a dispatcher that fails the first attempt; since
		// `dispatcher_for` is keyed only by protocol we instead drive the
		// lower-level `send_once` directly here to exercise the retry
		// wiring deterministically without monkey-patching the protocol
		// table.
		let dispatcher: Arc<dyn Dispatcher> = Arc::new(CountingDispatcher {
			calls: AtomicUsize::new(0),
			fail_first_n: 1,
		});
		let endpoint = client.router.route(&synthetic_request("svc", "m", Bytes::from_static(b"x"), None)).await.unwrap();
		let breaker = client.breaker_for(&endpoint);
		let retry = RetryExecutor::new(client.default_retry.clone());
		let resilience = Resilience::new(retry, breaker);
		let pool = client.pool.clone();
		let result = resilience
			.call(move || {
				let pool = pool.clone();
				let dispatcher = dispatcher.clone();
				let endpoint = endpoint.clone();
				async move { send_once(&pool, &endpoint, dispatcher, "svc", "m", Bytes::from_static(b"x")).await }
			})
			.await
			.unwrap();

		assert_eq!(result, Bytes::from_static(b"x"));
	}
}
