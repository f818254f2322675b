//! In-process `prometheus_client` registry for the request plane's own
//! state (spec §10.1): pool size per endpoint, breaker state per
//! target, retry counts, registry watch reconnects. An excluded
//! metrics-scraping collaborator reads this; this crate never pushes or
//! exports it anywhere itself.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct EndpointLabel {
	pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct BreakerStateLabel {
	pub endpoint: String,
	pub state: String,
}

/// Metrics owned by one running `fabric` instance. Construct one,
/// register it, and hand clones of the `Family`/`Counter` handles to
/// the components that update them -- the handles are cheap `Arc`
/// clones, matching `prometheus_client`'s own intended usage.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
	pub pool_size: Family<EndpointLabel, Gauge>,
	pub pool_active: Family<EndpointLabel, Gauge>,
	pub breaker_state: Family<BreakerStateLabel, Gauge>,
	pub retry_attempts_total: Family<EndpointLabel, Counter>,
	pub registry_watch_reconnects_total: Counter,
}

impl Metrics {
	pub fn new() -> Self {
		Metrics::default()
	}

	/// Creates a fresh `Metrics` and registers every series under
	/// `registry` with its §10.1 name and help text. Call once at
	/// startup and keep the returned handle -- its `Family`/`Counter`
	/// fields are cheap `Arc` clones that stay wired to the same series
	/// registered here.
	pub fn register(registry: &mut Registry) -> Self {
		let metrics = Metrics::new();
		registry.register("fabric_pool_connections", "current connections in the pool per endpoint", metrics.pool_size.clone());
		registry.register("fabric_pool_active_connections", "connections currently ACTIVE per endpoint", metrics.pool_active.clone());
		registry.register("fabric_circuit_breaker_state", "1 if the breaker is currently in this state for this endpoint, else 0", metrics.breaker_state.clone());
		registry.register("fabric_retry_attempts", "total retry attempts made per endpoint", metrics.retry_attempts_total.clone());
		registry.register(
			"fabric_registry_watch_reconnects",
			"total times a registry watch stream had to reconnect",
			metrics.registry_watch_reconnects_total.clone(),
		);
		metrics
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metrics_register_without_panicking_and_accept_updates() {
		let mut registry = Registry::default();
		let metrics = Metrics::new();
		registry.register("fabric_pool_connections", "help", metrics.pool_size.clone());

		metrics
			.pool_size
			.get_or_create(&EndpointLabel { endpoint: "10.0.0.1:9000".into() })
			.set(3);
		metrics.retry_attempts_total.get_or_create(&EndpointLabel { endpoint: "10.0.0.1:9000".into() }).inc();
		metrics.registry_watch_reconnects_total.inc();

		let mut buf = String::new();
		prometheus_client::encoding::text::encode(&mut buf, &registry).unwrap();
		assert!(buf.contains("fabric_pool_connections"));
	}
}
