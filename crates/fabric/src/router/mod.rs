//! C2 — Message Router.
//!
//! Resolves an [`InternalRequest`] to a concrete [`ServiceEndpoint`] by
//! applying the routing rule table, then discovering and load-balancing
//! across that service's healthy instances (spec §4.2).

pub mod lb;
pub mod rules;

use std::sync::Arc;

use crate::adapter::InternalRequest;
use crate::errors::Error;
use crate::registry::Discovery;
use crate::types::ServiceEndpoint;
pub use lb::{LoadBalancer, LoadBalancerKind};
pub use rules::{RoutingRule, RoutingTable};

/// The C2 router: rule table + discovery + load balancer, composed.
pub struct Router<D: Discovery> {
	rules: RoutingTable,
	discovery: Arc<D>,
	lb: Box<dyn LoadBalancer>,
}

impl<D: Discovery> Router<D> {
	pub fn new(discovery: Arc<D>, lb: Box<dyn LoadBalancer>) -> Self {
		Router {
			rules: RoutingTable::new(),
			discovery,
			lb,
		}
	}

	pub fn rules(&self) -> &RoutingTable {
		&self.rules
	}

	/// Implements §4.2's algorithm: resolve target name via rules, then
	/// discover (cache-first, via [`Discovery`]), then load-balance.
	pub async fn route(&self, req: &InternalRequest) -> Result<ServiceEndpoint, Error> {
		let target_service = self.rules.resolve(req);

		let endpoints = self
			.discovery
			.get_instances(&target_service)
			.await
			.map_err(|e| Error::with_cause(crate::errors::ErrorCode::RoutingError, "discovery failed", e))?;

		if endpoints.is_empty() {
			return Err(Error::not_found(format!("no healthy instances for service '{target_service}'")));
		}

		self.lb.select(&endpoints)
	}

	/// Releases a previously-selected endpoint back to the load balancer
	/// (relevant to least-connections; a no-op for stateless policies).
	pub fn release(&self, endpoint: &ServiceEndpoint) {
		self.lb.release(endpoint);
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use async_trait::async_trait;

	use super::*;
	use crate::types::{ExternalProtocol, InternalProtocol, MessageType};

	struct FakeDiscovery {
		instances: std::collections::HashMap<String, Vec<ServiceEndpoint>>,
	}

	#[async_trait]
	impl Discovery for FakeDiscovery {
		async fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error> {
			Ok(self.instances.get(service_name).cloned().unwrap_or_default())
		}
	}

	fn ep(name: &str, id: &str) -> ServiceEndpoint {
		ServiceEndpoint {
			service_id: id.to_string(),
			service_name: name.to_string(),
			address: "10.0.0.1".to_string(),
			port: 9000,
			internal_protocol: InternalProtocol::Grpc,
			metadata: Default::default(),
		}
	}

	fn req(service: &str) -> InternalRequest {
		InternalRequest {
			service: service.to_string(),
			method: "m".to_string(),
			payload: bytes::Bytes::new(),
			headers: Default::default(),
			trace_id: "t".into(),
			span_id: "s".into(),
			timeout: None,
			message_type: MessageType::RequestResponse,
			source_protocol: ExternalProtocol::Rest,
			metadata: Default::default(),
		}
	}

	#[tokio::test]
	async fn routes_to_rule_target_then_discovers_and_balances() {
		let mut instances = std::collections::HashMap::new();
		instances.insert("user-v2".to_string(), vec![ep("user-v2", "u1")]);
		let discovery = Arc::new(FakeDiscovery { instances });

		let router = Router::new(discovery, Box::new(lb::RoundRobin::new()));
		router.rules().add_rule(RoutingRule::new("canary", 10, |_| true, |_| "user-v2".to_string()));

		let selected = router.route(&req("user")).await.unwrap();
		assert_eq!(selected.service_id, "u1");
	}

	// P5: no rule matches -> falls back to request.service; empty
	// instance set for that service -> NotFound.
	#[tokio::test]
	async fn no_instances_is_not_found() {
		let discovery = Arc::new(FakeDiscovery {
			instances: Default::default(),
		});
		let router = Router::new(discovery, Box::new(lb::RoundRobin::new()));

		let err = router.route(&req("missing")).await.unwrap_err();
		assert_eq!(err.code, crate::errors::ErrorCode::NotFound);
	}
}
