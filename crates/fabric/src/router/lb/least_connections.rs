use dashmap::DashMap;

use super::{empty_err, LoadBalancer};
use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// Maintains an in-memory connection count per `serviceId`; `select`
/// increments the minimum, `release` decrements (floored at 0). Ties are
/// broken by first-in-list (spec §4.2, S4).
#[derive(Default)]
pub struct LeastConnections {
	counts: DashMap<String, u32>,
}

impl LeastConnections {
	pub fn new() -> Self {
		LeastConnections {
			counts: DashMap::new(),
		}
	}

	fn count_of(&self, id: &str) -> u32 {
		self.counts.get(id).map(|c| *c).unwrap_or(0)
	}
}

impl LoadBalancer for LeastConnections {
	fn select(&self, endpoints: &[ServiceEndpoint]) -> Result<ServiceEndpoint, Error> {
		if endpoints.is_empty() {
			return Err(empty_err());
		}
		let chosen = endpoints
			.iter()
			.min_by_key(|e| self.count_of(&e.service_id))
			.cloned()
			.ok_or_else(empty_err)?;

		*self.counts.entry(chosen.service_id.clone()).or_insert(0) += 1;
		Ok(chosen)
	}

	fn release(&self, endpoint: &ServiceEndpoint) {
		if let Some(mut count) = self.counts.get_mut(&endpoint.service_id) {
			*count = count.saturating_sub(1);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::InternalProtocol;

	fn ep(id: &str) -> ServiceEndpoint {
		ServiceEndpoint {
			service_id: id.to_string(),
			service_name: "svc".to_string(),
			address: "127.0.0.1".to_string(),
			port: 8080,
			internal_protocol: InternalProtocol::Grpc,
			metadata: Default::default(),
		}
	}

	// S4: first pick e1 (tie), second e2, release e1, third pick e1.
	#[test]
	fn s4_least_connections_sequence() {
		let endpoints = vec![ep("e1"), ep("e2"), ep("e3")];
		let lb = LeastConnections::new();

		let first = lb.select(&endpoints).unwrap();
		assert_eq!(first.service_id, "e1");

		let second = lb.select(&endpoints).unwrap();
		assert_eq!(second.service_id, "e2");

		lb.release(&first);

		let third = lb.select(&endpoints).unwrap();
		assert_eq!(third.service_id, "e1");
	}

	#[test]
	fn release_never_goes_negative() {
		let endpoints = vec![ep("e1")];
		let lb = LeastConnections::new();
		lb.release(&endpoints[0]);
		lb.release(&endpoints[0]);
		// Still selectable with count floored at 0, not underflowed.
		assert_eq!(lb.select(&endpoints).unwrap().service_id, "e1");
	}
}
