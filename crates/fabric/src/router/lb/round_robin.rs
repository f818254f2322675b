use std::sync::atomic::{AtomicUsize, Ordering};

use super::{empty_err, LoadBalancer};
use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// Monotonic counter modulo list length; a single `select` call advances
/// the counter exactly once (spec §4.2).
#[derive(Default)]
pub struct RoundRobin {
	counter: AtomicUsize,
}

impl RoundRobin {
	pub fn new() -> Self {
		RoundRobin {
			counter: AtomicUsize::new(0),
		}
	}
}

impl LoadBalancer for RoundRobin {
	fn select(&self, endpoints: &[ServiceEndpoint]) -> Result<ServiceEndpoint, Error> {
		if endpoints.is_empty() {
			return Err(empty_err());
		}
		let i = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
		Ok(endpoints[i].clone())
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

	#[test]
	fn cycles_through_all_endpoints_in_order() {
		let endpoints = vec![ep("a"), ep("b"), ep("c")];
		let lb = RoundRobin::new();
		let picks: Vec<_> = (0..6)
			.map(|_| lb.select(&endpoints).unwrap().service_id)
			.collect();
		assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
	}

	#[test]
	fn empty_list_is_not_found() {
		let lb = RoundRobin::new();
		let err = lb.select(&[]).unwrap_err();
		assert_eq!(err.code, crate::errors::ErrorCode::NotFound);
	}
}
