use rand::Rng;

use super::{empty_err, LoadBalancer};
use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// Uniform selection over the endpoint list (spec §4.2).
#[derive(Default)]
pub struct RandomPolicy;

impl RandomPolicy {
	pub fn new() -> Self {
		RandomPolicy
	}
}

impl LoadBalancer for RandomPolicy {
	fn select(&self, endpoints: &[ServiceEndpoint]) -> Result<ServiceEndpoint, Error> {
		if endpoints.is_empty() {
			return Err(empty_err());
		}
		let i = rand::rng().random_range(0..endpoints.len());
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
	fn always_picks_from_the_list() {
		let endpoints = vec![ep("a"), ep("b"), ep("c")];
		let lb = RandomPolicy::new();
		for _ in 0..50 {
			let picked = lb.select(&endpoints).unwrap();
			assert!(endpoints.iter().any(|e| e.service_id == picked.service_id));
		}
	}

	#[test]
	fn empty_list_is_not_found() {
		let lb = RandomPolicy::new();
		assert!(lb.select(&[]).is_err());
	}
}
