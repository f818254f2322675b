//! Load-balancing policies (spec §4.2). All operate on the non-empty
//! ordered list of healthy endpoints discovered for a service name.

mod least_connections;
mod random;
mod round_robin;
mod weighted;

pub use least_connections::LeastConnections;
pub use random::RandomPolicy;
pub use round_robin::RoundRobin;
pub use weighted::WeightedRoundRobin;

use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// A load-balancing policy selects one endpoint from a non-empty slice.
/// `release` is called when a connection to a previously-selected
/// endpoint is returned, letting stateful policies (least-connections)
/// keep their counters accurate.
pub trait LoadBalancer: Send + Sync {
	fn select(&self, endpoints: &[ServiceEndpoint]) -> Result<ServiceEndpoint, Error>;

	fn release(&self, _endpoint: &ServiceEndpoint) {}
}

/// The four policies named in §4.2, selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
	RoundRobin,
	Random,
	WeightedRoundRobin,
	LeastConnections,
}

pub fn build(kind: LoadBalancerKind) -> Box<dyn LoadBalancer> {
	match kind {
		LoadBalancerKind::RoundRobin => Box::new(RoundRobin::new()),
		LoadBalancerKind::Random => Box::new(RandomPolicy::new()),
		LoadBalancerKind::WeightedRoundRobin => Box::new(WeightedRoundRobin::new()),
		LoadBalancerKind::LeastConnections => Box::new(LeastConnections::new()),
	}
}

pub(super) fn empty_err() -> Error {
	Error::not_found("no healthy endpoints available")
}
