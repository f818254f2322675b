//! C3 — Service Registry / Discovery (spec §4.3).
//!
//! `client` holds the etcd-backed `Registry` (register/deregister/discover/
//! watch, lease keep-alive, health probing); `cache` wraps any `Registry`
//! with the fail-open discovery cache clients actually call through.

pub mod cache;
pub mod client;

pub use cache::DiscoveryCache;
pub use client::{EtcdRegistry, Registry, WatchHandle};

use async_trait::async_trait;

use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// The narrow read path the router (C2) depends on. Implemented by both
/// the raw registry client and the [`DiscoveryCache`] sitting in front of
/// it, so the router never needs to know which one it holds.
#[async_trait]
pub trait Discovery: Send + Sync {
	async fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error>;
}
