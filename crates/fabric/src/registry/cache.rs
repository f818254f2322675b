//! Discovery client cache (spec §4.3): a per-service TTL cache in front
//! of any [`Registry`]. A fresh entry is served straight from the `moka`
//! cache; a stale or missing entry triggers a registry read, and if that
//! read fails the last good value is served instead (fail-open), with a
//! warning, per spec §4.3 "Discovery client cache".

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;

use super::client::Registry;
use super::{Discovery, WatchHandle};
use crate::errors::Error;
use crate::types::ServiceEndpoint;

/// Wraps a [`Registry`] with a `moka` TTL cache keyed by service name.
/// `get_instances` is the only method the router (C2) needs, so
/// `DiscoveryCache` is the concrete type handed to `Router::new` in the
/// composition root.
pub struct DiscoveryCache<R: Registry> {
	registry: Arc<R>,
	fresh: Cache<String, Vec<ServiceEndpoint>>,
	/// Last successfully-read value per service, kept without a TTL so a
	/// registry outage can still be served something instead of an error.
	/// `Arc`-wrapped so the watch-callback task shares the same map rather
	/// than a point-in-time clone of it.
	last_good: Arc<DashMap<String, Vec<ServiceEndpoint>>>,
	/// Keeps watch handles alive for the lifetime of the cache; a dropped
	/// handle would silently stop receiving updates for that name.
	watches: DashMap<String, WatchHandle>,
}

impl<R: Registry + 'static> DiscoveryCache<R> {
	pub fn new(registry: Arc<R>, ttl: std::time::Duration) -> Self {
		DiscoveryCache {
			registry,
			fresh: Cache::builder().time_to_live(ttl).build(),
			last_good: Arc::new(DashMap::new()),
			watches: DashMap::new(),
		}
	}

	/// Opens a watch for `service_name` (if not already watching) so that
	/// registry change events refresh the cache ahead of its TTL expiry,
	/// per spec §4.3 "On subscription, a watch is opened".
	pub async fn subscribe(&self, service_name: &str) -> Result<(), Error> {
		if self.watches.contains_key(service_name) {
			return Ok(());
		}
		let fresh = self.fresh.clone();
		let last_good = Arc::clone(&self.last_good);
		let name = service_name.to_string();
		let handle = self
			.registry
			.watch(
				service_name,
				Box::new(move |endpoints| {
					let fresh = fresh.clone();
					let last_good = last_good.clone();
					let name = name.clone();
					tokio::spawn(async move {
						last_good.insert(name.clone(), endpoints.clone());
						fresh.insert(name, endpoints).await;
					});
				}),
			)
			.await?;
		self.watches.insert(service_name.to_string(), handle);
		Ok(())
	}

	pub fn unsubscribe(&self, service_name: &str) {
		if let Some((_, handle)) = self.watches.remove(service_name) {
			handle.unwatch();
		}
	}
}

#[async_trait]
impl<R: Registry + 'static> Discovery for DiscoveryCache<R> {
	async fn get_instances(&self, service_name: &str) -> Result<Vec<ServiceEndpoint>, Error> {
		if let Some(cached) = self.fresh.get(service_name).await {
			return Ok(cached);
		}

		match self.registry.discover(service_name, None).await {
			Ok(endpoints) => {
				self.fresh.insert(service_name.to_string(), endpoints.clone()).await;
				self.last_good.insert(service_name.to_string(), endpoints.clone());
				Ok(endpoints)
			},
			Err(e) => match self.last_good.get(service_name) {
				Some(stale) => {
					tracing::warn!(service = service_name, error = %e, "registry discover failed, serving last good value");
					Ok(stale.clone())
				},
				None => Err(e),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;
	use crate::types::InternalProtocol;

	struct FakeRegistry {
		endpoints: Vec<ServiceEndpoint>,
		discover_calls: AtomicUsize,
		fail_after: Option<usize>,
	}

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

	#[async_trait]
	impl Registry for FakeRegistry {
		async fn register(&self, _info: crate::types::ServiceInfo) -> Result<(), Error> {
			Ok(())
		}

		async fn deregister(&self, _service_name: &str, _service_id: &str) -> Result<(), Error> {
			Ok(())
		}

		async fn discover(&self, _service_name: &str, _version: Option<&str>) -> Result<Vec<ServiceEndpoint>, Error> {
			let n = self.discover_calls.fetch_add(1, Ordering::SeqCst);
			if self.fail_after.is_some_and(|f| n >= f) {
				return Err(Error::connection("registry unreachable"));
			}
			Ok(self.endpoints.clone())
		}

		async fn watch(
			&self,
			_service_name: &str,
			_callback: Box<dyn Fn(Vec<ServiceEndpoint>) + Send + Sync>,
		) -> Result<WatchHandle, Error> {
			let (tx, _rx) = tokio::sync::oneshot::channel();
			Ok(WatchHandle { _shutdown: tx })
		}
	}

	#[tokio::test]
	async fn serves_from_cache_without_hitting_registry_twice() {
		let registry = Arc::new(FakeRegistry {
			endpoints: vec![ep("a")],
			discover_calls: AtomicUsize::new(0),
			fail_after: None,
		});
		let cache = DiscoveryCache::new(registry.clone(), Duration::from_secs(60));

		let first = cache.get_instances("svc").await.unwrap();
		let second = cache.get_instances("svc").await.unwrap();
		assert_eq!(first, second);
		assert_eq!(registry.discover_calls.load(Ordering::SeqCst), 1);
	}

	// P11-adjacent: registry outage after a successful read must not
	// surface as an error while a last-good value is available.
	#[tokio::test]
	async fn fails_open_to_last_good_value_on_registry_error() {
		let registry = Arc::new(FakeRegistry {
			endpoints: vec![ep("a")],
			discover_calls: AtomicUsize::new(0),
			fail_after: Some(1),
		});
		// Near-zero TTL forces every call past the first to bypass the
		// fresh cache and hit the registry, which starts failing on its
		// second call (index 1).
		let cache = DiscoveryCache::new(registry.clone(), Duration::from_millis(1));

		let first = cache.get_instances("svc").await.unwrap();
		assert_eq!(first, vec![ep("a")]);

		tokio::time::sleep(Duration::from_millis(10)).await;
		let second = cache.get_instances("svc").await.unwrap();
		assert_eq!(second, vec![ep("a")], "fail-open must serve the last good value, not an error");
	}

	#[tokio::test]
	async fn propagates_error_when_nothing_is_cached_yet() {
		let registry = Arc::new(FakeRegistry {
			endpoints: vec![ep("a")],
			discover_calls: AtomicUsize::new(0),
			fail_after: Some(0),
		});
		let cache = DiscoveryCache::new(registry, Duration::from_secs(60));
		assert!(cache.get_instances("svc").await.is_err());
	}
}
