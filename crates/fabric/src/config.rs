//! Typed configuration records for the pool, retry, circuit-breaker and
//! registry components (spec §10.3 of the ambient stack).
//!
//! These are plain, `Default`-implementing `serde` structs meant to be
//! populated by an excluded config loader; the registry section also
//! honours a small, fixed set of environment variable overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn secs(n: u64) -> Duration {
	Duration::from_secs(n)
}

fn millis(n: u64) -> Duration {
	Duration::from_millis(n)
}

/// Connection Pool Manager config (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
	#[serde(default = "PoolConfig::default_min_connections")]
	pub min_connections: usize,
	#[serde(default = "PoolConfig::default_max_connections")]
	pub max_connections: usize,
	#[serde(with = "duration_millis", default = "PoolConfig::default_connect_timeout")]
	pub connect_timeout: Duration,
	#[serde(with = "duration_millis", default = "PoolConfig::default_acquire_timeout")]
	pub acquire_timeout: Duration,
	#[serde(with = "duration_secs", default = "PoolConfig::default_idle_timeout")]
	pub idle_timeout: Duration,
	#[serde(with = "duration_secs", default = "PoolConfig::default_max_lifetime")]
	pub max_lifetime: Duration,
	#[serde(with = "duration_secs", default = "PoolConfig::default_health_check_interval")]
	pub health_check_interval: Duration,
	#[serde(with = "duration_millis", default = "PoolConfig::default_reconnect_delay")]
	pub reconnect_delay: Duration,
	#[serde(default = "PoolConfig::default_max_reconnect_attempts")]
	pub max_reconnect_attempts: u32,
}

impl PoolConfig {
	fn default_min_connections() -> usize {
		0
	}
	fn default_max_connections() -> usize {
		10
	}
	fn default_connect_timeout() -> Duration {
		millis(2_000)
	}
	fn default_acquire_timeout() -> Duration {
		millis(5_000)
	}
	fn default_idle_timeout() -> Duration {
		secs(300)
	}
	fn default_max_lifetime() -> Duration {
		secs(3_600)
	}
	fn default_health_check_interval() -> Duration {
		secs(30)
	}
	fn default_reconnect_delay() -> Duration {
		millis(500)
	}
	fn default_max_reconnect_attempts() -> u32 {
		5
	}
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig {
			min_connections: Self::default_min_connections(),
			max_connections: Self::default_max_connections(),
			connect_timeout: Self::default_connect_timeout(),
			acquire_timeout: Self::default_acquire_timeout(),
			idle_timeout: Self::default_idle_timeout(),
			max_lifetime: Self::default_max_lifetime(),
			health_check_interval: Self::default_health_check_interval(),
			reconnect_delay: Self::default_reconnect_delay(),
			max_reconnect_attempts: Self::default_max_reconnect_attempts(),
		}
	}
}

/// Retry executor config (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
	#[serde(default = "RetryConfig::default_max_attempts")]
	pub max_attempts: u32,
	#[serde(with = "duration_millis", default = "RetryConfig::default_initial_delay")]
	pub initial_delay: Duration,
	#[serde(default = "RetryConfig::default_multiplier")]
	pub multiplier: f64,
	#[serde(with = "duration_millis", default = "RetryConfig::default_max_delay")]
	pub max_delay: Duration,
}

impl RetryConfig {
	fn default_max_attempts() -> u32 {
		3
	}
	fn default_initial_delay() -> Duration {
		millis(100)
	}
	fn default_multiplier() -> f64 {
		2.0
	}
	fn default_max_delay() -> Duration {
		secs(30)
	}
}

impl Default for RetryConfig {
	fn default() -> Self {
		RetryConfig {
			max_attempts: Self::default_max_attempts(),
			initial_delay: Self::default_initial_delay(),
			multiplier: Self::default_multiplier(),
			max_delay: Self::default_max_delay(),
		}
	}
}

/// Circuit breaker config (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
	#[serde(default = "BreakerConfig::default_failure_threshold")]
	pub failure_threshold: u32,
	#[serde(default = "BreakerConfig::default_success_threshold")]
	pub success_threshold: u32,
	#[serde(with = "duration_millis", default = "BreakerConfig::default_open_timeout")]
	pub open_timeout: Duration,
}

impl BreakerConfig {
	fn default_failure_threshold() -> u32 {
		5
	}
	fn default_success_threshold() -> u32 {
		2
	}
	fn default_open_timeout() -> Duration {
		millis(30_000)
	}
}

impl Default for BreakerConfig {
	fn default() -> Self {
		BreakerConfig {
			failure_threshold: Self::default_failure_threshold(),
			success_threshold: Self::default_success_threshold(),
			open_timeout: Self::default_open_timeout(),
		}
	}
}

/// Service Registry / Discovery config (spec §4.3). The three fields
/// marked below are the ones the environment surface may override
/// (spec §6 "Environment surface").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
	/// etcd endpoint list, e.g. `["http://127.0.0.1:2379"]`. Overridden by
	/// `FABRIC_REGISTRY_ENDPOINTS` (comma-separated).
	#[serde(default = "RegistryConfig::default_endpoints")]
	pub endpoints: Vec<String>,
	/// Key prefix namespace. Overridden by `FABRIC_REGISTRY_NAMESPACE`.
	#[serde(default = "RegistryConfig::default_namespace")]
	pub namespace: String,
	/// Lease TTL in seconds. Overridden by `FABRIC_REGISTRY_SERVICE_TTL`.
	#[serde(default = "RegistryConfig::default_service_ttl_secs")]
	pub service_ttl_secs: i64,
	/// Keep-alive interval, strictly less than `service_ttl_secs`.
	/// Overridden by `FABRIC_REGISTRY_HEARTBEAT_INTERVAL`.
	#[serde(with = "duration_secs", default = "RegistryConfig::default_heartbeat_interval")]
	pub heartbeat_interval: Duration,
	#[serde(with = "duration_secs", default = "RegistryConfig::default_health_check_interval")]
	pub health_check_interval: Duration,
	#[serde(default = "RegistryConfig::default_failure_threshold")]
	pub failure_threshold: u32,
	#[serde(with = "duration_secs", default = "RegistryConfig::default_cache_ttl")]
	pub cache_ttl: Duration,
}

impl RegistryConfig {
	fn default_endpoints() -> Vec<String> {
		vec!["http://127.0.0.1:2379".to_string()]
	}
	fn default_namespace() -> String {
		"fabric".to_string()
	}
	fn default_service_ttl_secs() -> i64 {
		30
	}
	fn default_heartbeat_interval() -> Duration {
		secs(10)
	}
	fn default_health_check_interval() -> Duration {
		secs(15)
	}
	fn default_failure_threshold() -> u32 {
		3
	}
	fn default_cache_ttl() -> Duration {
		secs(60)
	}

	/// Applies the three named environment variable overrides on top of
	/// whatever was loaded from the excluded config file (spec §6).
	pub fn apply_env_overrides(mut self) -> Self {
		if let Ok(v) = std::env::var("FABRIC_REGISTRY_ENDPOINTS") {
			self.endpoints = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
		}
		if let Ok(v) = std::env::var("FABRIC_REGISTRY_NAMESPACE") {
			self.namespace = v;
		}
		if let Ok(v) = std::env::var("FABRIC_REGISTRY_SERVICE_TTL") {
			if let Ok(n) = v.parse() {
				self.service_ttl_secs = n;
			}
		}
		if let Ok(v) = std::env::var("FABRIC_REGISTRY_HEARTBEAT_INTERVAL") {
			if let Ok(n) = v.parse() {
				self.heartbeat_interval = secs(n);
			}
		}
		self
	}
}

impl Default for RegistryConfig {
	fn default() -> Self {
		RegistryConfig {
			endpoints: Self::default_endpoints(),
			namespace: Self::default_namespace(),
			service_ttl_secs: Self::default_service_ttl_secs(),
			heartbeat_interval: Self::default_heartbeat_interval(),
			health_check_interval: Self::default_health_check_interval(),
			failure_threshold: Self::default_failure_threshold(),
			cache_ttl: Self::default_cache_ttl(),
		}
	}
}

/// The whole typed config record (spec §10.3): one `serde::Deserialize`
/// struct covering every component's tunables, deserializable from YAML
/// or JSON by whatever excluded config loader the embedding binary
/// uses. `fabric-app` loads this straight from a file path given on the
/// command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FabricConfig {
	pub pool: PoolConfig,
	pub retry: RetryConfig,
	pub breaker: BreakerConfig,
	pub registry: RegistryConfig,
}

mod duration_millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(d)?))
	}
}

mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u64(d.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_secs(u64::deserialize(d)?))
	}
}
