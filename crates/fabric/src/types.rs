//! Shared data-model types from spec §3, used across the adapter, router,
//! registry and pool modules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The four external protocols the adapter normalizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalProtocol {
	Rest,
	WebSocket,
	JsonRpc,
	Mqtt,
}

/// The message-semantic tag preserved end to end, per the GLOSSARY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
	RequestResponse,
	PublishSubscribe,
	Stream,
}

/// The three internal transports a connection pool may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalProtocol {
	Grpc,
	JsonRpc,
	Custom,
}

/// Health status for a registered service instance, per §3 Service Info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
	Healthy,
	Unhealthy,
	Unknown,
}

impl HealthStatus {
	pub fn as_wire_str(self) -> &'static str {
		match self {
			HealthStatus::Healthy => "healthy",
			HealthStatus::Unhealthy => "unhealthy",
			HealthStatus::Unknown => "unknown",
		}
	}

	pub fn from_wire_str(s: &str) -> HealthStatus {
		match s {
			"healthy" => HealthStatus::Healthy,
			"unhealthy" => HealthStatus::Unhealthy,
			_ => HealthStatus::Unknown,
		}
	}
}

/// A resolved (serviceId, address, port, internalProtocol) tuple, owned by
/// the registry and handed out as immutable copies (§3 Service Endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
	pub service_id: String,
	pub service_name: String,
	pub address: String,
	pub port: u16,
	pub internal_protocol: InternalProtocol,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
}

impl ServiceEndpoint {
	/// The `address:port` key a connection pool is keyed by (§4.4).
	pub fn pool_key(&self) -> String {
		format!("{}:{}", self.address, self.port)
	}

	/// Integer `weight`, defaulting (and coercing invalid/zero values) to
	/// `1`, per §4.2's weighted round-robin rule and §9's open question
	/// about zero-weight endpoints.
	pub fn weight(&self) -> u32 {
		self
			.metadata
			.get("weight")
			.and_then(|w| w.parse::<i64>().ok())
			.filter(|w| *w > 0)
			.map(|w| w as u32)
			.unwrap_or(1)
	}
}

/// Registration payload for a service instance (§3 Service Info).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
	pub id: String,
	pub name: String,
	pub version: String,
	pub language: String,
	pub address: String,
	pub port: u16,
	pub protocols: Vec<InternalProtocol>,
	#[serde(default)]
	pub metadata: HashMap<String, String>,
	pub registered_at: chrono::DateTime<chrono::Utc>,
	pub health_status: HealthStatus,
}

impl ServiceInfo {
	pub fn to_endpoint(&self) -> ServiceEndpoint {
		ServiceEndpoint {
			service_id: self.id.clone(),
			service_name: self.name.clone(),
			address: self.address.clone(),
			port: self.port,
			internal_protocol: self.protocols.first().copied().unwrap_or(InternalProtocol::Grpc),
			metadata: self.metadata.clone(),
		}
	}
}
