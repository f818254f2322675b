//! Internal and external envelope types (spec §3).

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{ExternalProtocol, MessageType};

/// A value carried in `metadata`: small enough that clone-on-read is fine,
/// general enough to hold the extras each protocol stashes there
/// (HTTP method, MQTT topic/QoS, JSON-RPC id, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
	String(String),
	Number(i64),
	Bool(bool),
	Json(serde_json::Value),
}

impl From<&str> for MetaValue {
	fn from(v: &str) -> Self {
		MetaValue::String(v.to_string())
	}
}
impl From<String> for MetaValue {
	fn from(v: String) -> Self {
		MetaValue::String(v)
	}
}
impl From<i64> for MetaValue {
	fn from(v: i64) -> Self {
		MetaValue::Number(v)
	}
}
impl From<bool> for MetaValue {
	fn from(v: bool) -> Self {
		MetaValue::Bool(v)
	}
}
impl From<serde_json::Value> for MetaValue {
	fn from(v: serde_json::Value) -> Self {
		MetaValue::Json(v)
	}
}

impl MetaValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			MetaValue::String(s) => Some(s),
			_ => None,
		}
	}
}

pub type Metadata = HashMap<String, MetaValue>;

/// The request/response pair seen by non-framework clients (GLOSSARY).
/// Created per ingress event, immutable after it reaches the adapter.
#[derive(Debug, Clone)]
pub struct ExternalRequest {
	pub protocol: ExternalProtocol,
	pub headers: HashMap<String, String>,
	pub body: serde_json::Value,
	pub metadata: Metadata,
}

impl ExternalRequest {
	pub fn header(&self, name: &str) -> Option<&str> {
		self
			.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

#[derive(Debug, Clone)]
pub struct ExternalResponse {
	pub protocol: ExternalProtocol,
	pub status: u16,
	pub body: serde_json::Value,
	pub metadata: Metadata,
}

/// The uniform request used past the adapter (GLOSSARY), per spec §3.
///
/// Invariants upheld by construction: `service`/`method` are non-empty,
/// `trace_id` is always present (generated if the caller didn't supply
/// one), `payload` may be empty but is never "null" in the JSON sense.
#[derive(Debug, Clone)]
pub struct InternalRequest {
	pub service: String,
	pub method: String,
	pub payload: Bytes,
	pub headers: HashMap<String, String>,
	pub trace_id: String,
	pub span_id: String,
	pub timeout: Option<std::time::Duration>,
	pub message_type: MessageType,
	pub source_protocol: ExternalProtocol,
	pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct InternalResponse {
	pub success: bool,
	pub payload: Bytes,
	pub headers: HashMap<String, String>,
	pub error_code: Option<crate::errors::ErrorCode>,
	pub error_message: Option<String>,
	pub source_protocol: ExternalProtocol,
	pub message_type: MessageType,
	pub metadata: Metadata,
}

impl InternalResponse {
	pub fn ok(payload: Bytes, req: &InternalRequest) -> Self {
		InternalResponse {
			success: true,
			payload,
			headers: HashMap::new(),
			error_code: None,
			error_message: None,
			source_protocol: req.source_protocol,
			message_type: req.message_type,
			metadata: req.metadata.clone(),
		}
	}

	pub fn err(err: &crate::errors::Error, req: &InternalRequest) -> Self {
		InternalResponse {
			success: false,
			payload: Bytes::new(),
			headers: HashMap::new(),
			error_code: Some(err.code),
			error_message: Some(err.message.clone()),
			source_protocol: req.source_protocol,
			message_type: req.message_type,
			metadata: req.metadata.clone(),
		}
	}
}
