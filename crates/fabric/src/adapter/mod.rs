//! C1 — Protocol Adapter.
//!
//! Bidirectional, semantics-preserving translation between the four
//! external envelopes and the single internal envelope (spec §4.1).

pub mod envelope;
mod jsonrpc;
mod mqtt;
mod rest;
mod websocket;

use std::collections::BTreeMap;

use bytes::Bytes;
use fabric_core::ids::new_id;

pub use envelope::{ExternalRequest, ExternalResponse, InternalRequest, InternalResponse, MetaValue, Metadata};

use crate::errors::Error;
use crate::types::ExternalProtocol;

/// Canonicalizes a JSON value to bytes with recursively sorted object
/// keys, so two structurally-equal values always serialize identically
/// regardless of the `Value` map's insertion order (spec §4.1's
/// "canonical JSON rules (stable ordering, lossless ...)").
pub fn canonical_json_bytes(value: &serde_json::Value) -> Bytes {
	Bytes::from(serde_json::to_vec(&sort_keys(value)).expect("JSON values always serialize"))
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
	match value {
		serde_json::Value::Object(map) => {
			let sorted: BTreeMap<String, serde_json::Value> =
				map.iter().map(|(k, v)| (k.clone(), sort_keys(v))).collect();
			serde_json::to_value(sorted).expect("BTreeMap<String, Value> always serializes")
		},
		serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(sort_keys).collect()),
		other => other.clone(),
	}
}

fn trace_id_from(headers: &std::collections::HashMap<String, String>, metadata: &Metadata) -> String {
	headers
		.iter()
		.find(|(k, _)| k.eq_ignore_ascii_case("x-trace-id"))
		.map(|(_, v)| v.clone())
		.or_else(|| metadata.get("trace_id").and_then(MetaValue::as_str).map(str::to_owned))
		.unwrap_or_else(new_id)
}

/// Inbound transformation: `transformRequest(ExternalRequest) -> InternalRequest`.
pub fn transform_request(ext: &ExternalRequest) -> Result<InternalRequest, Error> {
	match ext.protocol {
		ExternalProtocol::Rest => rest::transform_request(ext),
		ExternalProtocol::JsonRpc => jsonrpc::transform_request(ext),
		ExternalProtocol::WebSocket => websocket::transform_request(ext),
		ExternalProtocol::Mqtt => mqtt::transform_request(ext),
	}
}

/// Outbound transformation: `transformResponse(InternalResponse, ExternalRequest?) -> ExternalResponse`.
///
/// Prefers the original request's protocol; falls back to the response's
/// carried `source_protocol`, per spec §4.1.
pub fn transform_response(resp: &InternalResponse, orig: Option<&ExternalRequest>) -> ExternalResponse {
	let protocol = orig.map(|r| r.protocol).unwrap_or(resp.source_protocol);
	match protocol {
		ExternalProtocol::Rest => rest::transform_response(resp, orig),
		ExternalProtocol::JsonRpc => jsonrpc::transform_response(resp, orig),
		ExternalProtocol::WebSocket => websocket::transform_response(resp, orig),
		ExternalProtocol::Mqtt => mqtt::transform_response(resp, orig),
	}
}

/// Test-only stand-in for an internal callee that just echoes the
/// request's payload back as a successful response, used to exercise the
/// semantics-preservation contract in spec §4.1/§8 (P1).
#[cfg(test)]
pub(crate) fn fabric_echo(req: &InternalRequest) -> InternalResponse {
	InternalResponse::ok(req.payload.clone(), req)
}
