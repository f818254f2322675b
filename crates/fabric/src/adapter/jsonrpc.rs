use super::{canonical_json_bytes, trace_id_from, ExternalRequest, ExternalResponse, InternalRequest, InternalResponse, MetaValue};
use crate::errors::Error;
use crate::types::{ExternalProtocol, MessageType};
use fabric_core::ids::new_id;

const DEFAULT_SERVICE: &str = "default";

/// JSON-RPC extraction: parse `{jsonrpc, method, params, id}`, split
/// `method` on the first `.` into service/method (default service
/// `"default"` if no `.` is present).
pub(super) fn transform_request(ext: &ExternalRequest) -> Result<InternalRequest, Error> {
	let method_field = ext
		.body
		.get("method")
		.and_then(|v| v.as_str())
		.ok_or_else(|| Error::bad_request("JSON-RPC request missing method"))?;

	let (service, method) = match method_field.split_once('.') {
		Some((s, m)) if !s.is_empty() => (s.to_string(), m.to_string()),
		_ => (DEFAULT_SERVICE.to_string(), method_field.to_string()),
	};

	let params = ext.body.get("params").cloned().unwrap_or(serde_json::Value::Null);

	let mut metadata = ext.metadata.clone();
	if let Some(id) = ext.body.get("id") {
		metadata.insert("jsonrpc_id".into(), MetaValue::Json(id.clone()));
	}
	metadata.insert("source_protocol".into(), MetaValue::from("jsonrpc"));

	Ok(InternalRequest {
		service,
		method,
		payload: canonical_json_bytes(&params),
		headers: ext.headers.clone(),
		trace_id: trace_id_from(&ext.headers, &ext.metadata),
		span_id: new_id(),
		timeout: None,
		message_type: MessageType::RequestResponse,
		source_protocol: ExternalProtocol::JsonRpc,
		metadata,
	})
}

pub(super) fn transform_response(resp: &InternalResponse, orig: Option<&ExternalRequest>) -> ExternalResponse {
	let id = orig
		.and_then(|o| o.body.get("id").cloned())
		.or_else(|| match resp.metadata.get("jsonrpc_id") {
			Some(MetaValue::Json(v)) => Some(v.clone()),
			_ => None,
		})
		.unwrap_or(serde_json::Value::Null);

	let body = if resp.success {
		let result = serde_json::from_slice(&resp.payload).unwrap_or(serde_json::Value::Null);
		serde_json::json!({"jsonrpc": "2.0", "result": result, "id": id})
	} else {
		let code = resp.error_code.unwrap_or(crate::errors::ErrorCode::InternalError);
		serde_json::json!({
			"jsonrpc": "2.0",
			"error": {
				"code": code.to_json_rpc_code(),
				"message": resp.error_message.clone().unwrap_or_default(),
			},
			"id": id,
		})
	};

	ExternalResponse {
		protocol: ExternalProtocol::JsonRpc,
		status: 200,
		body,
		metadata: resp.metadata.clone(),
	}
}
