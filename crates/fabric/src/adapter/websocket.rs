use super::{canonical_json_bytes, trace_id_from, ExternalRequest, ExternalResponse, InternalRequest, InternalResponse, MetaValue};
use crate::errors::Error;
use crate::types::{ExternalProtocol, MessageType};
use fabric_core::ids::new_id;

/// WebSocket extraction: `service`/`method` are envelope fields; fail
/// `BadRequest` if missing. `messageType` (text/binary) is preserved in
/// metadata (this is the WS frame kind, distinct from the request's
/// `MessageType` semantic tag).
pub(super) fn transform_request(ext: &ExternalRequest) -> Result<InternalRequest, Error> {
	let service = ext.body.get("service").and_then(|v| v.as_str()).map(str::to_owned);
	let method = ext.body.get("method").and_then(|v| v.as_str()).map(str::to_owned);

	let (service, method) = match (service, method) {
		(Some(s), Some(m)) if !s.is_empty() && !m.is_empty() => (s, m),
		_ => return Err(Error::bad_request("WebSocket request missing service/method")),
	};

	let mut metadata = ext.metadata.clone();
	let frame_kind = ext
		.body
		.get("messageType")
		.and_then(|v| v.as_str())
		.unwrap_or("text")
		.to_string();
	metadata.insert("ws_frame_kind".into(), MetaValue::from(frame_kind));
	metadata.insert("source_protocol".into(), MetaValue::from("websocket"));

	Ok(InternalRequest {
		service,
		method,
		payload: canonical_json_bytes(&ext.body),
		headers: ext.headers.clone(),
		trace_id: trace_id_from(&ext.headers, &ext.metadata),
		span_id: new_id(),
		timeout: None,
		message_type: MessageType::RequestResponse,
		source_protocol: ExternalProtocol::WebSocket,
		metadata,
	})
}

pub(super) fn transform_response(resp: &InternalResponse, _orig: Option<&ExternalRequest>) -> ExternalResponse {
	let (status, body) = if resp.success {
		(200, serde_json::from_slice(&resp.payload).unwrap_or(serde_json::Value::Null))
	} else {
		let code = resp.error_code.unwrap_or(crate::errors::ErrorCode::InternalError);
		(
			500,
			serde_json::json!({
				"type": "error",
				"code": format!("{code}"),
				"message": resp.error_message.clone().unwrap_or_default(),
			}),
		)
	};

	ExternalResponse {
		protocol: ExternalProtocol::WebSocket,
		status,
		body,
		metadata: resp.metadata.clone(),
	}
}
