use super::{canonical_json_bytes, trace_id_from, ExternalRequest, ExternalResponse, InternalRequest, InternalResponse, MetaValue};
use crate::errors::Error;
use crate::types::{ExternalProtocol, MessageType};
use fabric_core::ids::new_id;

/// REST extraction: prefer `X-Service-Name`/`X-Method-Name` headers,
/// otherwise `service`/`method` body fields, otherwise `BadRequest`.
pub(super) fn transform_request(ext: &ExternalRequest) -> Result<InternalRequest, Error> {
	let service = ext
		.header("X-Service-Name")
		.map(str::to_owned)
		.or_else(|| ext.body.get("service").and_then(|v| v.as_str()).map(str::to_owned));
	let method = ext
		.header("X-Method-Name")
		.map(str::to_owned)
		.or_else(|| ext.body.get("method").and_then(|v| v.as_str()).map(str::to_owned));

	let (service, method) = match (service, method) {
		(Some(s), Some(m)) if !s.is_empty() && !m.is_empty() => (s, m),
		_ => return Err(Error::bad_request("REST request missing service/method")),
	};

	let mut metadata = ext.metadata.clone();
	if let Some(http_method) = ext.header("X-Http-Method").or(Some("POST")) {
		metadata.insert("http_method".into(), MetaValue::from(http_method));
	}
	metadata.insert("source_protocol".into(), MetaValue::from("rest"));

	Ok(InternalRequest {
		service,
		method,
		payload: canonical_json_bytes(&ext.body),
		headers: ext.headers.clone(),
		trace_id: trace_id_from(&ext.headers, &ext.metadata),
		span_id: new_id(),
		timeout: None,
		message_type: MessageType::RequestResponse,
		source_protocol: ExternalProtocol::Rest,
		metadata,
	})
}

pub(super) fn transform_response(resp: &InternalResponse, _orig: Option<&ExternalRequest>) -> ExternalResponse {
	let (status, body) = if resp.success {
		let body = serde_json::from_slice(&resp.payload).unwrap_or(serde_json::Value::Null);
		(200, body)
	} else {
		let code = resp.error_code.unwrap_or(crate::errors::ErrorCode::InternalError);
		let body = serde_json::json!({
			"error": true,
			"code": format!("{code}"),
			"message": resp.error_message.clone().unwrap_or_default(),
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		(code.to_http_status(), body)
	};

	ExternalResponse {
		protocol: ExternalProtocol::Rest,
		status,
		body,
		metadata: resp.metadata.clone(),
	}
}
