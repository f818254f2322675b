use super::{canonical_json_bytes, trace_id_from, ExternalRequest, ExternalResponse, InternalRequest, InternalResponse, MetaValue};
use crate::errors::Error;
use crate::types::{ExternalProtocol, MessageType};
use fabric_core::ids::new_id;

const DEFAULT_SERVICE: &str = "default";

fn lookup<'a>(ext: &'a ExternalRequest, name: &str) -> Option<&'a str> {
	ext.header(name).or_else(|| match ext.metadata.get(name) {
		Some(v) => v.as_str(),
		None => None,
	})
}

/// MQTT extraction: parse topic as `service/method` (first `/` as
/// separator, default service `"default"`); preserve QoS, retained and
/// `responseTopic` with an `mqtt` prefix. `responseTopic` present promotes
/// the message type to `request_response`; otherwise `publish_subscribe`
/// (spec §4.1, and §9's note that this is the *sole* distinguisher — the
/// topic shape itself is never inspected for this).
pub(super) fn transform_request(ext: &ExternalRequest) -> Result<InternalRequest, Error> {
	let topic = lookup(ext, "topic").ok_or_else(|| Error::bad_request("MQTT request missing topic"))?;

	let (service, method) = match topic.split_once('/') {
		Some((s, m)) if !s.is_empty() => (s.to_string(), m.to_string()),
		_ => (DEFAULT_SERVICE.to_string(), topic.to_string()),
	};

	let response_topic = lookup(ext, "responseTopic").map(str::to_owned);
	let message_type = if response_topic.is_some() {
		MessageType::RequestResponse
	} else {
		MessageType::PublishSubscribe
	};

	let mut metadata = ext.metadata.clone();
	metadata.insert("mqtt_topic".into(), MetaValue::from(topic));
	if let Some(qos) = lookup(ext, "qos") {
		metadata.insert("mqtt_qos".into(), MetaValue::from(qos));
	}
	if let Some(retained) = lookup(ext, "retained") {
		metadata.insert("mqtt_retained".into(), MetaValue::from(retained));
	}
	if let Some(rt) = &response_topic {
		metadata.insert("mqtt_response_topic".into(), MetaValue::from(rt.as_str()));
	}
	metadata.insert("source_protocol".into(), MetaValue::from("mqtt"));

	Ok(InternalRequest {
		service,
		method,
		payload: canonical_json_bytes(&ext.body),
		headers: ext.headers.clone(),
		trace_id: trace_id_from(&ext.headers, &ext.metadata),
		span_id: new_id(),
		timeout: None,
		message_type,
		source_protocol: ExternalProtocol::Mqtt,
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
				"error": true,
				"code": format!("{code}"),
				"message": resp.error_message.clone().unwrap_or_default(),
			}),
		)
	};

	// Echo responseTopic back in metadata for the (excluded) MQTT egress
	// layer to publish on.
	let mut metadata = resp.metadata.clone();
	if let Some(rt) = metadata.get("mqtt_response_topic").cloned() {
		metadata.insert("responseTopic".into(), rt);
	}

	ExternalResponse {
		protocol: ExternalProtocol::Mqtt,
		status,
		body,
		metadata,
	}
}
