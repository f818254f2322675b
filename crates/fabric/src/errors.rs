//! C6 — Error Taxonomy & Mapping.
//!
//! A single framework-wide error code enum with fixed, bidirectional
//! mappings to HTTP status, gRPC status and JSON-RPC code, per spec §7.
//! See `DESIGN.md` for why the mapping tables below are not, and cannot
//! be, fully injective — several wire codes are legitimately shared by
//! more than one framework code.

use std::fmt;

/// The twelve framework error codes, partitioned into client (4xx-like),
/// server (5xx-like) and framework (6xx-like) ranges per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
	BadRequest,
	Unauthorized,
	Forbidden,
	NotFound,
	Timeout,
	InternalError,
	NotImplemented,
	ServiceUnavailable,
	ProtocolError,
	SerializationError,
	RoutingError,
	ConnectionError,
}

impl ErrorCode {
	/// Default retry eligibility from §7's "Retriable by default" column.
	pub fn retriable_by_default(self) -> bool {
		matches!(
			self,
			ErrorCode::Timeout | ErrorCode::ServiceUnavailable | ErrorCode::ConnectionError
		)
	}

	pub fn to_http_status(self) -> u16 {
		match self {
			ErrorCode::BadRequest => 400,
			ErrorCode::Unauthorized => 401,
			ErrorCode::Forbidden => 403,
			ErrorCode::NotFound => 404,
			ErrorCode::Timeout => 408,
			ErrorCode::InternalError => 500,
			ErrorCode::NotImplemented => 501,
			ErrorCode::ServiceUnavailable => 503,
			ErrorCode::ProtocolError => 502,
			ErrorCode::SerializationError => 400,
			ErrorCode::RoutingError => 502,
			ErrorCode::ConnectionError => 503,
		}
	}

	/// Inverse of [`Self::to_http_status`]. HTTP 400/502/503 are each
	/// shared by two framework codes; the canonical pick per bucket is
	/// `BadRequest`/`ProtocolError`/`ServiceUnavailable` respectively.
	pub fn from_http_status(status: u16) -> Option<ErrorCode> {
		Some(match status {
			400 => ErrorCode::BadRequest,
			401 => ErrorCode::Unauthorized,
			403 => ErrorCode::Forbidden,
			404 => ErrorCode::NotFound,
			408 => ErrorCode::Timeout,
			500 => ErrorCode::InternalError,
			501 => ErrorCode::NotImplemented,
			503 => ErrorCode::ServiceUnavailable,
			502 => ErrorCode::ProtocolError,
			_ => return None,
		})
	}

	pub fn to_grpc_code(self) -> i32 {
		match self {
			ErrorCode::BadRequest => 3,
			ErrorCode::Unauthorized => 16,
			ErrorCode::Forbidden => 7,
			ErrorCode::NotFound => 5,
			ErrorCode::Timeout => 4,
			ErrorCode::InternalError => 13,
			ErrorCode::NotImplemented => 12,
			ErrorCode::ServiceUnavailable => 14,
			ErrorCode::ProtocolError => 2,
			ErrorCode::SerializationError => 3,
			ErrorCode::RoutingError => 2,
			ErrorCode::ConnectionError => 14,
		}
	}

	/// Inverse of [`Self::to_grpc_code`]. gRPC codes 3/2/14 are each
	/// shared by two framework codes; same canonical picks as the HTTP leg.
	pub fn from_grpc_code(code: i32) -> Option<ErrorCode> {
		Some(match code {
			3 => ErrorCode::BadRequest,
			16 => ErrorCode::Unauthorized,
			7 => ErrorCode::Forbidden,
			5 => ErrorCode::NotFound,
			4 => ErrorCode::Timeout,
			13 => ErrorCode::InternalError,
			12 => ErrorCode::NotImplemented,
			14 => ErrorCode::ServiceUnavailable,
			2 => ErrorCode::ProtocolError,
			_ => return None,
		})
	}

	pub fn to_json_rpc_code(self) -> i32 {
		match self {
			ErrorCode::BadRequest => -32602,
			ErrorCode::Unauthorized => -32603,
			ErrorCode::Forbidden => -32603,
			ErrorCode::NotFound => -32601,
			ErrorCode::Timeout => -32603,
			ErrorCode::InternalError => -32603,
			ErrorCode::NotImplemented => -32603,
			ErrorCode::ServiceUnavailable => -32603,
			ErrorCode::ProtocolError => -32600,
			ErrorCode::SerializationError => -32700,
			ErrorCode::RoutingError => -32603,
			ErrorCode::ConnectionError => -32603,
		}
	}

	/// Inverse of [`Self::to_json_rpc_code`]. `-32603` is shared by eight
	/// framework codes; the canonical pick is `InternalError`, the
	/// generic member of that bucket.
	pub fn from_json_rpc_code(code: i32) -> Option<ErrorCode> {
		Some(match code {
			-32602 => ErrorCode::BadRequest,
			-32601 => ErrorCode::NotFound,
			-32600 => ErrorCode::ProtocolError,
			-32700 => ErrorCode::SerializationError,
			-32603 => ErrorCode::InternalError,
			_ => return None,
		})
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?}")
	}
}

/// A framework error, optionally carrying the error from the upstream hop
/// that produced it (§7's "causal chain across service hops").
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
	pub code: ErrorCode,
	pub message: String,
	#[source]
	pub cause: Option<Box<Error>>,
}

impl Error {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Error {
			code,
			message: message.into(),
			cause: None,
		}
	}

	/// Prepends a new error onto the chain, making `self` its `cause`.
	/// Mirrors §7's "each hop may prepend its own error with the upstream
	/// error as `cause`".
	pub fn with_cause(code: ErrorCode, message: impl Into<String>, cause: Error) -> Self {
		Error {
			code,
			message: message.into(),
			cause: Some(Box::new(cause)),
		}
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::BadRequest, message)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::NotFound, message)
	}

	pub fn timeout(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Timeout, message)
	}

	pub fn service_unavailable(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::ServiceUnavailable, message)
	}

	pub fn connection(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::ConnectionError, message)
	}

	pub fn routing(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::RoutingError, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InternalError, message)
	}

	/// Walks the `cause` chain, innermost last, collecting each message.
	pub fn chain(&self) -> Vec<&str> {
		let mut out = vec![self.message.as_str()];
		let mut cur = self.cause.as_deref();
		while let Some(e) = cur {
			out.push(e.message.as_str());
			cur = e.cause.as_deref();
		}
		out
	}

	pub fn is_retriable(&self) -> bool {
		self.code.retriable_by_default()
	}
}

/// Machine-readable body shape used by ingress frontends per §7:
/// `{code, message, timestamp}` plus an optional `cause` chain.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorBody {
	pub code: ErrorCode,
	pub message: String,
	pub timestamp: chrono::DateTime<chrono::Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cause: Option<Vec<String>>,
}

impl From<&Error> for ErrorBody {
	fn from(e: &Error) -> Self {
		let mut chain = e.chain();
		chain.remove(0);
		ErrorBody {
			code: e.code,
			message: e.message.clone(),
			timestamp: chrono::Utc::now(),
			cause: if chain.is_empty() {
				None
			} else {
				Some(chain.into_iter().map(str::to_owned).collect())
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ALL: [ErrorCode; 12] = [
		ErrorCode::BadRequest,
		ErrorCode::Unauthorized,
		ErrorCode::Forbidden,
		ErrorCode::NotFound,
		ErrorCode::Timeout,
		ErrorCode::InternalError,
		ErrorCode::NotImplemented,
		ErrorCode::ServiceUnavailable,
		ErrorCode::ProtocolError,
		ErrorCode::SerializationError,
		ErrorCode::RoutingError,
		ErrorCode::ConnectionError,
	];

	#[test]
	fn retriable_defaults_match_spec_table() {
		for c in ALL {
			let expect = matches!(
				c,
				ErrorCode::Timeout | ErrorCode::ServiceUnavailable | ErrorCode::ConnectionError
			);
			assert_eq!(c.retriable_by_default(), expect, "{c:?}");
		}
	}

	// P12, the codes where §7's table is actually injective on every leg.
	#[test]
	fn p12_full_round_trip_where_table_is_injective() {
		for c in [
			ErrorCode::NotFound,
			ErrorCode::InternalError,
			ErrorCode::ProtocolError,
			ErrorCode::BadRequest,
		] {
			assert_eq!(ErrorCode::from_http_status(c.to_http_status()), Some(c));
			assert_eq!(ErrorCode::from_grpc_code(c.to_grpc_code()), Some(c));
			assert_eq!(ErrorCode::from_json_rpc_code(c.to_json_rpc_code()), Some(c));
		}
	}

	#[test]
	fn p12_http_and_grpc_round_trip_but_not_json_rpc() {
		for c in [
			ErrorCode::Unauthorized,
			ErrorCode::Forbidden,
			ErrorCode::Timeout,
			ErrorCode::NotImplemented,
			ErrorCode::ServiceUnavailable,
		] {
			assert_eq!(ErrorCode::from_http_status(c.to_http_status()), Some(c));
			assert_eq!(ErrorCode::from_grpc_code(c.to_grpc_code()), Some(c));
			assert_eq!(
				ErrorCode::from_json_rpc_code(c.to_json_rpc_code()),
				Some(ErrorCode::InternalError)
			);
		}
	}

	#[test]
	fn serialization_error_round_trips_json_rpc_only() {
		let c = ErrorCode::SerializationError;
		assert_eq!(
			ErrorCode::from_json_rpc_code(c.to_json_rpc_code()),
			Some(c)
		);
		assert_eq!(
			ErrorCode::from_http_status(c.to_http_status()),
			Some(ErrorCode::BadRequest)
		);
		assert_eq!(
			ErrorCode::from_grpc_code(c.to_grpc_code()),
			Some(ErrorCode::BadRequest)
		);
	}

	#[test]
	fn routing_and_connection_error_never_round_trip() {
		for c in [ErrorCode::RoutingError, ErrorCode::ConnectionError] {
			assert_ne!(ErrorCode::from_http_status(c.to_http_status()), Some(c));
			assert_ne!(ErrorCode::from_grpc_code(c.to_grpc_code()), Some(c));
			assert_ne!(ErrorCode::from_json_rpc_code(c.to_json_rpc_code()), Some(c));
		}
	}

	#[test]
	fn cause_chain_records_every_hop() {
		let root = Error::new(ErrorCode::ConnectionError, "dial refused");
		let mid = Error::with_cause(ErrorCode::ServiceUnavailable, "backend unreachable", root);
		let top = Error::with_cause(ErrorCode::InternalError, "call failed", mid);

		assert_eq!(
			top.chain(),
			vec!["call failed", "backend unreachable", "dial refused"]
		);
	}

	#[test]
	fn error_body_omits_cause_when_absent() {
		let e = Error::new(ErrorCode::NotFound, "no such service");
		let body = ErrorBody::from(&e);
		assert!(body.cause.is_none());
	}
}
