//! A raw, codec-less gRPC unary call (spec §2, §9): the services this
//! framework proxies are arbitrary polyglot RPCs, so there is no
//! `.proto` available at compile time to generate a strongly-typed
//! client from. [`RawCodec`] stands in for the usual `prost`-generated
//! codec and passes the adapter's already-encoded payload straight
//! through, the same trick `protoc-gen-tonic` output uses under the
//! hood, just with `Bytes` instead of a message type.
//!
//! Grounded on the teacher's `control::GrpcChannel`, which similarly
//! builds a raw `http::Request`/`http::Response` around an arbitrary
//! payload rather than going through generated stubs.

use bytes::{Buf, Bytes};
use http::uri::PathAndQuery;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::{Request, Status};

use super::Dispatcher;
use crate::errors::Error;
use crate::pool::Transport;

#[derive(Debug, Clone, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
	type Encode = Bytes;
	type Decode = Bytes;
	type Encoder = RawCodec;
	type Decoder = RawCodec;

	fn encoder(&mut self) -> Self::Encoder {
		RawCodec
	}

	fn decoder(&mut self) -> Self::Decoder {
		RawCodec
	}
}

impl Encoder for RawCodec {
	type Item = Bytes;
	type Error = Status;

	fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
		dst.put_slice(&item);
		Ok(())
	}
}

impl Decoder for RawCodec {
	type Item = Bytes;
	type Error = Status;

	fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
		if src.remaining() == 0 {
			return Ok(None);
		}
		Ok(Some(src.copy_to_bytes(src.remaining())))
	}
}

pub struct GrpcDispatcher;

#[async_trait::async_trait]
impl Dispatcher for GrpcDispatcher {
	async fn dispatch(&self, transport: &Transport, service: &str, method: &str, payload: Bytes) -> Result<Bytes, Error> {
		let Transport::Grpc(channel) = transport else {
			return Err(Error::internal("GrpcDispatcher received a non-gRPC transport"));
		};

		let mut grpc = tonic::client::Grpc::new(channel.clone());
		grpc
			.ready()
			.await
			.map_err(|e| Error::connection(format!("gRPC channel not ready: {e}")))?;

		// `service`/`method` are the wire-level names a fully-qualified
		// gRPC path needs, i.e. the adapter's internal `service`/`method`
		// fields after routing, not the external REST-style names seen at
		// the edge.
		let path: PathAndQuery = format!("/{service}/{method}")
			.parse()
			.map_err(|e| Error::bad_request(format!("invalid gRPC path for {service}.{method}: {e}")))?;

		let response = grpc
			.unary(Request::new(payload), path, RawCodec)
			.await
			.map_err(status_to_error)?;

		Ok(response.into_inner())
	}
}

fn status_to_error(status: Status) -> Error {
	let code = crate::errors::ErrorCode::from_grpc_code(status.code() as i32).unwrap_or(crate::errors::ErrorCode::InternalError);
	Error::new(code, status.message().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_to_error_maps_unmapped_codes_to_internal_error() {
		let status = Status::new(tonic::Code::DataLoss, "corrupt frame");
		let err = status_to_error(status);
		assert_eq!(err.message, "corrupt frame");
	}

	#[test]
	fn status_to_error_preserves_a_mapped_code() {
		let status = Status::new(tonic::Code::NotFound, "missing");
		let err = status_to_error(status);
		assert_eq!(err.code, crate::errors::ErrorCode::NotFound);
	}
}
