//! Frame encode/decode for the service protocol.
//!
//! One WebSocket binary frame carries exactly one protobuf message. A decode
//! failure is a terminal session condition; the service never recovers a
//! stream once framing is lost.

use prost::Message as _;
use thiserror::Error;

use super::messages::{TranslateRequest, TranslateResponse};

/// A frame the service sent could not be parsed.
#[derive(Debug, Error)]
#[error("undecodable service frame ({raw_len} bytes): {cause}")]
pub struct ProtocolError {
    pub raw_len: usize,
    #[source]
    pub cause: prost::DecodeError,
}

/// Serialize a request into one WebSocket binary frame.
pub fn encode(request: &TranslateRequest) -> Vec<u8> {
    request.encode_to_vec()
}

/// Parse one WebSocket binary frame into a response.
pub fn decode(bytes: &[u8]) -> Result<TranslateResponse, ProtocolError> {
    TranslateResponse::decode(bytes).map_err(|cause| ProtocolError {
        raw_len: bytes.len(),
        cause,
    })
}
