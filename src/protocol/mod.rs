//! Wire protocol for the translation service.
//!
//! The service speaks protobuf event frames over a single WebSocket. Message
//! shapes live in [`messages`]; framing helpers and the decode error live in
//! [`codec`].

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, ProtocolError};
pub use messages::{
    EventType, RequestMeta, RequestOptions, ResponseMeta, SourceAudio, TargetAudio,
    TranslateRequest, TranslateResponse, UserMeta,
};
