//! Protobuf message shapes exchanged with the translation service.
//!
//! Hand-written prost structs: the schema is small and stable enough that
//! carrying generated code (and a protoc build step) is not worth it.

use crate::config::Config;

/// Event discriminator carried by every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum EventType {
    None = 0,

    // Client → server
    StartSession = 1,
    FinishSession = 2,
    TaskRequest = 3,

    // Server → client: session lifecycle
    SessionStarted = 50,
    SessionFailed = 51,
    SessionCanceled = 52,
    SessionFinished = 53,
    AudioMuted = 54,

    // Server → client: synthesized speech
    TtsSentenceStart = 60,
    TtsResponse = 61,
    TtsSentenceEnd = 62,

    // Server → client: subtitles
    SourceSubtitleStart = 70,
    SourceSubtitleResponse = 71,
    SourceSubtitleEnd = 72,
    TranslationSubtitleStart = 73,
    TranslationSubtitleResponse = 74,
    TranslationSubtitleEnd = 75,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMeta {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(int64, tag = "2")]
    pub sequence: i64,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseMeta {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(int64, tag = "2")]
    pub sequence: i64,
    #[prost(string, tag = "3")]
    pub message: String,
}

/// Uplink audio description; `binary_data` carries one 80 ms PCM16 chunk on
/// `TaskRequest` frames.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SourceAudio {
    #[prost(string, tag = "1")]
    pub format: String,
    #[prost(int32, tag = "2")]
    pub rate: i32,
    #[prost(int32, tag = "3")]
    pub bits: i32,
    #[prost(int32, tag = "4")]
    pub channel: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub binary_data: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TargetAudio {
    #[prost(string, tag = "1")]
    pub format: String,
    #[prost(int32, tag = "2")]
    pub rate: i32,
    #[prost(int32, tag = "3")]
    pub channel: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestOptions {
    #[prost(string, tag = "1")]
    pub mode: String,
    #[prost(string, tag = "2")]
    pub source_language: String,
    #[prost(string, tag = "3")]
    pub target_language: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserMeta {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub did: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TranslateRequest {
    #[prost(enumeration = "EventType", tag = "1")]
    pub event: i32,
    #[prost(message, optional, tag = "2")]
    pub request_meta: Option<RequestMeta>,
    #[prost(message, optional, tag = "3")]
    pub source_audio: Option<SourceAudio>,
    #[prost(message, optional, tag = "4")]
    pub target_audio: Option<TargetAudio>,
    #[prost(message, optional, tag = "5")]
    pub request: Option<RequestOptions>,
    #[prost(message, optional, tag = "6")]
    pub user: Option<UserMeta>,
    #[prost(bool, tag = "7")]
    pub denoise: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TranslateResponse {
    #[prost(enumeration = "EventType", tag = "1")]
    pub event: i32,
    #[prost(message, optional, tag = "2")]
    pub response_meta: Option<ResponseMeta>,
    /// TTS payload: raw mono 48 kHz 16-bit little-endian PCM.
    #[prost(bytes = "vec", tag = "3")]
    pub data: Vec<u8>,
    /// Subtitle text fragment.
    #[prost(string, tag = "4")]
    pub text: String,
    #[prost(int64, tag = "5")]
    pub muted_duration_ms: i64,
}

impl TranslateRequest {
    /// Build the `StartSession` request that opens a translation session.
    pub fn start_session(session_id: &str, config: &Config) -> Self {
        Self {
            event: EventType::StartSession as i32,
            request_meta: Some(RequestMeta {
                session_id: session_id.to_string(),
                ..RequestMeta::default()
            }),
            source_audio: Some(SourceAudio {
                format: "wav".to_string(),
                rate: config.audio.sample_rate as i32,
                bits: config.audio.bits as i32,
                channel: config.audio.channels as i32,
                binary_data: Vec::new(),
            }),
            target_audio: Some(TargetAudio {
                format: config.target_audio.format.clone(),
                rate: config.target_audio.rate as i32,
                // Mono avoids channel mismatches on the playback path.
                channel: 1,
            }),
            request: Some(RequestOptions {
                mode: config.translation.mode.clone(),
                source_language: config.translation.source_language.clone(),
                target_language: config.translation.target_language.clone(),
            }),
            user: Some(UserMeta {
                uid: "simple_realtime".to_string(),
                did: "simple_realtime".to_string(),
            }),
            denoise: true,
        }
    }

    /// Build one `TaskRequest` frame carrying a captured PCM16 chunk.
    pub fn audio_chunk(session_id: &str, pcm: Vec<u8>) -> Self {
        Self {
            event: EventType::TaskRequest as i32,
            request_meta: Some(RequestMeta {
                session_id: session_id.to_string(),
                ..RequestMeta::default()
            }),
            source_audio: Some(SourceAudio {
                binary_data: pcm,
                ..SourceAudio::default()
            }),
            ..TranslateRequest::default()
        }
    }
}

impl TranslateResponse {
    /// Sequence number identifying which TTS sentence a frame belongs to.
    pub fn sequence(&self) -> i64 {
        self.response_meta.as_ref().map_or(0, |meta| meta.sequence)
    }

    /// Error text carried on `SessionFailed` / `SessionCanceled`.
    pub fn message(&self) -> &str {
        self.response_meta
            .as_ref()
            .map_or("", |meta| meta.message.as_str())
    }
}
