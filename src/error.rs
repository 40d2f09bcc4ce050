//! Error taxonomy for the translation engine.
//!
//! Configuration and device errors surface synchronously from `start()`;
//! transport and protocol failures are handled by the supervisor and only
//! recorded here for reporting.

use thiserror::Error;

use crate::protocol::{EventType, ProtocolError};

/// Configuration problems that prevent the engine from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("API credentials missing: set API_APP_KEY and API_ACCESS_KEY")]
    MissingCredentials,

    #[error("source and target language must differ (both are {0:?})")]
    SameLanguage(String),

    #[error("unsupported language code {0:?} (expected zh or en)")]
    UnsupportedLanguage(String),

    #[error("credential contains characters not permitted in an HTTP header")]
    InvalidHeaderValue,
}

/// Errors produced by the translation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connect timed out after {0} s")]
    ConnectTimeout(u64),

    #[error("session setup failed: expected SessionStarted, got {0:?}")]
    SessionSetup(EventType),

    #[error("audio worker thread died")]
    AudioThreadDied,
}
