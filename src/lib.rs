//! VoiceBridge - realtime speech-to-speech translation engine
//!
//! Captures microphone audio at 16 kHz, streams it over a persistent
//! WebSocket session to a cloud translation service, and plays back the
//! translated speech at 48 kHz together with source/translation subtitles.
//! Supports conference mode by routing playback to a virtual loopback
//! device.
//!
//! # Example
//!
//! ```ignore
//! use voicebridge::{Config, Translator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let engine = Translator::new(config);
//!     engine.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod protocol;
pub mod session;

// Re-export the types most callers need.
pub use config::Config;
pub use engine::{EngineState, SubtitleSink, Translator};
pub use error::{ConfigError, EngineError};
pub use health::{HealthMonitor, HealthSnapshot};
