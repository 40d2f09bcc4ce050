//! Receiver / reassembler.
//!
//! Runs until the socket closes or a terminal event arrives. TTS sentences
//! are reassembled across `TtsSentenceStart` / `TtsResponse` /
//! `TtsSentenceEnd` and enqueued for playback as one frame each; subtitle
//! fragments are buffered and emitted as whole sentences. A decode failure
//! is treated exactly like `SessionFailed`, so the supervisor reconnects.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::heartbeat::PingState;
use crate::audio::{pcm16_to_f32, PlayerHandle};
use crate::engine::SubscriberSet;
use crate::health::{HealthMonitor, SessionState};
use crate::protocol::{codec, EventType};

/// Error substrings that mark a session loss as recoverable pacing trouble
/// rather than a real fault.
const RECOVERABLE_MARKERS: [&str; 2] = ["AudioSendSlow", "audio not enough"];

pub(crate) struct ReceiverContext {
    pub serial: u64,
    pub player: PlayerHandle,
    pub subscribers: Arc<SubscriberSet>,
    pub health: Arc<HealthMonitor>,
    pub active: Arc<AtomicBool>,
    pub ping: Arc<PingState>,
}

enum Flow {
    Continue,
    Stop,
}

/// Reassembly state for the one in-flight TTS sentence and the two subtitle
/// streams.
struct Reassembly {
    sentence: Option<(i64, Vec<u8>)>,
    source_fragments: Vec<String>,
    translation_fragments: Vec<String>,
    sentence_count: u64,
}

impl Reassembly {
    fn new() -> Self {
        Self {
            sentence: None,
            source_fragments: Vec::new(),
            translation_fragments: Vec::new(),
            sentence_count: 0,
        }
    }
}

/// Receiver task body.
pub(crate) async fn run_receiver<S, E>(mut stream: S, ctx: ReceiverContext)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut assembly = Reassembly::new();

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                if matches!(handle_frame(&data, &mut assembly, &ctx), Flow::Stop) {
                    break;
                }
            }
            Ok(Message::Pong(_)) => ctx.ping.on_pong(&ctx.health),
            Ok(Message::Close(_)) => {
                info!(session = ctx.serial, "socket closed by service");
                ctx.health.set_session_state(SessionState::Error);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(session = ctx.serial, "receive failed: {e}");
                ctx.health.record_error(&e.to_string());
                ctx.health.set_session_state(SessionState::Error);
                break;
            }
        }
    }

    // Partial sentences never reach the playback engine.
    if let Some((sequence, _)) = assembly.sentence.take() {
        debug!(
            session = ctx.serial,
            sequence, "discarding partial TTS sentence on teardown"
        );
    }
    ctx.active.store(false, Ordering::SeqCst);
    debug!(
        session = ctx.serial,
        sentences = assembly.sentence_count,
        "receiver task finished"
    );
}

fn handle_frame(data: &[u8], assembly: &mut Reassembly, ctx: &ReceiverContext) -> Flow {
    let response = match codec::decode(data) {
        Ok(response) => response,
        Err(e) => {
            // Framing is lost; nothing after this frame can be trusted.
            error!(session = ctx.serial, "{e}");
            ctx.health.record_error(&e.to_string());
            ctx.health.set_session_state(SessionState::Error);
            return Flow::Stop;
        }
    };

    match response.event() {
        EventType::AudioMuted => {
            debug!(
                session = ctx.serial,
                "input muted for {} ms", response.muted_duration_ms
            );
            Flow::Continue
        }

        EventType::SessionFailed | EventType::SessionCanceled => {
            let message = response.message();
            error!(session = ctx.serial, "session failed: {message}");
            ctx.health.record_error(message);
            if RECOVERABLE_MARKERS.iter().any(|m| message.contains(m)) {
                warn!(
                    session = ctx.serial,
                    "audio upload fell behind service time, scheduling reconnect"
                );
            }
            ctx.health.set_session_state(SessionState::Error);
            Flow::Stop
        }

        EventType::SessionFinished => {
            info!(
                session = ctx.serial,
                "session finished after {} sentences", assembly.sentence_count
            );
            ctx.health.set_session_state(SessionState::Idle);
            Flow::Stop
        }

        EventType::TtsSentenceStart => {
            if let Some((sequence, _)) = assembly.sentence.take() {
                warn!(
                    session = ctx.serial,
                    sequence, "dropping unfinished TTS sentence"
                );
            }
            assembly.sentence = Some((response.sequence(), Vec::new()));
            Flow::Continue
        }

        EventType::TtsResponse => {
            if let Some((_, buffer)) = assembly.sentence.as_mut() {
                buffer.extend_from_slice(&response.data);
            }
            Flow::Continue
        }

        EventType::TtsSentenceEnd => {
            if let Some((sequence, buffer)) = assembly.sentence.take() {
                if !buffer.is_empty() {
                    let pcm = pcm16_to_f32(&buffer);
                    ctx.player.enqueue(pcm);
                    ctx.health.record_sentence();
                    assembly.sentence_count += 1;
                    debug!(
                        session = ctx.serial,
                        sequence,
                        bytes = buffer.len(),
                        "sentence queued for playback"
                    );
                }
            }
            Flow::Continue
        }

        EventType::SourceSubtitleStart => {
            assembly.source_fragments.clear();
            Flow::Continue
        }

        EventType::SourceSubtitleResponse => {
            let text = response.text.trim();
            if !text.is_empty() {
                assembly.source_fragments.push(text.to_string());
            }
            Flow::Continue
        }

        EventType::SourceSubtitleEnd => {
            if !assembly.source_fragments.is_empty() {
                let text = assembly.source_fragments.join("");
                info!(session = ctx.serial, "[source] {text}");
                ctx.subscribers.emit_source(&text);
                assembly.source_fragments.clear();
            }
            Flow::Continue
        }

        EventType::TranslationSubtitleStart => {
            assembly.translation_fragments.clear();
            Flow::Continue
        }

        EventType::TranslationSubtitleResponse => {
            let text = response.text.trim();
            if !text.is_empty() {
                assembly.translation_fragments.push(text.to_string());
            }
            Flow::Continue
        }

        EventType::TranslationSubtitleEnd => {
            if !assembly.translation_fragments.is_empty() {
                let text = assembly.translation_fragments.join(" ");
                info!(session = ctx.serial, "[translation] {text}");
                ctx.subscribers.emit_translation(&text);
                assembly.translation_fragments.clear();
            }
            Flow::Continue
        }

        // SessionStarted was consumed during session setup; anything else
        // the service sends is ignored rather than fatal.
        other => {
            debug!(session = ctx.serial, "ignoring event {other:?}");
            Flow::Continue
        }
    }
}
