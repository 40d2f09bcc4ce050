//! Microphone capture.
//!
//! The cpal input callback converts each fixed 80 ms float block to a PCM16
//! [`AudioChunk`] and hands it to the [`CaptureBridge`]. While no session is
//! ready the bridge retains chunks in a pre-buffer ring so the leading words
//! of an utterance survive session setup; once a send queue is attached the
//! pre-buffer is drained first, preserving capture order.
//!
//! Everything the audio thread touches is non-blocking: `try_send` into the
//! bounded queue and one short mutex section.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use super::{f32_to_pcm16, CAPTURE_SAMPLE_RATE, CHUNK_SAMPLES};
use crate::error::EngineError;

/// Pre-buffer capacity: 30 chunks × 80 ms ≈ 2.4 s of leading audio.
pub const PREBUFFER_CAPACITY: usize = 30;

/// Emit an audio-level log line every this many chunks (≈ 4 s).
const LEVEL_LOG_INTERVAL: u64 = 50;

/// One 80 ms slice of captured audio: 1280 samples of little-endian PCM16.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl AudioChunk {
    pub fn from_f32(samples: &[f32]) -> Self {
        Self {
            data: f32_to_pcm16(samples),
            captured_at: Instant::now(),
        }
    }

    /// An 80 ms chunk of pure silence.
    pub fn silence() -> Self {
        Self {
            data: vec![0u8; CHUNK_SAMPLES * 2],
            captured_at: Instant::now(),
        }
    }
}

struct BridgeInner {
    prebuffer: VecDeque<AudioChunk>,
    queue: Option<mpsc::Sender<AudioChunk>>,
}

/// Hand-off point between the capture callback and the session send queue.
///
/// The single mutex makes queue attachment and pre-buffer drain atomic with
/// respect to the callback, so no chunk can bypass older pre-buffered audio.
#[derive(Clone)]
pub struct CaptureBridge {
    inner: Arc<Mutex<BridgeInner>>,
}

impl Default for CaptureBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBridge {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BridgeInner {
                prebuffer: VecDeque::with_capacity(PREBUFFER_CAPACITY),
                queue: None,
            })),
        }
    }

    /// Called from the audio callback for every captured chunk.
    pub fn push(&self, chunk: AudioChunk) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_some() {
            drain_locked(&mut inner);
        }
        match inner.queue.clone() {
            Some(tx) => {
                if !inner.prebuffer.is_empty() {
                    // Older chunks are still pending; keep capture order.
                    buffer_chunk(&mut inner, chunk);
                    return;
                }
                match tx.try_send(chunk) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("send queue full, skipping audio chunk");
                    }
                    Err(TrySendError::Closed(chunk)) => {
                        debug!("send queue closed, reverting to pre-buffer");
                        inner.queue = None;
                        buffer_chunk(&mut inner, chunk);
                    }
                }
            }
            None => buffer_chunk(&mut inner, chunk),
        }
    }

    /// Install the session send queue, draining the pre-buffer into it first.
    pub fn attach_queue(&self, tx: mpsc::Sender<AudioChunk>) {
        let mut inner = self.inner.lock().unwrap();
        let pending = inner.prebuffer.len();
        inner.queue = Some(tx);
        drain_locked(&mut inner);
        if pending > 0 {
            info!(
                "drained {} pre-buffered chunks into the send queue",
                pending - inner.prebuffer.len()
            );
        }
    }

    /// Detach the send queue; subsequent chunks pre-buffer again.
    pub fn detach_queue(&self) {
        self.inner.lock().unwrap().queue = None;
    }

    pub fn prebuffered(&self) -> usize {
        self.inner.lock().unwrap().prebuffer.len()
    }
}

fn buffer_chunk(inner: &mut BridgeInner, chunk: AudioChunk) {
    if inner.prebuffer.len() >= PREBUFFER_CAPACITY {
        inner.prebuffer.pop_front();
    }
    inner.prebuffer.push_back(chunk);
}

fn drain_locked(inner: &mut BridgeInner) {
    while let Some(tx) = inner.queue.clone() {
        let Some(chunk) = inner.prebuffer.pop_front() else {
            break;
        };
        match tx.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(chunk)) => {
                inner.prebuffer.push_front(chunk);
                warn!("send queue full while draining pre-buffer");
                break;
            }
            Err(TrySendError::Closed(chunk)) => {
                inner.prebuffer.push_front(chunk);
                inner.queue = None;
                break;
            }
        }
    }
}

/// Build the cpal input stream for the given device. Must be called (and the
/// returned stream kept) on the audio thread.
pub(super) fn build_stream(device: &cpal::Device, bridge: CaptureBridge) -> Result<Stream, EngineError> {
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(CAPTURE_SAMPLE_RATE),
        buffer_size: BufferSize::Fixed(CHUNK_SAMPLES as u32),
    };
    info!(
        device = %device_name,
        rate = CAPTURE_SAMPLE_RATE,
        block = CHUNK_SAMPLES,
        "opening capture stream"
    );

    let err_fn = |err: cpal::StreamError| error!("audio input stream error: {err}");
    let mut counter: u64 = 0;

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter += 1;
                if counter % LEVEL_LOG_INTERVAL == 0 {
                    let level =
                        data.iter().map(|s| s.abs()).sum::<f32>() / data.len().max(1) as f32;
                    let tag = if level > 0.001 { "voice" } else { "silence" };
                    info!("[audio input] chunk {counter}, level {level:.6} ({tag})");
                }
                bridge.push(AudioChunk::from_f32(data));
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Device(e.to_string()))
}
