//! PCM playback engine.
//!
//! A plain FIFO of float32 frames drained by the 10 ms output callback,
//! no resampling, no mixing. Two places shape samples to keep the output
//! click-free:
//! - each enqueued sentence gets a ≤ 2 ms cosine tail fade;
//! - a mid-callback underrun fades the last played sample to zero within
//!   16 samples (~0.3 ms); an empty FIFO plays pure silence.

use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex};

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use tracing::{error, info, warn};

use super::{PLAYBACK_BLOCK_SAMPLES, PLAYBACK_SAMPLE_RATE};
use crate::error::EngineError;
use crate::health::HealthMonitor;

/// FIFO capacity in frames (typically one TTS sentence each).
pub const MAX_FIFO_FRAMES: usize = 50;

/// End-of-sentence fade length cap: 96 samples ≈ 2 ms at 48 kHz.
const TAIL_FADE_MAX: usize = 96;

/// Underrun fade length: 16 samples ≈ 0.3 ms at 48 kHz.
const UNDERRUN_FADE_SAMPLES: usize = 16;

struct PlayerShared {
    fifo: VecDeque<Vec<f32>>,
    /// Read offset into the front frame (partial frames are split).
    front_pos: usize,
    /// Last sample actually played, for the underrun fade.
    last_sample: f32,
}

/// `Send + Sync` handle onto the playback FIFO. Producers (the receiver
/// task) enqueue whole sentences; the output callback drains.
#[derive(Clone)]
pub struct PlayerHandle {
    inner: Arc<Mutex<PlayerShared>>,
    health: Arc<HealthMonitor>,
}

impl PlayerHandle {
    pub fn new(health: Arc<HealthMonitor>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlayerShared {
                fifo: VecDeque::with_capacity(MAX_FIFO_FRAMES),
                front_pos: 0,
                last_sample: 0.0,
            })),
            health,
        }
    }

    /// Queue one sentence of float32 samples for playback.
    pub fn enqueue(&self, mut samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        // Cosine tail fade prevents end-of-sentence clicks; skipped for very
        // short frames where it would eat the whole signal.
        if samples.len() > TAIL_FADE_MAX {
            let fade = TAIL_FADE_MAX.min(samples.len() / 20);
            let start = samples.len() - fade;
            for (i, sample) in samples[start..].iter_mut().enumerate() {
                let t = i as f32 / fade as f32 * FRAC_PI_2;
                *sample *= t.cos();
            }
        }

        let count = samples.len() as u64;
        let depth;
        {
            let mut shared = self.inner.lock().unwrap();
            if shared.fifo.len() >= MAX_FIFO_FRAMES {
                if let Some(dropped) = shared.fifo.pop_front() {
                    shared.front_pos = 0;
                    warn!("playback buffer full, dropping {} samples", dropped.len());
                }
            }
            shared.fifo.push_back(samples);
            depth = shared.fifo.len();
        }
        self.health.add_audio_samples(count);
        self.health.set_audio_buffer_depth(depth);
    }

    /// Fill one output block from the FIFO. Runs on the audio callback
    /// thread; the critical section is a handful of memcpys.
    pub fn fill(&self, out: &mut [f32]) {
        let mut guard = self.inner.lock().unwrap();
        let shared = &mut *guard;
        let needed = out.len();
        let mut filled = 0;

        while filled < needed {
            let Some(front) = shared.fifo.front() else {
                break;
            };
            let take = (front.len() - shared.front_pos).min(needed - filled);
            out[filled..filled + take]
                .copy_from_slice(&front[shared.front_pos..shared.front_pos + take]);
            filled += take;
            shared.front_pos += take;
            shared.last_sample = out[filled - 1];
            if shared.front_pos >= front.len() {
                shared.fifo.pop_front();
                shared.front_pos = 0;
            }
        }

        if filled == 0 {
            // Empty at callback start: silence, no extrapolation.
            out.fill(0.0);
            shared.last_sample = 0.0;
        } else if filled < needed {
            out[filled..].fill(0.0);
            // Underrun after partial delivery: brief cosine fade to zero.
            let fade = UNDERRUN_FADE_SAMPLES.min(needed - filled);
            let start = shared.last_sample;
            if start != 0.0 {
                for (i, sample) in out[filled..filled + fade].iter_mut().enumerate() {
                    let t = (i + 1) as f32 / fade as f32 * FRAC_PI_2;
                    *sample = start * t.cos();
                }
            }
            shared.last_sample = 0.0;
        }
    }

    /// Discard all buffered audio.
    pub fn clear(&self) {
        {
            let mut shared = self.inner.lock().unwrap();
            shared.fifo.clear();
            shared.front_pos = 0;
            shared.last_sample = 0.0;
        }
        self.health.set_audio_buffer_depth(0);
    }

    /// Current FIFO depth in frames.
    pub fn depth(&self) -> usize {
        self.inner.lock().unwrap().fifo.len()
    }
}

/// Build the cpal output stream for the given device. Must be called (and
/// the returned stream kept) on the audio thread.
pub(super) fn build_stream(
    device: &cpal::Device,
    player: PlayerHandle,
    virtual_device_name: Option<&str>,
) -> Result<Stream, EngineError> {
    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(PLAYBACK_SAMPLE_RATE),
        buffer_size: BufferSize::Fixed(PLAYBACK_BLOCK_SAMPLES as u32),
    };
    info!(
        device = %device_name,
        rate = PLAYBACK_SAMPLE_RATE,
        block = PLAYBACK_BLOCK_SAMPLES,
        "opening playback stream"
    );

    if let Some(virtual_name) = virtual_device_name {
        if device_name.contains(virtual_name) {
            info!(
                "conference mode: output routed to virtual device {:?}; point the \
                 conferencing app's microphone at it",
                device_name
            );
        }
    }

    let err_fn = |err: cpal::StreamError| error!("audio output stream error: {err}");

    device
        .build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                player.fill(out);
            },
            err_fn,
            None,
        )
        .map_err(|e| EngineError::Device(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> PlayerHandle {
        PlayerHandle::new(Arc::new(HealthMonitor::new()))
    }

    #[test]
    fn test_fill_splits_partial_frames() {
        let player = player();
        player.enqueue(vec![0.5; 10]);

        let mut out = [0.0f32; 6];
        player.fill(&mut out);
        assert_eq!(out, [0.5; 6]);
        assert_eq!(player.depth(), 1);

        // Remaining 4 samples, then an underrun fade and silence.
        let mut out = [1.0f32; 32];
        player.fill(&mut out);
        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(player.depth(), 0);
        // Fade decays monotonically from the last played sample toward zero.
        assert!(out[4] < 0.5);
        assert!(out[4] > out[10]);
        assert_eq!(&out[20..], &[0.0; 12]);
    }

    #[test]
    fn test_empty_fifo_plays_silence() {
        let player = player();
        let mut out = [0.7f32; 480];
        player.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_enqueue_applies_tail_fade() {
        let player = player();
        let samples = vec![1.0f32; 4800];
        player.enqueue(samples);

        let mut out = vec![0.0f32; 4800];
        player.fill(&mut out);
        // Fade covers the last 96 samples; the body is untouched.
        assert_eq!(out[4800 - 97], 1.0);
        assert!(out[4799] < 0.05);
        assert!(out[4799] >= 0.0);
        assert!(out[4750] < out[4704 + 1]);
    }

    #[test]
    fn test_short_frames_skip_tail_fade() {
        let player = player();
        player.enqueue(vec![1.0f32; 96]);
        let mut out = [0.0f32; 96];
        player.fill(&mut out);
        assert_eq!(out, [1.0; 96]);
    }

    #[test]
    fn test_fifo_cap_drops_oldest() {
        let player = player();
        for i in 0..(MAX_FIFO_FRAMES + 5) {
            player.enqueue(vec![i as f32; 8]);
        }
        assert_eq!(player.depth(), MAX_FIFO_FRAMES);

        let mut out = [0.0f32; 8];
        player.fill(&mut out);
        // Frames 0..5 were dropped oldest-first.
        assert_eq!(out[0], 5.0);
    }

    #[test]
    fn test_clear_empties_fifo() {
        let player = player();
        player.enqueue(vec![0.5; 480]);
        player.clear();
        assert_eq!(player.depth(), 0);

        let mut out = [0.9f32; 16];
        player.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_sample_counter_feeds_health() {
        let health = Arc::new(HealthMonitor::new());
        let player = PlayerHandle::new(Arc::clone(&health));
        player.enqueue(vec![0.1; 1000]);
        assert_eq!(health.snapshot().total_audio_samples, 1000);
        assert_eq!(health.snapshot().audio_buffer_size, 1);
    }
}
