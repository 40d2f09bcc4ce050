//! Audio I/O
//!
//! Real-time capture and playback via `cpal`:
//! - capture: 16 kHz mono, fixed 80 ms blocks, converted to PCM16 chunks
//! - playback: 48 kHz mono float32, FIFO-fed 10 ms callback
//!
//! The cpal streams are `!Send` on some platforms, so both live on a
//! dedicated audio thread ([`io_thread`]); the rest of the engine talks to
//! them through `Send + Sync` handles.

pub mod capture;
pub mod devices;
pub mod io_thread;
pub mod playback;

pub use capture::{AudioChunk, CaptureBridge};
pub use devices::DeviceInfo;
pub use io_thread::AudioIoHandle;
pub use playback::PlayerHandle;

/// Capture sample rate expected by the service.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Samples per capture chunk (80 ms at 16 kHz mono).
pub const CHUNK_SAMPLES: usize = 1280;

/// Bytes per capture chunk (PCM16).
pub const CHUNK_BYTES: usize = CHUNK_SAMPLES * 2;

/// Playback sample rate delivered by the service.
pub const PLAYBACK_SAMPLE_RATE: u32 = 48_000;

/// Playback callback block (10 ms at 48 kHz).
pub const PLAYBACK_BLOCK_SAMPLES: usize = 480;

/// Convert float samples to 16-bit little-endian PCM, clipping at ±1.0.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Reinterpret 16-bit little-endian PCM as float samples in [-1, 1).
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}
