//! Paced audio sender.
//!
//! The service terminates the session with an `AudioSendSlow` error when the
//! uploaded audio timeline drifts behind wall-clock time. The sender
//! therefore writes exactly one 80 ms chunk per 80 ms: captured audio when
//! the queue yields within 10 ms, synthesized silence otherwise, so the
//! service's audio clock keeps advancing while the speaker pauses.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use crate::audio::AudioChunk;
use crate::health::HealthMonitor;
use crate::protocol::{codec, TranslateRequest};

/// Bounded send-queue capacity between capture and the sender.
pub const SEND_QUEUE_CAPACITY: usize = 300;

/// Target cadence: one chunk per 80 ms of wall clock.
pub const CHUNK_INTERVAL: Duration = Duration::from_millis(80);

/// How long to wait for a captured chunk before padding with silence.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Falling this far behind the send deadline resets the time base.
const TIME_BASE_RESET: Duration = Duration::from_millis(500);

/// Wall-clock pacing state. The base is initialised at the first send and
/// advanced by one interval per send; sustained lag beyond 500 ms resets
/// the base instead of producing a catch-up burst.
struct Pacer {
    next_send_time: Option<Instant>,
}

impl Pacer {
    fn new() -> Self {
        Self {
            next_send_time: None,
        }
    }

    /// Account for one completed send; returns how long to sleep before the
    /// next one.
    fn after_send(&mut self, now: Instant) -> Duration {
        let Some(deadline) = self.next_send_time.as_mut() else {
            self.next_send_time = Some(now + CHUNK_INTERVAL);
            return CHUNK_INTERVAL;
        };
        *deadline += CHUNK_INTERVAL;
        if *deadline > now {
            *deadline - now
        } else {
            if now.duration_since(*deadline) > TIME_BASE_RESET {
                warn!(
                    "resetting time base (behind by {:.2} s)",
                    now.duration_since(*deadline).as_secs_f64()
                );
                *deadline = now;
            }
            Duration::ZERO
        }
    }
}

/// Sender task: drain the bounded queue at exactly one chunk per 80 ms.
pub(crate) async fn run_sender<S>(
    mut queue: mpsc::Receiver<AudioChunk>,
    sink: Arc<tokio::sync::Mutex<S>>,
    session_id: String,
    serial: u64,
    active: Arc<AtomicBool>,
    health: Arc<HealthMonitor>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut pacer = Pacer::new();
    let mut chunk_count: u64 = 0;

    while active.load(Ordering::SeqCst) {
        let chunk = match timeout(QUEUE_POLL_TIMEOUT, queue.recv()).await {
            Ok(Some(chunk)) => {
                health.record_audio_latency(chunk.captured_at.elapsed());
                chunk
            }
            Ok(None) => {
                debug!(session = serial, "send queue detached");
                break;
            }
            // Quiet microphone: pad with silence to keep the timeline moving.
            Err(_) => AudioChunk::silence(),
        };
        health.set_send_queue_depth(queue.len());

        let frame = codec::encode(&TranslateRequest::audio_chunk(&session_id, chunk.data));
        if let Err(e) = sink.lock().await.send(Message::binary(frame)).await {
            error!(session = serial, "audio send failed: {e}");
            health.record_error(&e.to_string());
            active.store(false, Ordering::SeqCst);
            break;
        }
        chunk_count += 1;

        let pause = pacer.after_send(Instant::now());
        if !pause.is_zero() {
            sleep(pause).await;
        }
    }

    debug!(session = serial, chunks = chunk_count, "sender task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;
    use crate::protocol::{EventType, TranslateRequest as Req};

    #[test]
    fn test_pacer_steady_state() {
        let mut pacer = Pacer::new();
        let mut now = Instant::now();
        // First send establishes the base.
        assert_eq!(pacer.after_send(now), CHUNK_INTERVAL);
        // Perfectly on-time sends always sleep one full interval.
        for _ in 0..100 {
            now += CHUNK_INTERVAL;
            assert_eq!(pacer.after_send(now), CHUNK_INTERVAL);
        }
    }

    #[test]
    fn test_pacer_absorbs_jitter() {
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.after_send(start);
        // A send 30 ms late gets a 50 ms sleep: the schedule, not the jitter,
        // dictates the cadence.
        let pause = pacer.after_send(start + Duration::from_millis(110));
        assert_eq!(pause, Duration::from_millis(50));
        // The next on-schedule send is back to the full interval.
        let pause = pacer.after_send(start + Duration::from_millis(160));
        assert_eq!(pause, CHUNK_INTERVAL);
    }

    #[test]
    fn test_pacer_resets_after_long_stall() {
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.after_send(start);
        // One second behind schedule: no catch-up burst, base snaps to now.
        let stalled = start + Duration::from_millis(1080) + Duration::from_secs(1);
        assert_eq!(pacer.after_send(stalled), Duration::ZERO);
        // Schedule resumes from the stalled instant.
        let pause = pacer.after_send(stalled + Duration::from_millis(20));
        assert_eq!(pause, Duration::from_millis(60));
    }

    #[test]
    fn test_pacer_small_lag_keeps_base() {
        let mut pacer = Pacer::new();
        let start = Instant::now();
        pacer.after_send(start);
        // 100 ms behind: below the reset threshold, so the next deadline
        // stays on the original grid and the lag is recovered.
        assert_eq!(
            pacer.after_send(start + Duration::from_millis(180)),
            Duration::ZERO
        );
        assert_eq!(
            pacer.after_send(start + Duration::from_millis(185)),
            Duration::from_millis(55)
        );
    }

    fn spawn_sender_harness(
        queue: mpsc::Receiver<AudioChunk>,
        active: Arc<AtomicBool>,
    ) -> futures::channel::mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let sink = Arc::new(tokio::sync::Mutex::new(tx));
        tokio::spawn(run_sender(
            queue,
            sink,
            "sess".to_string(),
            1,
            active,
            Arc::new(HealthMonitor::new()),
        ));
        rx
    }

    fn decode_request(message: &Message) -> Req {
        match message {
            Message::Binary(bytes) => Req::decode(bytes.as_ref()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_padding_keeps_cadence() {
        // Empty queue for 10 simulated seconds: the sender must synthesize
        // one silence chunk per 80 ms, 125 ± 2 in total.
        let (_tx, rx) = mpsc::channel::<AudioChunk>(SEND_QUEUE_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));
        let mut sink_rx = spawn_sender_harness(rx, Arc::clone(&active));

        tokio::time::sleep(Duration::from_secs(10)).await;
        active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut sent = 0;
        while let Ok(Some(message)) = sink_rx.try_next() {
            let request = decode_request(&message);
            assert_eq!(request.event(), EventType::TaskRequest);
            assert!(request
                .source_audio
                .as_ref()
                .unwrap()
                .binary_data
                .iter()
                .all(|&b| b == 0));
            sent += 1;
        }
        assert!((123..=127).contains(&sent), "sent {sent} chunks in 10 s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_sent_in_capture_order() {
        let (tx, rx) = mpsc::channel::<AudioChunk>(SEND_QUEUE_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));

        for tag in 0..20u8 {
            tx.send(AudioChunk {
                data: vec![tag; 4],
                captured_at: std::time::Instant::now(),
            })
            .await
            .unwrap();
        }

        let mut sink_rx = spawn_sender_harness(rx, Arc::clone(&active));
        tokio::time::sleep(Duration::from_secs(3)).await;
        active.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut captured = Vec::new();
        while let Ok(Some(message)) = sink_rx.try_next() {
            let request = decode_request(&message);
            let data = request.source_audio.unwrap().binary_data;
            if data.iter().any(|&b| b != 0) || data.len() == 4 {
                captured.push(data[0]);
            }
        }
        assert_eq!(captured, (0..20u8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_stops_when_queue_detached() {
        let (tx, rx) = mpsc::channel::<AudioChunk>(SEND_QUEUE_CAPACITY);
        let active = Arc::new(AtomicBool::new(true));
        let mut sink_rx = spawn_sender_harness(rx, Arc::clone(&active));

        tokio::time::sleep(Duration::from_millis(500)).await;
        drop(tx);
        tokio::time::sleep(Duration::from_secs(1)).await;

        // No further frames once the queue owner went away.
        let drained: Vec<_> = std::iter::from_fn(|| sink_rx.try_next().ok().flatten()).collect();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink_rx.try_next().ok().flatten().is_none());
        assert!(!drained.is_empty());
    }
}
