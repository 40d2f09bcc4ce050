//! Session heartbeat.
//!
//! The service offers no protocol-level keepalive, so the session pings the
//! socket every 30 s. Pongs arrive on the receive half of the split socket,
//! so ping round-trips are correlated through [`PingState`]: the heartbeat
//! marks the send time, the receiver reports the pong.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::health::HealthMonitor;

/// Interval between WebSocket pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for the matching pong.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared ping bookkeeping between the heartbeat and receiver tasks.
#[derive(Default)]
pub struct PingState {
    sent_at: Mutex<Option<Instant>>,
    pong: Notify,
}

impl PingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the heartbeat just before sending a ping.
    pub fn mark_sent(&self) {
        *self.sent_at.lock().unwrap() = Some(Instant::now());
    }

    /// Called by the receiver when a pong frame arrives. Feeds the rolling
    /// ping mean and wakes the waiting heartbeat.
    pub fn on_pong(&self, health: &HealthMonitor) {
        if let Some(sent_at) = self.sent_at.lock().unwrap().take() {
            health.record_ping(sent_at.elapsed());
        }
        self.pong.notify_one();
    }

    pub async fn wait_pong(&self) {
        self.pong.notified().await;
    }
}

/// Heartbeat task: ping every 30 s, await the pong with a 10 s ceiling.
/// A timed-out pong is only a warning (the session is kept); a failed send
/// means the socket is gone and the heartbeat ends.
pub(crate) async fn run_heartbeat<S>(
    sink: Arc<tokio::sync::Mutex<S>>,
    ping: Arc<PingState>,
    active: Arc<AtomicBool>,
    serial: u64,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while active.load(Ordering::SeqCst) {
        sleep(HEARTBEAT_INTERVAL).await;
        if !active.load(Ordering::SeqCst) {
            break;
        }

        ping.mark_sent();
        if let Err(e) = sink.lock().await.send(Message::Ping(Bytes::new())).await {
            warn!(session = serial, "connection closed, stopping heartbeat: {e}");
            break;
        }

        if timeout(PONG_TIMEOUT, ping.wait_pong()).await.is_err() {
            warn!(session = serial, "heartbeat timed out; network may be unstable");
        }
    }
    debug!(session = serial, "heartbeat task finished");
}
