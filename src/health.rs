//! Health monitor
//!
//! Tracks process metrics, session state, buffer depths, and rolling latency
//! means for the translation engine. A background sampler refreshes process
//! metrics every 5 seconds and warns when thresholds are exceeded. Everything
//! lives behind one mutex; `snapshot()` clones the lot atomically.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use sysinfo::{get_current_pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// How often the background sampler refreshes process metrics.
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// Window length for the rolling latency means.
const LATENCY_WINDOW: usize = 100;

/// Capacity of the recent-error ring.
const ERROR_RING_CAPACITY: usize = 10;

/// Maximum stored length of one error message.
const ERROR_MESSAGE_MAX: usize = 200;

// Warning thresholds, checked on every sample.
const THRESHOLD_MEMORY_PERCENT: f32 = 80.0;
const THRESHOLD_THREAD_COUNT: usize = 50;
const THRESHOLD_AUDIO_BUFFER: usize = 80;
const THRESHOLD_SEND_QUEUE: usize = 400;
const THRESHOLD_ERROR_COUNT: u64 = 10;
const THRESHOLD_RECONNECT_COUNT: u64 = 5;

/// Session lifecycle tag mirrored from the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Error,
    Reconnecting,
}

/// One entry in the recent-error ring.
#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub ts: DateTime<Utc>,
    pub message: String,
}

/// Immutable view of the monitor's state, cloned under the lock.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub memory_usage_mb: f64,
    pub memory_percent: f32,
    pub thread_count: usize,
    pub active_tasks: usize,
    pub audio_buffer_size: usize,
    pub send_queue_size: usize,
    pub session_state: SessionState,
    pub reconnect_count: u64,
    pub error_count: u64,
    pub total_sentences: u64,
    pub total_audio_samples: u64,
    pub audio_latency_ms: f64,
    pub websocket_ping_ms: f64,
    pub uptime_seconds: f64,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Debug)]
struct Metrics {
    memory_usage_mb: f64,
    memory_percent: f32,
    thread_count: usize,
    active_tasks: usize,
    audio_buffer_size: usize,
    send_queue_size: usize,
    session_state: SessionState,
    reconnect_count: u64,
    error_count: u64,
    total_sentences: u64,
    total_audio_samples: u64,
    latency_window: VecDeque<f64>,
    ping_window: VecDeque<f64>,
    recent_errors: VecDeque<RecentError>,
}

impl Metrics {
    fn new() -> Self {
        Self {
            memory_usage_mb: 0.0,
            memory_percent: 0.0,
            thread_count: 0,
            active_tasks: 0,
            audio_buffer_size: 0,
            send_queue_size: 0,
            session_state: SessionState::Idle,
            reconnect_count: 0,
            error_count: 0,
            total_sentences: 0,
            total_audio_samples: 0,
            latency_window: VecDeque::with_capacity(LATENCY_WINDOW),
            ping_window: VecDeque::with_capacity(LATENCY_WINDOW),
            recent_errors: VecDeque::with_capacity(ERROR_RING_CAPACITY),
        }
    }

    fn mean(window: &VecDeque<f64>) -> f64 {
        if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        }
    }
}

/// Mutex-guarded metrics plus a start timestamp.
pub struct HealthMonitor {
    metrics: Mutex<Metrics>,
    started_at: Instant,
}

static GLOBAL_MONITOR: Lazy<Arc<HealthMonitor>> = Lazy::new(|| Arc::new(HealthMonitor::new()));

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(Metrics::new()),
            started_at: Instant::now(),
        }
    }

    /// Process-scoped monitor, created lazily on first access. Consumers
    /// take an `Arc` so tests can substitute their own instance instead.
    pub fn global() -> Arc<HealthMonitor> {
        Arc::clone(&GLOBAL_MONITOR)
    }

    /// Spawn the 5-second process-metrics sampler.
    pub fn spawn_sampler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut system = System::new();
            loop {
                monitor.sample_process(&mut system);
                monitor.check_thresholds();
                tokio::time::sleep(SAMPLE_INTERVAL).await;
            }
        })
    }

    fn sample_process(&self, system: &mut System) {
        let Ok(pid) = get_current_pid() else {
            debug!("cannot resolve own pid for process metrics");
            return;
        };
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        let Some(process) = system.process(pid) else {
            return;
        };
        let rss_bytes = process.memory();
        let total = system.total_memory();

        let mut metrics = self.metrics.lock().unwrap();
        metrics.memory_usage_mb = rss_bytes as f64 / 1024.0 / 1024.0;
        metrics.memory_percent = if total > 0 {
            (rss_bytes as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };
        // Per-thread task info is only populated on Linux.
        metrics.thread_count = process.tasks().map_or(0, |tasks| tasks.len());
    }

    fn check_thresholds(&self) {
        let mut warnings: Vec<String> = Vec::new();
        {
            let metrics = self.metrics.lock().unwrap();
            if metrics.memory_percent > THRESHOLD_MEMORY_PERCENT {
                warnings.push(format!("memory usage high: {:.1}%", metrics.memory_percent));
            }
            if metrics.thread_count > THRESHOLD_THREAD_COUNT {
                warnings.push(format!("thread count high: {}", metrics.thread_count));
            }
            if metrics.audio_buffer_size > THRESHOLD_AUDIO_BUFFER {
                warnings.push(format!("audio buffer deep: {}", metrics.audio_buffer_size));
            }
            if metrics.send_queue_size > THRESHOLD_SEND_QUEUE {
                warnings.push(format!("send queue deep: {}", metrics.send_queue_size));
            }
            if metrics.error_count > THRESHOLD_ERROR_COUNT {
                warnings.push(format!("error count high: {}", metrics.error_count));
            }
            if metrics.reconnect_count > THRESHOLD_RECONNECT_COUNT {
                warnings.push(format!("reconnect count high: {}", metrics.reconnect_count));
            }
        }
        for warning in warnings {
            warn!("[health] {}", warning);
        }
    }

    pub fn set_session_state(&self, state: SessionState) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.session_state = state;
        debug!(?state, "session state updated");
    }

    pub fn session_state(&self) -> SessionState {
        self.metrics.lock().unwrap().session_state
    }

    pub fn set_audio_buffer_depth(&self, depth: usize) {
        self.metrics.lock().unwrap().audio_buffer_size = depth;
    }

    pub fn set_send_queue_depth(&self, depth: usize) {
        self.metrics.lock().unwrap().send_queue_size = depth;
    }

    pub fn set_active_tasks(&self, count: usize) {
        self.metrics.lock().unwrap().active_tasks = count;
    }

    /// Feed one end-to-end audio latency sample into the rolling window.
    pub fn record_audio_latency(&self, latency: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        push_window(&mut metrics.latency_window, latency.as_secs_f64() * 1000.0);
    }

    /// Feed one WebSocket ping round-trip into the rolling window.
    pub fn record_ping(&self, round_trip: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        push_window(&mut metrics.ping_window, round_trip.as_secs_f64() * 1000.0);
    }

    pub fn record_error(&self, message: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.error_count += 1;
        if metrics.recent_errors.len() >= ERROR_RING_CAPACITY {
            metrics.recent_errors.pop_front();
        }
        let mut message = message.to_string();
        if message.len() > ERROR_MESSAGE_MAX {
            // Truncate on a character boundary.
            let cut = (1..=ERROR_MESSAGE_MAX)
                .rev()
                .find(|&i| message.is_char_boundary(i))
                .unwrap_or(0);
            message.truncate(cut);
        }
        metrics.recent_errors.push_back(RecentError {
            ts: Utc::now(),
            message,
        });
    }

    pub fn record_reconnect(&self) {
        self.metrics.lock().unwrap().reconnect_count += 1;
    }

    pub fn record_sentence(&self) {
        self.metrics.lock().unwrap().total_sentences += 1;
    }

    pub fn add_audio_samples(&self, count: u64) {
        self.metrics.lock().unwrap().total_audio_samples += count;
    }

    /// Clone every field under the lock.
    pub fn snapshot(&self) -> HealthSnapshot {
        let metrics = self.metrics.lock().unwrap();
        HealthSnapshot {
            memory_usage_mb: metrics.memory_usage_mb,
            memory_percent: metrics.memory_percent,
            thread_count: metrics.thread_count,
            active_tasks: metrics.active_tasks,
            audio_buffer_size: metrics.audio_buffer_size,
            send_queue_size: metrics.send_queue_size,
            session_state: metrics.session_state,
            reconnect_count: metrics.reconnect_count,
            error_count: metrics.error_count,
            total_sentences: metrics.total_sentences,
            total_audio_samples: metrics.total_audio_samples,
            audio_latency_ms: Metrics::mean(&metrics.latency_window),
            websocket_ping_ms: Metrics::mean(&metrics.ping_window),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            recent_errors: metrics.recent_errors.iter().cloned().collect(),
        }
    }

    /// Zero the reconnect/error/sentence counters and clear the error ring.
    pub fn reset_counters(&self) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.reconnect_count = 0;
        metrics.error_count = 0;
        metrics.total_sentences = 0;
        metrics.recent_errors.clear();
        info!("health counters reset");
    }
}

fn push_window(window: &mut VecDeque<f64>, value: f64) {
    if window.len() >= LATENCY_WINDOW {
        window.pop_front();
    }
    window.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_defaults() {
        let monitor = HealthMonitor::new();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.session_state, SessionState::Idle);
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.audio_latency_ms, 0.0);
        assert!(snapshot.recent_errors.is_empty());
    }

    #[test]
    fn test_rolling_mean_window() {
        let monitor = HealthMonitor::new();
        for _ in 0..150 {
            monitor.record_ping(Duration::from_millis(10));
        }
        monitor.record_ping(Duration::from_millis(110));

        let snapshot = monitor.snapshot();
        // Window holds the last 100 samples: 99 × 10 ms + 1 × 110 ms.
        assert!((snapshot.websocket_ping_ms - 11.0).abs() < 0.01);
    }

    #[test]
    fn test_error_ring_capacity_and_truncation() {
        let monitor = HealthMonitor::new();
        for i in 0..15 {
            monitor.record_error(&format!("error {i}"));
        }
        monitor.record_error(&"x".repeat(500));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.error_count, 16);
        assert_eq!(snapshot.recent_errors.len(), 10);
        assert_eq!(snapshot.recent_errors.last().unwrap().message.len(), 200);
        // Oldest entries rolled off the ring.
        assert_eq!(snapshot.recent_errors[0].message, "error 7");
    }

    #[test]
    fn test_reset_counters() {
        let monitor = HealthMonitor::new();
        monitor.record_error("boom");
        monitor.record_reconnect();
        monitor.record_sentence();
        monitor.reset_counters();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.reconnect_count, 0);
        assert_eq!(snapshot.total_sentences, 0);
        assert!(snapshot.recent_errors.is_empty());
    }

    #[test]
    fn test_session_state_round_trip() {
        let monitor = HealthMonitor::new();
        monitor.set_session_state(SessionState::Connected);
        assert_eq!(monitor.session_state(), SessionState::Connected);
        assert_eq!(monitor.snapshot().session_state, SessionState::Connected);
    }
}
