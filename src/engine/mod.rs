//! Translation engine orchestrator.
//!
//! Wires capture into the paced sender and the receiver into playback,
//! owns the supervisor, and exposes the public control surface:
//! start / stop / set_language / set_devices plus subtitle subscriptions.
//!
//! Start and stop transitions are serialized on one async mutex; an atomic
//! pair distinguishes `Starting` from `Active` so a UI can poll the state
//! without racing the transition.

pub mod supervisor;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audio::{AudioIoHandle, CaptureBridge, PlayerHandle};
use crate::config::{self, Config};
use crate::error::EngineError;
use crate::health::{HealthMonitor, SessionState};
use supervisor::SupervisorShared;

/// Ceiling for joining workers during `stop()`.
const STOP_DEADLINE: Duration = Duration::from_secs(10);

/// Coarse engine state for UIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Starting,
    Active,
}

/// Receiver-side subtitle consumers. Callbacks run serialized on the
/// receiver task and must not block.
pub trait SubtitleSink: Send + Sync {
    fn on_source_sentence(&self, text: &str);
    fn on_translation_sentence(&self, text: &str);
}

/// Registered subtitle subscribers. A panicking subscriber is logged and
/// never kills the session.
#[derive(Default)]
pub struct SubscriberSet {
    sinks: Mutex<Vec<Arc<dyn SubtitleSink>>>,
}

impl SubscriberSet {
    pub fn add(&self, sink: Arc<dyn SubtitleSink>) {
        self.sinks.lock().unwrap().push(sink);
    }

    pub fn emit_source(&self, text: &str) {
        for sink in self.sinks.lock().unwrap().iter() {
            if catch_unwind(AssertUnwindSafe(|| sink.on_source_sentence(text))).is_err() {
                warn!("subtitle subscriber panicked in on_source_sentence");
            }
        }
    }

    pub fn emit_translation(&self, text: &str) {
        for sink in self.sinks.lock().unwrap().iter() {
            if catch_unwind(AssertUnwindSafe(|| sink.on_translation_sentence(text))).is_err() {
                warn!("subtitle subscriber panicked in on_translation_sentence");
            }
        }
    }
}

struct EngineRuntime {
    audio: AudioIoHandle,
    supervisor: JoinHandle<()>,
    shared: Arc<SupervisorShared>,
}

/// The realtime translation engine.
pub struct Translator {
    config: Mutex<Config>,
    health: Arc<HealthMonitor>,
    subscribers: Arc<SubscriberSet>,
    bridge: CaptureBridge,
    player: PlayerHandle,
    /// Serializes start/stop transitions and holds the live runtime.
    runtime: tokio::sync::Mutex<Option<EngineRuntime>>,
    starting: AtomicBool,
    running: Arc<AtomicBool>,
    crashed: Arc<Notify>,
}

impl Translator {
    /// Build an engine reporting into the process-wide health monitor.
    pub fn new(config: Config) -> Self {
        Self::with_health(config, HealthMonitor::global())
    }

    /// Build an engine with an explicit health monitor (tests substitute a
    /// private instance here).
    pub fn with_health(config: Config, health: Arc<HealthMonitor>) -> Self {
        let player = PlayerHandle::new(Arc::clone(&health));
        Self {
            config: Mutex::new(config),
            health,
            subscribers: Arc::new(SubscriberSet::default()),
            bridge: CaptureBridge::new(),
            player,
            runtime: tokio::sync::Mutex::new(None),
            starting: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            crashed: Arc::new(Notify::new()),
        }
    }

    /// Register a subtitle subscriber.
    pub fn subscribe(&self, sink: Arc<dyn SubtitleSink>) {
        self.subscribers.add(sink);
    }

    pub fn health(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    pub fn state(&self) -> EngineState {
        if self.starting.load(Ordering::SeqCst) {
            EngineState::Starting
        } else if self.running.load(Ordering::SeqCst) {
            EngineState::Active
        } else {
            EngineState::Idle
        }
    }

    /// Resolves when the engine dies while it was supposed to keep running.
    pub async fn crashed(&self) {
        self.crashed.notified().await;
    }

    /// Start the engine: validate configuration, open audio, spawn the
    /// supervisor. Idempotent: a second call while starting or active is a
    /// no-op.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            debug!("start: engine already active");
            return Ok(());
        }
        self.starting.store(true, Ordering::SeqCst);
        let result = self.start_locked(&mut runtime).await;
        self.starting.store(false, Ordering::SeqCst);
        result
    }

    async fn start_locked(
        &self,
        runtime: &mut Option<EngineRuntime>,
    ) -> Result<(), EngineError> {
        let config = self.config.lock().unwrap().clone();
        config.validate()?;

        let audio = AudioIoHandle::spawn(self.bridge.clone(), self.player.clone())?;
        audio.start_playback(
            config.audio.output_device,
            config.virtual_device_name.clone(),
        )?;
        audio.start_capture(config.audio.input_device)?;

        self.running.store(true, Ordering::SeqCst);
        let shared = Arc::new(SupervisorShared {
            config,
            running: Arc::clone(&self.running),
            session: tokio::sync::Mutex::new(None),
            bridge: self.bridge.clone(),
            player: self.player.clone(),
            subscribers: Arc::clone(&self.subscribers),
            health: Arc::clone(&self.health),
        });

        let supervisor_shared = Arc::clone(&shared);
        let running = Arc::clone(&self.running);
        let crashed = Arc::clone(&self.crashed);
        let supervisor = tokio::spawn(async move {
            supervisor::run(supervisor_shared).await;
            if running.load(Ordering::SeqCst) {
                warn!("supervisor exited while the engine was running");
                crashed.notify_one();
            }
        });

        *runtime = Some(EngineRuntime {
            audio,
            supervisor,
            shared,
        });
        info!("translation engine started");
        Ok(())
    }

    /// Stop the engine. Idempotent; joins workers with a 10 s deadline and
    /// abandons them with a warning past it.
    pub async fn stop(&self) {
        let mut runtime_guard = self.runtime.lock().await;
        let Some(runtime) = runtime_guard.take() else {
            debug!("stop: engine already idle");
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let EngineRuntime {
            audio,
            supervisor,
            shared,
        } = runtime;

        let teardown = async {
            supervisor.abort();
            if let Some(session) = shared.session.lock().await.take() {
                session
                    .close(&shared.bridge, &shared.player, &shared.health)
                    .await;
            }
        };
        if timeout(STOP_DEADLINE, teardown).await.is_err() {
            warn!(
                "engine teardown exceeded {}s deadline, abandoning workers",
                STOP_DEADLINE.as_secs()
            );
        }

        audio.stop_capture();
        audio.stop_playback();
        drop(audio);

        self.bridge.detach_queue();
        self.player.clear();
        self.health.set_session_state(SessionState::Idle);
        info!("translation engine stopped");
    }

    /// Change the translation direction; restarts a running engine.
    pub async fn set_language(&self, source: &str, target: &str) -> Result<(), EngineError> {
        config::validate_language_pair(source, target)?;
        {
            let mut config = self.config.lock().unwrap();
            config.translation.source_language = source.to_string();
            config.translation.target_language = target.to_string();
        }
        info!("language pair set to {source} → {target}");
        self.restart_if_running().await
    }

    /// Change the audio devices; restarts a running engine.
    pub async fn set_devices(
        &self,
        input_device: Option<usize>,
        output_device: Option<usize>,
    ) -> Result<(), EngineError> {
        {
            let mut config = self.config.lock().unwrap();
            config.audio.input_device = input_device;
            config.audio.output_device = output_device;
        }
        info!(?input_device, ?output_device, "audio devices set");
        self.restart_if_running().await
    }

    async fn restart_if_running(&self) -> Result<(), EngineError> {
        let was_running = self.runtime.lock().await.is_some();
        if !was_running {
            return Ok(());
        }
        self.stop().await;
        self.start().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use crate::error::ConfigError;

    fn valid_config() -> Config {
        Config {
            api: ApiConfig {
                app_key: "app".to_string(),
                access_key: "access".to_string(),
                ..ApiConfig::default()
            },
            ..Config::default()
        }
    }

    struct PanickySink;
    impl SubtitleSink for PanickySink {
        fn on_source_sentence(&self, _: &str) {
            panic!("subscriber bug");
        }
        fn on_translation_sentence(&self, _: &str) {
            panic!("subscriber bug");
        }
    }

    struct CountingSink(std::sync::atomic::AtomicUsize);
    impl SubtitleSink for CountingSink {
        fn on_source_sentence(&self, _: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_translation_sentence(&self, _: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscriber_panic_is_contained() {
        let set = SubscriberSet::default();
        let counting = Arc::new(CountingSink(std::sync::atomic::AtomicUsize::new(0)));
        set.add(Arc::new(PanickySink));
        set.add(Arc::clone(&counting) as Arc<dyn SubtitleSink>);

        set.emit_source("hello");
        set.emit_translation("world");

        // The panicking subscriber never blocked the healthy one.
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_engine_starts_idle() {
        let engine =
            Translator::with_health(valid_config(), Arc::new(HealthMonitor::new()));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_start_refuses_invalid_config() {
        let engine =
            Translator::with_health(Config::default(), Arc::new(HealthMonitor::new()));
        let err = engine.start().await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::MissingCredentials)
        ));
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let engine =
            Translator::with_health(valid_config(), Arc::new(HealthMonitor::new()));
        engine.stop().await;
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_set_language_validates_pair() {
        let engine =
            Translator::with_health(valid_config(), Arc::new(HealthMonitor::new()));
        assert!(engine.set_language("zh", "zh").await.is_err());
        assert!(engine.set_language("zh", "xx").await.is_err());
        // Valid pair on an idle engine just mutates the config.
        assert!(engine.set_language("en", "zh").await.is_ok());
        assert_eq!(engine.state(), EngineState::Idle);
    }
}
