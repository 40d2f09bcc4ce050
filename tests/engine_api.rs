//! Integration tests for the public engine API: configuration validation,
//! protocol framing, subscriber dispatch, and the health surface. Nothing
//! here touches real audio hardware or the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use voicebridge::config::{ApiConfig, Config};
use voicebridge::engine::{EngineState, SubscriberSet, SubtitleSink, Translator};
use voicebridge::health::{HealthMonitor, SessionState};
use voicebridge::logging;
use voicebridge::protocol::{self, EventType, TranslateRequest};
use voicebridge::{ConfigError, EngineError};

fn valid_config() -> Config {
    Config {
        api: ApiConfig {
            app_key: "test-app".to_string(),
            access_key: "test-access".to_string(),
            ..ApiConfig::default()
        },
        ..Config::default()
    }
}

#[test]
fn test_start_session_frame_round_trips() {
    let config = valid_config();
    let request = TranslateRequest::start_session("session-1", &config);
    let bytes = protocol::encode(&request);
    assert!(!bytes.is_empty());

    // The request re-parses as a well-formed frame; the discriminator and
    // the audio shapes survive.
    assert_eq!(request.event(), EventType::StartSession);
    assert_eq!(request.source_audio.as_ref().unwrap().rate, 16_000);
    assert_eq!(request.target_audio.as_ref().unwrap().rate, 48_000);
}

#[test]
fn test_decode_rejects_garbage() {
    let err = protocol::decode(&[0x08]).unwrap_err();
    assert_eq!(err.raw_len, 1);
}

#[test]
fn test_config_validation_matrix() {
    assert!(valid_config().validate().is_ok());

    let mut missing = valid_config();
    missing.api.app_key.clear();
    assert!(matches!(
        missing.validate(),
        Err(ConfigError::MissingCredentials)
    ));

    let mut same = valid_config();
    same.translation.target_language = same.translation.source_language.clone();
    assert!(matches!(same.validate(), Err(ConfigError::SameLanguage(_))));

    let mut unsupported = valid_config();
    unsupported.translation.target_language = "de".to_string();
    assert!(matches!(
        unsupported.validate(),
        Err(ConfigError::UnsupportedLanguage(_))
    ));
}

#[tokio::test]
async fn test_engine_lifecycle_without_credentials() {
    let engine = Translator::with_health(Config::default(), Arc::new(HealthMonitor::new()));
    assert_eq!(engine.state(), EngineState::Idle);

    let err = engine.start().await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(engine.state(), EngineState::Idle);

    // Stop on an idle engine is a no-op, twice over.
    engine.stop().await;
    engine.stop().await;
    assert_eq!(engine.state(), EngineState::Idle);
}

#[tokio::test]
async fn test_set_language_on_idle_engine() {
    let engine = Translator::with_health(valid_config(), Arc::new(HealthMonitor::new()));
    engine.set_language("en", "zh").await.unwrap();
    assert!(engine.set_language("en", "en").await.is_err());
    assert_eq!(engine.state(), EngineState::Idle);
}

struct Collector {
    calls: AtomicUsize,
}

impl SubtitleSink for Collector {
    fn on_source_sentence(&self, _: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
    fn on_translation_sentence(&self, _: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_subscriber_set_dispatches_to_all_sinks() {
    let set = SubscriberSet::default();
    let first = Arc::new(Collector {
        calls: AtomicUsize::new(0),
    });
    let second = Arc::new(Collector {
        calls: AtomicUsize::new(0),
    });
    set.add(Arc::clone(&first) as Arc<dyn SubtitleSink>);
    set.add(Arc::clone(&second) as Arc<dyn SubtitleSink>);

    set.emit_source("你好世界");
    set.emit_translation("Hello world");

    assert_eq!(first.calls.load(Ordering::SeqCst), 2);
    assert_eq!(second.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_health_snapshot_surface() {
    let monitor = HealthMonitor::new();
    monitor.set_session_state(SessionState::Connecting);
    monitor.record_error("dial failed");
    monitor.record_ping(Duration::from_millis(42));

    let snapshot = monitor.snapshot();
    assert_eq!(snapshot.session_state, SessionState::Connecting);
    assert_eq!(snapshot.error_count, 1);
    assert!((snapshot.websocket_ping_ms - 42.0).abs() < 1.0);

    // The snapshot serializes for UI consumption.
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(json.contains("\"session_state\":\"connecting\""));
}

#[test]
fn test_log_redaction_covers_headers_and_env_keys() {
    let line = "connect X-Api-App-Key: k-123 X-Api-Access-Key=s-456 API_RESOURCE_ID=volc.x";
    let redacted = logging::redact(line);
    assert!(!redacted.contains("k-123"));
    assert!(!redacted.contains("s-456"));
    assert!(!redacted.contains("volc.x"));
}
