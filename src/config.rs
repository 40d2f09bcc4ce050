//! Configuration management
//!
//! Collects API credentials, audio shape, and translation settings from the
//! environment. Secrets are expected to be resolved by the caller (shell
//! environment, launcher, keychain helper) before the engine starts; this
//! module only reads and validates.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default translation service endpoint.
pub const DEFAULT_WS_URL: &str = "wss://openspeech.bytedance.com/api/v4/ast/v2/translate";

/// Default service resource id.
pub const DEFAULT_RESOURCE_ID: &str = "volc.service_type.10053";

/// Language codes accepted by the service.
pub const SUPPORTED_LANGUAGES: &[&str] = &["zh", "en"];

/// API authentication and endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub app_key: String,
    pub access_key: String,
    pub resource_id: String,
    pub ws_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            app_key: String::new(),
            access_key: String::new(),
            resource_id: DEFAULT_RESOURCE_ID.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
        }
    }
}

/// Capture-side audio shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_ms: u64,
    pub bits: u16,
    /// Input device index; `None` selects the system default.
    pub input_device: Option<usize>,
    /// Output device index; `None` selects the system default.
    pub output_device: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            chunk_ms: 80,
            bits: 16,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Samples per capture chunk (1280 at the defaults).
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_ms / 1000) as usize * self.channels as usize
    }

    /// Bytes per capture chunk (2560 at the defaults).
    pub fn bytes_per_chunk(&self) -> usize {
        self.chunk_samples() * (self.bits as usize / 8)
    }
}

/// Playback-side audio shape requested from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetAudioConfig {
    pub format: String,
    pub rate: u32,
}

impl Default for TargetAudioConfig {
    fn default() -> Self {
        Self {
            // Raw PCM avoids a decode stage on the playback path.
            format: "pcm".to_string(),
            rate: 48_000,
        }
    }
}

/// Translation direction and mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub mode: String,
    pub source_language: String,
    pub target_language: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            mode: "s2s".to_string(),
            source_language: "zh".to_string(),
            target_language: "en".to_string(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub audio: AudioConfig,
    pub target_audio: TargetAudioConfig,
    pub translation: TranslationConfig,
    /// Name fragment of the virtual loopback device used in conference mode.
    pub virtual_device_name: Option<String>,
}

static CONFIG_CACHE: Lazy<Config> = Lazy::new(Config::from_env);

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let audio_defaults = AudioConfig::default();
        let target_defaults = TargetAudioConfig::default();
        let translation_defaults = TranslationConfig::default();

        Self {
            api: ApiConfig {
                app_key: env_var("API_APP_KEY").unwrap_or_default(),
                access_key: env_var("API_ACCESS_KEY").unwrap_or_default(),
                resource_id: env_var("API_RESOURCE_ID")
                    .unwrap_or_else(|| DEFAULT_RESOURCE_ID.to_string()),
                ws_url: env_var("WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
            },
            audio: AudioConfig {
                sample_rate: env_parse("AUDIO_SAMPLE_RATE", audio_defaults.sample_rate),
                channels: env_parse("AUDIO_CHANNELS", audio_defaults.channels),
                chunk_ms: env_parse("AUDIO_CHUNK_MS", audio_defaults.chunk_ms),
                bits: audio_defaults.bits,
                input_device: env_var("AUDIO_INPUT_DEVICE").and_then(|v| v.parse().ok()),
                output_device: env_var("AUDIO_OUTPUT_DEVICE").and_then(|v| v.parse().ok()),
            },
            target_audio: TargetAudioConfig {
                format: env_var("TARGET_AUDIO_FORMAT").unwrap_or(target_defaults.format),
                rate: env_parse("TARGET_AUDIO_RATE", target_defaults.rate),
            },
            translation: TranslationConfig {
                mode: env_var("TRANSLATION_MODE").unwrap_or(translation_defaults.mode),
                source_language: env_var("SOURCE_LANGUAGE")
                    .unwrap_or(translation_defaults.source_language),
                target_language: env_var("TARGET_LANGUAGE")
                    .unwrap_or(translation_defaults.target_language),
            },
            virtual_device_name: env_var("VIRTUAL_AUDIO_DEVICE"),
        }
    }

    /// Read-through cached configuration, loaded from the environment once
    /// per process.
    pub fn cached() -> &'static Config {
        &CONFIG_CACHE
    }

    /// Refuse configurations the service would reject.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.app_key.is_empty() || self.api.access_key.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }
        validate_language_pair(
            &self.translation.source_language,
            &self.translation.target_language,
        )
    }
}

/// Shared language-pair check, also used by `set_language`.
pub fn validate_language_pair(source: &str, target: &str) -> Result<(), ConfigError> {
    for lang in [source, target] {
        if !SUPPORTED_LANGUAGES.contains(&lang) {
            return Err(ConfigError::UnsupportedLanguage(lang.to_string()));
        }
    }
    if source == target {
        return Err(ConfigError::SameLanguage(source.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.chunk_ms, 80);
        assert_eq!(config.target_audio.rate, 48_000);
        assert_eq!(config.target_audio.format, "pcm");
        assert_eq!(config.translation.mode, "s2s");
        assert_eq!(config.api.resource_id, DEFAULT_RESOURCE_ID);
    }

    #[test]
    fn test_chunk_math() {
        let audio = AudioConfig::default();
        assert_eq!(audio.chunk_samples(), 1280);
        assert_eq!(audio.bytes_per_chunk(), 2560);
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_credentials() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_validate_same_language() {
        let mut config = valid_config();
        config.translation.target_language = "zh".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::SameLanguage(_))));
    }

    #[test]
    fn test_validate_unsupported_language() {
        let mut config = valid_config();
        config.translation.source_language = "fr".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedLanguage(_))
        ));
    }
}
