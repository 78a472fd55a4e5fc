//! TOML configuration file loading
//!
//! Supports `~/.config/voice-chat/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{ListenMode, OutputFormat, SttProvider, TtsProvider};
use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Session controller configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice processing configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// "continuous" or "push-to-talk"
    pub listen_mode: Option<ListenMode>,

    /// Recognition locale (e.g. "en-US")
    pub locale: Option<String>,

    /// STT backend ("whisper" or "deepgram")
    pub stt_provider: Option<SttProvider>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS backend ("openai" or "elevenlabs")
    pub tts_provider: Option<TtsProvider>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,

    /// Synthesizer output format ("mp3" or "pcm")
    pub output_format: Option<OutputFormat>,

    /// Silence after speech that ends an utterance
    pub end_silence_timeout_ms: Option<u64>,

    /// Interval between partial transcripts (0 disables them)
    pub partial_interval_ms: Option<u64>,
}

/// Session controller configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Speak bot replies aloud
    pub speak_replies: Option<bool>,

    /// Artificial reply latency
    pub response_delay_ms: Option<u64>,

    /// Grace delay before re-arming the mic
    pub rearm_delay_ms: Option<u64>,

    /// Initial bot message
    pub greeting: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Write the config file, creating its parent directory
///
/// # Errors
///
/// Returns error if the file cannot be serialized or written
pub fn write_config_file(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| crate::Error::Config(format!("failed to serialize config: {e}")))?;
    std::fs::write(path, content)?;

    Ok(())
}

/// Return the config file path: `~/.config/voice-chat/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-chat").join("config.toml"))
}
