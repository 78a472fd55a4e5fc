//! Configuration management for the voice chat session

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Greeting shown before the first turn
pub const DEFAULT_GREETING: &str = "Hello! Tap Mic or type a message.";

/// Voice chat configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Speech engine configuration
    pub voice: VoiceConfig,

    /// Session controller timing and behavior
    pub session: SessionConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// How the microphone is driven while in voice mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenMode {
    /// Recognizer stays open and emits partial/final transcripts until stopped
    #[default]
    Continuous,
    /// One-shot recognition per tap
    PushToTalk,
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    /// `OpenAI` Whisper
    #[default]
    Whisper,
    /// Deepgram
    Deepgram,
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `OpenAI` speech
    #[default]
    OpenAi,
    /// ElevenLabs
    ElevenLabs,
}

/// Audio format requested from the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// MP3, decoded locally before playback
    #[default]
    #[serde(rename = "mp3")]
    Mp3,
    /// Raw 24 kHz 16-bit little-endian mono PCM
    #[serde(rename = "pcm")]
    Pcm24Khz16BitMono,
}

/// Speech engine configuration, fixed once the engine is constructed
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input/output
    pub enabled: bool,

    /// Continuous or push-to-talk listening
    pub listen_mode: ListenMode,

    /// Recognition language tag (e.g. "en-US")
    pub locale: String,

    /// Speech-to-text backend
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// Text-to-speech backend
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,

    /// Synthesizer output format
    pub output_format: OutputFormat,

    /// Silence after speech that ends an utterance
    pub end_silence_timeout: Duration,

    /// Interval between interim transcriptions; `None` disables partial results
    pub partial_interval: Option<Duration>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_mode: ListenMode::Continuous,
            locale: "en-US".to_string(),
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            output_format: OutputFormat::Mp3,
            end_silence_timeout: Duration::from_millis(1100),
            partial_interval: Some(Duration::from_millis(1500)),
        }
    }
}

impl VoiceConfig {
    /// Language part of the locale ("en-US" -> "en"), as expected by STT APIs
    #[must_use]
    pub fn language(&self) -> &str {
        self.locale
            .split(['-', '_'])
            .next()
            .unwrap_or(&self.locale)
    }
}

/// Session controller configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Speak bot replies through the synthesizer
    pub speak_replies: bool,

    /// Artificial latency before a reply resolves
    pub response_delay: Duration,

    /// Grace period before the mic is re-armed after a reply
    pub rearm_delay: Duration,

    /// Initial bot message (empty for none)
    pub greeting: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speak_replies: true,
            response_delay: Duration::from_millis(2000),
            rearm_delay: Duration::from_millis(120),
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,
}

impl FromStr for ListenMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "continuous" => Ok(Self::Continuous),
            "push-to-talk" | "push_to_talk" | "ptt" => Ok(Self::PushToTalk),
            other => Err(Error::Config(format!("unknown listen mode: {other}"))),
        }
    }
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "pcm" | "pcm-24khz-16bit-mono" => Ok(Self::Pcm24Khz16BitMono),
            other => Err(Error::Config(format!("unknown output format: {other}"))),
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, &|key| std::env::var(key).ok(), disable_voice)
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > file > default.
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed or out of range
    pub fn from_sources(
        fc: file::ConfigFile,
        env: &dyn Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Result<Self> {
        let defaults = VoiceConfig::default();

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
        };

        // Voice config (env > toml > default)
        let enabled = !disable_voice
            && parse_env(env, "VOICE_CHAT_VOICE_ENABLED")?
                .or(fc.voice.enabled)
                .unwrap_or(defaults.enabled);

        let tts_speed = parse_env(env, "VOICE_CHAT_TTS_SPEED")?
            .or(fc.voice.tts_speed)
            .unwrap_or(defaults.tts_speed);
        if !(0.25..=4.0).contains(&tts_speed) {
            return Err(Error::Config(format!(
                "tts_speed must be between 0.25 and 4.0, got {tts_speed}"
            )));
        }

        let end_silence_ms: u64 = parse_env(env, "VOICE_CHAT_END_SILENCE_MS")?
            .or(fc.voice.end_silence_timeout_ms)
            .unwrap_or(1100);
        if end_silence_ms == 0 {
            return Err(Error::Config(
                "end_silence_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let partial_ms: u64 = parse_env(env, "VOICE_CHAT_PARTIAL_INTERVAL_MS")?
            .or(fc.voice.partial_interval_ms)
            .unwrap_or(1500);

        let voice = VoiceConfig {
            enabled,
            listen_mode: parse_env(env, "VOICE_CHAT_LISTEN_MODE")?
                .or(fc.voice.listen_mode)
                .unwrap_or(defaults.listen_mode),
            locale: env("VOICE_CHAT_LOCALE")
                .or(fc.voice.locale)
                .unwrap_or(defaults.locale),
            stt_provider: parse_env(env, "VOICE_CHAT_STT_PROVIDER")?
                .or(fc.voice.stt_provider)
                .unwrap_or(defaults.stt_provider),
            stt_model: env("VOICE_CHAT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_provider: parse_env(env, "VOICE_CHAT_TTS_PROVIDER")?
                .or(fc.voice.tts_provider)
                .unwrap_or(defaults.tts_provider),
            tts_model: env("VOICE_CHAT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: env("VOICE_CHAT_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_speed,
            output_format: parse_env(env, "VOICE_CHAT_OUTPUT_FORMAT")?
                .or(fc.voice.output_format)
                .unwrap_or(defaults.output_format),
            end_silence_timeout: Duration::from_millis(end_silence_ms),
            partial_interval: (partial_ms > 0).then_some(Duration::from_millis(partial_ms)),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        // Session config (env > toml > default)
        let session_defaults = SessionConfig::default();
        let session = SessionConfig {
            speak_replies: parse_env(env, "VOICE_CHAT_SPEAK_REPLIES")?
                .or(fc.session.speak_replies)
                .unwrap_or(session_defaults.speak_replies),
            response_delay: parse_env(env, "VOICE_CHAT_RESPONSE_DELAY_MS")?
                .or(fc.session.response_delay_ms)
                .map_or(session_defaults.response_delay, Duration::from_millis),
            rearm_delay: parse_env(env, "VOICE_CHAT_REARM_DELAY_MS")?
                .or(fc.session.rearm_delay_ms)
                .map_or(session_defaults.rearm_delay, Duration::from_millis),
            greeting: fc.session.greeting.unwrap_or(session_defaults.greeting),
        };

        Ok(Self {
            voice,
            session,
            api_keys,
        })
    }
}

/// Parse an optional env value, reporting malformed input as a config error
fn parse_env<T>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        })
        .transpose()
}
