//! Error types for the voice chat session

use thiserror::Error;

/// Result type alias for voice chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice chat session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Continuous recognition could not be started
    #[error("engine start failed: {0}")]
    EngineStart(String),

    /// Continuous recognition could not be stopped
    #[error("engine stop failed: {0}")]
    EngineStop(String),

    /// Speech engine is not available (disabled, missing credentials, or shut down)
    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Synthesis ended before playback completed
    #[error("TTS canceled: {reason}")]
    SynthesisCanceled {
        /// Reason reported by the engine
        reason: String,
    },

    /// Response generator failed to produce a reply
    #[error("response generation failed: {0}")]
    ResponseGeneration(String),

    /// The session controller has stopped
    #[error("voice session closed")]
    SessionClosed,

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
