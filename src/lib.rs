//! Voice Chat - half-duplex voice conversation with an automated responder
//!
//! This library provides:
//! - The voice session controller (mic, transcripts, replies, playback, barge-in)
//! - An ordered conversation store with in-place placeholder resolution
//! - A speech engine adapter over local audio and HTTP STT/TTS services
//! - A canned response generator
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Presentation (CLI)                    │
//! │   commands ─────────────▲──── SessionView (watch)    │
//! └────────────┬────────────┴────────────────────────────┘
//!              │
//! ┌────────────▼────────────────────────────────────────┐
//! │              Voice Session Controller                │
//! │   SessionState  │  ConversationStore  │  Turn        │
//! └───────┬──────────────────────────────┬──────────────┘
//!         │                              │
//! ┌───────▼────────────────┐   ┌─────────▼──────────────┐
//! │   Speech Engine        │   │  Response Generator    │
//! │  capture │ STT │ TTS   │   │  canned replies        │
//! └────────────────────────┘   └────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod responder;
pub mod session;
pub mod setup;
pub mod voice;

pub use config::Config;
pub use conversation::{ChatMessage, ConversationStore, MessageId, MessageSnapshot, Sender};
pub use error::{Error, Result};
pub use responder::{CannedResponder, ResponseGenerator};
pub use session::{
    MicState, Mode, Phase, SessionHandle, SessionSettings, SessionState, SessionView,
    VoiceSession,
};
pub use voice::{
    CloudSpeechEngine, EngineEvent, EngineEvents, EventSink, SpeechEngine, SynthesisOutcome,
    UnavailableEngine,
};
