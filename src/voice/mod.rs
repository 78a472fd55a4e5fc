//! Speech engine adapter
//!
//! The session controller talks to speech hardware and services only through
//! [`SpeechEngine`]. Engines report asynchronous happenings (recognizer
//! sessions, transcripts, synthesis progress) on a single ordered
//! [`EngineEvents`] channel created alongside the engine.
//!
//! [`CloudSpeechEngine`] captures and plays audio locally and uses HTTP speech
//! services; [`UnavailableEngine`] stands in when voice is disabled.

mod capture;
mod cloud;
mod playback;
mod segmenter;
mod stt;
mod tts;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use cloud::CloudSpeechEngine;
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, PlaybackEnd, decode_audio};
pub use segmenter::{SegmenterState, UtteranceSegmenter, calculate_energy};
pub use stt::SpeechToText;
pub use tts::TextToSpeech;

use crate::{Error, Result};

/// Something the engine observed or finished, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Continuous recognition session opened
    SessionStarted,
    /// Continuous recognition session closed (requested or not)
    SessionStopped,
    /// Interim transcript of the utterance in progress
    Partial(String),
    /// Final transcript of a completed utterance
    Final(String),
    /// Synthesized audio started playing
    SynthesisStarted,
    /// Synthesized audio played to its end
    SynthesisCompleted,
    /// Synthesized audio stopped early
    SynthesisCanceled,
}

/// How a `speak` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Audio played to its natural end
    Completed,
    /// Synthesis or playback was cut short
    Canceled {
        /// Engine-reported reason
        reason: String,
    },
}

/// Receiving half of an engine's event stream
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Sending half of an engine's event stream
///
/// Sends are best-effort: once the controller is gone events are dropped.
#[derive(Debug, Clone)]
pub struct EventSink(mpsc::UnboundedSender<EngineEvent>);

impl EventSink {
    /// Create a connected sink and event stream
    #[must_use]
    pub fn channel() -> (Self, EngineEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Emit an event
    pub fn emit(&self, event: EngineEvent) {
        tracing::trace!(?event, "engine event");
        if self.0.send(event).is_err() {
            tracing::trace!("engine event dropped, no listener");
        }
    }
}

/// Speech recognition and synthesis capability
///
/// Implementations own the microphone and speaker handles. The controller
/// guarantees it never issues overlapping start/stop calls and never speaks
/// while recognition is running.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Engine name for logging
    fn name(&self) -> &'static str;

    /// Open the microphone and begin continuous recognition
    ///
    /// Resolves once the recognizer is running.
    async fn start_continuous_recognition(&self) -> Result<()>;

    /// Stop continuous recognition and release the microphone
    async fn stop_continuous_recognition(&self) -> Result<()>;

    /// Capture a single utterance and return its transcript
    ///
    /// Returns `None` when nothing intelligible was heard.
    async fn recognize_once(&self) -> Result<Option<String>>;

    /// Synthesize and play `text`, resolving when playback ends
    async fn speak(&self, text: &str) -> Result<SynthesisOutcome>;

    /// Interrupt in-flight playback (best-effort, idempotent)
    async fn cancel_speech(&self) -> Result<()>;

    /// Release every engine resource; later calls fail
    async fn shutdown(&self) -> Result<()>;
}

/// Engine used when voice is disabled or not configured
///
/// Recognition fails with [`Error::EngineUnavailable`]; speech reports a
/// cancellation carrying the reason.
#[derive(Debug, Clone)]
pub struct UnavailableEngine {
    reason: String,
}

impl UnavailableEngine {
    /// Create an unavailable engine with a human-readable reason
    #[must_use]
    pub fn new(reason: impl Into<String>) -> (Self, EngineEvents) {
        let (_sink, events) = EventSink::channel();
        (
            Self {
                reason: reason.into(),
            },
            events,
        )
    }
}

#[async_trait]
impl SpeechEngine for UnavailableEngine {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn start_continuous_recognition(&self) -> Result<()> {
        Err(Error::EngineUnavailable(self.reason.clone()))
    }

    async fn stop_continuous_recognition(&self) -> Result<()> {
        Ok(())
    }

    async fn recognize_once(&self) -> Result<Option<String>> {
        Err(Error::EngineUnavailable(self.reason.clone()))
    }

    async fn speak(&self, _text: &str) -> Result<SynthesisOutcome> {
        Ok(SynthesisOutcome::Canceled {
            reason: self.reason.clone(),
        })
    }

    async fn cancel_speech(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
