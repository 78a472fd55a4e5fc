//! Session state values published by the controller

use serde::Serialize;

use crate::conversation::MessageSnapshot;

/// Whether the voice flow is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Typing only, microphone closed
    #[default]
    TextMode,
    /// Voice flow active
    VoiceMode,
}

/// Recognizer state, including the in-flight transition guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MicState {
    /// Microphone closed
    #[default]
    Idle,
    /// Start requested, waiting for the engine
    Starting,
    /// Continuous recognition running
    Listening,
    /// Stop requested, waiting for the engine
    Stopping,
}

impl MicState {
    /// Whether a start or stop is in flight
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// Snapshot of the controller's session flags
///
/// Replaced as a whole on every transition; never mutated in place by
/// observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionState {
    /// Text or voice mode
    pub mode: Mode,
    /// Microphone state
    pub mic: MicState,
    /// Synthesized audio is playing
    pub speaking: bool,
    /// Composed text or live partial transcript
    pub input: String,
}

impl SessionState {
    /// Voice mode is active
    #[must_use]
    pub fn voice_session(&self) -> bool {
        self.mode == Mode::VoiceMode
    }

    /// Continuous recognition is running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.mic == MicState::Listening
    }

    /// Synthesized audio is playing
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }
}

/// Coarse phase of a voice session, for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Text mode, or voice mode with nothing going on
    #[default]
    Idle,
    /// Microphone open (or opening)
    Listening,
    /// Waiting for a reply
    Thinking,
    /// Reply is being spoken
    Speaking,
    /// Speech was cut short and the mic is not yet back
    Interrupted,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Latest state and conversation, as seen by observers
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    /// Session flags
    pub state: SessionState,
    /// Conversation snapshot
    pub messages: MessageSnapshot,
    /// Display phase
    pub phase: Phase,
}
