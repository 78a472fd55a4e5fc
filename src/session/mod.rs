//! Voice session controller
//!
//! [`VoiceSession`] coordinates the microphone, transcripts, reply generation
//! and playback for one conversation. It is driven through a
//! [`SessionHandle`] and publishes a [`SessionView`] on every change.

mod controller;
mod state;

pub use controller::{SessionHandle, SessionSettings, VoiceSession};
pub use state::{MicState, Mode, Phase, SessionState, SessionView};
