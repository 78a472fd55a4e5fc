//! Utterance segmentation
//!
//! Splits a continuous microphone stream into utterances using local energy
//! detection. An utterance ends after the configured end-of-speech silence.

use std::time::Duration;

use super::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep an utterance (0.3 seconds)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating the utterance
    Speaking,
}

/// Detects utterance boundaries in a sample stream
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
    silence_samples: usize,
    partial_samples: Option<usize>,
    last_partial_len: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter
    ///
    /// # Arguments
    ///
    /// * `end_silence` - Silence after speech that completes an utterance
    /// * `partial_interval` - Speech growth between interim snapshots, if any
    #[must_use]
    pub fn new(end_silence: Duration, partial_interval: Option<Duration>) -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
            silence_samples: duration_to_samples(end_silence),
            partial_samples: partial_interval.map(duration_to_samples).filter(|&n| n > 0),
            last_partial_len: 0,
        }
    }

    /// Feed captured samples
    ///
    /// Returns the completed utterance once enough speech has been followed by
    /// the end-of-speech silence. The segmenter is reset afterwards.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    self.last_partial_len = 0;
                    tracing::trace!(energy, "speech detected");
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.silence_samples {
                    if self.speech_buffer.len() > MIN_SPEECH_SAMPLES + self.silence_counter {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        let utterance = std::mem::take(&mut self.speech_buffer);
                        self.reset();
                        return Some(utterance);
                    }

                    tracing::trace!("too little speech before silence, discarding");
                    self.reset();
                }
                None
            }
        }
    }

    /// Snapshot of the utterance in progress, at most once per partial interval
    pub fn interim(&mut self) -> Option<Vec<f32>> {
        let step = self.partial_samples?;
        if self.state != SegmenterState::Speaking
            || self.speech_buffer.len() < self.last_partial_len + step
        {
            return None;
        }

        self.last_partial_len = self.speech_buffer.len();
        Some(self.speech_buffer.clone())
    }

    /// Drain whatever speech has been buffered, complete or not
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let has_speech = self.state == SegmenterState::Speaking
            && self.speech_buffer.len() > MIN_SPEECH_SAMPLES;
        let utterance = std::mem::take(&mut self.speech_buffer);
        self.reset();
        has_speech.then_some(utterance)
    }

    /// Reset to the idle state
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
        self.last_partial_len = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Samples buffered for the utterance in progress
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.speech_buffer.len()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn duration_to_samples(d: Duration) -> usize {
    (d.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
